//! Demonstrates two queues of different priority stitching their
//! records into a single modem packet, and the receiving side
//! splitting them back apart.

use anyhow::Result;
use log::info;

use dccl::constants::BROADCAST_ID;
use dccl::header::{self, HeaderFields};
use dccl::message;
use dccl::queue::QueueConfig;
use dccl::queue_manager::{DataRequest, QueueKey, QueueManager};
use dccl::registry::Registry;
use dccl::schema::{FieldDescriptor, FieldType, RecordSchemaBuilder, Section};
use dccl::value::{FieldValue, Record};

const DEPTH_ID: u32 = 10;
const HEADING_ID: u32 = 11;

fn build_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register_record(
            RecordSchemaBuilder::new("depth", DEPTH_ID)
                .field(FieldDescriptor::new(
                    "meters",
                    FieldType::BoundedInt { lo: 0, hi: 500, bits: None },
                    Section::Body,
                ))
                .build(),
        )
        .unwrap();
    registry
        .register_record(
            RecordSchemaBuilder::new("heading", HEADING_ID)
                .field(FieldDescriptor::new(
                    "degrees",
                    FieldType::BoundedInt { lo: 0, hi: 359, bits: None },
                    Section::Body,
                ))
                .build(),
        )
        .unwrap();
    registry
}

fn encode(registry: &Registry, dccl_id: u32, field: &str, value: i64, destination: u32) -> Vec<u8> {
    let layout = registry.header_layout();
    let header = HeaderFields {
        dccl_id,
        multi_frame: false,
        broadcast: destination == BROADCAST_ID,
        source: 1,
        destination,
        time: 0,
    };
    let mut bits = header::encode_header(&header, &layout).unwrap();
    let schema = registry.schema_by_dccl_id(dccl_id).unwrap();
    let record = Record::new().with(field, FieldValue::Int(value));
    bits.append(&message::encode_record(registry, schema, &record).unwrap());
    bits.to_bytes()
}

pub fn main() -> Result<()> {
    stderrlog::new()
        .module(module_path!())
        .module("dccl")
        .quiet(false)
        .verbosity(3)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let registry = build_registry();
    let mut manager = QueueManager::new(&registry, 99);
    let depth_key = QueueKey::dccl(DEPTH_ID);
    let heading_key = QueueKey::dccl(HEADING_ID);

    manager.add_queue(depth_key, QueueConfig { priority_base: 10.0, ..QueueConfig::default() })?;
    manager.add_queue(heading_key, QueueConfig { priority_base: 5.0, ..QueueConfig::default() })?;

    manager.push(depth_key, encode(&registry, DEPTH_ID, "meters", 42, 7), Some(false))?;
    manager.push(heading_key, encode(&registry, HEADING_ID, "degrees", 270, 7), Some(false))?;

    manager.callbacks_mut().on_receive = Some(Box::new(|key, payload, destination| {
        info!("received {key} ({} bytes) for destination {destination}", payload.len());
    }));

    let packet = manager.handle_modem_data_request(DataRequest { frame: 0, max_bytes: 25, destination_hint: None });
    info!("stitched packet: {} bytes", packet.len());
    manager.handle_modem_receive(&packet);

    Ok(())
}
