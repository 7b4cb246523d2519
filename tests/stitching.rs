//! Frame stitching and unstitching end to end, against the public
//! `QueueManager` API: two queues sharing one packet, and a packet
//! whose second user-frame targets the broadcast address.

use std::cell::RefCell;

use anyhow::Result;

use dccl::constants::BROADCAST_ID;
use dccl::header::{self, HeaderFields};
use dccl::message;
use dccl::queue::QueueConfig;
use dccl::queue_manager::{DataRequest, QueueKey, QueueManager};
use dccl::registry::Registry;
use dccl::schema::{FieldDescriptor, FieldType, RecordSchemaBuilder, Section};
use dccl::value::{FieldValue, Record};

fn registry_with_flag_records(ids: &[u32]) -> Registry {
    let mut registry = Registry::new();
    for &id in ids {
        let schema = RecordSchemaBuilder::new(format!("msg{id}"), id)
            .field(FieldDescriptor::new("flag", FieldType::Bool, Section::Body))
            .build();
        registry.register_record(schema).unwrap();
    }
    registry
}

fn encode_standalone(registry: &Registry, dccl_id: u32, destination: u32) -> Vec<u8> {
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
    let record = Record::new().with("flag", FieldValue::Bool(true));
    let body = message::encode_record(registry, schema, &record).unwrap();
    bits.append(&body);
    bits.to_bytes()
}

#[test]
fn two_queues_stitch_into_one_packet_in_priority_order() -> Result<()> {
    let registry = registry_with_flag_records(&[10, 11]);
    let mut manager = QueueManager::new(&registry, 99);
    let q1 = QueueKey::dccl(10);
    let q2 = QueueKey::dccl(11);
    manager.add_queue(q1, QueueConfig { priority_base: 10.0, ..QueueConfig::default() })?;
    manager.add_queue(q2, QueueConfig { priority_base: 5.0, ..QueueConfig::default() })?;

    let p1 = encode_standalone(&registry, 10, 7);
    let p2 = encode_standalone(&registry, 11, 7);
    manager.push(q1, p1, Some(false))?;
    manager.push(q2, p2, Some(false))?;

    let received: RefCell<Vec<(QueueKey, u32)>> = RefCell::new(Vec::new());
    manager.callbacks_mut().on_receive = Some(Box::new(|key, _payload, dest| {
        received.borrow_mut().push((key, dest));
    }));

    let packet = manager.handle_modem_data_request(DataRequest { frame: 0, max_bytes: 25, destination_hint: None });
    manager.handle_modem_receive(&packet);

    assert_eq!(received.into_inner(), vec![(q1, 7), (q2, 7)]);
    Ok(())
}

#[test]
fn broadcast_flag_survives_stitch_and_receive() -> Result<()> {
    let registry = registry_with_flag_records(&[20, 21]);
    let mut manager = QueueManager::new(&registry, 99);
    let q1 = QueueKey::dccl(20);
    let q2 = QueueKey::dccl(21);
    manager.add_queue(q1, QueueConfig { priority_base: 10.0, ..QueueConfig::default() })?;
    manager.add_queue(q2, QueueConfig { priority_base: 5.0, ..QueueConfig::default() })?;

    let p1 = encode_standalone(&registry, 20, 7);
    let p2 = encode_standalone(&registry, 21, BROADCAST_ID);
    manager.push(q1, p1, Some(false))?;
    manager.push(q2, p2, Some(false))?;

    let received: RefCell<Vec<(QueueKey, u32)>> = RefCell::new(Vec::new());
    manager.callbacks_mut().on_receive = Some(Box::new(|key, _payload, dest| {
        received.borrow_mut().push((key, dest));
    }));

    let packet = manager.handle_modem_data_request(DataRequest { frame: 0, max_bytes: 25, destination_hint: None });
    manager.handle_modem_receive(&packet);

    assert_eq!(received.into_inner(), vec![(q1, 7), (q2, BROADCAST_ID)]);
    Ok(())
}
