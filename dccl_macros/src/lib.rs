//! Derive macros for dccl.
//!
//! Most record types should derive from `DcclMessage`.

/// `DcclMessage` derive macro.
///
/// Generates a [`dccl::schema::DcclMessage`] impl from a plain struct's
/// fields, so the struct can be registered and encoded/decoded without
/// hand-writing `schema()`/`to_record()`/`from_record()`. Example use:
///
/// ```
/// use dccl::registry::Dccl;
/// use dccl::schema::DcclMessage;
///
/// #[derive(dccl_macros::DcclMessage)]
/// struct Ping {
///     #[dccl(hi = 1023)]
///     range_cm: i64,
/// }
///
/// let mut dccl = Dccl::new();
/// dccl.register_record(Ping::schema(1))?;
/// # Ok::<(), dccl::error::Error>(())
/// ```
///
/// Field attributes:
/// * `head`: put this field in the HEAD section instead of BODY.
/// * `omit`: never encode or decode this field.
/// * `repeated = N`: this field is a `Vec`-like repeated field, up to
///   `N` copies.
/// * `lo = V`, `hi = V`: inclusive bounds for an integer or float field.
/// * `bits = N`: force a field width instead of the natural minimum.
/// * `precision = N`: decimal digits kept for a float field.
/// * `len = N`: fixed byte length for a verbatim string field.
/// * `max = N`: maximum byte length for a length-prefixed string field.
/// * `values("a", "b", ...)`: the named value set for an enum field,
///   whose Rust type should hold the value's index as a `u32`.
/// * `codec = "name"`: dispatch to a custom registered codec instead of
///   the type-inferred default.
///
/// Field type is inferred from the Rust field's own type: `bool`,
/// `i64`/`i32`/`u32`/`u64` for a bounded integer, `f64`/`f32` for a
/// float, `String` for a string (fixed if `len` is given, else
/// length-prefixed up to `max`), and anything else for a nested record
/// (which must itself implement `DcclMessage`).
#[proc_macro_derive(DcclMessage, attributes(dccl))]
pub fn derive_dccl_message(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    dccl_macros_code::derive_dccl_message(input.into()).into()
}
/* vim: textwidth=80
 */
