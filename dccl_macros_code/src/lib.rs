use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Lit, Meta};

static FIELD_ATTRS: &[&str] = &[
    "head", "omit", "repeated", "lo", "hi", "bits", "precision", "len", "max", "values", "codec",
];

#[derive(Clone, Debug)]
enum Kind {
    Bool,
    BoundedInt,
    Enum,
    Float,
    FixedString,
    VarString,
    Record,
}

fn kind_from_type(ty: &syn::Type) -> Kind {
    let syn::Type::Path(p) = ty else {
        panic!("unsupported field type {}", quote! { #ty });
    };
    let segment = p.path.segments.last().expect("path without segments");
    match segment.ident.to_string().as_str() {
        "bool" => Kind::Bool,
        "i64" | "i32" | "u32" | "u64" => Kind::BoundedInt,
        "f64" | "f32" => Kind::Float,
        "String" => Kind::VarString,
        _ => Kind::Record,
    }
}

struct FieldAttrs {
    head: bool,
    omit: bool,
    repeated: Option<u32>,
    lo: Option<syn::Lit>,
    hi: Option<syn::Lit>,
    bits: Option<syn::Lit>,
    precision: Option<syn::Lit>,
    len: Option<syn::Lit>,
    max: Option<syn::Lit>,
    values: Option<Vec<String>>,
    codec: Option<String>,
}

impl FieldAttrs {
    fn parse(attrs: &[syn::Attribute]) -> Self {
        let mut ret = Self {
            head: false,
            omit: false,
            repeated: None,
            lo: None,
            hi: None,
            bits: None,
            precision: None,
            len: None,
            max: None,
            values: None,
            codec: None,
        };
        for attr in attrs {
            let Meta::List(list) = &attr.meta else { continue };
            if !list.path.is_ident("dccl") {
                continue;
            }
            list.parse_nested_meta(|meta| {
                let s = meta.path.get_ident().expect("path without ident").to_string();
                if !FIELD_ATTRS.contains(&s.as_str()) {
                    panic!("invalid dccl field attr `{s}`");
                }
                match s.as_str() {
                    "head" => ret.head = true,
                    "omit" => ret.omit = true,
                    "repeated" => {
                        let value = meta.value()?;
                        let lit: syn::LitInt = value.parse()?;
                        ret.repeated = Some(lit.base10_parse()?);
                    }
                    "lo" => ret.lo = Some(meta.value()?.parse()?),
                    "hi" => ret.hi = Some(meta.value()?.parse()?),
                    "bits" => ret.bits = Some(meta.value()?.parse()?),
                    "precision" => ret.precision = Some(meta.value()?.parse()?),
                    "len" => ret.len = Some(meta.value()?.parse()?),
                    "max" => ret.max = Some(meta.value()?.parse()?),
                    "codec" => {
                        let lit: syn::LitStr = meta.value()?.parse()?;
                        ret.codec = Some(lit.value());
                    }
                    "values" => {
                        let content;
                        syn::parenthesized!(content in meta.input);
                        let list: syn::punctuated::Punctuated<syn::LitStr, syn::Token![,]> =
                            content.parse_terminated(syn::LitStr::parse, syn::Token![,])?;
                        ret.values = Some(list.into_iter().map(|l| l.value()).collect());
                    }
                    _ => unreachable!("checked against FIELD_ATTRS above"),
                }
                Ok(())
            })
            .expect("failed to parse #[dccl(...)] attribute");
        }
        ret
    }
}

fn lit_as_i64(lit: &Lit) -> i64 {
    match lit {
        Lit::Int(i) => i.base10_parse().expect("integer literal"),
        _ => panic!("expected an integer literal"),
    }
}

fn lit_as_f64(lit: &Lit) -> f64 {
    match lit {
        Lit::Float(f) => f.base10_parse().expect("float literal"),
        Lit::Int(i) => i.base10_parse::<i64>().expect("integer literal") as f64,
        _ => panic!("expected a numeric literal"),
    }
}

fn field_type_tokens(kind: &Kind, attrs: &FieldAttrs, ty: &syn::Type) -> TokenStream {
    let bits = match &attrs.bits {
        Some(lit) => {
            let n = lit_as_i64(lit) as u32;
            quote! { Some(#n) }
        }
        None => quote! { None },
    };
    match kind {
        Kind::Bool => quote! { dccl::schema::FieldType::Bool },
        Kind::BoundedInt => {
            let lo = attrs.lo.as_ref().map_or(0, lit_as_i64);
            let hi = attrs.hi.as_ref().unwrap_or_else(|| panic!("bounded int field needs #[dccl(hi = ...)]"));
            let hi = lit_as_i64(hi);
            quote! { dccl::schema::FieldType::BoundedInt { lo: #lo, hi: #hi, bits: #bits } }
        }
        Kind::Enum => {
            let values = attrs.values.as_ref().expect("enum field needs #[dccl(values(...))]");
            quote! { dccl::schema::FieldType::Enum { values: vec![#(#values.to_string()),*], bits: #bits } }
        }
        Kind::Float => {
            let precision = attrs.precision.as_ref().map_or(2, |l| lit_as_i64(l) as u32);
            let lo = attrs.lo.as_ref().map_or(0.0, lit_as_f64);
            let hi = attrs.hi.as_ref().unwrap_or_else(|| panic!("float field needs #[dccl(hi = ...)]"));
            let hi = lit_as_f64(hi);
            quote! { dccl::schema::FieldType::Float { precision: #precision, lo: #lo, hi: #hi } }
        }
        Kind::FixedString => {
            let len = attrs.len.as_ref().expect("fixed string field needs #[dccl(len = ...)]");
            let len = lit_as_i64(len) as usize;
            quote! { dccl::schema::FieldType::FixedString { len: #len } }
        }
        Kind::VarString => {
            let max = attrs.max.as_ref().map_or(255usize, |l| lit_as_i64(l) as usize);
            quote! { dccl::schema::FieldType::VarString { max: #max } }
        }
        Kind::Record => {
            quote! { dccl::schema::FieldType::Record { schema_name: <#ty as dccl::schema::DcclMessage>::NAME.to_string() } }
        }
    }
}

/// Implementation behind `#[derive(DcclMessage)]`.
pub fn derive_dccl_message(input: TokenStream) -> TokenStream {
    let input = syn::parse2::<DeriveInput>(input).expect("failed to parse derive input");
    let name = &input.ident;
    let Data::Struct(data_struct) = &input.data else {
        panic!("#[derive(DcclMessage)] only supports structs");
    };
    let Fields::Named(fields_named) = &data_struct.fields else {
        panic!("#[derive(DcclMessage)] requires named fields");
    };

    let mut schema_fields = Vec::new();
    let mut to_record_sets = Vec::new();
    let mut from_record_gets = Vec::new();
    let mut ctor_fields = Vec::new();

    for field in &fields_named.named {
        let ident = field.ident.as_ref().expect("named field");
        let field_name = ident.to_string();
        let attrs = FieldAttrs::parse(&field.attrs);
        let kind = if let Some(values) = &attrs.values {
            let _ = values;
            Kind::Enum
        } else if attrs.len.is_some() {
            Kind::FixedString
        } else {
            kind_from_type(&field.ty)
        };
        let field_type = field_type_tokens(&kind, &attrs, &field.ty);
        let section = if attrs.head {
            quote! { dccl::schema::Section::Head }
        } else {
            quote! { dccl::schema::Section::Body }
        };

        let mut descriptor = quote! {
            dccl::schema::FieldDescriptor::new(#field_name, #field_type, #section)
        };
        if let Some(n) = attrs.repeated {
            descriptor = quote! { #descriptor.repeated(#n) };
        }
        if attrs.omit {
            descriptor = quote! { #descriptor.omitted() };
        }
        if let Some(codec) = &attrs.codec {
            descriptor = quote! { #descriptor.with_codec(#codec) };
        }
        schema_fields.push(quote! { .field(#descriptor) });

        let value_expr = match kind {
            Kind::Bool => quote! { dccl::value::FieldValue::Bool(self.#ident) },
            Kind::BoundedInt => quote! { dccl::value::FieldValue::Int(self.#ident as i64) },
            Kind::Enum => quote! { dccl::value::FieldValue::Enum(self.#ident) },
            Kind::Float => quote! { dccl::value::FieldValue::Float(self.#ident as f64) },
            Kind::FixedString | Kind::VarString => quote! { dccl::value::FieldValue::Str(self.#ident.clone()) },
            Kind::Record => quote! { dccl::value::FieldValue::Record(Box::new(self.#ident.to_record())) },
        };
        to_record_sets.push(quote! { .with(#field_name, #value_expr) });

        let ty = &field.ty;
        let getter = match kind {
            Kind::Bool => quote! {
                {
                    let v = dccl::schema::require_field(record, Self::NAME, #field_name)?;
                    match v {
                        dccl::value::FieldValue::Bool(v) => *v,
                        _ => return Err(dccl::error::Error::DecodeCorrupt {
                            record: Self::NAME.to_string(),
                            field: #field_name.to_string(),
                            reason: "expected a bool value".to_string(),
                        }),
                    }
                }
            },
            Kind::BoundedInt => quote! {
                {
                    let v = dccl::schema::require_field(record, Self::NAME, #field_name)?;
                    match v {
                        dccl::value::FieldValue::Int(v) => *v as #ty,
                        _ => return Err(dccl::error::Error::DecodeCorrupt {
                            record: Self::NAME.to_string(),
                            field: #field_name.to_string(),
                            reason: "expected an integer value".to_string(),
                        }),
                    }
                }
            },
            Kind::Enum => quote! {
                {
                    let v = dccl::schema::require_field(record, Self::NAME, #field_name)?;
                    match v {
                        dccl::value::FieldValue::Enum(v) => *v,
                        _ => return Err(dccl::error::Error::DecodeCorrupt {
                            record: Self::NAME.to_string(),
                            field: #field_name.to_string(),
                            reason: "expected an enum value".to_string(),
                        }),
                    }
                }
            },
            Kind::Float => quote! {
                {
                    let v = dccl::schema::require_field(record, Self::NAME, #field_name)?;
                    match v {
                        dccl::value::FieldValue::Float(v) => *v as #ty,
                        _ => return Err(dccl::error::Error::DecodeCorrupt {
                            record: Self::NAME.to_string(),
                            field: #field_name.to_string(),
                            reason: "expected a float value".to_string(),
                        }),
                    }
                }
            },
            Kind::FixedString | Kind::VarString => quote! {
                {
                    let v = dccl::schema::require_field(record, Self::NAME, #field_name)?;
                    match v {
                        dccl::value::FieldValue::Str(v) => v.clone(),
                        _ => return Err(dccl::error::Error::DecodeCorrupt {
                            record: Self::NAME.to_string(),
                            field: #field_name.to_string(),
                            reason: "expected a string value".to_string(),
                        }),
                    }
                }
            },
            Kind::Record => quote! {
                {
                    let v = dccl::schema::require_field(record, Self::NAME, #field_name)?;
                    match v {
                        dccl::value::FieldValue::Record(v) => <#ty as dccl::schema::DcclMessage>::from_record(v)?,
                        _ => return Err(dccl::error::Error::DecodeCorrupt {
                            record: Self::NAME.to_string(),
                            field: #field_name.to_string(),
                            reason: "expected a nested record value".to_string(),
                        }),
                    }
                }
            },
        };
        from_record_gets.push(quote! { let #ident = #getter; });
        ctor_fields.push(quote! { #ident });
    }

    let name_str = name.to_string();
    quote! {
        impl dccl::schema::DcclMessage for #name {
            const NAME: &'static str = #name_str;

            fn schema(dccl_id: u32) -> dccl::schema::RecordSchema {
                dccl::schema::RecordSchemaBuilder::new(Self::NAME, dccl_id)
                    #(#schema_fields)*
                    .build()
            }

            fn to_record(&self) -> dccl::value::Record {
                dccl::value::Record::new()
                    #(#to_record_sets)*
            }

            fn from_record(record: &dccl::value::Record) -> dccl::error::Result<Self> {
                #(#from_record_gets)*
                Ok(Self { #(#ctor_fields),* })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_schema_impl_for_a_simple_struct() {
        let input: TokenStream = quote! {
            struct Ping {
                #[dccl(hi = 1023)]
                seq: i64,
            }
        };
        let out = derive_dccl_message(input);
        let rendered = out.to_string();
        assert!(rendered.contains("impl dccl :: schema :: DcclMessage for Ping"));
        assert!(rendered.contains("BoundedInt"));
    }
}
