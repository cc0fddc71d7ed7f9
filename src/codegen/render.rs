//! Naming and type-mapping rules for Rust bindings.
//!
//! Pure string mapping; nothing here touches the marshalling plans.

use heck::{ToSnakeCase, ToUpperCamelCase};

use crate::proto::{Type, TypeCode};

use super::{MethodKind, MethodModel};

/// Rust method name for a modelled procedure.
pub fn rust_method_name(method: &MethodModel) -> String {
    match &method.kind {
        MethodKind::Procedure => method.procedure.to_snake_case(),
        MethodKind::PropertyGetter { property } => property.to_snake_case(),
        MethodKind::PropertySetter { property } => format!("set_{}", property.to_snake_case()),
        MethodKind::ClassMethod { method, .. } => method.to_snake_case(),
        MethodKind::StaticClassMethod { method, .. } => method.to_snake_case(),
        MethodKind::ClassPropertyGetter { property, .. } => property.to_snake_case(),
        MethodKind::ClassPropertySetter { property, .. } => {
            format!("set_{}", property.to_snake_case())
        }
    }
}

/// Name of the paired stream method, `None` for void procedures.
pub fn rust_stream_method_name(method: &MethodModel) -> Option<String> {
    if method.has_stream_form {
        Some(format!("{}_stream", rust_method_name(method)))
    } else {
        None
    }
}

/// Rust type name for a schema type: `FooException` becomes `FooError`,
/// everything else is UpperCamelCase of the schema name.
pub fn rust_type_name(schema_name: &str) -> String {
    match schema_name.strip_suffix("Exception") {
        Some(base) => format!("{}Error", base.to_upper_camel_case()),
        None => schema_name.to_upper_camel_case(),
    }
}

pub fn rust_field_name(schema_name: &str) -> String {
    schema_name.to_snake_case()
}

/// The Rust type a schema `Type` marshals to.
pub fn rust_type(ty: &Type) -> String {
    match ty.code() {
        TypeCode::None => "()".to_string(),
        TypeCode::Double => "f64".to_string(),
        TypeCode::Float => "f32".to_string(),
        TypeCode::Sint32 => "i32".to_string(),
        TypeCode::Sint64 => "i64".to_string(),
        TypeCode::Uint32 => "u32".to_string(),
        TypeCode::Uint64 => "u64".to_string(),
        TypeCode::Bool => "bool".to_string(),
        TypeCode::String => "String".to_string(),
        TypeCode::Bytes => "Bytes".to_string(),
        TypeCode::ProcedureCall => "proto::ProcedureCall".to_string(),
        TypeCode::Stream => "proto::Stream".to_string(),
        TypeCode::Event => "proto::Event".to_string(),
        TypeCode::Status => "proto::Status".to_string(),
        TypeCode::Services => "proto::Services".to_string(),
        TypeCode::Class | TypeCode::Enumeration => rust_type_name(&ty.name),
        TypeCode::Tuple => {
            let inner: Vec<String> = ty.types.iter().map(rust_type).collect();
            format!("({})", inner.join(", "))
        }
        TypeCode::List => format!("Vec<{}>", ty.types.first().map(rust_type).unwrap_or_default()),
        TypeCode::Set => {
            format!("HashSet<{}>", ty.types.first().map(rust_type).unwrap_or_default())
        }
        TypeCode::Dictionary => format!(
            "HashMap<{}, {}>",
            ty.types.first().map(rust_type).unwrap_or_default(),
            ty.types.get(1).map(rust_type).unwrap_or_default()
        ),
    }
}

/// Strip the schema's XML documentation down to plain text.
///
/// `<summary>` bodies are kept, `<see cref="M:Foo.Bar" />` becomes the
/// referenced path, every other tag is dropped.
pub fn doc_text(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let Some(close) = tail.find('>') else {
            break;
        };
        let tag = &tail[..close];
        if let Some(cref) = tag.strip_prefix("see cref=\"") {
            let target = cref.trim_end_matches(['/', ' ', '"']);
            // drop the member-kind prefix, "M:Foo.Bar" reads as Foo.Bar
            let target = match target.split_once(':') {
                Some((_, path)) => path,
                None => target,
            };
            out.push_str(target.trim_end_matches('"'));
        }
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
