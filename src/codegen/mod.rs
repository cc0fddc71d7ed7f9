//! Binding model over the self-describing schema.
//!
//! `KRPC.GetServices` returns a flat list of procedures per service; the
//! structure of a binding (service objects, class methods, properties,
//! paired stream methods) is encoded in procedure *names*. This module
//! recovers that structure into a language-neutral model a generator can
//! render from. Name munging and file layout are the renderer's business
//! and must never change the marshalling plans recorded here.

mod render;

pub use render::{
    doc_text, rust_field_name, rust_method_name, rust_stream_method_name, rust_type,
    rust_type_name,
};

use std::collections::HashSet;

use crate::codec::TypeHint;
use crate::proto;

/// How one procedure surfaces in a binding.
#[derive(Clone, Debug, PartialEq)]
pub enum MethodKind {
    /// A plain service-level procedure.
    Procedure,
    /// `get_X`: a read-only service property.
    PropertyGetter { property: String },
    /// `set_X`: a write-only service property.
    PropertySetter { property: String },
    /// `Class_Method`: an instance method; the handle rides at position 0.
    ClassMethod { class: String, method: String },
    /// `Class_static_Method`: a class-level method without a handle.
    StaticClassMethod { class: String, method: String },
    /// `Class_get_X`: an instance property read.
    ClassPropertyGetter { class: String, property: String },
    /// `Class_set_X`: an instance property write.
    ClassPropertySetter { class: String, property: String },
}

/// Marshalling plan for one formal parameter.
#[derive(Clone, Debug)]
pub struct ParamModel {
    pub name: String,
    pub position: u32,
    pub schema_type: proto::Type,
    pub hint: Option<TypeHint>,
    pub default_value: Option<Vec<u8>>,
}

/// One callable in the binding: the raw procedure it maps to, its kind,
/// and the encode/decode plan for arguments and result.
#[derive(Clone, Debug)]
pub struct MethodModel {
    pub service: String,
    /// Raw procedure name on the wire, e.g. `Vessel_get_Mass`.
    pub procedure: String,
    pub kind: MethodKind,
    pub params: Vec<ParamModel>,
    pub return_type: Option<proto::Type>,
    pub return_hint: Option<TypeHint>,
    pub return_is_nullable: bool,
    /// Non-void methods get a paired stream form returning `Stream<T>`
    /// over the same call.
    pub has_stream_form: bool,
    pub documentation: String,
}

#[derive(Clone, Debug)]
pub struct ClassModel {
    pub name: String,
    pub documentation: String,
}

#[derive(Clone, Debug)]
pub struct EnumValueModel {
    pub name: String,
    pub value: i32,
    pub documentation: String,
}

#[derive(Clone, Debug)]
pub struct EnumModel {
    pub name: String,
    pub values: Vec<EnumValueModel>,
    pub documentation: String,
}

#[derive(Clone, Debug)]
pub struct ExceptionModel {
    /// Schema name, e.g. `InvalidOperationException`.
    pub name: String,
    pub documentation: String,
}

/// Everything a generator needs for one service.
#[derive(Clone, Debug)]
pub struct ServiceModel {
    pub name: String,
    pub documentation: String,
    pub methods: Vec<MethodModel>,
    pub classes: Vec<ClassModel>,
    pub enums: Vec<EnumModel>,
    pub exceptions: Vec<ExceptionModel>,
}

/// Build the binding model for every service in the schema.
pub fn model_services(schema: &proto::Services) -> Vec<ServiceModel> {
    schema.services.iter().map(model_service).collect()
}

pub fn model_service(service: &proto::Service) -> ServiceModel {
    let classes: HashSet<&str> = service.classes.iter().map(|c| c.name.as_str()).collect();
    let methods = service
        .procedures
        .iter()
        .map(|p| model_procedure(&service.name, p, &classes))
        .collect();
    ServiceModel {
        name: service.name.clone(),
        documentation: service.documentation.clone(),
        methods,
        classes: service
            .classes
            .iter()
            .map(|c| ClassModel { name: c.name.clone(), documentation: c.documentation.clone() })
            .collect(),
        enums: service
            .enumerations
            .iter()
            .map(|e| EnumModel {
                name: e.name.clone(),
                values: e
                    .values
                    .iter()
                    .map(|v| EnumValueModel {
                        name: v.name.clone(),
                        value: v.value,
                        documentation: v.documentation.clone(),
                    })
                    .collect(),
                documentation: e.documentation.clone(),
            })
            .collect(),
        exceptions: service
            .exceptions
            .iter()
            .map(|e| ExceptionModel { name: e.name.clone(), documentation: e.documentation.clone() })
            .collect(),
    }
}

fn model_procedure(
    service: &str, procedure: &proto::Procedure, classes: &HashSet<&str>,
) -> MethodModel {
    let kind = classify(&procedure.name, classes);
    let params = procedure
        .parameters
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let schema_type = p.r#type.clone().unwrap_or_default();
            let hint = TypeHint::from_schema(&schema_type);
            ParamModel {
                name: p.name.clone(),
                position: i as u32,
                schema_type,
                hint,
                default_value: if p.default_value.is_empty() {
                    None
                } else {
                    Some(p.default_value.clone())
                },
            }
        })
        .collect();
    let return_type = procedure.return_type.clone();
    let return_hint = return_type.as_ref().and_then(TypeHint::from_schema);
    // only procedures producing a value get a paired stream form; an
    // absent return type and an explicit void shape are both void
    let has_stream_form = matches!(&return_hint, Some(hint) if *hint != TypeHint::Void);
    MethodModel {
        service: service.to_string(),
        procedure: procedure.name.clone(),
        kind,
        params,
        has_stream_form,
        return_type,
        return_hint,
        return_is_nullable: procedure.return_is_nullable,
        documentation: procedure.documentation.clone(),
    }
}

/// Recover a procedure's binding role from its wire name.
fn classify(name: &str, classes: &HashSet<&str>) -> MethodKind {
    if let Some(property) = name.strip_prefix("get_") {
        return MethodKind::PropertyGetter { property: property.to_string() };
    }
    if let Some(property) = name.strip_prefix("set_") {
        return MethodKind::PropertySetter { property: property.to_string() };
    }
    if let Some((class, rest)) = name.split_once('_') {
        if classes.contains(class) {
            if let Some(property) = rest.strip_prefix("get_") {
                return MethodKind::ClassPropertyGetter {
                    class: class.to_string(),
                    property: property.to_string(),
                };
            }
            if let Some(property) = rest.strip_prefix("set_") {
                return MethodKind::ClassPropertySetter {
                    class: class.to_string(),
                    property: property.to_string(),
                };
            }
            if let Some(method) = rest.strip_prefix("static_") {
                return MethodKind::StaticClassMethod {
                    class: class.to_string(),
                    method: method.to_string(),
                };
            }
            return MethodKind::ClassMethod {
                class: class.to_string(),
                method: rest.to_string(),
            };
        }
    }
    MethodKind::Procedure
}
