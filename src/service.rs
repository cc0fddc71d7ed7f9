//! Runtime support for generated service bindings.
//!
//! Generated code is schema-driven and lives outside this crate; what it
//! compiles against is here: the object-handle type routing instance
//! calls back through the owning client, and the enumeration seam.

use std::sync::Weak;

use crate::client::{ClientInner, KrpcClient};
use crate::codec::{KrpcValue, TypeHint, Value};
use crate::error::{CodecError, ConnectError, Error};

/// A server-side object, identified by a 64-bit id. Id 0 is the reserved
/// null handle; a server cannot hand out a live object with id 0.
///
/// The back-reference to the client is non-owning: dropping handles never
/// closes the connection, and a handle outliving its client fails calls
/// with [ConnectError::Closed].
#[derive(Clone, Debug, Default)]
pub struct ObjectRef {
    id: u64,
    client: Weak<ClientInner>,
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl ObjectRef {
    pub fn new(client: &KrpcClient, id: u64) -> Self {
        Self { id, client: std::sync::Arc::downgrade(&client.inner) }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.id == 0
    }

    /// Bind a decoded handle to the connection its methods should ride.
    /// Decoding alone cannot attach the client; generated code calls this
    /// right after unmarshalling a return value.
    pub fn attach(&mut self, client: &KrpcClient) {
        self.client = std::sync::Arc::downgrade(&client.inner);
    }

    pub fn client(&self) -> Result<KrpcClient, Error> {
        match self.client.upgrade() {
            Some(inner) => Ok(KrpcClient { inner }),
            None => Err(ConnectError::Closed.into()),
        }
    }
}

impl KrpcValue for ObjectRef {
    fn type_hint() -> TypeHint {
        TypeHint::Class
    }

    fn into_value(self) -> Value {
        Value::Object(self.id)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Object(id) => Ok(Self { id, client: Weak::new() }),
            v => Err(CodecError::WrongKind { expected: TypeHint::Class.kind(), got: v.kind() }),
        }
    }
}

/// A generated class type: a newtype over [ObjectRef] with one method per
/// instance procedure. Instance procedures put the handle at argument
/// position 0.
pub trait RemoteObject: Sized {
    fn from_object(object: ObjectRef) -> Self;

    fn object(&self) -> &ObjectRef;

    #[inline]
    fn id(&self) -> u64 {
        self.object().id()
    }
}

/// A generated enumeration: a symbolic mapping over the wire's
/// zigzag-encoded int32 values.
///
/// Decoding an out-of-range value is not a wire error; the conversion
/// here is where it surfaces, as [CodecError::EnumOutOfRange].
pub trait RemoteEnum: Sized {
    fn from_raw(value: i32) -> Result<Self, CodecError>;

    fn raw(&self) -> i32;

    #[inline]
    fn to_value(&self) -> Value {
        Value::Enum(self.raw())
    }

    fn from_wire_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Enum(v) => Self::from_raw(v),
            v => Err(CodecError::WrongKind {
                expected: TypeHint::Enumeration.kind(),
                got: v.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{marshal, unmarshal};

    #[derive(Debug, PartialEq)]
    enum SolarPanelState {
        Extended,
        Retracted,
        Broken,
    }

    impl RemoteEnum for SolarPanelState {
        fn from_raw(value: i32) -> Result<Self, CodecError> {
            match value {
                0 => Ok(Self::Extended),
                1 => Ok(Self::Retracted),
                2 => Ok(Self::Broken),
                v => Err(CodecError::EnumOutOfRange(v)),
            }
        }

        fn raw(&self) -> i32 {
            match self {
                Self::Extended => 0,
                Self::Retracted => 1,
                Self::Broken => 2,
            }
        }
    }

    #[test]
    fn test_object_ref_round_trip() {
        let obj = ObjectRef { id: 99, client: Weak::new() };
        let buf = marshal(obj.clone()).expect("marshal");
        let back: ObjectRef = unmarshal(&buf).expect("unmarshal");
        assert_eq!(back, obj);
        assert!(!back.is_null());
        assert!(back.client().is_err());

        let null: ObjectRef = unmarshal(&marshal(ObjectRef::default()).unwrap()).unwrap();
        assert!(null.is_null());
    }

    #[test]
    fn test_remote_enum_conversions() {
        let v = SolarPanelState::Retracted.to_value();
        assert_eq!(SolarPanelState::from_wire_value(v), Ok(SolarPanelState::Retracted));
        assert_eq!(SolarPanelState::from_raw(7), Err(CodecError::EnumOutOfRange(7)));
    }
}
