//! Typed seam over the dynamic codec.
//!
//! Generated bindings and `Stream<T>` handles do not juggle [Value]s;
//! they go through [KrpcValue], one implementation per wire kind. The
//! dynamic union stays internal to the codec and the stream registry.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use bytes::Bytes;

use super::{decode, encode, TypeHint, Value};
use crate::error::CodecError;

/// A host type with a fixed kRPC wire shape.
pub trait KrpcValue: Sized {
    /// The shape this type decodes under.
    fn type_hint() -> TypeHint;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self, CodecError>;
}

/// Encode a typed value to its bare wire payload.
#[inline]
pub fn marshal<T: KrpcValue>(value: T) -> Result<Vec<u8>, CodecError> {
    encode(&value.into_value())
}

/// Decode a bare wire payload into a typed value.
#[inline]
pub fn unmarshal<T: KrpcValue>(buf: &[u8]) -> Result<T, CodecError> {
    T::from_value(decode(buf, &T::type_hint())?)
}

// Void procedures marshal through the same seam as everything else: a
// unit value is zero payload bytes on the wire.
impl KrpcValue for () {
    #[inline]
    fn type_hint() -> TypeHint {
        TypeHint::Void
    }

    #[inline]
    fn into_value(self) -> Value {
        Value::Void
    }

    #[inline]
    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Void => Ok(()),
            v => Err(CodecError::WrongKind { expected: TypeHint::Void.kind(), got: v.kind() }),
        }
    }
}

macro_rules! impl_scalar_value {
    ($ty:ty, $hint:ident) => {
        impl KrpcValue for $ty {
            #[inline]
            fn type_hint() -> TypeHint {
                TypeHint::$hint
            }

            #[inline]
            fn into_value(self) -> Value {
                Value::$hint(self)
            }

            #[inline]
            fn from_value(value: Value) -> Result<Self, CodecError> {
                match value {
                    Value::$hint(v) => Ok(v),
                    v => Err(CodecError::WrongKind {
                        expected: TypeHint::$hint.kind(),
                        got: v.kind(),
                    }),
                }
            }
        }
    };
}

impl_scalar_value!(i32, SInt32);
impl_scalar_value!(i64, SInt64);
impl_scalar_value!(u32, UInt32);
impl_scalar_value!(u64, UInt64);
impl_scalar_value!(bool, Bool);
impl_scalar_value!(f32, Float);
impl_scalar_value!(f64, Double);
impl_scalar_value!(String, String);
impl_scalar_value!(Bytes, Bytes);

impl<T: KrpcValue> KrpcValue for Vec<T> {
    fn type_hint() -> TypeHint {
        TypeHint::List(Box::new(T::type_hint()))
    }

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(T::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            v => Err(CodecError::WrongKind {
                expected: Self::type_hint().kind(),
                got: v.kind(),
            }),
        }
    }
}

impl<T: KrpcValue + Eq + Hash> KrpcValue for HashSet<T> {
    fn type_hint() -> TypeHint {
        TypeHint::Set(Box::new(T::type_hint()))
    }

    fn into_value(self) -> Value {
        Value::Set(self.into_iter().map(T::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Set(items) => items.into_iter().map(T::from_value).collect(),
            v => Err(CodecError::WrongKind {
                expected: Self::type_hint().kind(),
                got: v.kind(),
            }),
        }
    }
}

impl<K: KrpcValue + Eq + Hash, V: KrpcValue> KrpcValue for HashMap<K, V> {
    fn type_hint() -> TypeHint {
        TypeHint::Dictionary(Box::new(K::type_hint()), Box::new(V::type_hint()))
    }

    fn into_value(self) -> Value {
        Value::Dictionary(
            self.into_iter().map(|(k, v)| (k.into_value(), v.into_value())).collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Dictionary(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            v => Err(CodecError::WrongKind {
                expected: Self::type_hint().kind(),
                got: v.kind(),
            }),
        }
    }
}

macro_rules! impl_tuple_value {
    ($($ty:ident),+) => {
        impl<$($ty: KrpcValue),+> KrpcValue for ($($ty,)+) {
            fn type_hint() -> TypeHint {
                TypeHint::Tuple(vec![$($ty::type_hint()),+])
            }

            #[allow(non_snake_case)]
            fn into_value(self) -> Value {
                let ($($ty,)+) = self;
                Value::Tuple(vec![$($ty.into_value()),+])
            }

            fn from_value(value: Value) -> Result<Self, CodecError> {
                const ARITY: usize = 0usize $(+ impl_tuple_value!(@one $ty))+;
                match value {
                    Value::Tuple(items) => {
                        if items.len() != ARITY {
                            return Err(CodecError::WrongTupleArity {
                                expected: ARITY,
                                got: items.len(),
                            });
                        }
                        let mut items = items.into_iter();
                        Ok(($(
                            $ty::from_value(items.next().ok_or(CodecError::WrongTupleArity {
                                expected: ARITY,
                                got: 0,
                            })?)?,
                        )+))
                    }
                    v => Err(CodecError::WrongKind {
                        expected: Self::type_hint().kind(),
                        got: v.kind(),
                    }),
                }
            }
        }
    };
    (@one $ty:ident) => { 1usize };
}

impl_tuple_value!(A);
impl_tuple_value!(A, B);
impl_tuple_value!(A, B, C);
impl_tuple_value!(A, B, C, D);
impl_tuple_value!(A, B, C, D, E);
impl_tuple_value!(A, B, C, D, E, F);
