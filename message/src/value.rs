use std::{
    collections::BTreeMap,
    fmt::{
        Display,
        Formatter,
    },
};

/// Decoded fields of a response or log payload, keyed by field name.
pub type Fields = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    U64(u64),
    I64(i64),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use Value::*;

        match self {
            String(elem) => write!(f, "{elem}"),
            U64(elem) => write!(f, "{elem}"),
            I64(elem) => write!(f, "{elem}"),
            F64(elem) => write!(f, "{elem}"),
            Bool(elem) => write!(f, "{elem}"),
            Bytes(elem) => write!(f, "0x{}", hex::encode(elem)),
        }
    }
}

macro_rules! from_int {
    ($variant:ident, $wide:ty, $($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                #[inline]
                fn from(val: $ty) -> Self {
                    Value::$variant(val as $wide)
                }
            }
        )+
    };
}

from_int!(U64, u64, u8, u16, u32, u64);
from_int!(I64, i64, i8, i16, i32, i64);
from_int!(F64, f64, f32, f64);

impl From<bool> for Value {
    fn from(val: bool) -> Self {
        Value::Bool(val)
    }
}

impl From<&str> for Value {
    fn from(val: &str) -> Self {
        Value::String(val.to_owned())
    }
}

impl From<String> for Value {
    fn from(val: String) -> Self {
        Value::String(val)
    }
}

impl From<Vec<u8>> for Value {
    fn from(val: Vec<u8>) -> Self {
        Value::Bytes(val)
    }
}
