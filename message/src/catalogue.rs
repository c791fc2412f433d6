//! The command and log catalogue the stack consults to encode arguments and decode payloads.
//!
//! The stack only depends on the [`Specification`], [`CommandSpec`] and [`LogSpec`] traits.
//! [`Catalogue`] is an in-memory implementation loadable from JSON:
//!
//! ```json
//! {
//!   "commands": [
//!     { "id": 1, "name": "ping" },
//!     { "id": 2, "name": "set_mode",
//!       "args": [{ "name": "mode", "type": "u8" }],
//!       "response": [{ "name": "previous", "type": "u8" }] }
//!   ],
//!   "logs": [
//!     { "id": 0, "name": "cmd_sys", "signals": [
//!       { "id": 1, "name": "sched_resp", "description": "scheduled command response" }
//!     ] }
//!   ]
//! }
//! ```
//!
//! All multi-byte fields are big-endian. A `string` field consumes the rest of the payload
//! and may only appear last.

use std::{
    collections::HashMap,
    fmt::{
        Debug,
        Display,
        Formatter,
    },
    sync::Arc,
};

use bytes::{
    BufMut,
    Bytes,
    BytesMut,
};

use crate::{
    Fields,
    LogId,
    Value,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("expected {expected} arguments, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("argument `{field}`: expected {expected}, got {got}")]
    Type {
        field:    String,
        expected: FieldKind,
        got:      String,
    },

    #[error("argument `{field}`: {value} out of range for {kind}")]
    Range {
        field: String,
        value: String,
        kind:  FieldKind,
    },

    #[error("argument `{field}`: cannot parse {input:?} as {kind}")]
    Parse {
        field: String,
        input: String,
        kind:  FieldKind,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload length mismatch: expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },

    #[error("field `{field}`: {reason}")]
    Field { field: String, reason: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("command {0} not found")]
    Command(String),

    #[error("log {0} not found")]
    Log(LogId),
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("duplicate command {0}")]
    DuplicateCommand(String),

    #[error("duplicate log {0}")]
    DuplicateLog(LogId),

    #[error("field `{0}`: bytes fields need a `len`")]
    MissingLen(String),

    #[error("field `{0}`: string fields must come last")]
    StringNotLast(String),
}

/// How a command is named when looking it up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CmdKey<'a> {
    Name(&'a str),
    Id(u8),
}

impl<'a> From<&'a str> for CmdKey<'a> {
    fn from(name: &'a str) -> Self {
        CmdKey::Name(name)
    }
}

impl From<u8> for CmdKey<'_> {
    fn from(id: u8) -> Self {
        CmdKey::Id(id)
    }
}

impl Display for CmdKey<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CmdKey::Name(name) => write!(f, "`{name}`"),
            CmdKey::Id(id) => write!(f, "{id:#04x}"),
        }
    }
}

pub trait CommandSpec: Debug + Send + Sync {
    fn id(&self) -> u8;
    fn name(&self) -> &str;

    /// Whether an immediate invocation is answered with a response.
    fn has_response(&self) -> bool;

    fn encode_args(&self, args: &[Value]) -> Result<Bytes, EncodeError>;
    fn decode_resp(&self, data: &[u8]) -> Result<Fields, DecodeError>;

    /// Interpret textual arguments (e.g. from a command line) according to the argument types.
    fn parse_args(&self, args: &[String]) -> Result<Vec<Value>, EncodeError>;
}

pub trait LogSpec: Debug + Send + Sync {
    fn id(&self) -> LogId;
    fn group_name(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn decode(&self, data: &[u8]) -> Result<Fields, DecodeError>;
}

pub trait Specification: Send + Sync {
    fn command(&self, key: CmdKey<'_>) -> Result<Arc<dyn CommandSpec>, LookupError>;
    fn log(&self, id: LogId) -> Result<Arc<dyn LogSpec>, LookupError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Bytes,
    String,
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Width of a `bytes` field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len:  Option<usize>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            len: None,
        }
    }

    pub fn bytes(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Bytes,
            len:  Some(len),
        }
    }

    fn width(&self) -> Option<usize> {
        let width = match self.kind {
            FieldKind::U8 | FieldKind::I8 | FieldKind::Bool => 1,
            FieldKind::U16 | FieldKind::I16 => 2,
            FieldKind::U32 | FieldKind::I32 | FieldKind::F32 => 4,
            FieldKind::U64 | FieldKind::I64 | FieldKind::F64 => 8,
            FieldKind::Bytes => self.len?,
            FieldKind::String => return None,
        };

        Some(width)
    }

    fn type_error(&self, got: &Value) -> EncodeError {
        EncodeError::Type {
            field:    self.name.clone(),
            expected: self.kind,
            got:      format!("{got:?}"),
        }
    }

    fn range_error(&self, value: impl Display) -> EncodeError {
        EncodeError::Range {
            field: self.name.clone(),
            value: value.to_string(),
            kind:  self.kind,
        }
    }

    fn encode(&self, value: &Value, out: &mut BytesMut) -> Result<(), EncodeError> {
        match self.kind {
            FieldKind::U8 | FieldKind::U16 | FieldKind::U32 | FieldKind::U64 => {
                let v = match *value {
                    Value::U64(v) => v,
                    Value::I64(v) => u64::try_from(v).map_err(|_| self.range_error(v))?,
                    ref other => return Err(self.type_error(other)),
                };

                let width = self.width().unwrap_or(8);
                if width < 8 && v >> (width * 8) != 0 {
                    return Err(self.range_error(v));
                }

                out.put_uint(v, width);
            },

            FieldKind::I8 | FieldKind::I16 | FieldKind::I32 | FieldKind::I64 => {
                let v = match *value {
                    Value::I64(v) => v,
                    Value::U64(v) => i64::try_from(v).map_err(|_| self.range_error(v))?,
                    ref other => return Err(self.type_error(other)),
                };

                let width = self.width().unwrap_or(8);
                let bits = width * 8;
                if bits < 64 && !(-(1i64 << (bits - 1))..(1i64 << (bits - 1))).contains(&v) {
                    return Err(self.range_error(v));
                }

                out.put_int(v, width);
            },

            FieldKind::F32 | FieldKind::F64 => {
                let v = match *value {
                    Value::F64(v) => v,
                    Value::U64(v) => v as f64,
                    Value::I64(v) => v as f64,
                    ref other => return Err(self.type_error(other)),
                };

                if self.kind == FieldKind::F32 {
                    out.put_f32(v as f32);
                } else {
                    out.put_f64(v);
                }
            },

            FieldKind::Bool => match *value {
                Value::Bool(v) => out.put_u8(v as u8),
                Value::U64(v @ (0 | 1)) => out.put_u8(v as u8),
                ref other => return Err(self.type_error(other)),
            },

            FieldKind::Bytes => {
                let Value::Bytes(ref v) = *value else {
                    return Err(self.type_error(value));
                };

                if Some(v.len()) != self.len {
                    return Err(self.range_error(format!("{} bytes", v.len())));
                }

                out.put_slice(v);
            },

            FieldKind::String => {
                let Value::String(ref v) = *value else {
                    return Err(self.type_error(value));
                };

                out.put_slice(v.as_bytes());
            },
        }

        Ok(())
    }

    fn decode(&self, data: &[u8]) -> Result<Value, DecodeError> {
        let be = |n: usize| data[..n].iter().fold(0u64, |acc, &b| acc << 8 | b as u64);

        let value = match self.kind {
            FieldKind::U8 | FieldKind::U16 | FieldKind::U32 | FieldKind::U64 => {
                Value::U64(be(data.len()))
            },
            FieldKind::I8 | FieldKind::I16 | FieldKind::I32 | FieldKind::I64 => {
                let shift = 64 - data.len() * 8;
                Value::I64(((be(data.len()) << shift) as i64) >> shift)
            },
            FieldKind::F32 => Value::F64(f32::from_bits(be(4) as u32) as f64),
            FieldKind::F64 => Value::F64(f64::from_bits(be(8))),
            FieldKind::Bool => match data[0] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(DecodeError::Field {
                        field:  self.name.clone(),
                        reason: format!("invalid bool {other:#04x}"),
                    })
                },
            },
            FieldKind::Bytes => Value::Bytes(data.to_vec()),
            FieldKind::String => {
                let s = std::str::from_utf8(data).map_err(|e| DecodeError::Field {
                    field:  self.name.clone(),
                    reason: e.to_string(),
                })?;

                Value::String(s.to_owned())
            },
        };

        Ok(value)
    }

    fn parse(&self, input: &str) -> Result<Value, EncodeError> {
        let err = || EncodeError::Parse {
            field: self.name.clone(),
            input: input.to_owned(),
            kind:  self.kind,
        };

        let value = match self.kind {
            FieldKind::U8 | FieldKind::U16 | FieldKind::U32 | FieldKind::U64 => {
                let parsed = match input.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => input.parse(),
                };

                Value::U64(parsed.map_err(|_| err())?)
            },
            FieldKind::I8 | FieldKind::I16 | FieldKind::I32 | FieldKind::I64 => {
                Value::I64(input.parse().map_err(|_| err())?)
            },
            FieldKind::F32 | FieldKind::F64 => Value::F64(input.parse().map_err(|_| err())?),
            FieldKind::Bool => match input {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return Err(err()),
            },
            FieldKind::Bytes => {
                Value::Bytes(hex::decode(input.trim_start_matches("0x")).map_err(|_| err())?)
            },
            FieldKind::String => Value::String(input.to_owned()),
        };

        Ok(value)
    }
}

fn validate(fields: &[FieldDef]) -> Result<(), CatalogueError> {
    for (i, field) in fields.iter().enumerate() {
        match field.kind {
            FieldKind::Bytes if field.len.is_none() => {
                return Err(CatalogueError::MissingLen(field.name.clone()))
            },
            FieldKind::String if i + 1 != fields.len() => {
                return Err(CatalogueError::StringNotLast(field.name.clone()))
            },
            _ => {},
        }
    }

    Ok(())
}

fn encode_fields(defs: &[FieldDef], args: &[Value]) -> Result<Bytes, EncodeError> {
    if defs.len() != args.len() {
        return Err(EncodeError::Arity {
            expected: defs.len(),
            got:      args.len(),
        });
    }

    let mut out = BytesMut::new();
    for (def, arg) in defs.iter().zip(args) {
        def.encode(arg, &mut out)?;
    }

    Ok(out.freeze())
}

fn decode_fields(defs: &[FieldDef], data: &[u8]) -> Result<Fields, DecodeError> {
    let fixed = defs.iter().filter_map(FieldDef::width).sum::<usize>();
    let open_ended = defs.last().map_or(false, |def| def.kind == FieldKind::String);

    if data.len() < fixed || (!open_ended && data.len() != fixed) {
        return Err(DecodeError::Length {
            expected: fixed,
            got:      data.len(),
        });
    }

    let mut fields = Fields::new();
    let mut rest = data;

    for def in defs {
        let width = def.width().unwrap_or(rest.len());
        let (this, next) = rest.split_at(width);

        fields.insert(def.name.clone(), def.decode(this)?);
        rest = next;
    }

    Ok(fields)
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommandDef {
    pub id:       u8,
    pub name:     String,
    #[serde(default)]
    pub args:     Vec<FieldDef>,
    /// Fields of the response payload; `None` when immediate invocations get no response.
    #[serde(default)]
    pub response: Option<Vec<FieldDef>>,
}

impl CommandSpec for CommandDef {
    fn id(&self) -> u8 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_response(&self) -> bool {
        self.response.is_some()
    }

    fn encode_args(&self, args: &[Value]) -> Result<Bytes, EncodeError> {
        encode_fields(&self.args, args)
    }

    fn decode_resp(&self, data: &[u8]) -> Result<Fields, DecodeError> {
        decode_fields(self.response.as_deref().unwrap_or_default(), data)
    }

    fn parse_args(&self, args: &[String]) -> Result<Vec<Value>, EncodeError> {
        if self.args.len() != args.len() {
            return Err(EncodeError::Arity {
                expected: self.args.len(),
                got:      args.len(),
            });
        }

        self.args.iter().zip(args).map(|(def, input)| def.parse(input)).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignalDef {
    pub id:          u8,
    pub name:        String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields:      Vec<FieldDef>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GroupDef {
    pub id:      u8,
    pub name:    String,
    #[serde(default)]
    pub signals: Vec<SignalDef>,
}

#[derive(Debug)]
struct LogEntry {
    id:         LogId,
    group_name: String,
    signal:     SignalDef,
}

impl LogSpec for LogEntry {
    fn id(&self) -> LogId {
        self.id
    }

    fn group_name(&self) -> &str {
        &self.group_name
    }

    fn name(&self) -> &str {
        &self.signal.name
    }

    fn description(&self) -> &str {
        &self.signal.description
    }

    fn decode(&self, data: &[u8]) -> Result<Fields, DecodeError> {
        decode_fields(&self.signal.fields, data)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CatalogueFile {
    #[serde(default)]
    pub commands: Vec<CommandDef>,
    #[serde(default)]
    pub logs:     Vec<GroupDef>,
}

#[derive(Debug, Default)]
pub struct Catalogue {
    by_name: HashMap<String, Arc<CommandDef>>,
    by_id:   HashMap<u8, Arc<CommandDef>>,
    logs:    HashMap<LogId, Arc<LogEntry>>,
}

impl Catalogue {
    pub fn new(file: CatalogueFile) -> Result<Self, CatalogueError> {
        let mut result = Catalogue::default();

        for cmd in file.commands {
            validate(&cmd.args)?;
            validate(cmd.response.as_deref().unwrap_or_default())?;

            if result.by_id.contains_key(&cmd.id) || result.by_name.contains_key(&cmd.name) {
                return Err(CatalogueError::DuplicateCommand(cmd.name));
            }

            let cmd = Arc::new(cmd);
            result.by_id.insert(cmd.id, cmd.clone());
            result.by_name.insert(cmd.name.clone(), cmd);
        }

        for group in file.logs {
            for signal in group.signals {
                validate(&signal.fields)?;

                let id = LogId::new(group.id, signal.id);
                let entry = Arc::new(LogEntry {
                    id,
                    group_name: group.name.clone(),
                    signal,
                });

                if result.logs.insert(id, entry).is_some() {
                    return Err(CatalogueError::DuplicateLog(id));
                }
            }
        }

        tracing::debug!(commands = result.by_id.len(), logs = result.logs.len(), "catalogue loaded");

        Ok(result)
    }

    pub fn from_json(s: &str) -> Result<Self, CatalogueError> {
        Self::new(serde_json::from_str(s)?)
    }
}

impl Specification for Catalogue {
    fn command(&self, key: CmdKey<'_>) -> Result<Arc<dyn CommandSpec>, LookupError> {
        let found = match key {
            CmdKey::Name(name) => self.by_name.get(name),
            CmdKey::Id(id) => self.by_id.get(&id),
        };

        found
            .map(|cmd| cmd.clone() as Arc<dyn CommandSpec>)
            .ok_or_else(|| LookupError::Command(key.to_string()))
    }

    fn log(&self, id: LogId) -> Result<Arc<dyn LogSpec>, LookupError> {
        self.logs
            .get(&id)
            .map(|entry| entry.clone() as Arc<dyn LogSpec>)
            .ok_or(LookupError::Log(id))
    }
}
