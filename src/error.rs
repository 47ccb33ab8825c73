// Error types for schema compilation and packet decoding

use thiserror::Error;

/// Reasons a packet schema cannot be compiled.
///
/// None of these abort a protocol load. The packet they belong to is
/// kept in the protocol set with no root field and is reported as
/// unsupported.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("unsupported schema construct: {tag}")]
    UnsupportedConstruct { tag: String },

    #[error("schema construct not yet implemented: {tag}")]
    NotYetImplemented { tag: String },

    #[error("unsupported recursive schema: alias '{name}' expands to itself")]
    RecursiveAlias { name: String },

    #[error("malformed schema node: {0}")]
    MalformedNode(String),

    #[error("'{construct}' is missing parameter '{param}'")]
    MissingParam {
        construct: &'static str,
        param: &'static str,
    },

    #[error("bitfield signature '{signature}' has no registered display handle")]
    UnregisteredBitfield { signature: String },

    #[error("bitfield is {bits} bits wide, at most 64 are supported")]
    BitfieldTooWide { bits: u32 },

    #[error("malformed mapping table: {0}")]
    MalformedMapping(String),
}

/// Failures while decoding a single message.
///
/// A decode error is fatal for the current message only. Whatever was
/// recorded before the failure stays available to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer underrun: need {needed} bytes, have {available}")]
    Underrun { needed: usize, available: usize },

    #[error("variable-length integer longer than {max_bytes} bytes")]
    VarIntTooLong { max_bytes: usize },

    #[error("no value recorded for '{path}' at scope depth {depth}")]
    MissingValue { depth: usize, path: String },

    #[error("value recorded for '{path}' is not an integer")]
    NotAnInteger { path: String },

    #[error("invalid element count {value} from '{path}'")]
    InvalidCount { path: String, value: i64 },

    #[error("no mapping for value {value} of '{path}'")]
    UnmappedValue { path: String, value: i64 },

    #[error("invalid nbt: {0}")]
    InvalidNbt(String),

    #[error("packet 0x{id:02x} has no supported schema")]
    UnsupportedPacket { id: u32 },
}

pub type SchemaResult<T> = Result<T, SchemaError>;
pub type DecodeResult<T> = Result<T, DecodeError>;
