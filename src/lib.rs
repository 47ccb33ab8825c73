// Library module declarations
pub mod bits;
pub mod compiler;
pub mod config;
pub mod decoder;
pub mod display;
pub mod error;
pub mod field;
pub mod nbt;
pub mod packet_logger;
pub mod protocol;
pub mod reader;
pub mod recorder;
pub mod registry;
pub mod value;

pub use config::Config;
pub use decoder::{decode, decode_message, DecodeOutcome, LengthMismatch};
pub use display::{DisplaySink, DisplayTree, HandleCatalog};
pub use error::{DecodeError, SchemaError};
pub use packet_logger::{PacketDirection, PacketEntry, PacketLogger, SessionLog};
pub use protocol::{name_of, DecodedPacket, ProtocolEntry, ProtocolSet};
pub use recorder::{Record, ValueRecorder};
pub use registry::{DisplayHandle, Edition, Registry};
pub use value::Value;
