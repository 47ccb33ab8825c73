// Per-edition field-type registry
//
// Holds the built-in primitive decoders by schema name, plus the display
// handle tables the host layer fills in before any schema is compiled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::nbt::NbtRoot;

/// Protocol edition a registry and its compiled schemas belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edition {
    Java,
    Bedrock,
}

impl Edition {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "java" | "je" | "pc" => Some(Edition::Java),
            "bedrock" | "be" => Some(Edition::Bedrock),
            _ => None,
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edition::Java => write!(f, "java"),
            Edition::Bedrock => write!(f, "bedrock"),
        }
    }
}

/// Opaque handle into the host display layer. The decoder only passes it
/// back to the display sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayHandle(u32);

impl DisplayHandle {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }
}

/// Display category used for a primitive when no handle is registered for
/// the field's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackCategory {
    Uint,
    Uint64,
    Int,
    Int64,
    Float,
    Double,
    Boolean,
    String,
    Uuid,
    Bytes,
}

impl FallbackCategory {
    pub const ALL: [FallbackCategory; 10] = [
        FallbackCategory::Uint,
        FallbackCategory::Uint64,
        FallbackCategory::Int,
        FallbackCategory::Int64,
        FallbackCategory::Float,
        FallbackCategory::Double,
        FallbackCategory::Boolean,
        FallbackCategory::String,
        FallbackCategory::Uuid,
        FallbackCategory::Bytes,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FallbackCategory::Uint => "uint",
            FallbackCategory::Uint64 => "uint64",
            FallbackCategory::Int => "int",
            FallbackCategory::Int64 => "int64",
            FallbackCategory::Float => "float",
            FallbackCategory::Double => "double",
            FallbackCategory::Boolean => "boolean",
            FallbackCategory::String => "string",
            FallbackCategory::Uuid => "uuid",
            FallbackCategory::Bytes => "bytes",
        }
    }
}

/// Built-in primitive decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    VarInt,
    VarLong,
    String,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Bool,
    F32,
    F64,
    Uuid,
    RestBuffer,
    Void,
    Nbt,
    OptionalNbt,
}

impl PrimitiveKind {
    const BUILTINS: [(&'static str, PrimitiveKind); 20] = [
        ("varint", PrimitiveKind::VarInt),
        ("optvarint", PrimitiveKind::VarInt),
        ("varlong", PrimitiveKind::VarLong),
        ("string", PrimitiveKind::String),
        ("u8", PrimitiveKind::U8),
        ("u16", PrimitiveKind::U16),
        ("u32", PrimitiveKind::U32),
        ("u64", PrimitiveKind::U64),
        ("i8", PrimitiveKind::I8),
        ("i16", PrimitiveKind::I16),
        ("i32", PrimitiveKind::I32),
        ("i64", PrimitiveKind::I64),
        ("bool", PrimitiveKind::Bool),
        ("f32", PrimitiveKind::F32),
        ("f64", PrimitiveKind::F64),
        ("UUID", PrimitiveKind::Uuid),
        ("restBuffer", PrimitiveKind::RestBuffer),
        ("void", PrimitiveKind::Void),
        ("nbt", PrimitiveKind::Nbt),
        ("optionalNbt", PrimitiveKind::OptionalNbt),
    ];

    pub fn fallback_category(self) -> FallbackCategory {
        match self {
            PrimitiveKind::VarInt
            | PrimitiveKind::U8
            | PrimitiveKind::U16
            | PrimitiveKind::U32
            | PrimitiveKind::Void => FallbackCategory::Uint,
            PrimitiveKind::VarLong | PrimitiveKind::U64 => FallbackCategory::Uint64,
            PrimitiveKind::I8 | PrimitiveKind::I16 | PrimitiveKind::I32 => FallbackCategory::Int,
            PrimitiveKind::I64 => FallbackCategory::Int64,
            PrimitiveKind::F32 => FallbackCategory::Float,
            PrimitiveKind::F64 => FallbackCategory::Double,
            PrimitiveKind::Bool => FallbackCategory::Boolean,
            PrimitiveKind::String => FallbackCategory::String,
            PrimitiveKind::Uuid => FallbackCategory::Uuid,
            PrimitiveKind::RestBuffer | PrimitiveKind::Nbt | PrimitiveKind::OptionalNbt => {
                FallbackCategory::Bytes
            }
        }
    }

    /// Whether the primitive decodes to an integer usable as an array count.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PrimitiveKind::VarInt
                | PrimitiveKind::VarLong
                | PrimitiveKind::U8
                | PrimitiveKind::U16
                | PrimitiveKind::U32
                | PrimitiveKind::U64
                | PrimitiveKind::I8
                | PrimitiveKind::I16
                | PrimitiveKind::I32
                | PrimitiveKind::I64
        )
    }
}

/// Handles for one registered bitfield layout: the whole packed region and
/// one per entry, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldHandles {
    pub whole: DisplayHandle,
    pub entries: Vec<DisplayHandle>,
}

#[derive(Debug, Clone)]
pub struct Registry {
    edition: Edition,
    nbt_root: NbtRoot,
    primitives: HashMap<String, PrimitiveKind>,
    names: HashMap<String, DisplayHandle>,
    bitfields: HashMap<String, BitfieldHandles>,
    fallbacks: HashMap<FallbackCategory, DisplayHandle>,
}

impl Registry {
    /// Creates a registry holding the built-in primitives and empty
    /// handle tables.
    pub fn new(edition: Edition) -> Self {
        let primitives = PrimitiveKind::BUILTINS
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect();
        Self {
            edition,
            nbt_root: NbtRoot::default(),
            primitives,
            names: HashMap::new(),
            bitfields: HashMap::new(),
            fallbacks: HashMap::new(),
        }
    }

    pub fn edition(&self) -> Edition {
        self.edition
    }

    pub fn nbt_root(&self) -> NbtRoot {
        self.nbt_root
    }

    pub fn set_nbt_root(&mut self, root: NbtRoot) {
        self.nbt_root = root;
    }

    /// Adds an extra schema name for a built-in primitive.
    pub fn register_primitive(&mut self, name: &str, kind: PrimitiveKind) {
        self.primitives.insert(name.to_string(), kind);
    }

    pub fn register_name(&mut self, name: &str, handle: DisplayHandle) {
        self.names.insert(name.to_string(), handle);
    }

    pub fn register_bitfield(&mut self, signature: &str, handles: BitfieldHandles) {
        self.bitfields.insert(signature.to_string(), handles);
    }

    pub fn register_fallback(&mut self, category: FallbackCategory, handle: DisplayHandle) {
        self.fallbacks.insert(category, handle);
    }

    pub fn primitive(&self, name: &str) -> Option<PrimitiveKind> {
        self.primitives.get(name).copied()
    }

    pub fn handle_for_name(&self, name: &str) -> Option<DisplayHandle> {
        self.names.get(name).copied()
    }

    pub fn bitfield(&self, signature: &str) -> Option<&BitfieldHandles> {
        self.bitfields.get(signature)
    }

    pub fn fallback(&self, category: FallbackCategory) -> Option<DisplayHandle> {
        self.fallbacks.get(&category).copied()
    }
}
