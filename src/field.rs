// Compiled field-type graph, built once per packet and never mutated

use std::collections::HashMap;

use crate::registry::{DisplayHandle, PrimitiveKind};

/// Name given to container members the schema leaves unnamed.
pub const ANON_FIELD: &str = "Anon Field";

#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub kind: FieldKind,
    /// Display handle, either resolved by field name or a category fallback.
    pub handle: Option<DisplayHandle>,
    /// True once the handle came from a name lookup (or, for containers,
    /// once any member's did). Unresolved nodes may inherit a handle from
    /// the wrapper they sit in.
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Primitive(PrimitiveKind),
    /// Members in wire order. A top-level container adds no nesting level.
    Container {
        fields: Vec<NamedField>,
        top_level: bool,
    },
    /// One presence byte, then the inner field when non-zero.
    Option(Box<FieldType>),
    Array {
        element: Box<FieldType>,
        count: CountSource,
    },
    Buffer(BufferLength),
    Mapper {
        inner: Box<FieldType>,
        mappings: HashMap<i64, String>,
    },
    Bitfield(Bitfield),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedField {
    pub name: String,
    pub field: FieldType,
}

/// Where an array's element count comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CountSource {
    /// Leading varint.
    VarInt,
    /// Leading fixed-width integer of the given kind.
    Inline(PrimitiveKind),
    /// Constant count from the schema.
    Fixed(usize),
    /// Value recorded earlier for `path`, `depth` scopes up (1 = siblings).
    Field { depth: usize, path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLength {
    Fixed(usize),
    Prefixed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bitfield {
    pub entries: Vec<BitEntry>,
    pub total_bits: u32,
    /// Concatenated `[size]name` segments, the registry lookup key.
    pub signature: String,
}

impl Bitfield {
    pub fn byte_len(&self) -> usize {
        self.total_bits.div_ceil(8) as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitEntry {
    pub name: String,
    pub bits: u32,
    pub signed: bool,
    /// Position of this entry inside the packed region, right-aligned to
    /// the region's last bit.
    pub mask: u64,
    pub handle: Option<DisplayHandle>,
}

impl FieldType {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            handle: None,
            resolved: false,
        }
    }

    pub fn with_handle(mut self, handle: Option<DisplayHandle>) -> Self {
        self.handle = handle;
        self
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self.kind, FieldKind::Primitive(_))
    }

    /// Smallest number of bytes this field can occupy on the wire.
    pub fn min_len(&self) -> usize {
        match &self.kind {
            FieldKind::Primitive(kind) => match kind {
                PrimitiveKind::Void | PrimitiveKind::RestBuffer => 0,
                PrimitiveKind::U16 | PrimitiveKind::I16 => 2,
                PrimitiveKind::U32 | PrimitiveKind::I32 | PrimitiveKind::F32 => 4,
                PrimitiveKind::U64 | PrimitiveKind::I64 | PrimitiveKind::F64 => 8,
                PrimitiveKind::Uuid => 16,
                _ => 1,
            },
            FieldKind::Container { fields, .. } => fields.iter().map(|f| f.field.min_len()).sum(),
            FieldKind::Option(_) => 1,
            FieldKind::Array { element, count } => match count {
                CountSource::VarInt => 1,
                CountSource::Inline(kind) => FieldType::new(FieldKind::Primitive(*kind)).min_len(),
                CountSource::Fixed(n) => n.saturating_mul(element.min_len()),
                CountSource::Field { .. } => 0,
            },
            FieldKind::Buffer(BufferLength::Fixed(n)) => *n,
            FieldKind::Buffer(BufferLength::Prefixed) => 1,
            FieldKind::Mapper { inner, .. } => inner.min_len(),
            FieldKind::Bitfield(bitfield) => bitfield.byte_len(),
        }
    }

    /// Assigns a handle found by name lookup and hands it down to any
    /// unresolved wrapped field.
    pub fn resolve(&mut self, handle: DisplayHandle) {
        self.handle = Some(handle);
        self.resolved = true;
        self.push_handle_inward(handle);
    }

    fn inherit(&mut self, handle: DisplayHandle) {
        if self.resolved {
            return;
        }
        self.handle = Some(handle);
        self.push_handle_inward(handle);
    }

    fn push_handle_inward(&mut self, handle: DisplayHandle) {
        match &mut self.kind {
            FieldKind::Option(inner)
            | FieldKind::Array { element: inner, .. }
            | FieldKind::Mapper { inner, .. } => inner.inherit(handle),
            _ => {}
        }
    }
}

/// Mask of a `bits`-wide entry starting `offset` bits into a region of
/// `total` bits.
pub fn entry_mask(offset: u32, bits: u32, total: u32) -> u64 {
    let width = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let shift = total.saturating_sub(offset + bits);
    if shift >= 64 {
        0
    } else {
        width << shift
    }
}
