// Decode engine: walks a compiled FieldType graph over a message
// Every field is decoded at an absolute offset with a byte budget and
// returns how many bytes it consumed

use std::ops::Range;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::bits::{sign_extend, BitReader};
use crate::display::{BitDisplay, DisplaySink};
use crate::error::{DecodeError, DecodeResult};
use crate::field::{Bitfield, BufferLength, CountSource, FieldKind, FieldType, NamedField};
use crate::nbt::{nbt_length, NbtRoot};
use crate::reader::ByteReader;
use crate::recorder::{Record, ValueRecorder};
use crate::registry::{DisplayHandle, PrimitiveKind};
use crate::value::Value;

/// Total bytes consumed by a message did not match the bytes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Result of decoding one whole message body.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutcome {
    pub record: Record,
    /// Bytes consumed by the root field, or the furthest byte reached when
    /// decoding failed part-way.
    pub consumed: usize,
    pub mismatch: Option<LengthMismatch>,
    pub error: Option<DecodeError>,
}

impl DecodeOutcome {
    pub fn is_clean(&self) -> bool {
        self.mismatch.is_none() && self.error.is_none()
    }
}

/// Decodes `field` at `offset` in `data` with `remaining` bytes available
/// and returns the number of bytes it consumed.
pub fn decode(
    field: &FieldType,
    label: &str,
    data: &[u8],
    offset: usize,
    remaining: usize,
    recorder: &mut ValueRecorder,
    sink: Option<&mut dyn DisplaySink>,
) -> DecodeResult<usize> {
    let sink = sink.map(|s| s as &mut dyn DisplaySink);
    let mut decoder = Decoder::new(data, NbtRoot::default(), recorder, sink);
    decoder.decode_field(field, label, offset, remaining)
}

/// Decodes a whole message body starting at `offset`.
///
/// A decode error does not discard anything: the record holds every value
/// decoded before the failure. When the root did not consume exactly the
/// bytes left in the message a length-mismatch marker is sent to the sink.
pub fn decode_message(
    root: &FieldType,
    data: &[u8],
    offset: usize,
    nbt_root: NbtRoot,
    mut sink: Option<&mut dyn DisplaySink>,
) -> DecodeOutcome {
    let expected = data.len().saturating_sub(offset);
    let mut recorder = ValueRecorder::new();
    let (result, reached) = {
        let reborrowed = sink.as_mut().map(|s| &mut **s as &mut dyn DisplaySink);
        let mut decoder = Decoder::new(data, nbt_root, &mut recorder, reborrowed);
        let result = decoder.decode_field(root, "", offset, expected);
        (result, decoder.high_water.saturating_sub(offset))
    };

    let (consumed, error) = match result {
        Ok(consumed) => (consumed, None),
        Err(err) => {
            debug!(error = %err, reached, "message decode failed");
            (reached, Some(err))
        }
    };

    let mismatch = (consumed != expected).then_some(LengthMismatch {
        expected,
        actual: consumed,
    });
    if let (Some(mismatch), Some(sink)) = (mismatch, sink) {
        sink.length_mismatch(mismatch.expected, mismatch.actual, offset..data.len());
    }

    DecodeOutcome {
        record: recorder.finish(),
        consumed,
        mismatch,
        error,
    }
}

pub struct Decoder<'a, 'd> {
    data: &'a [u8],
    nbt_root: NbtRoot,
    recorder: &'d mut ValueRecorder,
    sink: Option<&'d mut dyn DisplaySink>,
    high_water: usize,
}

impl<'a, 'd> Decoder<'a, 'd> {
    pub fn new(
        data: &'a [u8],
        nbt_root: NbtRoot,
        recorder: &'d mut ValueRecorder,
        sink: Option<&'d mut dyn DisplaySink>,
    ) -> Self {
        Self {
            data,
            nbt_root,
            recorder,
            sink,
            high_water: 0,
        }
    }

    pub fn decode_field(
        &mut self,
        field: &FieldType,
        label: &str,
        offset: usize,
        remaining: usize,
    ) -> DecodeResult<usize> {
        let consumed = match &field.kind {
            FieldKind::Primitive(kind) => self.decode_primitive(*kind, field.handle, label, offset, remaining)?,
            FieldKind::Container { fields, top_level } => {
                self.decode_container(fields, *top_level, label, offset, remaining)?
            }
            FieldKind::Option(inner) => self.decode_option(inner, label, offset, remaining)?,
            FieldKind::Array { element, count } => {
                self.decode_array(element, count, label, offset, remaining)?
            }
            FieldKind::Buffer(length) => self.decode_buffer(*length, field.handle, label, offset, remaining)?,
            FieldKind::Mapper { inner, mappings } => {
                let saved = self.sink.take();
                let result = self.decode_field(inner, label, offset, remaining);
                self.sink = saved;
                let consumed = result?;

                let raw = self
                    .recorder
                    .query(1, label)?
                    .as_i64()
                    .ok_or_else(|| DecodeError::NotAnInteger { path: label.to_string() })?;
                let name = mappings.get(&raw).ok_or_else(|| DecodeError::UnmappedValue {
                    path: label.to_string(),
                    value: raw,
                })?;
                let value = Value::String(name.clone());
                self.emit(field.handle, label, offset..offset + consumed, &value);
                self.recorder.replace_last(label, value);
                consumed
            }
            FieldKind::Bitfield(bitfield) => self.decode_bitfield(bitfield, field.handle, label, offset, remaining)?,
        };
        trace!(label, offset, consumed, "decoded field");
        self.high_water = self.high_water.max(offset + consumed);
        Ok(consumed)
    }

    fn window(&self, offset: usize, len: usize) -> DecodeResult<&'a [u8]> {
        let data: &'a [u8] = self.data;
        offset
            .checked_add(len)
            .and_then(|end| data.get(offset..end))
            .ok_or(DecodeError::Underrun {
                needed: len,
                available: data.len().saturating_sub(offset),
            })
    }

    fn emit(&mut self, handle: Option<DisplayHandle>, label: &str, range: Range<usize>, value: &Value) {
        if let (Some(handle), Some(sink)) = (handle, self.sink.as_deref_mut()) {
            sink.add_field(handle, label, range, value);
        }
    }

    fn decode_primitive(
        &mut self,
        kind: PrimitiveKind,
        handle: Option<DisplayHandle>,
        label: &str,
        offset: usize,
        remaining: usize,
    ) -> DecodeResult<usize> {
        let window = self.window(offset, remaining)?;
        let mut reader = ByteReader::new(window);
        let value = match kind {
            PrimitiveKind::VarInt => Some(Value::Uint(reader.read_var_u32()?)),
            PrimitiveKind::VarLong => Some(Value::Uint64(reader.read_var_u64()?)),
            PrimitiveKind::String => {
                let bytes = reader.read_prefixed()?;
                match std::str::from_utf8(bytes) {
                    Ok(text) => Some(Value::String(text.to_string())),
                    Err(err) => {
                        debug!(label, offset, error = %err, "string is not valid UTF-8, keeping raw bytes");
                        Some(Value::Bytes(bytes.to_vec()))
                    }
                }
            }
            PrimitiveKind::U8 => Some(Value::Uint(u32::from(reader.read_u8()?))),
            PrimitiveKind::U16 => Some(Value::Uint(u32::from(reader.read_u16()?))),
            PrimitiveKind::U32 => Some(Value::Uint(reader.read_u32()?)),
            PrimitiveKind::U64 => Some(Value::Uint64(reader.read_u64()?)),
            PrimitiveKind::I8 => Some(Value::Int(i32::from(reader.read_i8()?))),
            PrimitiveKind::I16 => Some(Value::Int(i32::from(reader.read_i16()?))),
            PrimitiveKind::I32 => Some(Value::Int(reader.read_i32()?)),
            PrimitiveKind::I64 => Some(Value::Int64(reader.read_i64()?)),
            PrimitiveKind::Bool => Some(Value::Bool(reader.read_u8()? != 0)),
            PrimitiveKind::F32 => Some(Value::Float(reader.read_f32()?)),
            PrimitiveKind::F64 => Some(Value::Double(reader.read_f64()?)),
            PrimitiveKind::Uuid => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(reader.read_bytes(16)?);
                Some(Value::Uuid(Uuid::from_bytes(bytes)))
            }
            PrimitiveKind::RestBuffer => Some(Value::Bytes(reader.read_rest().to_vec())),
            PrimitiveKind::Void => None,
            PrimitiveKind::Nbt => {
                let len = nbt_length(window, self.nbt_root)?;
                Some(Value::Bytes(reader.read_bytes(len)?.to_vec()))
            }
            PrimitiveKind::OptionalNbt => {
                let len = nbt_length(window, self.nbt_root)?;
                let bytes = reader.read_bytes(len)?;
                // A lone TAG_End means the compound is absent.
                (len > 1).then(|| Value::Bytes(bytes.to_vec()))
            }
        };

        let consumed = reader.position();
        if let Some(value) = value {
            self.emit(handle, label, offset..offset + consumed, &value);
            self.recorder.record(label, value);
        }
        Ok(consumed)
    }

    fn decode_container(
        &mut self,
        fields: &[NamedField],
        top_level: bool,
        label: &str,
        offset: usize,
        remaining: usize,
    ) -> DecodeResult<usize> {
        if !top_level {
            self.recorder.push_scope(label);
            if let Some(sink) = self.sink.as_deref_mut() {
                sink.open_group(label, offset);
            }
        }

        // On failure the scope and group stay open; the recorder and the
        // display tree both unwind them when the message is finished.
        let mut consumed = 0;
        for member in fields {
            consumed += self.decode_field(
                &member.field,
                &member.name,
                offset + consumed,
                remaining - consumed,
            )?;
        }

        if !top_level {
            self.recorder.pop_scope();
            if let Some(sink) = self.sink.as_deref_mut() {
                sink.close_group(offset + consumed);
            }
        }
        Ok(consumed)
    }

    fn decode_option(
        &mut self,
        inner: &FieldType,
        label: &str,
        offset: usize,
        remaining: usize,
    ) -> DecodeResult<usize> {
        let present = ByteReader::new(self.window(offset, remaining)?).read_u8()?;
        if present == 0 {
            return Ok(1);
        }
        Ok(1 + self.decode_field(inner, label, offset + 1, remaining - 1)?)
    }

    fn decode_buffer(
        &mut self,
        length: BufferLength,
        handle: Option<DisplayHandle>,
        label: &str,
        offset: usize,
        remaining: usize,
    ) -> DecodeResult<usize> {
        let (bytes, range, consumed) = match length {
            BufferLength::Fixed(count) => {
                if count > remaining {
                    return Err(DecodeError::Underrun {
                        needed: count,
                        available: remaining,
                    });
                }
                let bytes = self.window(offset, count)?;
                // The display range starts one byte past the field, cut
                // short at the end of the message.
                let end = (offset + 1 + count).min(self.data.len());
                (bytes, (offset + 1).min(end)..end, count)
            }
            BufferLength::Prefixed => {
                let mut reader = ByteReader::new(self.window(offset, remaining)?);
                let bytes = reader.read_prefixed()?;
                (bytes, offset..offset + reader.position(), reader.position())
            }
        };
        let value = Value::Bytes(bytes.to_vec());
        self.emit(handle, label, range, &value);
        self.recorder.record(label, value);
        Ok(consumed)
    }

    fn decode_array(
        &mut self,
        element: &FieldType,
        source: &CountSource,
        label: &str,
        offset: usize,
        remaining: usize,
    ) -> DecodeResult<usize> {
        let (count, mut consumed) = match source {
            CountSource::VarInt => {
                let mut reader = ByteReader::new(self.window(offset, remaining)?);
                let count = reader.read_var_u32()?;
                (i64::from(count), reader.position())
            }
            CountSource::Inline(kind) => {
                let mut reader = ByteReader::new(self.window(offset, remaining)?);
                let count = read_integer(&mut reader, *kind)?;
                (count, reader.position())
            }
            CountSource::Fixed(count) => (*count as i64, 0),
            CountSource::Field { depth, path } => {
                let count = self
                    .recorder
                    .query(*depth, path)?
                    .as_i64()
                    .ok_or_else(|| DecodeError::NotAnInteger { path: path.clone() })?;
                (count, 0)
            }
        };
        let count = usize::try_from(count).map_err(|_| DecodeError::InvalidCount {
            path: label.to_string(),
            value: count,
        })?;

        let element_min = element.min_len();
        if element_min > 0 && count.saturating_mul(element_min) > remaining - consumed {
            return Err(DecodeError::Underrun {
                needed: count.saturating_mul(element_min),
                available: remaining - consumed,
            });
        }

        for index in 0..count {
            let element_label = format!("{}[{}]", label, index);
            consumed += self.decode_field(
                element,
                &element_label,
                offset + consumed,
                remaining - consumed,
            )?;
        }
        Ok(consumed)
    }

    fn decode_bitfield(
        &mut self,
        bitfield: &Bitfield,
        handle: Option<DisplayHandle>,
        label: &str,
        offset: usize,
        remaining: usize,
    ) -> DecodeResult<usize> {
        let byte_len = bitfield.byte_len();
        if byte_len > remaining {
            return Err(DecodeError::Underrun {
                needed: byte_len,
                available: remaining,
            });
        }
        let bytes = self.window(offset, byte_len)?;
        let mut reader = BitReader::new(bytes);

        let mut values = Vec::with_capacity(bitfield.entries.len());
        for entry in &bitfield.entries {
            let raw = reader.read_bits(entry.bits)?;
            let value = match (entry.signed, entry.bits <= 32) {
                (true, true) => Value::Int(sign_extend(raw, entry.bits) as i32),
                (false, true) => Value::Uint(raw as u32),
                (true, false) => Value::Int64(sign_extend(raw, entry.bits)),
                (false, false) => Value::Uint64(raw),
            };
            values.push(value);
        }

        if let (Some(handle), Some(sink)) = (handle, self.sink.as_deref_mut()) {
            let packed = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            let packed = packed >> (byte_len as u32 * 8 - bitfield.total_bits);
            let entries: Vec<BitDisplay<'_>> = bitfield
                .entries
                .iter()
                .zip(&values)
                .map(|(entry, value)| BitDisplay {
                    handle: entry.handle,
                    name: &entry.name,
                    mask: entry.mask,
                    value,
                })
                .collect();
            sink.add_bitmask(handle, label, offset..offset + byte_len, packed, &entries);
        }

        self.recorder.push_scope(label);
        for (entry, value) in bitfield.entries.iter().zip(values) {
            self.recorder.record(&entry.name, value);
        }
        self.recorder.pop_scope();
        Ok(byte_len)
    }
}

fn read_integer(reader: &mut ByteReader<'_>, kind: PrimitiveKind) -> DecodeResult<i64> {
    Ok(match kind {
        PrimitiveKind::VarInt => i64::from(reader.read_var_u32()?),
        PrimitiveKind::VarLong => reader.read_var_u64()? as i64,
        PrimitiveKind::U8 => i64::from(reader.read_u8()?),
        PrimitiveKind::U16 => i64::from(reader.read_u16()?),
        PrimitiveKind::U32 => i64::from(reader.read_u32()?),
        PrimitiveKind::U64 => reader.read_u64()? as i64,
        PrimitiveKind::I8 => i64::from(reader.read_i8()?),
        PrimitiveKind::I16 => i64::from(reader.read_i16()?),
        PrimitiveKind::I32 => i64::from(reader.read_i32()?),
        PrimitiveKind::I64 => reader.read_i64()?,
        other => {
            return Err(DecodeError::NotAnInteger {
                path: format!("{:?}", other),
            })
        }
    })
}
