// NBT length scanning
// The decoder never interprets NBT; it only needs to know how many bytes
// one root tag occupies so it can record the blob and move on.

use crate::error::{DecodeError, DecodeResult};
use crate::reader::ByteReader;

const TAG_END: u8 = 0;
const TAG_BYTE: u8 = 1;
const TAG_SHORT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_BYTE_ARRAY: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_LIST: u8 = 9;
const TAG_COMPOUND: u8 = 10;
const TAG_INT_ARRAY: u8 = 11;
const TAG_LONG_ARRAY: u8 = 12;

const MAX_DEPTH: usize = 512;

/// How the root tag is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NbtRoot {
    /// Type byte, name, payload.
    #[default]
    Named,
    /// Type byte, payload (network NBT of newer Java editions).
    Nameless,
}

/// Returns the encoded length of the root tag at the start of `data`.
/// A lone `TAG_End` byte is a valid, empty tag of length 1.
pub fn nbt_length(data: &[u8], root: NbtRoot) -> DecodeResult<usize> {
    let mut reader = ByteReader::new(data);
    let tag = reader.read_u8()?;
    if tag == TAG_END {
        return Ok(1);
    }
    if root == NbtRoot::Named {
        skip_string(&mut reader)?;
    }
    skip_payload(&mut reader, tag, 0)?;
    Ok(reader.position())
}

fn skip_string(reader: &mut ByteReader<'_>) -> DecodeResult<()> {
    let len = reader.read_u16()? as usize;
    reader.read_bytes(len)?;
    Ok(())
}

fn array_len(reader: &mut ByteReader<'_>) -> DecodeResult<usize> {
    let len = reader.read_i32()?;
    usize::try_from(len).map_err(|_| DecodeError::InvalidNbt(format!("negative length {}", len)))
}

fn skip_payload(reader: &mut ByteReader<'_>, tag: u8, depth: usize) -> DecodeResult<()> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::InvalidNbt("nesting too deep".to_string()));
    }
    match tag {
        TAG_END => {}
        TAG_BYTE => {
            reader.read_bytes(1)?;
        }
        TAG_SHORT => {
            reader.read_bytes(2)?;
        }
        TAG_INT | TAG_FLOAT => {
            reader.read_bytes(4)?;
        }
        TAG_LONG | TAG_DOUBLE => {
            reader.read_bytes(8)?;
        }
        TAG_BYTE_ARRAY => {
            let len = array_len(reader)?;
            reader.read_bytes(len)?;
        }
        TAG_STRING => skip_string(reader)?,
        TAG_LIST => {
            let element = reader.read_u8()?;
            let len = array_len(reader)?;
            for _ in 0..len {
                skip_payload(reader, element, depth + 1)?;
            }
        }
        TAG_COMPOUND => loop {
            let child = reader.read_u8()?;
            if child == TAG_END {
                break;
            }
            skip_string(reader)?;
            skip_payload(reader, child, depth + 1)?;
        },
        TAG_INT_ARRAY => {
            let len = array_len(reader)?;
            reader.read_bytes(len.saturating_mul(4))?;
        }
        TAG_LONG_ARRAY => {
            let len = array_len(reader)?;
            reader.read_bytes(len.saturating_mul(8))?;
        }
        other => return Err(DecodeError::InvalidNbt(format!("unknown tag type {}", other))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_tag_is_one_byte() {
        assert_eq!(nbt_length(&[0x00, 0xAA], NbtRoot::Named).unwrap(), 1);
    }

    #[test]
    fn test_named_compound() {
        // compound "" { int "a" = 1 }
        let data = [
            0x0A, 0x00, 0x00, // compound, empty name
            0x03, 0x00, 0x01, b'a', 0x00, 0x00, 0x00, 0x01, // int a
            0x00, // end
            0xFF, // trailing byte not part of the tag
        ];
        assert_eq!(nbt_length(&data, NbtRoot::Named).unwrap(), 12);
    }

    #[test]
    fn test_nameless_compound_with_list() {
        // compound { list "l" of 2 bytes }
        let data = [
            0x0A, // compound
            0x09, 0x00, 0x01, b'l', 0x01, 0x00, 0x00, 0x00, 0x02, 0x05, 0x06, // list
            0x00, // end
        ];
        assert_eq!(nbt_length(&data, NbtRoot::Nameless).unwrap(), data.len());
    }

    #[test]
    fn test_truncated_fails() {
        let data = [0x0A, 0x00, 0x00, 0x03, 0x00, 0x01, b'a', 0x00];
        assert!(matches!(
            nbt_length(&data, NbtRoot::Named),
            Err(DecodeError::Underrun { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_fails() {
        assert!(matches!(
            nbt_length(&[0x0A, 0x00, 0x00, 0x63], NbtRoot::Named),
            Err(DecodeError::InvalidNbt(_))
        ));
    }
}
