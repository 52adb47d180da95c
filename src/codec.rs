//! Encode/decode expanded structures to and from raw bytes.
//!
//! Every leaf is packed little-endian at its offset for exactly `size` bytes; the gaps
//! left by alignment padding stay zero. Values wider than their leaf are truncated.

use crate::expand::ExpandedStructure;
use byteorder::{ByteOrder, LittleEndian};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short: need {needed} bytes, got {got}")]
    BufferTooShort { needed: usize, got: usize },
    #[error("value at `{path}` is not numeric")]
    NotNumeric { path: String },
    #[error("transform for `{path}` failed: {reason}")]
    Transform { path: String, reason: String },
    #[error("value {value} at `{path}` does not fit 32 bits")]
    OutOfRange { path: String, value: i128 },
}

/// Serialize `s` into a zero-initialized buffer of `s.total_size` bytes.
pub fn to_bytes(s: &ExpandedStructure) -> Vec<u8> {
    let mut out = vec![0u8; s.total_size];
    for f in &s.fields {
        write_le(&mut out[f.offset..f.offset + f.size], f.value);
    }
    out
}

/// Populate every leaf of `s` from `bytes`. Constants keep their declared value.
///
/// The buffer length is checked up front, so on error no leaf has been modified.
pub fn populate_from_bytes(s: &mut ExpandedStructure, bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.len() < s.total_size {
        return Err(CodecError::BufferTooShort {
            needed: s.total_size,
            got: bytes.len(),
        });
    }
    for f in &mut s.fields {
        f.value = match f.definition.constant {
            Some(c) => c,
            None => read_le(&bytes[f.offset..f.offset + f.size]),
        };
    }
    Ok(())
}

fn write_le(buf: &mut [u8], value: u32) {
    let nbytes = buf.len();
    if nbytes == 0 {
        return;
    }
    let masked = if nbytes >= 4 {
        u64::from(value)
    } else {
        u64::from(value) & ((1u64 << (8 * nbytes)) - 1)
    };
    LittleEndian::write_uint(buf, masked, nbytes);
}

fn read_le(buf: &[u8]) -> u32 {
    if buf.is_empty() {
        return 0;
    }
    LittleEndian::read_uint(buf, buf.len()) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::expand;
    use crate::schema::{Field, SchemaRegistry, Structure};

    fn status_value() -> ExpandedStructure {
        let reg = SchemaRegistry::new();
        let s = Structure::new("api")
            .with_field(Field::of_type("status", "uint8", &reg).expect("status"))
            .with_field(Field::of_type("value", "uint16", &reg).expect("value"));
        expand(&s)
    }

    #[test]
    fn encode_little_endian_with_padding() {
        let mut e = status_value();
        e.set("status", 1);
        e.set("value", 300);
        // status at 0, one byte of padding, value at 2.
        assert_eq!(to_bytes(&e), vec![0x01, 0x00, 0x2C, 0x01]);
    }

    #[test]
    fn decode_restores_values() {
        let mut e = status_value();
        populate_from_bytes(&mut e, &[7, 0xFF, 0x34, 0x12]).expect("decode");
        assert_eq!(e.get("status"), Some(7));
        assert_eq!(e.get("value"), Some(0x1234));
    }

    #[test]
    fn wide_values_truncate_to_leaf() {
        let mut e = status_value();
        e.set("status", 0x1FF);
        e.set("value", 0x1_0002);
        assert_eq!(to_bytes(&e), vec![0xFF, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn constants_override_buffer() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("c")
            .with_field(
                Field::of_type("magic", "uint8", &reg).expect("m").constant(0x5A).expect("c"),
            )
            .with_field(Field::of_type("x", "uint32", &reg).expect("x"));
        let mut e = expand(&s);
        populate_from_bytes(&mut e, &[0, 0, 0, 0, 1, 2, 3, 4]).expect("decode");
        assert_eq!(e.get("magic"), Some(0x5A));
        assert_eq!(e.get("x"), Some(0x0403_0201));
    }

    #[test]
    fn undersized_buffer_is_error_and_leaves_values() {
        let mut e = status_value();
        e.set("status", 3);
        let err = populate_from_bytes(&mut e, &[1, 2]).unwrap_err();
        assert_eq!(err, CodecError::BufferTooShort { needed: 4, got: 2 });
        assert_eq!(e.get("status"), Some(3));
    }

    #[test]
    fn byte_round_trip() {
        let reg = SchemaRegistry::new();
        let s = Structure::new("r")
            .with_field(Field::of_type("a", "uint8", &reg).expect("a"))
            .with_field(Field::of_type("b", "uint32", &reg).expect("b").repeated(2).expect("rep"))
            .with_field(Field::of_type("c", "uint16", &reg).expect("c"));
        let mut e = expand(&s);
        for (i, f) in e.fields.iter_mut().enumerate() {
            f.value = 0x11 * (i as u32 + 1);
        }
        let bytes = to_bytes(&e);
        let mut back = expand(&s);
        populate_from_bytes(&mut back, &bytes).expect("decode");
        for (a, b) in e.fields.iter().zip(&back.fields) {
            assert_eq!(a.value, b.value, "{}", a.path);
        }
    }
}
