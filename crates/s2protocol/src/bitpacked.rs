//! The bit-packed decoder.
//!
//! Decodes the dense wire format: no per-value framing, every bit position
//! dictated by the schema. Used for init data and for game and message
//! event streams.

use s2protocol_buffers::{BitBuffer, ByteOrder};

use crate::decoder::{splice_parent, Decoder};
use crate::error::DecodeError;
use crate::types::{IntBounds, TypeInfo};
use crate::value::{BitArray, Struct, Value};

pub(crate) struct BitPackedDecoder<'a> {
    buf: BitBuffer<'a>,
    type_infos: &'a [TypeInfo],
}

impl<'a> BitPackedDecoder<'a> {
    pub fn new(contents: &'a [u8], type_infos: &'a [TypeInfo]) -> Self {
        Self {
            // The bit-packed format is always big endian.
            buf: BitBuffer::new(contents, ByteOrder::Big),
            type_infos,
        }
    }

    fn read_int(&mut self, bounds: IntBounds) -> Result<i64, DecodeError> {
        Ok(bounds.offset + self.buf.read_bits(bounds.bits)?)
    }

    fn read_length(&mut self, bounds: IntBounds) -> Result<usize, DecodeError> {
        usize::try_from(self.read_int(bounds)?).map_err(|_| DecodeError::UnexpectedValue {
            expected: "a nonnegative length",
        })
    }

    /// Decodes one value of the given type id.
    pub fn instance(&mut self, typeid: usize) -> Result<Value, DecodeError> {
        let infos: &'a [TypeInfo] = self.type_infos;
        let ti = infos
            .get(typeid)
            .ok_or(DecodeError::UnknownTypeId(typeid))?;

        match ti {
            TypeInfo::Int(bounds) => Ok(Value::Int(self.read_int(*bounds)?)),
            TypeInfo::Struct(fields) => {
                let mut s = Struct::with_capacity(fields.len());
                for f in fields {
                    let value = self.instance(f.typeid)?;
                    if f.is_name_parent {
                        if let Some(replacement) = splice_parent(&mut s, fields.len(), f, value) {
                            return Ok(replacement);
                        }
                    } else {
                        s.set(f.name.clone(), value);
                    }
                }
                Ok(Value::Struct(s))
            }
            TypeInfo::Choice { bounds, fields } => {
                let tag = self.read_int(*bounds)?;
                if tag < 0 || tag as usize >= fields.len() {
                    tracing::debug!(tag, "choice tag out of range, yielding null");
                    return Ok(Value::Null);
                }
                let f = &fields[tag as usize];
                let value = self.instance(f.typeid)?;
                let mut s = Struct::with_capacity(1);
                s.set(f.name.clone(), value);
                Ok(Value::Struct(s))
            }
            TypeInfo::Array { bounds, element } => {
                let length = self.read_length(*bounds)?;
                let mut items = Vec::with_capacity(length);
                for _ in 0..length {
                    items.push(self.instance(*element)?);
                }
                Ok(Value::Array(items))
            }
            TypeInfo::BitArray(bounds) => {
                // The count may exceed 64, so a single read_bits call is
                // not enough.
                let count = self.read_length(*bounds)?;
                let mut data = self.buf.read_unaligned(count / 8)?;
                let remaining = (count % 8) as u8;
                if remaining != 0 {
                    let tail = self.buf.read_bits(remaining)? as u8;
                    data.push(tail << (8 - remaining));
                }
                Ok(Value::BitArray(BitArray { count, data }))
            }
            TypeInfo::Blob(bounds) => {
                let length = self.read_length(*bounds)?;
                let bytes = self.buf.read_aligned(length)?;
                Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
            }
            TypeInfo::Optional { inner } => {
                if self.buf.read_bit()? {
                    self.instance(*inner)
                } else {
                    Ok(Value::Null)
                }
            }
            TypeInfo::Bool => Ok(Value::Bool(self.buf.read_bit()?)),
            TypeInfo::FourCc => {
                let bytes = self.buf.read_unaligned(4)?;
                Ok(Value::Str(String::from_utf8_lossy(&bytes).into_owned()))
            }
            TypeInfo::Null => Ok(Value::Null),
        }
    }
}

impl Decoder for BitPackedDecoder<'_> {
    fn eof(&self) -> bool {
        self.buf.eof()
    }

    fn byte_align(&mut self) {
        self.buf.byte_align();
    }

    fn instance(&mut self, typeid: usize) -> Result<Value, DecodeError> {
        BitPackedDecoder::instance(self, typeid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Field;

    fn field(name: &str, typeid: usize, tag: i64) -> Field {
        Field {
            name: name.into(),
            typeid,
            tag,
            is_name_parent: name == "__parent",
        }
    }

    // 0: bool, 1: optional bool, 2: int(0,6), 3: bitarray(len (0,6)),
    // 4: struct {flag: 0, count: 2}, 5: struct {__parent: 4, extra: 0},
    // 6: struct {__parent: 2}, 7: choice(0,2){0: int, 1: bool},
    // 8: array(len (0,3), elem 2), 9: blob(0,3), 10: fourcc
    fn table() -> Vec<TypeInfo> {
        vec![
            TypeInfo::Bool,
            TypeInfo::Optional { inner: 0 },
            TypeInfo::Int(IntBounds { offset: 0, bits: 6 }),
            TypeInfo::BitArray(IntBounds { offset: 0, bits: 6 }),
            TypeInfo::Struct(vec![field("flag", 0, 0), field("count", 2, 1)]),
            TypeInfo::Struct(vec![field("__parent", 4, -1), field("extra", 0, 0)]),
            TypeInfo::Struct(vec![field("__parent", 2, -1)]),
            TypeInfo::Choice {
                bounds: IntBounds { offset: 0, bits: 2 },
                fields: vec![field("value", 2, 0), field("flag", 0, 1)],
            },
            TypeInfo::Array {
                bounds: IntBounds { offset: 0, bits: 3 },
                element: 2,
            },
            TypeInfo::Blob(IntBounds { offset: 0, bits: 3 }),
            TypeInfo::FourCc,
        ]
    }

    fn decode(typeid: usize, contents: &[u8]) -> Value {
        let table = table();
        let mut d = BitPackedDecoder::new(contents, &table);
        d.instance(typeid).unwrap()
    }

    #[test]
    fn optional_bool() {
        // Bits are drawn from the low end of each byte: presence bit, then
        // the bool bit.
        assert_eq!(decode(1, &[0x03]), Value::Bool(true));
        assert_eq!(decode(1, &[0x01]), Value::Bool(false));
        assert_eq!(decode(1, &[0x00]), Value::Null);
    }

    #[test]
    fn int_with_offset() {
        let table = vec![TypeInfo::Int(IntBounds {
            offset: -5,
            bits: 8,
        })];
        let mut d = BitPackedDecoder::new(&[0x0a], &table);
        assert_eq!(d.instance(0).unwrap(), Value::Int(5));
    }

    #[test]
    fn struct_fields_in_declaration_order() {
        // flag = low bit, then 6-bit count.
        let v = decode(4, &[0b0001_0101]);
        let s = v.as_struct().unwrap();
        let names: Vec<&str> = s.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["flag", "count"]);
        assert_eq!(s.int(&["count"]), 0b001010);
        assert!(s.bool(&["flag"]));
    }

    #[test]
    fn parent_struct_is_merged() {
        // parent {flag, count} then extra.
        let v = decode(5, &[0b1101_0101]);
        let s = v.as_struct().unwrap();
        let names: Vec<&str> = s.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["flag", "count", "extra"]);
        assert!(s.bool(&["extra"]));
    }

    #[test]
    fn lone_parent_non_struct_replaces_value() {
        assert_eq!(decode(6, &[0x2a]), Value::Int(0x2a));
    }

    #[test]
    fn choice_selects_tagged_variant() {
        // tag 0 (2 bits) then int 6 bits.
        let v = decode(7, &[0b1010_1000]);
        let s = v.as_struct().unwrap();
        assert_eq!(s.int(&["value"]), 0b101010);

        // tag 1 then bool.
        let v = decode(7, &[0b0000_0101]);
        let s = v.as_struct().unwrap();
        assert!(s.bool(&["flag"]));
    }

    #[test]
    fn choice_tag_out_of_range_yields_null() {
        assert_eq!(decode(7, &[0b0000_0011]), Value::Null);
    }

    #[test]
    fn array_reads_length_then_elements() {
        // length 2 in the low 3 bits, then two 6-bit ints: 1 and 2.
        let v = decode(8, &[0x02, 0x05]);
        assert_eq!(v, Value::Array(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn blob_is_byte_aligned() {
        // 3-bit length = 2, align, then "ok".
        let v = decode(9, &[0x02, b'o', b'k']);
        assert_eq!(v, Value::Str("ok".into()));
    }

    #[test]
    fn fourcc_reads_four_unaligned_bytes() {
        let v = decode(10, b"Hero");
        assert_eq!(v, Value::Str("Hero".into()));
    }

    #[test]
    fn bit_array_packs_trailing_bits_high() {
        // 6-bit length = 10, then one whole byte, then 2 bits.
        // Wire bytes built for the low-first-within-byte big-endian order:
        // byte0 = [hi 2 bits of data byte][001010], byte1 = [tail 11][lo 6].
        let v = decode(3, &[0b1000_1010, 0b1111_0100]);
        let Value::BitArray(bits) = v else {
            panic!("expected bit array");
        };
        assert_eq!(bits.count, 10);
        assert_eq!(bits.data.len(), 2);
        assert_eq!(bits.data[0], 0xb4);
        assert_eq!(bits.data[1] & 0xc0, 0xc0);
        assert_eq!(bits.data[1] & 0x3f, 0, "padding bits must be zero");
    }

    #[test]
    fn truncated_input_is_an_error() {
        let table = table();
        let mut d = BitPackedDecoder::new(&[0x02], &table);
        assert!(matches!(
            d.instance(9),
            Err(DecodeError::EndOfInput(_))
        ));
    }
}
