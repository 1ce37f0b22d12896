//! The versioned decoder.
//!
//! Decodes the self-describing wire format: every value is preceded by a
//! one-byte field-type tag, integers are sign-flagged varints, and all
//! reads are byte-aligned. Struct fields are tagged on the wire, so a
//! newer replay can carry fields an older schema does not know; those are
//! skipped exactly. Used for the header, game details and tracker events.

use s2protocol_buffers::{BitBuffer, ByteOrder};

use crate::decoder::{splice_parent, Decoder};
use crate::error::DecodeError;
use crate::types::TypeInfo;
use crate::value::{BitArray, Struct, Value};

// Wire field types. The schema implies the expected one, so the decoder
// reads and discards the byte; the skipper dispatches on it.
const FIELD_ARRAY: u8 = 0;
const FIELD_BIT_ARRAY: u8 = 1;
const FIELD_BLOB: u8 = 2;
const FIELD_CHOICE: u8 = 3;
const FIELD_OPTIONAL: u8 = 4;
const FIELD_STRUCT: u8 = 5;
const FIELD_U8: u8 = 6;
const FIELD_U32: u8 = 7;
const FIELD_U64: u8 = 8;
const FIELD_VARINT: u8 = 9;

pub(crate) struct VersionedDecoder<'a> {
    buf: BitBuffer<'a>,
    type_infos: &'a [TypeInfo],
}

impl<'a> VersionedDecoder<'a> {
    pub fn new(contents: &'a [u8], type_infos: &'a [TypeInfo]) -> Self {
        Self {
            buf: BitBuffer::new(contents, ByteOrder::Big),
            type_infos,
        }
    }

    /// Decodes one value of the given type id.
    pub fn instance(&mut self, typeid: usize) -> Result<Value, DecodeError> {
        let infos: &'a [TypeInfo] = self.type_infos;
        let ti = infos
            .get(typeid)
            .ok_or(DecodeError::UnknownTypeId(typeid))?;

        match ti {
            TypeInfo::Int(_) => {
                self.buf.read_byte()?; // field type (9)
                Ok(Value::Int(read_varint(&mut self.buf)?))
            }
            TypeInfo::Struct(fields) => {
                self.buf.read_byte()?; // field type (5)
                let mut s = Struct::with_capacity(fields.len());
                let length = read_varint(&mut self.buf)?;
                for _ in 0..length {
                    let tag = read_varint(&mut self.buf)?;
                    let Some(f) = fields.iter().find(|f| f.tag == tag) else {
                        // The schema knows nothing about this field.
                        skip_instance(&mut self.buf)?;
                        continue;
                    };
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
            TypeInfo::Choice { fields, .. } => {
                self.buf.read_byte()?; // field type (3)
                let tag = read_varint(&mut self.buf)?;
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
            TypeInfo::Array { element, .. } => {
                self.buf.read_byte()?; // field type (0)
                let length = read_length(&mut self.buf)?;
                let mut items = Vec::with_capacity(length);
                for _ in 0..length {
                    items.push(self.instance(*element)?);
                }
                Ok(Value::Array(items))
            }
            TypeInfo::BitArray(_) => {
                self.buf.read_byte()?; // field type (1)
                let count = read_length(&mut self.buf)?;
                let data = self.buf.read_aligned(count.div_ceil(8))?.to_vec();
                Ok(Value::BitArray(BitArray { count, data }))
            }
            TypeInfo::Blob(_) => {
                self.buf.read_byte()?; // field type (2)
                let length = read_length(&mut self.buf)?;
                let bytes = self.buf.read_aligned(length)?;
                Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
            }
            TypeInfo::Optional { inner } => {
                self.buf.read_byte()?; // field type (4)
                if self.buf.read_byte()? != 0 {
                    self.instance(*inner)
                } else {
                    Ok(Value::Null)
                }
            }
            TypeInfo::Bool => {
                self.buf.read_byte()?; // field type (6)
                Ok(Value::Bool(self.buf.read_byte()? != 0))
            }
            TypeInfo::FourCc => {
                self.buf.read_byte()?; // field type (7)
                let bytes = self.buf.read_aligned(4)?;
                Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
            }
            TypeInfo::Null => Ok(Value::Null),
        }
    }
}

impl Decoder for VersionedDecoder<'_> {
    fn eof(&self) -> bool {
        self.buf.eof()
    }

    fn byte_align(&mut self) {
        self.buf.byte_align();
    }

    fn instance(&mut self, typeid: usize) -> Result<Value, DecodeError> {
        VersionedDecoder::instance(self, typeid)
    }
}

/// Reads a variable-length integer.
///
/// Bytes come low-order group first; bit 7 of each byte is a continuation
/// flag. The least-significant bit of the assembled value is a sign flag,
/// the rest is the magnitude.
pub(crate) fn read_varint(buf: &mut BitBuffer<'_>) -> Result<i64, DecodeError> {
    let mut value: i64 = 0;
    let mut shift: u32 = 0;
    loop {
        let data = i64::from(buf.read_byte()?);
        if shift < 64 {
            value |= (data & 0x7f) << shift;
        }
        if data & 0x80 == 0 {
            return Ok(if value & 0x01 != 0 {
                -(value >> 1)
            } else {
                value >> 1
            });
        }
        shift += 7;
    }
}

fn read_length(buf: &mut BitBuffer<'_>) -> Result<usize, DecodeError> {
    usize::try_from(read_varint(buf)?).map_err(|_| DecodeError::UnexpectedValue {
        expected: "a nonnegative length",
    })
}

/// Consumes exactly one value without a schema, dispatching on the wire
/// field type. Used for struct fields whose tag the schema does not know;
/// the skip must be length-exact so the stream stays aligned.
fn skip_instance(buf: &mut BitBuffer<'_>) -> Result<(), DecodeError> {
    let field_type = buf.read_byte()?;
    match field_type {
        FIELD_ARRAY => {
            for _ in 0..read_length(buf)? {
                skip_instance(buf)?;
            }
        }
        FIELD_BIT_ARRAY => {
            let count = read_length(buf)?;
            buf.read_aligned(count.div_ceil(8))?;
        }
        FIELD_BLOB => {
            let length = read_length(buf)?;
            buf.read_aligned(length)?;
        }
        FIELD_CHOICE => {
            read_varint(buf)?; // tag
            skip_instance(buf)?;
        }
        FIELD_OPTIONAL => {
            if buf.read_byte()? != 0 {
                skip_instance(buf)?;
            }
        }
        FIELD_STRUCT => {
            for _ in 0..read_length(buf)? {
                read_varint(buf)?; // tag
                skip_instance(buf)?;
            }
        }
        FIELD_U8 => {
            buf.read_byte()?;
        }
        FIELD_U32 => {
            buf.read_aligned(4)?;
        }
        FIELD_U64 => {
            buf.read_aligned(8)?;
        }
        FIELD_VARINT => {
            read_varint(buf)?;
        }
        other => {
            tracing::debug!(field_type = other, "unknown wire field type");
            return Err(DecodeError::UnexpectedValue {
                expected: "a known wire field type",
            });
        }
    }
    Ok(())
}
