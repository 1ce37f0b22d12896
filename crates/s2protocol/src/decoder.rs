//! The seam shared by the two schema-directed decoders.

use crate::error::DecodeError;
use crate::types::Field;
use crate::value::{Struct, Value};

/// What a decoder must support for event-stream framing to drive it.
pub(crate) trait Decoder {
    /// True when the underlying buffer is exhausted.
    fn eof(&self) -> bool;

    /// Discards any partially-read byte.
    fn byte_align(&mut self);

    /// Decodes one value of the given type id.
    fn instance(&mut self, typeid: usize) -> Result<Value, DecodeError>;
}

/// Applies the `__parent` splice rule after a parent field has been
/// decoded, identically for both wire formats:
///
/// - a struct parent merges its fields into the enclosing struct
///   (left-to-right, later names overwrite in place);
/// - a non-struct parent of a single-field struct replaces the struct
///   entirely; the replacement is returned;
/// - otherwise the value is stored under the literal `__parent` name.
pub(crate) fn splice_parent(
    enclosing: &mut Struct,
    declared_fields: usize,
    field: &Field,
    parent: Value,
) -> Option<Value> {
    match parent {
        Value::Struct(p) => {
            for (name, value) in p {
                enclosing.set(name, value);
            }
            None
        }
        other if declared_fields == 1 => Some(other),
        other => {
            enclosing.set(field.name.clone(), other);
            None
        }
    }
}
