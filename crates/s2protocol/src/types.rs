//! Type descriptors: the decoding instructions for protocol types.
//!
//! A protocol schema is a flat, index-addressed table of [`TypeInfo`]
//! values. Both decoders walk this table by recursive descent; a `typeid`
//! is an index into it.

/// How an integer (or a length/tag that is encoded like one) is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IntBounds {
    /// Added to the raw value after reading.
    pub offset: i64,
    /// Number of bits on the wire. Only the bit-packed decoder uses this;
    /// the versioned format is self-describing.
    pub bits: u8,
}

/// A field of a struct, or a variant of a choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Field {
    pub name: String,
    /// Index of the field value's type.
    pub typeid: usize,
    /// Wire tag. Structs match it against versioned wire tags; choices are
    /// indexed by it.
    pub tag: i64,
    /// True iff the declared name is `__parent`; such a field splices its
    /// value into the enclosing struct instead of nesting.
    pub is_name_parent: bool,
}

/// Decoding info for one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TypeInfo {
    /// An integer with the given layout.
    Int(IntBounds),
    /// An ordered list of named fields.
    Struct(Vec<Field>),
    /// One of several variants, selected by a tag.
    Choice {
        bounds: IntBounds,
        fields: Vec<Field>,
    },
    /// A list; `bounds` describes the length's encoding.
    Array { bounds: IntBounds, element: usize },
    /// A packed list of bits; `bounds` describes the bit count's encoding.
    BitArray(IntBounds),
    /// A byte string; `bounds` describes the byte length's encoding.
    Blob(IntBounds),
    /// A value that may be absent.
    Optional { inner: usize },
    Bool,
    /// Four bytes, conventionally a printable code.
    FourCc,
    Null,
}
