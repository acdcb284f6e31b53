use thiserror::Error;

#[derive(Error, Debug)]
pub enum AxmlError {
    /// Provided file too small to be compiled xml
    #[error("file size too small for a binary xml document")]
    TooSmall,

    /// First chunk is not RES_XML_TYPE
    #[error("not a binary xml document, got chunk type 0x{0:04x}")]
    InvalidMagic(u16),

    /// Document header size must be 8 bytes
    #[error("got invalid header size {0}, expected 8")]
    HeaderSize(u16),

    /// A chunk declares more bytes than the buffer holds
    #[error("truncated chunk, declared {declared} bytes but only {available} available")]
    TruncatedChunk { declared: u32, available: usize },

    #[error("got error while parsing string pool: {0}")]
    StringPool(#[from] StringPoolError),

    /// Got error while parsing the event stream
    #[error("got error while parsing xml event stream")]
    EventStream,

    /// An event references a string index outside the pool
    #[error("string pool index {0} out of range")]
    BadStringIndex(u32),

    /// A decoded textual value cannot be mapped back onto the
    /// attribute's original type tag
    #[error("value {value:?} cannot be represented as attribute type 0x{type_tag:02x}")]
    UnrepresentableAttributeValue { type_tag: u8, value: String },
}

#[derive(Error, Debug)]
pub enum ArscError {
    /// Provided file too small to be resources.arsc
    #[error("file size too small for a resource table")]
    TooSmall,

    /// First chunk is not RES_TABLE_TYPE
    #[error("not a resource table, got chunk type 0x{0:04x}")]
    InvalidMagic(u16),

    /// A chunk declares more bytes than the buffer holds
    #[error("truncated chunk, declared {declared} bytes but only {available} available")]
    TruncatedChunk { declared: u32, available: usize },

    /// A child chunk extends past its parent's declared size
    #[error("child chunk at offset {offset} overflows parent by {overflow} bytes")]
    ChildChunkOverflowsParent { offset: usize, overflow: u64 },

    #[error("got error while parsing string pool: {0}")]
    StringPool(#[from] StringPoolError),

    /// Got error while parsing a resource table package
    #[error("got error while parsing resource table package")]
    Package,

    /// Package names occupy a fixed 128 code-unit field
    #[error("package name {0:?} exceeds 127 utf-16 code units")]
    PackageNameTooLong(String),

    /// Writer invariant: the computed size must cover all emitted bytes
    #[error("output buffer overflow while encoding resource table")]
    BufferOverflow,
}

#[derive(Error, Debug)]
pub enum StringPoolError {
    /// The chunk ends before its declared string or style data
    #[error("truncated string pool chunk")]
    Truncated,

    /// A string cannot carry a utf-8 length prefix (> 0x7fff code units
    /// or bytes); only raised when the caller forces utf-8
    #[error("string {index} too long for utf-8 length prefix ({code_units} code units)")]
    TooLongForUtf8 { index: usize, code_units: usize },
}
