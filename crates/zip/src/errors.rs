use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZipError {
    /// Basic sanity check
    #[error("provided file is not a zip archive")]
    InvalidHeader,

    /// Can't operate without EOCD
    #[error("can't find EOCD in zip")]
    NotFoundEOCD,

    /// Generic parsing error
    #[error("got error while parsing zip archive")]
    ParseError,

    /// Provided file not found in zip
    #[error("file {0:?} not found")]
    FileNotFound(String),

    /// Got EOF while reading data
    #[error("got EOF while parsing zip")]
    EOF,

    /// Got error while decompressing an entry
    #[error("got error while decompressing {0:?}")]
    DecompressionError(String),

    /// Got error while compressing an entry for output
    #[error("got error while compressing {0:?}")]
    CompressionError(String),

    /// Compression methods other than stored and deflate are not carried
    #[error("unsupported compression method {method} for {name:?}")]
    UnsupportedMethod { name: String, method: u16 },

    /// Entry name failed normalization
    #[error("invalid entry path {0:?}")]
    InvalidPath(String),

    /// A single entry above the configured cap
    #[error("entry {name:?} of {size} bytes exceeds the per-entry limit")]
    EntryTooLarge { name: String, size: u64 },

    /// The sum of loaded entries above the configured cap
    #[error("archive exceeds the aggregate size limit at entry {name:?}")]
    ArchiveTooLarge { name: String },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
