use thiserror::Error;

#[derive(Error, Debug)]
pub enum DexError {
    /// Magic, version or endian tag did not verify
    #[error("got invalid dex header")]
    InvalidHeader,

    /// Got error while parsing the string id table
    #[error("got error while parsing dex string ids")]
    StringError,

    /// Got error while parsing the type id table
    #[error("got error while parsing dex type ids")]
    TypeError,

    /// Got error while parsing class definitions
    #[error("got error while parsing dex class definitions")]
    ClassError,

    #[error("io error while reading dex file: {0}")]
    IoError(#[from] std::io::Error),
}
