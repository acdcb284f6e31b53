use thiserror::Error;

use crate::config::ConfigError;
use crate::tools::ExternalToolError;
use crate::transaction::TransactionError;

#[derive(Error, Debug)]
pub enum ResmaskError {
    /// Malformed or self-conflicting configuration; aborts before any
    /// transaction starts
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("zip error: {0}")]
    Zip(#[from] resmask_zip::ZipError),

    #[error("binary xml error in {path}: {source}")]
    Axml {
        path: String,
        source: resmask_axml::AxmlError,
    },

    #[error("resource table error: {0}")]
    Arsc(#[from] resmask_axml::ArscError),

    #[error("dex error: {0}")]
    Dex(#[from] resmask_dex::DexError),

    /// Cycle, missing new class or integrity mismatch
    #[error("validation failed: {0}")]
    Validation(String),

    /// Every file in a batch errored for a non-trivial reason
    #[error("rewrite failed for all {0} input files")]
    BatchFailed(usize),

    #[error(transparent)]
    Tool(#[from] ExternalToolError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Rollback after a failure did not complete; the APK on disk may
    /// be inconsistent and the operator must be told
    #[error("rollback failed after {cause}; apk may be inconsistent: {rollback}")]
    RollbackFailure {
        cause: Box<ResmaskError>,
        rollback: TransactionError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
