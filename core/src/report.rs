use serde::Serialize;

/// The user-visible outcome of one `process-apk` run. Accompanies both
/// committed and rolled-back transactions; a half-written APK is never
/// an outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub transaction_id: String,
    pub apk: String,

    pub files_scanned: usize,
    pub files_modified: usize,
    pub files_skipped: usize,
    pub files_errored: usize,

    pub strings_replaced: usize,
    pub package_renames: usize,
    pub pool_downgrades: usize,

    pub signed: bool,
    pub rolled_back: bool,
    pub error: Option<String>,
}
