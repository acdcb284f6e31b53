use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Free space headroom demanded before a transaction starts: the APK,
/// its snapshot and the temp output may coexist.
const DISK_HEADROOM_FACTOR: u64 = 3;

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("insufficient disk space: need {required} bytes, {available} available")]
    InsufficientDiskSpace { required: u64, available: u64 },

    #[error("illegal transaction transition {from:?} -> {to:?}")]
    InvalidState { from: TxState, to: TxState },

    #[error("can't create snapshot: {0}")]
    Snapshot(std::io::Error),

    #[error("can't commit output onto apk: {0}")]
    Commit(std::io::Error),

    #[error("can't restore snapshot: {0}")]
    Rollback(std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    Created,
    Validating,
    Validated,
    Executing,
    Committed,
    RolledBack,
    Failed,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl TxState {
    fn may_transition_to(self, to: TxState) -> bool {
        use TxState::*;
        matches!(
            (self, to),
            (Created, Validating)
                | (Validating, Validated)
                | (Validated, Executing)
                | (Executing, Committed)
                | (Created | Validating | Validated | Executing, RolledBack)
                | (Created | Validating | Validated | Executing, Failed)
        )
    }
}

/// Two-phase scope around one APK rewrite. Holds the snapshot taken at
/// begin; the snapshot outlives the transaction only as an explicit
/// backup.
#[derive(Debug)]
pub struct Transaction {
    pub id: Uuid,
    pub apk_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub modified_files: Vec<String>,
    state: TxState,
}

impl Transaction {
    /// Snapshots the APK under `snapshot_dir` and verifies disk
    /// headroom first. Fails without touching the APK.
    pub fn begin(apk_path: &Path, snapshot_dir: &Path) -> Result<Transaction, TransactionError> {
        let apk_size = std::fs::metadata(apk_path)
            .map_err(TransactionError::Snapshot)?
            .len();

        match available_space(snapshot_dir.parent().unwrap_or(Path::new("."))) {
            Some(available) => {
                let required = apk_size.saturating_mul(DISK_HEADROOM_FACTOR);
                if available < required {
                    return Err(TransactionError::InsufficientDiskSpace {
                        required,
                        available,
                    });
                }
            }
            None => warn!("free disk space unknown, proceeding without preflight"),
        }

        let id = Uuid::new_v4();
        let snapshot_path = snapshot_dir.join(format!("{id}.snapshot"));

        std::fs::create_dir_all(snapshot_dir).map_err(TransactionError::Snapshot)?;
        std::fs::copy(apk_path, &snapshot_path).map_err(TransactionError::Snapshot)?;
        debug!("transaction {id}: snapshot at {snapshot_path:?}");

        Ok(Transaction {
            id,
            apk_path: apk_path.to_path_buf(),
            snapshot_path,
            modified_files: Vec::new(),
            state: TxState::Created,
        })
    }

    #[inline]
    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn transition(&mut self, to: TxState) -> Result<(), TransactionError> {
        if !self.state.may_transition_to(to) {
            return Err(TransactionError::InvalidState {
                from: self.state,
                to,
            });
        }
        debug!("transaction {}: {} -> {}", self.id, self.state, to);
        self.state = to;
        Ok(())
    }

    /// Atomically moves the finished output onto the APK path. The
    /// snapshot is renamed into a backup or removed.
    pub fn commit(&mut self, output: &Path, keep_backup: bool) -> Result<(), TransactionError> {
        if !self.state.may_transition_to(TxState::Committed) {
            return Err(TransactionError::InvalidState {
                from: self.state,
                to: TxState::Committed,
            });
        }

        std::fs::rename(output, &self.apk_path).map_err(TransactionError::Commit)?;

        if keep_backup {
            let backup = PathBuf::from(format!(
                "{}.backup-{}",
                self.apk_path.display(),
                &self.id.to_string()[..8]
            ));
            if let Err(err) = std::fs::rename(&self.snapshot_path, &backup) {
                warn!("snapshot could not be turned into a backup: {err}");
            } else {
                info!("backup kept at {backup:?}");
            }
        } else if let Err(err) = std::fs::remove_file(&self.snapshot_path) {
            warn!("snapshot cleanup failed: {err}");
        }

        self.state = TxState::Committed;
        Ok(())
    }

    /// Restores the APK from the snapshot. The snapshot is copied, not
    /// moved, so a failed restore can be retried.
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        if !self.state.may_transition_to(TxState::RolledBack) {
            return Err(TransactionError::InvalidState {
                from: self.state,
                to: TxState::RolledBack,
            });
        }

        std::fs::copy(&self.snapshot_path, &self.apk_path)
            .map_err(TransactionError::Rollback)?;
        if let Err(err) = std::fs::remove_file(&self.snapshot_path) {
            warn!("snapshot cleanup failed after rollback: {err}");
        }

        self.state = TxState::RolledBack;
        info!("transaction {} rolled back", self.id);
        Ok(())
    }

    pub fn mark_failed(&mut self) {
        if self.state.may_transition_to(TxState::Failed) {
            self.state = TxState::Failed;
        }
    }
}

#[cfg(unix)]
fn available_space(path: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;

    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };

    if unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) } == 0 {
        Some(stat.f_bavail as u64 * stat.f_frsize as u64)
    } else {
        None
    }
}

#[cfg(not(unix))]
fn available_space(_path: &Path) -> Option<u64> {
    None
}
