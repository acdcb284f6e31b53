use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use resmask_axml::{Arsc, AxmlDocument};
use resmask_dex::DexClassCache;
use resmask_zip::VirtualFileSystem;

use crate::audit::AuditLog;
use crate::config::ResourceConfig;
use crate::errors::ResmaskError;
use crate::filter::SemanticFilter;
use crate::integrity;
use crate::mapping::RenameRules;
use crate::report::ProcessingResult;
use crate::rewriter::{RewriteSummary, Rewriter};
use crate::scanner::{RESOURCE_TABLE_PATH, ScanReport, Scanner};
use crate::tools::ToolRunner;
use crate::transaction::{Transaction, TxState};
use crate::validate::{ValidationReport, validate_mapping};

/// Orchestrates scan, validate, rewrite, and commit/rollback for one
/// APK at a time. All shared state lives here: the dex class cache is
/// threaded into the validators, never global.
pub struct Driver {
    config: ResourceConfig,
    rules: RenameRules,
    filter: SemanticFilter,
    cache: Arc<DexClassCache>,
    tools: ToolRunner,
    audit: AuditLog,
    workdir: PathBuf,
}

impl Driver {
    pub fn new(config: ResourceConfig) -> Result<Driver, ResmaskError> {
        Self::with_workdir(config, Path::new("."))
    }

    pub fn with_workdir(config: ResourceConfig, workdir: &Path) -> Result<Driver, ResmaskError> {
        let rules = config.build_rules()?;
        let filter = config.build_filter();

        Ok(Driver {
            rules,
            filter,
            cache: Arc::new(DexClassCache::default()),
            tools: ToolRunner::default(),
            audit: AuditLog::new(&workdir.join("logs")),
            workdir: workdir.to_path_buf(),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    fn snapshot_dir(&self) -> PathBuf {
        self.workdir.join("snapshots")
    }

    /// Read-only enumeration of everything the configured mapping could
    /// touch.
    pub fn scan_apk(&self, apk: &Path) -> Result<ScanReport, ResmaskError> {
        let vfs = VirtualFileSystem::from_path(apk)?;
        let report = Scanner::new(&self.filter).scan(&vfs)?;

        self.audit.append(
            "SCAN",
            &[
                ("apk", apk.display().to_string()),
                ("files", report.files.len().to_string()),
                ("candidates", report.results.len().to_string()),
            ],
        );
        Ok(report)
    }

    /// Mapping and structural validation without modifying anything.
    pub fn validate_apk(&self, apk: &Path) -> Result<ValidationReport, ResmaskError> {
        let vfs = VirtualFileSystem::from_path(apk)?;

        let mut report =
            validate_mapping(&self.rules.classes, &self.config.dex_paths, &self.cache);

        match vfs.read(RESOURCE_TABLE_PATH) {
            Some(data) => {
                if let Err(err) = Arsc::parse(data) {
                    report.ok = false;
                    report
                        .messages
                        .push(format!("{RESOURCE_TABLE_PATH}: {err}"));
                }
            }
            None => report
                .messages
                .push(format!("{RESOURCE_TABLE_PATH}: not present")),
        }

        let scanner = Scanner::new(&self.filter);
        for file in scanner.xml_targets(&vfs)? {
            if let Some(data) = vfs.read(&file)
                && let Err(err) = AxmlDocument::parse(data)
            {
                // unreadable resource xml is passed through by the
                // rewrite, so it degrades the report without failing it
                report.messages.push(format!("{file}: {err}"));
            }
        }

        Ok(report)
    }

    /// The full transactional pipeline. Every failure after `begin`
    /// restores the snapshot; the returned result then carries
    /// `success=false` and the cause. Only a failed restore escalates
    /// to an error, because the APK may then be inconsistent.
    pub fn process_apk(
        &self,
        apk: &Path,
        auto_sign_override: Option<bool>,
    ) -> Result<ProcessingResult, ResmaskError> {
        let auto_sign = auto_sign_override.unwrap_or(self.config.options.auto_sign);

        let mut tx = Transaction::begin(apk, &self.snapshot_dir())?;
        self.audit.append(
            "TX_BEGIN",
            &[
                ("tx", tx.id.to_string()),
                ("apk", apk.display().to_string()),
            ],
        );

        let mut result = ProcessingResult {
            transaction_id: tx.id.to_string(),
            apk: apk.display().to_string(),
            ..ProcessingResult::default()
        };

        match self.run_pipeline(&mut tx, apk, auto_sign, &mut result) {
            Ok(()) => {
                result.success = true;
                self.audit.append("TX_COMMIT", &[("tx", tx.id.to_string())]);
                Ok(result)
            }
            Err(cause) => {
                warn!("transaction {} failed: {cause}", tx.id);
                match tx.rollback() {
                    Ok(()) => {
                        self.audit.append(
                            "TX_ROLLBACK",
                            &[("tx", tx.id.to_string()), ("cause", cause.to_string())],
                        );
                        result.success = false;
                        result.rolled_back = true;
                        result.error = Some(cause.to_string());
                        self.cleanup_temp_files(apk);
                        Ok(result)
                    }
                    Err(rollback) => {
                        self.audit.append(
                            "TX_ROLLBACK_FAILED",
                            &[
                                ("tx", tx.id.to_string()),
                                ("cause", cause.to_string()),
                                ("rollback", rollback.to_string()),
                            ],
                        );
                        self.cleanup_temp_files(apk);
                        Err(ResmaskError::RollbackFailure {
                            cause: Box::new(cause),
                            rollback,
                        })
                    }
                }
            }
        }
    }

    fn run_pipeline(
        &self,
        tx: &mut Transaction,
        apk: &Path,
        auto_sign: bool,
        result: &mut ProcessingResult,
    ) -> Result<(), ResmaskError> {
        tx.transition(TxState::Validating)?;

        let mut vfs = VirtualFileSystem::from_path(apk)?;
        let scan_report = Scanner::new(&self.filter).scan(&vfs)?;
        result.files_scanned = scan_report.files.len();

        let validation =
            validate_mapping(&self.rules.classes, &self.config.dex_paths, &self.cache);
        if !validation.ok {
            return Err(ResmaskError::Validation(validation.messages.join("; ")));
        }
        tx.transition(TxState::Validated)?;
        self.audit
            .append("TX_VALIDATED", &[("tx", tx.id.to_string())]);

        tx.transition(TxState::Executing)?;
        let original_arsc = vfs.read(RESOURCE_TABLE_PATH).map(<[u8]>::to_vec);

        let summary = Rewriter::new(&self.filter, &self.rules).rewrite_apk(&mut vfs, &scan_report)?;
        self.merge_summary(result, &summary);
        tx.modified_files = summary.modified_paths.clone();

        self.check_integrity(&vfs, original_arsc.as_deref())?;

        // stage the rewritten archive next to the original
        let tmp = PathBuf::from(format!("{}.tmp", apk.display()));
        vfs.save_to_path(&tmp)?;

        if let Some(Err(err)) = self.tools.aapt2_validate(&tmp) {
            // advisory only; obfuscated tables legitimately fail it
            warn!("aapt2 validation reported: {err}");
        }

        let commit_source = if auto_sign {
            let aligned = PathBuf::from(format!("{}.aligned.tmp", apk.display()));
            self.tools.zipalign(&tmp, &aligned)?;
            self.audit.append(
                "TOOL",
                &[("tx", tx.id.to_string()), ("tool", "zipalign".to_owned())],
            );
            self.tools.apksigner_sign(&aligned, &[])?;
            self.audit.append(
                "TOOL",
                &[("tx", tx.id.to_string()), ("tool", "apksigner".to_owned())],
            );
            std::fs::remove_file(&tmp).ok();
            result.signed = true;
            aligned
        } else {
            tmp
        };

        tx.commit(&commit_source, self.config.options.keep_backup)?;
        info!(
            "transaction {} committed: {} strings replaced across {} files",
            tx.id, result.strings_replaced, result.files_modified
        );
        Ok(())
    }

    fn merge_summary(&self, result: &mut ProcessingResult, summary: &RewriteSummary) {
        result.files_modified = summary.files_modified;
        result.files_skipped = summary.files_skipped;
        result.files_errored = summary.files_errored;
        result.strings_replaced = summary.strings_replaced;
        result.package_renames = summary.package_renames;
        result.pool_downgrades = summary.pool_downgrades;
    }

    /// Post-rewrite structural invariants on the resource table.
    fn check_integrity(
        &self,
        vfs: &VirtualFileSystem,
        original_arsc: Option<&[u8]>,
    ) -> Result<(), ResmaskError> {
        let (Some(original), Some(current)) = (original_arsc, vfs.read(RESOURCE_TABLE_PATH))
        else {
            return Ok(());
        };

        let before = match Arsc::parse(original) {
            Ok(arsc) => arsc,
            // an unreadable table was passed through untouched
            Err(_) => return Ok(()),
        };
        let after = Arsc::parse(current)?;

        let report = integrity::check_structure(&before, &after);
        if !report.ok {
            return Err(ResmaskError::Validation(format!(
                "integrity check failed: {}",
                report.issues.join("; ")
            )));
        }
        Ok(())
    }

    fn cleanup_temp_files(&self, apk: &Path) {
        for suffix in [".tmp", ".aligned.tmp"] {
            let path = PathBuf::from(format!("{}{suffix}", apk.display()));
            if path.exists() && std::fs::remove_file(&path).is_err() {
                warn!("could not remove temp file {path:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::SemanticType;
    use crate::testutil;

    fn write_apk(dir: &Path) -> PathBuf {
        let apk = dir.join("app.apk");
        std::fs::write(&apk, testutil::apk_bytes()).unwrap();
        apk
    }

    fn driver_with(dir: &Path, config_text: &str) -> Driver {
        let config = ResourceConfig::from_str(config_text).unwrap();
        Driver::with_workdir(config, dir).unwrap()
    }

    #[test]
    fn scan_reports_all_semantic_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let apk = write_apk(dir.path());
        let driver = driver_with(dir.path(), testutil::SAMPLE_CONFIG);

        let report = driver.scan_apk(&apk).unwrap();

        assert_eq!(report.files, vec!["res/layout/activity_main.xml"]);
        assert!(report.count_of(SemanticType::TagName) >= 1);
        assert!(report.count_of(SemanticType::AttributeValue) >= 1);
        assert!(report.count_of(SemanticType::ArscString) >= 2);
        assert_eq!(report.count_of(SemanticType::PackageName), 1);
    }

    #[test]
    fn process_apk_commits_a_fully_rewritten_archive() {
        let dir = tempfile::tempdir().unwrap();
        let apk = write_apk(dir.path());
        let driver = driver_with(dir.path(), testutil::SAMPLE_CONFIG);

        let result = driver.process_apk(&apk, None).unwrap();
        assert!(result.success, "{:?}", result.error);
        assert!(!result.rolled_back);
        assert!(result.strings_replaced >= 4);
        assert_eq!(result.package_renames, 1);

        // the committed apk reflects the mapping
        let vfs = VirtualFileSystem::from_path(&apk).unwrap();
        let arsc = Arsc::parse(vfs.read(RESOURCE_TABLE_PATH).unwrap()).unwrap();
        assert_eq!(arsc.packages[0].name, "com.newapp");
        assert!(
            arsc.global_pool
                .strings()
                .iter()
                .any(|s| s == "com.special.RenamedActivity")
        );

        let layout =
            AxmlDocument::parse(vfs.read("res/layout/activity_main.xml").unwrap()).unwrap();
        assert!(
            layout
                .string_pool
                .strings()
                .iter()
                .any(|s| s == "com.newapp.custom.CustomView")
        );

        // keep_backup default leaves a byte-identical backup around
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".backup-"))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(
            std::fs::read(backups[0].path()).unwrap(),
            testutil::apk_bytes()
        );

        // audit trail records the transaction
        let audit = std::fs::read_to_string(dir.path().join("logs/audit.log")).unwrap();
        assert!(audit.contains("TX_BEGIN"));
        assert!(audit.contains("TX_COMMIT"));
    }

    #[test]
    fn failed_validation_rolls_back_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let apk = write_apk(dir.path());
        let original = std::fs::read(&apk).unwrap();

        // the dex does not contain the mapped image, so validation fails
        let dex = dir.path().join("classes.dex");
        std::fs::write(&dex, testutil::dex_bytes(&["Lcom/unrelated/K;"])).unwrap();

        let config_text = format!(
            r#"
own_package_prefixes:
  - com.example
class_mappings:
  com.example.MainActivity: com.special.RenamedActivity
dex_paths:
  - {}
options:
  auto_sign: false
"#,
            dex.display()
        );
        let driver = driver_with(dir.path(), &config_text);

        let result = driver.process_apk(&apk, None).unwrap();
        assert!(!result.success);
        assert!(result.rolled_back);
        assert!(
            result
                .error
                .as_deref()
                .unwrap()
                .contains("com.special.RenamedActivity")
        );

        // restored byte-for-byte, no stray temp files
        assert_eq!(std::fs::read(&apk).unwrap(), original);
        assert!(!dir.path().join("app.apk.tmp").exists());
    }

    #[test]
    fn validate_apk_reports_mapping_and_structure() {
        let dir = tempfile::tempdir().unwrap();
        let apk = write_apk(dir.path());
        let driver = driver_with(dir.path(), testutil::SAMPLE_CONFIG);

        let report = driver.validate_apk(&apk).unwrap();
        // no dex paths configured: passes with an advisory message
        assert!(report.ok);
        assert!(
            report
                .messages
                .iter()
                .any(|m| m.contains("not verified"))
        );
    }

    #[test]
    fn no_op_mapping_leaves_apk_byte_identical_entries() {
        let dir = tempfile::tempdir().unwrap();
        let apk = write_apk(dir.path());

        let config_text = r#"
own_package_prefixes:
  - com.nomatch
options:
  auto_sign: false
  keep_backup: false
"#;
        let driver = driver_with(dir.path(), config_text);
        let result = driver.process_apk(&apk, None).unwrap();

        assert!(result.success);
        assert_eq!(result.strings_replaced, 0);
        assert_eq!(result.files_modified, 0);

        // entry payloads survive unchanged even though the zip was
        // re-serialized
        let vfs = VirtualFileSystem::from_path(&apk).unwrap();
        assert_eq!(
            vfs.read(RESOURCE_TABLE_PATH).unwrap(),
            &testutil::arsc_bytes(
                "com.example",
                &[
                    "com.example.MainActivity",
                    "com.example.custom.CustomView",
                    "Hello World",
                    "res/layout/activity_main.xml",
                ],
            )[..]
        );
    }
}
