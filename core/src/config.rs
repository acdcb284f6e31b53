use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;
use thiserror::Error;

use crate::filter::SemanticFilter;
use crate::mapping::{MappingError, MatchMode, RenameRules};
use crate::whitelist::WhitelistFilter;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("can't read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Self-conflicting class or package mappings
    #[error("conflicting configuration: {0}")]
    Mapping(#[from] MappingError),
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigOptions {
    /// Accept `tools:context` as a class-bearing attribute
    #[serde(default = "default_true")]
    pub process_tools_context: bool,

    /// Reserved; unused by the core engine
    pub enable_runtime_validation: bool,

    /// Keep the snapshot around after a successful commit
    #[serde(default = "default_true")]
    pub keep_backup: bool,

    /// Informational; each APK still runs in its own transaction
    pub parallel_processing: bool,

    /// Run zipalign and apksigner after a successful rewrite
    #[serde(default = "default_true")]
    pub auto_sign: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        ConfigOptions {
            process_tools_context: true,
            enable_runtime_validation: false,
            keep_backup: true,
            parallel_processing: false,
            auto_sign: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Informational
    pub version: Option<String>,

    /// FQCN prefixes the operator declares as own code
    pub own_package_prefixes: Vec<String>,

    /// Prefixes that must never be rewritten even when owned
    pub user_excludes: Vec<String>,

    /// old package -> new package, applied in prefix mode
    pub package_mappings: BTreeMap<String, String>,

    /// old FQCN -> new FQCN, applied exactly
    pub class_mappings: BTreeMap<String, String>,

    /// Informational; the scanner uses the fixed resource roots
    pub targets: Vec<String>,

    /// Dex files holding the renamed classes, for cross-validation
    pub dex_paths: Vec<PathBuf>,

    pub options: ConfigOptions,
}

const KNOWN_KEYS: &[&str] = &[
    "version",
    "own_package_prefixes",
    "user_excludes",
    "package_mappings",
    "class_mappings",
    "targets",
    "dex_paths",
    "options",
];

const KNOWN_OPTION_KEYS: &[&str] = &[
    "process_tools_context",
    "enable_runtime_validation",
    "keep_backup",
    "parallel_processing",
    "auto_sign",
];

impl ResourceConfig {
    pub fn from_path(path: &Path) -> Result<ResourceConfig, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Unknown keys are reported but tolerated so configs can be shared
    /// with other pipeline stages.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<ResourceConfig, ConfigError> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;

        if let Some(map) = value.as_mapping() {
            for key in map.keys().filter_map(|k| k.as_str()) {
                if !KNOWN_KEYS.contains(&key) {
                    warn!("unknown configuration key {key:?}, ignored");
                }
            }
            if let Some(options) = map.get("options").and_then(|v| v.as_mapping()) {
                for key in options.keys().filter_map(|k| k.as_str()) {
                    if !KNOWN_OPTION_KEYS.contains(&key) {
                        warn!("unknown option key {key:?}, ignored");
                    }
                }
            }
        }

        Ok(serde_yaml::from_value(value)?)
    }

    /// Builds the replacement rules; conflicting mappings surface here,
    /// before any transaction starts.
    pub fn build_rules(&self) -> Result<RenameRules, ConfigError> {
        let mut rules = RenameRules::default();

        for (old, new) in &self.class_mappings {
            rules.classes.add(old, new)?;
        }
        for (old, new) in &self.package_mappings {
            rules.packages.add(old, new, MatchMode::Prefix)?;
        }

        Ok(rules)
    }

    pub fn build_filter(&self) -> SemanticFilter {
        SemanticFilter::new(
            WhitelistFilter::new(&self.own_package_prefixes, &self.user_excludes),
            self.options.process_tools_context,
        )
    }
}
