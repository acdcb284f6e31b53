pub mod audit;
pub mod config;
pub mod driver;
pub mod errors;
pub mod filter;
pub mod integrity;
pub mod mapping;
pub mod report;
pub mod rewriter;
pub mod scanner;
pub mod tools;
pub mod transaction;
pub mod validate;
pub mod whitelist;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{ConfigError, ConfigOptions, ResourceConfig};
pub use driver::Driver;
pub use errors::ResmaskError;
pub use filter::{Context, SemanticFilter};
pub use mapping::{ClassMapping, MappingError, MatchMode, PackageMapping, RenameRules};
pub use report::ProcessingResult;
pub use scanner::{ScanReport, ScanResult, Scanner, SemanticType};
pub use validate::ValidationReport;
pub use whitelist::WhitelistFilter;
