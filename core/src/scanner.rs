use log::warn;
use serde::Serialize;

use resmask_axml::{Arsc, AxmlDocument, NamespaceStack, ResourceValueType, XmlEvent};
use resmask_zip::VirtualFileSystem;

use crate::errors::ResmaskError;
use crate::filter::{Context, SemanticFilter};

pub const RESOURCE_TABLE_PATH: &str = "resources.arsc";
pub const MANIFEST_PATH: &str = "AndroidManifest.xml";

/// Primary location of compiled resource XML
const RES_XML_PATTERN: &str = "res/**/*.xml";

/// Entry prefixes excluded from the obfuscated-APK fallback sweep
const FALLBACK_EXCLUDED_PREFIXES: &[&str] = &["META-INF/", "original/", "kotlin/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SemanticType {
    TagName,
    AttributeValue,
    DataBindingType,
    DataBindingExpr,
    ArscString,
    PackageName,
}

/// One rewrite candidate found during the read-only scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub file: String,
    pub semantic_type: SemanticType,
    pub location: String,
    pub original_value: String,
    pub pool_index: Option<usize>,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    /// XML entries that were scanned; the rewrite works off this list
    pub files: Vec<String>,
    pub results: Vec<ScanResult>,
    /// Unreadable entries, passed through unchanged later
    pub warnings: Vec<String>,
}

impl ScanReport {
    pub fn count_of(&self, semantic_type: SemanticType) -> usize {
        self.results
            .iter()
            .filter(|r| r.semantic_type == semantic_type)
            .count()
    }
}

/// Enumerates rewrite targets across all resource XML and the resource
/// table. Strictly read-only: no state is written and no new values are
/// decided here.
pub struct Scanner<'a> {
    filter: &'a SemanticFilter,
}

impl<'a> Scanner<'a> {
    pub fn new(filter: &'a SemanticFilter) -> Scanner<'a> {
        Scanner { filter }
    }

    /// The XML entries subject to scan and rewrite: `res/**/*.xml`,
    /// falling back to every `.xml` outside the excluded roots when the
    /// resource directory is empty (obfuscated APKs flatten it away).
    pub fn xml_targets(&self, vfs: &VirtualFileSystem) -> Result<Vec<String>, ResmaskError> {
        let primary = vfs.list_by_pattern(RES_XML_PATTERN)?;
        if !primary.is_empty() {
            return Ok(primary);
        }

        Ok(vfs
            .paths()
            .into_iter()
            .filter(|p| p.ends_with(".xml"))
            .filter(|p| *p != MANIFEST_PATH)
            .filter(|p| !FALLBACK_EXCLUDED_PREFIXES.iter().any(|x| p.starts_with(x)))
            .map(str::to_owned)
            .collect())
    }

    pub fn scan(&self, vfs: &VirtualFileSystem) -> Result<ScanReport, ResmaskError> {
        let mut report = ScanReport::default();

        for file in self.xml_targets(vfs)? {
            let Some(data) = vfs.read(&file) else {
                continue;
            };

            match AxmlDocument::parse(data) {
                Ok(document) => {
                    self.scan_document(&file, &document, &mut report);
                    report.files.push(file);
                }
                Err(err) => {
                    warn!("{file}: not a readable binary xml, passed through ({err})");
                    report.warnings.push(format!("{file}: {err}"));
                }
            }
        }

        if let Some(data) = vfs.read(RESOURCE_TABLE_PATH) {
            match Arsc::parse(data) {
                Ok(arsc) => self.scan_arsc(&arsc, &mut report),
                Err(err) => {
                    warn!("{RESOURCE_TABLE_PATH}: unreadable, passed through ({err})");
                    report
                        .warnings
                        .push(format!("{RESOURCE_TABLE_PATH}: {err}"));
                }
            }
        }

        Ok(report)
    }

    fn scan_document(&self, file: &str, document: &AxmlDocument, report: &mut ScanReport) {
        let mut namespaces = NamespaceStack::default();

        for event in &document.events {
            match event {
                XmlEvent::StartNamespace(ns) => namespaces.push(ns.prefix, ns.uri),
                XmlEvent::EndNamespace(ns) => namespaces.pop(ns.uri),
                XmlEvent::StartElement(element) => {
                    let Some(tag) = document.string(element.name) else {
                        continue;
                    };

                    let tag_ctx = Context {
                        tag,
                        is_tag_name: true,
                        ..Context::default()
                    };
                    if self.filter.accepts(tag, &tag_ctx) {
                        report.results.push(ScanResult {
                            file: file.to_owned(),
                            semantic_type: SemanticType::TagName,
                            location: format!("line {}", element.line_number),
                            original_value: tag.to_owned(),
                            pool_index: Some(element.name as usize),
                        });
                    }

                    for attribute in &element.attributes {
                        if attribute.typed_value.data_type != ResourceValueType::String {
                            continue;
                        }
                        let Some(value) = document.string(attribute.typed_value.data) else {
                            continue;
                        };
                        let Some(attr_name) =
                            qualified_attr_name(document, &namespaces, attribute.namespace_uri, attribute.name)
                        else {
                            continue;
                        };

                        let is_binding = value.starts_with("@{");
                        let ctx = Context {
                            tag,
                            attr_name: Some(&attr_name),
                            is_tag_name: false,
                            is_data_binding_expr: is_binding,
                        };
                        if !self.filter.accepts(value, &ctx) {
                            continue;
                        }

                        let semantic_type = if is_binding {
                            SemanticType::DataBindingExpr
                        } else if tag == "variable" && attr_name == "type" {
                            SemanticType::DataBindingType
                        } else {
                            SemanticType::AttributeValue
                        };

                        report.results.push(ScanResult {
                            file: file.to_owned(),
                            semantic_type,
                            location: format!(
                                "line {} {}",
                                element.line_number, attr_name
                            ),
                            original_value: value.to_owned(),
                            pool_index: Some(attribute.typed_value.data as usize),
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn scan_arsc(&self, arsc: &Arsc, report: &mut ScanReport) {
        for (index, value) in arsc.global_pool.strings().iter().enumerate() {
            if self.filter.accepts_arsc_string(value) {
                report.results.push(ScanResult {
                    file: RESOURCE_TABLE_PATH.to_owned(),
                    semantic_type: SemanticType::ArscString,
                    location: format!("global[{index}]"),
                    original_value: value.clone(),
                    pool_index: Some(index),
                });
            }
        }

        for (package_index, package) in arsc.packages.iter().enumerate() {
            for (index, value) in package.key_strings().strings().iter().enumerate() {
                if self.filter.accepts_arsc_string(value) {
                    report.results.push(ScanResult {
                        file: RESOURCE_TABLE_PATH.to_owned(),
                        semantic_type: SemanticType::ArscString,
                        location: format!("package[{package_index}].keys[{index}]"),
                        original_value: value.clone(),
                        pool_index: Some(index),
                    });
                }
            }

            if self.filter.whitelist().should_replace(&package.name) {
                report.results.push(ScanResult {
                    file: RESOURCE_TABLE_PATH.to_owned(),
                    semantic_type: SemanticType::PackageName,
                    location: format!("package[{package_index}].name"),
                    original_value: package.name.clone(),
                    pool_index: None,
                });
            }
        }
    }
}

/// `prefix:local` when the attribute is namespaced and the prefix is
/// bound in scope, otherwise the local name alone.
pub(crate) fn qualified_attr_name(
    document: &AxmlDocument,
    namespaces: &NamespaceStack,
    namespace_uri: u32,
    name: u32,
) -> Option<String> {
    let local = document.string(name)?;

    match document.string(namespace_uri) {
        None => Some(local.to_owned()),
        Some(_) => {
            let prefix = namespaces
                .prefix_for(namespace_uri)
                .and_then(|idx| document.string(idx));
            match prefix {
                Some(prefix) => Some(format!("{prefix}:{local}")),
                None => Some(local.to_owned()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::testutil;

    fn filter() -> SemanticFilter {
        ResourceConfig::from_str(testutil::SAMPLE_CONFIG)
            .unwrap()
            .build_filter()
    }

    #[test]
    fn scan_is_read_only() {
        let mut vfs = VirtualFileSystem::new();
        vfs.write("res/layout/activity_main.xml", testutil::layout_xml_bytes())
            .unwrap();
        vfs.write(
            RESOURCE_TABLE_PATH,
            testutil::arsc_bytes("com.example", &["com.example.MainActivity"]),
        )
        .unwrap();
        let before = vfs.to_bytes().unwrap();

        let filter = filter();
        let report = Scanner::new(&filter).scan(&vfs).unwrap();

        assert!(!report.results.is_empty());
        assert_eq!(vfs.to_bytes().unwrap(), before);
    }

    #[test]
    fn databinding_values_are_classified() {
        let mut vfs = VirtualFileSystem::new();
        vfs.write(
            "res/layout/item.xml",
            testutil::binding_layout_xml_bytes(),
        )
        .unwrap();

        let filter = filter();
        let report = Scanner::new(&filter).scan(&vfs).unwrap();

        assert_eq!(report.count_of(SemanticType::DataBindingType), 1);
        assert_eq!(report.count_of(SemanticType::DataBindingExpr), 1);

        let binding_type = report
            .results
            .iter()
            .find(|r| r.semantic_type == SemanticType::DataBindingType)
            .unwrap();
        assert_eq!(binding_type.original_value, "com.example.ui.HomeFragment");

        let expr = report
            .results
            .iter()
            .find(|r| r.semantic_type == SemanticType::DataBindingExpr)
            .unwrap();
        assert!(expr.original_value.contains("T(com.example.MainActivity)"));
    }

    #[test]
    fn fallback_sweep_applies_when_res_is_empty() {
        let mut vfs = VirtualFileSystem::new();
        vfs.write("AndroidManifest.xml", testutil::layout_xml_bytes())
            .unwrap();
        vfs.write("META-INF/extra.xml", testutil::layout_xml_bytes())
            .unwrap();
        vfs.write("original/old.xml", testutil::layout_xml_bytes())
            .unwrap();
        vfs.write("kotlin/meta.xml", testutil::layout_xml_bytes())
            .unwrap();
        vfs.write("r/l/obfuscated.xml", testutil::layout_xml_bytes())
            .unwrap();

        let filter = filter();
        let scanner = Scanner::new(&filter);

        // the manifest and the excluded roots stay out of the sweep
        assert_eq!(
            scanner.xml_targets(&vfs).unwrap(),
            vec!["r/l/obfuscated.xml".to_owned()]
        );

        // with a populated res/ the primary pattern wins
        vfs.write("res/layout/a.xml", testutil::layout_xml_bytes())
            .unwrap();
        assert_eq!(
            scanner.xml_targets(&vfs).unwrap(),
            vec!["res/layout/a.xml".to_owned()]
        );
    }

    #[test]
    fn unreadable_xml_degrades_to_a_warning() {
        let mut vfs = VirtualFileSystem::new();
        vfs.write("res/layout/junk.xml", b"not binary xml".to_vec())
            .unwrap();

        let filter = filter();
        let report = Scanner::new(&filter).scan(&vfs).unwrap();

        assert!(report.files.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("res/layout/junk.xml"));
    }
}
