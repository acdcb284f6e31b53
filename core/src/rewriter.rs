use std::collections::HashMap;

use log::{debug, info, warn};
use serde::Serialize;

use resmask_axml::{Arsc, AxmlDocument, NamespaceStack, ResourceValueType, XmlEvent};
use resmask_zip::VirtualFileSystem;

use crate::errors::ResmaskError;
use crate::filter::{Context, SemanticFilter};
use crate::mapping::RenameRules;
use crate::scanner::{RESOURCE_TABLE_PATH, ScanReport, qualified_attr_name};

/// Modification counts for one rewrite pass over a loaded APK.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RewriteSummary {
    pub files_modified: usize,
    /// Scanned files where nothing matched; left byte-identical
    pub files_skipped: usize,
    /// Files that failed to decode or re-encode; original bytes kept
    pub files_errored: usize,

    pub strings_replaced: usize,
    pub package_renames: usize,
    pub pool_downgrades: usize,

    pub modified_paths: Vec<String>,
}

/// How a pool entry may be rewritten once its usage sites made it
/// eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    /// Whole-string class/package substitution
    Plain,
    /// Data-binding expression; only `T(...)` types inside change
    BindingExpr,
}

/// Applies the rename rules consistently across all scanned XML and the
/// resource table. Attribute type tags, resource ids and pool indices
/// are never touched; only eligible pool content changes.
pub struct Rewriter<'a> {
    filter: &'a SemanticFilter,
    rules: &'a RenameRules,
}

impl<'a> Rewriter<'a> {
    pub fn new(filter: &'a SemanticFilter, rules: &'a RenameRules) -> Rewriter<'a> {
        Rewriter { filter, rules }
    }

    pub fn rewrite_apk(
        &self,
        vfs: &mut VirtualFileSystem,
        report: &ScanReport,
    ) -> Result<RewriteSummary, ResmaskError> {
        let mut summary = RewriteSummary::default();

        for file in &report.files {
            match self.rewrite_xml(vfs, file) {
                Ok((0, _)) => summary.files_skipped += 1,
                Ok((replaced, downgraded)) => {
                    summary.files_modified += 1;
                    summary.strings_replaced += replaced;
                    summary.pool_downgrades += usize::from(downgraded);
                    summary.modified_paths.push(file.clone());
                    debug!("{file}: {replaced} strings replaced");
                }
                Err(err) => {
                    // the entry keeps its original bytes
                    warn!("{file}: rewrite failed, passed through unchanged ({err})");
                    summary.files_errored += 1;
                }
            }
        }

        // a partial batch is fine; an all-error batch is not
        if !report.files.is_empty() && summary.files_errored == report.files.len() {
            return Err(ResmaskError::BatchFailed(report.files.len()));
        }

        self.rewrite_arsc(vfs, &mut summary)?;

        info!(
            "rewrite: {} files modified, {} strings replaced, {} package renames",
            summary.files_modified, summary.strings_replaced, summary.package_renames
        );
        Ok(summary)
    }

    /// Returns `(replaced, pool_downgraded)`; `(0, _)` means the file
    /// was left untouched.
    fn rewrite_xml(
        &self,
        vfs: &mut VirtualFileSystem,
        file: &str,
    ) -> Result<(usize, bool), ResmaskError> {
        let data = vfs
            .read(file)
            .ok_or_else(|| resmask_zip::ZipError::FileNotFound(file.to_owned()))?;

        let mut document = AxmlDocument::parse(data).map_err(|source| ResmaskError::Axml {
            path: file.to_owned(),
            source,
        })?;

        let eligible = self.eligible_entries(&document);
        if eligible.is_empty() {
            return Ok((0, false));
        }

        let replaced = document.string_pool.rewrite(|index, value| {
            match eligible.get(&index)? {
                EntryKind::Plain => self.rules.resolve(value),
                EntryKind::BindingExpr => self
                    .filter
                    .rewrite_binding_expr(value, |fqcn| self.rules.resolve(fqcn)),
            }
        });

        if replaced == 0 {
            return Ok((0, false));
        }

        let output = document.to_bytes().map_err(|source| ResmaskError::Axml {
            path: file.to_owned(),
            source,
        })?;
        vfs.write(file, output.bytes)?;

        Ok((replaced, output.pool_downgraded))
    }

    /// Pool indices whose usage sites carry class semantics, with the
    /// kind of rewrite each admits.
    fn eligible_entries(&self, document: &AxmlDocument) -> HashMap<usize, EntryKind> {
        let mut eligible = HashMap::new();
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
                        eligible.insert(element.name as usize, EntryKind::Plain);
                    }

                    for attribute in &element.attributes {
                        if attribute.typed_value.data_type != ResourceValueType::String {
                            continue;
                        }
                        let Some(value) = document.string(attribute.typed_value.data) else {
                            continue;
                        };
                        let Some(attr_name) = qualified_attr_name(
                            document,
                            &namespaces,
                            attribute.namespace_uri,
                            attribute.name,
                        ) else {
                            continue;
                        };

                        let is_binding = value.starts_with("@{");
                        let ctx = Context {
                            tag,
                            attr_name: Some(&attr_name),
                            is_tag_name: false,
                            is_data_binding_expr: is_binding,
                        };
                        if self.filter.accepts(value, &ctx) {
                            let kind = if is_binding {
                                EntryKind::BindingExpr
                            } else {
                                EntryKind::Plain
                            };
                            eligible.insert(attribute.typed_value.data as usize, kind);
                        }
                    }
                }
                _ => {}
            }
        }

        eligible
    }

    /// Package names are matched exactly; the global pool goes through
    /// the longest-prefix resolution. Untouched tables are not
    /// re-encoded, avoiding gratuitous byte drift.
    fn rewrite_arsc(
        &self,
        vfs: &mut VirtualFileSystem,
        summary: &mut RewriteSummary,
    ) -> Result<(), ResmaskError> {
        let Some(data) = vfs.read(RESOURCE_TABLE_PATH) else {
            return Ok(());
        };

        let mut arsc = match Arsc::parse(data) {
            Ok(arsc) => arsc,
            Err(err) => {
                warn!("{RESOURCE_TABLE_PATH}: unreadable, passed through unchanged ({err})");
                return Ok(());
            }
        };

        let mut package_renames = 0;
        for package in &mut arsc.packages {
            if !self.filter.whitelist().should_replace(&package.name) {
                continue;
            }
            if let Some(new_name) = self.rules.packages.resolve_exact(&package.name) {
                info!("package {:?} -> {:?}", package.name, new_name);
                package.name = new_name.to_owned();
                package_renames += 1;
            }
        }

        let replaced = arsc.global_pool.rewrite(|_, value| {
            if self.filter.accepts_arsc_string(value) {
                self.rules.resolve(value)
            } else {
                None
            }
        });

        if package_renames == 0 && replaced == 0 {
            return Ok(());
        }

        let output = arsc.to_bytes()?;
        vfs.write(RESOURCE_TABLE_PATH, output.bytes)?;

        summary.package_renames = package_renames;
        summary.strings_replaced += replaced;
        summary.pool_downgrades += usize::from(output.global_pool_downgraded);
        summary.modified_paths.push(RESOURCE_TABLE_PATH.to_owned());
        Ok(())
    }
}
