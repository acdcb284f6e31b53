use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, warn};
use serde::Serialize;

use resmask_dex::DexClassCache;

use crate::mapping::ClassMapping;

/// Outcome of the pre-rewrite validation pass. `ok` only when no cycle
/// and no missing class was found.
#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub cycles: Vec<Vec<String>>,
    pub missing_classes: Vec<String>,
    pub messages: Vec<String>,
}

/// Detects rename cycles: following old -> new -> ... through the class
/// mapping must never re-enter a name.
pub struct MappingValidator;

impl MappingValidator {
    pub fn find_cycles(mapping: &ClassMapping) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            Unvisited,
            InProgress,
            Done,
        }

        let edges: HashMap<&str, &str> = mapping.iter().collect();
        let mut colors: HashMap<&str, Color> =
            edges.keys().map(|&k| (k, Color::Unvisited)).collect();
        let mut cycles = Vec::new();

        for &start in edges.keys() {
            if colors.get(start) != Some(&Color::Unvisited) {
                continue;
            }

            let mut path: Vec<&str> = Vec::new();
            let mut current = start;

            loop {
                colors.insert(current, Color::InProgress);
                path.push(current);

                let Some(&next) = edges.get(current) else {
                    break;
                };

                match colors.get(next).copied() {
                    Some(Color::InProgress) => {
                        // cut the tail before the re-entered node
                        let from = path.iter().position(|&n| n == next).unwrap_or(0);
                        cycles.push(path[from..].iter().map(|s| s.to_string()).collect());
                        break;
                    }
                    Some(Color::Done) | None => break,
                    Some(Color::Unvisited) => current = next,
                }
            }

            for node in path {
                colors.insert(node, Color::Done);
            }
        }

        cycles
    }
}

/// Cross-checks the mapping against the renamed dex files: every new
/// FQCN must actually exist there, otherwise the rewritten resources
/// would reference classes the runtime cannot load.
pub struct DexCrossValidator<'a> {
    cache: &'a DexClassCache,
}

impl<'a> DexCrossValidator<'a> {
    pub fn new(cache: &'a DexClassCache) -> DexCrossValidator<'a> {
        DexCrossValidator { cache }
    }

    pub fn missing_classes(
        &self,
        mapping: &ClassMapping,
        dex_paths: &[impl AsRef<Path>],
        messages: &mut Vec<String>,
    ) -> Vec<String> {
        if mapping.is_empty() {
            return Vec::new();
        }
        if dex_paths.is_empty() {
            messages.push("no dex paths configured, class presence not verified".to_owned());
            warn!("no dex paths configured, skipping dex cross-validation");
            return Vec::new();
        }

        let mut available: HashSet<String> = HashSet::new();
        for path in dex_paths {
            let path = path.as_ref();
            match self.cache.load(path) {
                Ok(classes) => {
                    debug!("{path:?}: {} classes", classes.len());
                    available.extend(classes.iter().cloned());
                }
                Err(err) => {
                    messages.push(format!("{}: {err}", path.display()));
                    warn!("can't load dex {path:?}: {err}");
                }
            }
        }

        let mut missing: Vec<String> = mapping
            .new_names()
            .filter(|name| !available.contains(*name))
            .map(str::to_owned)
            .collect();
        missing.sort_unstable();
        missing
    }
}

/// Runs both validators and folds the outcome into one report.
pub fn validate_mapping(
    mapping: &ClassMapping,
    dex_paths: &[impl AsRef<Path>],
    cache: &DexClassCache,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    report.cycles = MappingValidator::find_cycles(mapping);
    for cycle in &report.cycles {
        report
            .messages
            .push(format!("rename cycle: {}", cycle.join(" -> ")));
    }

    report.missing_classes =
        DexCrossValidator::new(cache).missing_classes(mapping, dex_paths, &mut report.messages);
    for class in &report.missing_classes {
        report
            .messages
            .push(format!("mapped class {class} not present in any dex"));
    }

    report.ok = report.cycles.is_empty() && report.missing_classes.is_empty();
    report
}
