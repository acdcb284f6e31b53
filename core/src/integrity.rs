use std::ops::Range;

use log::debug;
use serde::Serialize;

use resmask_axml::Arsc;

use crate::errors::ResmaskError;

/// Structural invariants that must hold across any rewrite of the
/// resource table.
#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub ok: bool,
    pub issues: Vec<String>,
}

/// Byte-level compatibility measure: differences are expected only in
/// the string-pool regions and the package name fields.
#[derive(Debug, Default, Serialize)]
pub struct ByteComparison {
    /// Output length differs, offsets shifted; positional comparison
    /// is meaningless past the first size change
    pub length_changed: bool,
    pub total_diffs: usize,
    /// Differing byte offsets outside every expected-mutable region
    /// (capped at 64 entries)
    pub unexpected: Vec<usize>,
}

/// Verifies resource identity survived: package count and ids, pool
/// entry counts, type and key string counts.
pub fn check_structure(before: &Arsc, after: &Arsc) -> IntegrityReport {
    let mut issues = Vec::new();

    if before.packages.len() != after.packages.len() {
        issues.push(format!(
            "package count changed: {} -> {}",
            before.packages.len(),
            after.packages.len()
        ));
    }

    if before.global_pool.len() != after.global_pool.len() {
        issues.push(format!(
            "global string pool count changed: {} -> {}",
            before.global_pool.len(),
            after.global_pool.len()
        ));
    }

    for (index, (old, new)) in before.packages.iter().zip(after.packages.iter()).enumerate() {
        if old.id != new.id {
            issues.push(format!(
                "package[{index}] id changed: 0x{:02x} -> 0x{:02x}",
                old.id, new.id
            ));
        }
        if old.type_strings().len() != new.type_strings().len() {
            issues.push(format!(
                "package[{index}] type string count changed: {} -> {}",
                old.type_strings().len(),
                new.type_strings().len()
            ));
        }
        if old.key_strings().len() != new.key_strings().len() {
            issues.push(format!(
                "package[{index}] key string count changed: {} -> {}",
                old.key_strings().len(),
                new.key_strings().len()
            ));
        }
    }

    // the (package, type, entry) triple of every entry must survive
    let before_ids = before.resource_ids();
    let after_ids = after.resource_ids();
    if before_ids != after_ids {
        let missing: Vec<String> = before_ids
            .difference(&after_ids)
            .take(8)
            .map(|id| format!("0x{id:08x}"))
            .collect();
        let added: Vec<String> = after_ids
            .difference(&before_ids)
            .take(8)
            .map(|id| format!("0x{id:08x}"))
            .collect();
        issues.push(format!(
            "resource id set changed (missing: [{}], added: [{}])",
            missing.join(", "),
            added.join(", ")
        ));
    }

    IntegrityReport {
        ok: issues.is_empty(),
        issues,
    }
}

/// Compares two serialized tables byte-by-byte, excluding the regions a
/// rewrite legitimately touches.
pub fn compare_bytes(before: &[u8], after: &[u8]) -> Result<ByteComparison, ResmaskError> {
    let parsed = Arsc::parse(before)?;

    let mut allowed: Vec<Range<usize>> = vec![parsed.global_pool_span()];
    for (package, span) in parsed.packages.iter().zip(parsed.package_spans()) {
        let base = span.start;
        let name = package.name_field_span();
        allowed.push(base + name.start..base + name.end);
        let types = package.type_strings_span();
        allowed.push(base + types.start..base + types.end);
        let keys = package.key_strings_span();
        allowed.push(base + keys.start..base + keys.end);
    }

    let mut comparison = ByteComparison {
        length_changed: before.len() != after.len(),
        ..ByteComparison::default()
    };

    for (offset, (old, new)) in before.iter().zip(after.iter()).enumerate() {
        if old == new {
            continue;
        }
        comparison.total_diffs += 1;
        if !allowed.iter().any(|range| range.contains(&offset)) && comparison.unexpected.len() < 64
        {
            comparison.unexpected.push(offset);
        }
    }

    debug!(
        "byte comparison: {} diffs, {} unexpected",
        comparison.total_diffs,
        comparison.unexpected.len()
    );
    Ok(comparison)
}
