use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MappingError {
    /// The old name already maps to a different new name
    #[error("mapping conflict: {old} already maps to {existing}, refusing {proposed}")]
    Conflict {
        old: String,
        existing: String,
        proposed: String,
    },

    /// The new name is already the image of a different old name
    #[error("mapping conflict: {new} is already the image of {existing}, refusing {old}")]
    ImageConflict {
        new: String,
        existing: String,
        old: String,
    },
}

/// Result of a successful `add`; duplicates of an identical pair are
/// accepted but reported distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    DuplicateConsistent,
}

/// Bijective old-FQCN to new-FQCN map. An insert claims both directions
/// or neither, so a conflicting insert can never leave the map half
/// updated.
#[derive(Debug, Default, Clone)]
pub struct ClassMapping {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl ClassMapping {
    pub fn add(&mut self, old: &str, new: &str) -> Result<AddOutcome, MappingError> {
        if let Some(existing) = self.forward.get(old) {
            return if existing == new {
                Ok(AddOutcome::DuplicateConsistent)
            } else {
                Err(MappingError::Conflict {
                    old: old.to_owned(),
                    existing: existing.clone(),
                    proposed: new.to_owned(),
                })
            };
        }

        if let Some(existing_old) = self.reverse.get(new) {
            return Err(MappingError::ImageConflict {
                new: new.to_owned(),
                existing: existing_old.clone(),
                old: old.to_owned(),
            });
        }

        self.forward.insert(old.to_owned(), new.to_owned());
        self.reverse.insert(new.to_owned(), old.to_owned());
        Ok(AddOutcome::Inserted)
    }

    #[inline]
    pub fn resolve(&self, s: &str) -> Option<&str> {
        self.forward.get(s).map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Every new FQCN that must exist in the renamed dex files.
    pub fn new_names(&self) -> impl Iterator<Item = &str> {
        self.reverse.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Matches `old_prefix` itself and anything under `old_prefix.`
    Prefix,
    /// Matches only the exact string
    Exact,
}

#[derive(Debug, Clone)]
pub struct PackageRule {
    pub old_prefix: String,
    pub new_prefix: String,
    pub mode: MatchMode,
}

impl PackageRule {
    fn admits(&self, s: &str) -> bool {
        match self.mode {
            MatchMode::Exact => s == self.old_prefix,
            MatchMode::Prefix => {
                s == self.old_prefix
                    || (s.starts_with(&self.old_prefix)
                        && s.as_bytes().get(self.old_prefix.len()) == Some(&b'.'))
            }
        }
    }
}

/// Ordered collection of package rename rules. Resolution picks the
/// longest admitting prefix; ties fall back to insertion order.
#[derive(Debug, Default, Clone)]
pub struct PackageMapping {
    rules: Vec<PackageRule>,
}

impl PackageMapping {
    /// Idempotent for identical entries; a different target for an
    /// already-registered prefix/mode pair is a conflict.
    pub fn add(
        &mut self,
        old_prefix: &str,
        new_prefix: &str,
        mode: MatchMode,
    ) -> Result<AddOutcome, MappingError> {
        if let Some(existing) = self
            .rules
            .iter()
            .find(|r| r.old_prefix == old_prefix && r.mode == mode)
        {
            return if existing.new_prefix == new_prefix {
                Ok(AddOutcome::DuplicateConsistent)
            } else {
                Err(MappingError::Conflict {
                    old: old_prefix.to_owned(),
                    existing: existing.new_prefix.clone(),
                    proposed: new_prefix.to_owned(),
                })
            };
        }

        self.rules.push(PackageRule {
            old_prefix: old_prefix.to_owned(),
            new_prefix: new_prefix.to_owned(),
            mode,
        });
        Ok(AddOutcome::Inserted)
    }

    /// Longest-prefix substitution; only the matched prefix is replaced.
    pub fn resolve(&self, s: &str) -> Option<String> {
        let best = self
            .rules
            .iter()
            .filter(|r| r.admits(s))
            .max_by_key(|r| r.old_prefix.len())?;

        if s == best.old_prefix {
            Some(best.new_prefix.clone())
        } else {
            Some(format!("{}{}", best.new_prefix, &s[best.old_prefix.len()..]))
        }
    }

    /// Exact-equality lookup, as applied to ARSC package names.
    pub fn resolve_exact(&self, s: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| s == r.old_prefix)
            .map(|r| r.new_prefix.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[PackageRule] {
        &self.rules
    }
}

/// The combined replacement rules applied during a rewrite.
#[derive(Debug, Default, Clone)]
pub struct RenameRules {
    pub classes: ClassMapping,
    pub packages: PackageMapping,
}

impl RenameRules {
    /// Class mapping wins on an exact hit; otherwise the longest
    /// admitting package prefix is substituted.
    pub fn resolve(&self, s: &str) -> Option<String> {
        if let Some(target) = self.classes.resolve(s) {
            return Some(target.to_owned());
        }
        self.packages.resolve(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_mapping_is_bijective() {
        let mut mapping = ClassMapping::default();

        assert_eq!(mapping.add("a.A", "b.B"), Ok(AddOutcome::Inserted));
        assert_eq!(mapping.add("a.A", "b.B"), Ok(AddOutcome::DuplicateConsistent));

        // same old, different new
        assert!(matches!(
            mapping.add("a.A", "c.C"),
            Err(MappingError::Conflict { .. })
        ));
        // different old, same new
        assert!(matches!(
            mapping.add("x.X", "b.B"),
            Err(MappingError::ImageConflict { .. })
        ));

        // failures leave the map untouched in both directions
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.resolve("x.X"), None);
        assert_eq!(mapping.resolve("a.A"), Some("b.B"));
    }

    #[test]
    fn longest_prefix_wins_with_insertion_order_ties() {
        let mut packages = PackageMapping::default();
        packages
            .add("com.example", "com.short", MatchMode::Prefix)
            .unwrap();
        packages
            .add("com.example.ui", "com.long", MatchMode::Prefix)
            .unwrap();

        assert_eq!(
            packages.resolve("com.example.ui.F").as_deref(),
            Some("com.long.F")
        );
        assert_eq!(
            packages.resolve("com.example.util.N").as_deref(),
            Some("com.short.util.N")
        );
        assert_eq!(packages.resolve("com.example").as_deref(), Some("com.short"));
    }

    #[test]
    fn prefix_mode_requires_a_segment_boundary() {
        let mut packages = PackageMapping::default();
        packages
            .add("com.example", "com.newapp", MatchMode::Prefix)
            .unwrap();

        assert_eq!(packages.resolve("com.examples.Foo"), None);
        assert_eq!(
            packages.resolve("com.example.Foo").as_deref(),
            Some("com.newapp.Foo")
        );
    }

    #[test]
    fn exact_mode_matches_only_equality() {
        let mut packages = PackageMapping::default();
        packages
            .add("com.example", "com.newapp", MatchMode::Exact)
            .unwrap();

        assert_eq!(packages.resolve("com.example").as_deref(), Some("com.newapp"));
        assert_eq!(packages.resolve("com.example.Foo"), None);
    }

    #[test]
    fn duplicate_and_conflicting_package_rules() {
        let mut packages = PackageMapping::default();
        assert_eq!(
            packages.add("a.b", "c.d", MatchMode::Prefix),
            Ok(AddOutcome::Inserted)
        );
        assert_eq!(
            packages.add("a.b", "c.d", MatchMode::Prefix),
            Ok(AddOutcome::DuplicateConsistent)
        );
        assert!(matches!(
            packages.add("a.b", "e.f", MatchMode::Prefix),
            Err(MappingError::Conflict { .. })
        ));
        assert_eq!(packages.len(), 1);
    }

    #[test]
    fn combined_resolution_prefers_class_hits() {
        let mut rules = RenameRules::default();
        rules
            .classes
            .add("com.example.MainActivity", "com.special.RenamedActivity")
            .unwrap();
        rules
            .packages
            .add("com.example", "com.newapp", MatchMode::Prefix)
            .unwrap();

        assert_eq!(
            rules.resolve("com.example.MainActivity").as_deref(),
            Some("com.special.RenamedActivity")
        );
        assert_eq!(
            rules.resolve("com.example.util.NetworkHelper").as_deref(),
            Some("com.newapp.util.NetworkHelper")
        );
        assert_eq!(rules.resolve("org.other.Thing"), None);
    }
}
