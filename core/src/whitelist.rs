use std::collections::BTreeSet;

/// Framework and platform namespaces that are never owned code.
pub const SYSTEM_PREFIXES: &[&str] = &[
    "android.",
    "androidx.",
    "com.google.",
    "com.android.",
    "kotlin.",
    "kotlinx.",
    "java.",
    "javax.",
    "dalvik.",
    "org.apache.",
    "org.json.",
    "org.xml.",
    "org.w3c.",
];

/// Widely-deployed libraries that show up in application resources but
/// are never part of the application's own code.
pub const COMMON_THIRD_PARTY_PREFIXES: &[&str] = &[
    "com.squareup.",
    "com.facebook.",
    "okhttp3.",
    "retrofit2.",
    "io.reactivex.",
    "org.jetbrains.",
    "com.jakewharton.",
    "dagger.",
    "rx.",
    "butterknife.",
    "org.greenrobot.",
    "io.realm.",
    "com.bumptech.",
    "com.airbnb.",
    "org.koin.",
    "coil.",
];

/// Decides whether a class-semantics string belongs to the operator's
/// own code. System, common third-party and user-excluded prefixes are
/// refused first; absent a positive own-prefix match the answer is no.
#[derive(Debug, Default, Clone)]
pub struct WhitelistFilter {
    /// Normalized with a trailing `.`
    own_prefixes: BTreeSet<String>,
    user_excludes: BTreeSet<String>,
}

fn normalize(prefix: &str) -> String {
    let trimmed = prefix.trim();
    if trimmed.ends_with('.') {
        trimmed.to_owned()
    } else {
        format!("{trimmed}.")
    }
}

/// `prefix` always carries a trailing dot; a string equal to the prefix
/// minus that dot also matches (`com.example` vs `com.example.`).
fn prefix_matches(s: &str, prefix: &str) -> bool {
    s.starts_with(prefix) || s == &prefix[..prefix.len() - 1]
}

impl WhitelistFilter {
    pub fn new<I, J>(own_prefixes: I, user_excludes: J) -> WhitelistFilter
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        J: IntoIterator,
        J::Item: AsRef<str>,
    {
        WhitelistFilter {
            own_prefixes: own_prefixes
                .into_iter()
                .map(|p| normalize(p.as_ref()))
                .collect(),
            user_excludes: user_excludes
                .into_iter()
                .map(|p| normalize(p.as_ref()))
                .collect(),
        }
    }

    pub fn add_own_prefix(&mut self, prefix: &str) {
        self.own_prefixes.insert(normalize(prefix));
    }

    pub fn add_user_exclude(&mut self, prefix: &str) {
        self.user_excludes.insert(normalize(prefix));
    }

    #[inline]
    pub fn has_own_prefixes(&self) -> bool {
        !self.own_prefixes.is_empty()
    }

    /// True when `s` starts with (or equals) one of the own prefixes.
    pub fn matches_own_prefix(&self, s: &str) -> bool {
        self.own_prefixes.iter().any(|p| prefix_matches(s, p))
    }

    pub fn should_replace(&self, s: &str) -> bool {
        if SYSTEM_PREFIXES.iter().any(|p| s.starts_with(p)) {
            return false;
        }
        if COMMON_THIRD_PARTY_PREFIXES.iter().any(|p| s.starts_with(p)) {
            return false;
        }
        if self.user_excludes.iter().any(|p| prefix_matches(s, p)) {
            return false;
        }

        self.matches_own_prefix(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> WhitelistFilter {
        WhitelistFilter::new(["com.example"], ["com.example.generated"])
    }

    #[test]
    fn system_and_third_party_are_never_replaced() {
        let f = filter();

        for name in [
            "android.app.Activity",
            "androidx.fragment.app.Fragment",
            "com.squareup.okhttp.X",
            "retrofit2.Y",
            "kotlin.Z",
            "okhttp3.W",
            "com.google.gson.Gson",
        ] {
            assert!(!f.should_replace(name), "{name} must stay");
        }
    }

    #[test]
    fn own_prefix_matches_with_and_without_trailing_dot() {
        let f = filter();

        assert!(f.should_replace("com.example.MainActivity"));
        assert!(f.should_replace("com.example"));
        assert!(!f.should_replace("com.exampleother.Thing"));
    }

    #[test]
    fn user_excludes_override_own_prefixes() {
        let f = filter();

        assert!(!f.should_replace("com.example.generated.Binding"));
        assert!(!f.should_replace("com.example.generated"));
        assert!(f.should_replace("com.example.ui.Home"));
    }

    #[test]
    fn unknown_namespaces_are_conservatively_kept() {
        let f = filter();
        assert!(!f.should_replace("com.other.ThirdPartyClass"));
    }
}
