use once_cell::sync::Lazy;
use regex::Regex;

use crate::whitelist::WhitelistFilter;

/// Attributes whose values carry class or package names.
pub const CLASS_BEARING_ATTRS: &[&str] = &[
    "android:name",
    "class",
    "android:fragment",
    "app:actionViewClass",
    "app:actionProviderClass",
    "app:layoutManager",
    "type",
    "tools:context",
];

/// `T(com.example.Util)` inside a data-binding expression
static DATA_BINDING_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"T\(([A-Za-z0-9_.]+)\)").expect("static regex"));

/// Where a candidate string was found, which decides whether it carries
/// class semantics at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context<'a> {
    pub tag: &'a str,
    pub attr_name: Option<&'a str>,
    pub is_tag_name: bool,
    pub is_data_binding_expr: bool,
}

fn is_java_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Dotted, not a resource reference, and every segment a valid Java
/// identifier.
pub fn looks_like_fqcn(s: &str) -> bool {
    s.contains('.') && !s.starts_with('@') && s.split('.').all(is_java_identifier)
}

/// Conjunction of positional semantics and whitelist discipline: a
/// string is only eligible when its position says "class name" and the
/// whitelist says "owned".
#[derive(Debug, Clone)]
pub struct SemanticFilter {
    whitelist: WhitelistFilter,
    process_tools_context: bool,
}

impl SemanticFilter {
    pub fn new(whitelist: WhitelistFilter, process_tools_context: bool) -> SemanticFilter {
        SemanticFilter {
            whitelist,
            process_tools_context,
        }
    }

    #[inline]
    pub fn whitelist(&self) -> &WhitelistFilter {
        &self.whitelist
    }

    /// Positional test only; ignores ownership.
    pub fn is_class_semantics(&self, s: &str, ctx: &Context<'_>) -> bool {
        if ctx.is_tag_name {
            return looks_like_fqcn(s);
        }

        if let Some(attr) = ctx.attr_name {
            if attr == "tools:context" && !self.process_tools_context {
                return false;
            }
            if CLASS_BEARING_ATTRS.contains(&attr) {
                return true;
            }
        }

        ctx.is_data_binding_expr
            && DATA_BINDING_TYPE_RE
                .captures_iter(s)
                .any(|c| looks_like_fqcn(&c[1]))
    }

    /// The full accept decision for XML content.
    pub fn accepts(&self, s: &str, ctx: &Context<'_>) -> bool {
        if !self.is_class_semantics(s, ctx) {
            return false;
        }

        if ctx.is_data_binding_expr && !ctx.is_tag_name {
            // ownership is judged per extracted type, not on the whole
            // expression
            return DATA_BINDING_TYPE_RE
                .captures_iter(s)
                .any(|c| looks_like_fqcn(&c[1]) && self.whitelist.should_replace(&c[1]));
        }

        looks_like_fqcn(s) && self.whitelist.should_replace(s)
    }

    /// ARSC global pools mix class names with layout paths and UI
    /// strings; only strings under an own prefix are ever considered.
    pub fn accepts_arsc_string(&self, s: &str) -> bool {
        looks_like_fqcn(s) && self.whitelist.matches_own_prefix(s) && self.whitelist.should_replace(s)
    }

    /// Rewrites every owned `T(...)` type inside a binding expression.
    pub fn rewrite_binding_expr<F>(&self, s: &str, mut resolve: F) -> Option<String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut changed = false;
        let result = DATA_BINDING_TYPE_RE.replace_all(s, |caps: &regex::Captures<'_>| {
            let fqcn = &caps[1];
            if looks_like_fqcn(fqcn) && self.whitelist.should_replace(fqcn) {
                if let Some(new) = resolve(fqcn) {
                    changed = true;
                    return format!("T({new})");
                }
            }
            caps[0].to_owned()
        });

        changed.then(|| result.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semantic_filter() -> SemanticFilter {
        SemanticFilter::new(WhitelistFilter::new(["com.example"], Vec::<&str>::new()), true)
    }

    #[test]
    fn fqcn_shape() {
        assert!(looks_like_fqcn("com.example.MainActivity"));
        assert!(looks_like_fqcn("a.b"));
        assert!(!looks_like_fqcn("plain"));
        assert!(!looks_like_fqcn("@string/app_name"));
        assert!(!looks_like_fqcn("res/layout/activity_main.xml"));
        assert!(!looks_like_fqcn("com..double"));
        assert!(!looks_like_fqcn("com.1digit"));
        assert!(looks_like_fqcn("com.example.Outer$Inner"));
    }

    #[test]
    fn tag_names_need_fqcn_shape() {
        let f = semantic_filter();
        let tag_ctx = Context {
            tag: "com.example.CustomView",
            is_tag_name: true,
            ..Context::default()
        };

        assert!(f.accepts("com.example.CustomView", &tag_ctx));
        assert!(!f.accepts("LinearLayout", &tag_ctx));
    }

    #[test]
    fn class_bearing_attributes() {
        let f = semantic_filter();

        for attr in ["android:name", "class", "tools:context", "app:layoutManager"] {
            let ctx = Context {
                tag: "fragment",
                attr_name: Some(attr),
                ..Context::default()
            };
            assert!(f.accepts("com.example.ui.Home", &ctx), "{attr}");
        }

        let other = Context {
            tag: "activity",
            attr_name: Some("android:label"),
            ..Context::default()
        };
        assert!(!f.accepts("com.example.ui.Home", &other));
    }

    #[test]
    fn tools_context_can_be_disabled() {
        let f = SemanticFilter::new(
            WhitelistFilter::new(["com.example"], Vec::<&str>::new()),
            false,
        );
        let ctx = Context {
            tag: "layout",
            attr_name: Some("tools:context"),
            ..Context::default()
        };
        assert!(!f.accepts("com.example.ui.Home", &ctx));
    }

    #[test]
    fn whitelist_conjunction() {
        let f = semantic_filter();
        let ctx = Context {
            tag: "activity",
            attr_name: Some("android:name"),
            ..Context::default()
        };

        assert!(!f.accepts("android.app.Activity", &ctx));
        assert!(!f.accepts("com.other.Thing", &ctx));
        assert!(f.accepts("com.example.MainActivity", &ctx));
    }

    #[test]
    fn binding_expression_extraction_and_rewrite() {
        let f = semantic_filter();
        let ctx = Context {
            tag: "TextView",
            attr_name: Some("android:text"),
            is_data_binding_expr: true,
            ..Context::default()
        };

        let expr = "@{T(com.example.Util).format(item) + T(android.text.TextUtils).isEmpty(x)}";
        assert!(f.accepts(expr, &ctx));

        let rewritten = f
            .rewrite_binding_expr(expr, |fqcn| {
                (fqcn == "com.example.Util").then(|| "a.b.U".to_owned())
            })
            .unwrap();
        assert_eq!(
            rewritten,
            "@{T(a.b.U).format(item) + T(android.text.TextUtils).isEmpty(x)}"
        );

        // nothing owned inside: no change
        assert!(
            f.rewrite_binding_expr("@{T(android.view.View).GONE}", |_| Some("x.Y".into()))
                .is_none()
        );
    }
}
