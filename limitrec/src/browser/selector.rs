//! Element selectors shared by every backend.
//!
//! Backends speak CSS natively; visible-text matching is resolved with a
//! small script so both kinds behave the same everywhere.

use std::fmt;

/// How to find an element on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// A CSS selector.
    Css(String),
    /// First visible element matching `scope` whose text (or value) contains `text`.
    Text { scope: String, text: String },
}

impl Selector {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn text(scope: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            scope: scope.into(),
            text: text.into(),
        }
    }

    /// JavaScript expression evaluating to the first visible match, or `null`.
    pub fn to_js_lookup(&self) -> String {
        let candidates = match self {
            Self::Css(css) => format!("Array.from(document.querySelectorAll({}))", js_string(css)),
            Self::Text { scope, text } => format!(
                "Array.from(document.querySelectorAll({})).filter(e => ((e.innerText || e.value || '') + '').trim().includes({}))",
                js_string(scope),
                js_string(text)
            ),
        };
        format!(
            "({candidates}.find(e => e.offsetParent !== null || e.getClientRects().length > 0) || null)"
        )
    }

    /// Script returning `true` when the element exists and is visible.
    pub fn js_exists(&self) -> String {
        format!("!!{}", self.to_js_lookup())
    }

    /// Script clicking the element; returns `false` when it is absent.
    pub fn js_click(&self) -> String {
        format!(
            "(() => {{ const e = {}; if (!e) return false; e.scrollIntoView({{block: 'center'}}); e.click(); return true; }})()",
            self.to_js_lookup()
        )
    }

    /// Script setting the element value and firing input events; returns `false` when absent.
    pub fn js_fill(&self, value: &str) -> String {
        format!(
            "(() => {{ const e = {}; if (!e) return false; e.focus(); e.value = {}; \
             e.dispatchEvent(new Event('input', {{bubbles: true}})); \
             e.dispatchEvent(new Event('change', {{bubbles: true}})); return true; }})()",
            self.to_js_lookup(),
            js_string(value)
        )
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(css) => f.write_str(css),
            Self::Text { scope, text } => write!(f, "{scope}:has-text({text:?})"),
        }
    }
}

/// Quote a Rust string as a JavaScript string literal.
fn js_string(s: &str) -> String {
    // JSON string literals are valid JS string literals.
    serde_json::Value::String(s.to_string()).to_string()
}
