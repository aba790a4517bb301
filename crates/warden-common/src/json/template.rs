//! String templates over the authorization document
//!
//! A template interleaves literal text with `{selector}` placeholders.
//! Rendering substitutes each selector's string form; unresolved
//! selectors render as the empty string so that optional fields do not
//! fail the whole template. `\{` escapes a literal brace.

use serde_json::Value;

use super::selector::{resolve, Resolved};

/// A parsed-on-render string template
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    source: String,
}

impl Template {
    /// Create a template from its source text
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// The original template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against a document
    pub fn render(&self, doc: &Value) -> String {
        render(doc, &self.source)
    }
}

impl From<&str> for Template {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

/// Render a template string against a document
pub fn render(doc: &Value, template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut selector = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    selector.push(inner);
                }
                if closed {
                    match resolve(doc, selector.trim()) {
                        Resolved::Value(v) => out.push_str(&super::value_to_string(&v)),
                        Resolved::Unresolved => {}
                    }
                } else {
                    // Unterminated placeholder is kept literally
                    out.push('{');
                    out.push_str(&selector);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "auth": {"identity": {"sub": "alice", "groups": ["admins"]}},
            "context": {"request": {"http": {"path": "/things"}}}
        })
    }

    #[test]
    fn test_literal_text_passes_through() {
        assert_eq!(render(&doc(), "no placeholders here"), "no placeholders here");
    }

    #[test]
    fn test_single_placeholder() {
        assert_eq!(render(&doc(), "user={auth.identity.sub}"), "user=alice");
    }

    #[test]
    fn test_multiple_placeholders() {
        assert_eq!(
            render(&doc(), "{auth.identity.sub} requested {context.request.http.path}"),
            "alice requested /things"
        );
    }

    #[test]
    fn test_unresolved_placeholder_renders_empty() {
        assert_eq!(render(&doc(), "tenant=[{auth.identity.tenant}]"), "tenant=[]");
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        assert_eq!(
            render(&doc(), "groups={auth.identity.groups}"),
            r#"groups=["admins"]"#
        );
    }

    #[test]
    fn test_escaped_brace() {
        assert_eq!(render(&doc(), r"literal \{not-a-selector}"), "literal {not-a-selector}");
    }

    #[test]
    fn test_unterminated_placeholder_kept_literally() {
        assert_eq!(render(&doc(), "broken {auth.identity.sub"), "broken {auth.identity.sub");
    }

    #[test]
    fn test_render_is_idempotent_for_fixed_document() {
        let template = Template::new("{auth.identity.sub}:{context.request.http.path}");
        let first = template.render(&doc());
        let second = template.render(&doc());
        assert_eq!(first, second);
    }
}
