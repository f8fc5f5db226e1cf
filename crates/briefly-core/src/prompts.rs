//! Prompt templates and context formatting.
//!
//! Templates use `{name}` placeholders. Only the variables passed to
//! [`render`] are substituted; anything else in braces is left as-is, so
//! prompts may contain literal JSON or code.

use crate::models::RetrievedDocument;

/// Default system prompt for `generate_query`.
///
/// Variables: `{queries}`, `{system_time}`.
pub const QUERY_SYSTEM_PROMPT: &str = "Generate search queries to retrieve news articles and posts that may help answer the user's question. Previously, you made the following queries:

<previous_queries>
- {queries}
</previous_queries>

Rewrite the user's latest message as one standalone search query.

System time: {system_time}";

/// Default system prompt for `respond`.
///
/// Variables: `{retrieved_docs}`, `{system_time}`.
pub const RESPONSE_SYSTEM_PROMPT: &str = "You are a helpful news assistant. Answer the user's questions based on the retrieved documents. If the documents do not contain the answer, say so.

{retrieved_docs}

System time: {system_time}";

/// Substitute `{name}` placeholders in a single pass.
///
/// Substituted values are never re-scanned, so a document that happens to
/// contain `{system_time}` is inserted verbatim.
///
/// ```rust
/// use briefly_core::prompts::render;
///
/// let out = render("Hello {who}, {unknown}", &[("who", "world")]);
/// assert_eq!(out, "Hello world, {unknown}");
/// ```
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = &after[..end];
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Format retrieved documents into one context block.
///
/// ```text
/// <documents>
/// <document score=0.9120>
/// ...content...
/// </document>
/// </documents>
/// ```
pub fn format_docs(docs: &[RetrievedDocument]) -> String {
    if docs.is_empty() {
        return "<documents></documents>".to_string();
    }
    let body = docs
        .iter()
        .map(|doc| {
            format!(
                "<document score={:.4}>\n{}\n</document>",
                doc.score, doc.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("<documents>\n{body}\n</documents>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_vars() {
        let out = render(
            "t={system_time} q={queries}",
            &[("queries", "a\n- b"), ("system_time", "now")],
        );
        assert_eq!(out, "t=now q=a\n- b");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let out = render("{retrieved_docs}", &[("retrieved_docs", "{system_time}")]);
        assert_eq!(out, "{system_time}");
    }

    #[test]
    fn test_render_keeps_unbalanced_brace() {
        assert_eq!(render("json: {\"a\": 1", &[]), "json: {\"a\": 1");
        assert_eq!(render("{ open", &[("x", "y")]), "{ open");
    }

    #[test]
    fn test_format_docs_empty() {
        assert_eq!(format_docs(&[]), "<documents></documents>");
    }

    #[test]
    fn test_format_docs_separates_documents() {
        let docs = vec![
            RetrievedDocument {
                content: "Paris is the capital of France.".into(),
                score: 0.91,
            },
            RetrievedDocument {
                content: "France borders Spain.".into(),
                score: 0.5,
            },
        ];
        let out = format_docs(&docs);
        assert_eq!(
            out,
            "<documents>\n<document score=0.9100>\nParis is the capital of France.\n</document>\n<document score=0.5000>\nFrance borders Spain.\n</document>\n</documents>"
        );
    }

    #[test]
    fn test_default_prompts_have_expected_placeholders() {
        assert!(QUERY_SYSTEM_PROMPT.contains("{queries}"));
        assert!(QUERY_SYSTEM_PROMPT.contains("{system_time}"));
        assert!(RESPONSE_SYSTEM_PROMPT.contains("{retrieved_docs}"));
        assert!(RESPONSE_SYSTEM_PROMPT.contains("{system_time}"));
    }
}
