//! FTS5 query sanitization.
//!
//! FTS5's query syntax (`AND`/`OR`/`NOT`, `"phrase"`, `NEAR`, `*` prefix,
//! column filters) is powerful enough that passing untrusted content
//! straight through lets a crafted prompt break or hijack a search. We
//! tokenize on whitespace, strip FTS5 special characters from each token,
//! and join the survivors with an implicit `AND`, which is what the
//! teacher's `keyword_search` callers rely on.

const FTS5_SPECIAL: &[char] = &['"', '*', '(', ')', ':', '^', '-', '+'];

/// Turn arbitrary user text into a safe FTS5 MATCH query: each token is
/// stripped of special characters and quoted, tokens are ANDed together.
/// Returns `None` if no usable tokens remain.
pub fn sanitize_fts5_query(raw: &str) -> Option<String> {
    let tokens: Vec<String> = raw
        .split_whitespace()
        .map(|tok| tok.chars().filter(|c| !FTS5_SPECIAL.contains(c)).collect::<String>())
        .filter(|tok: &String| !tok.is_empty())
        .map(|tok| format!("\"{tok}\""))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_special_characters() {
        let sanitized = sanitize_fts5_query(r#"deploy* OR "drop table""#).unwrap();
        assert!(!sanitized.contains('*'));
        assert!(!sanitized.contains("OR \""));
    }

    #[test]
    fn empty_input_yields_none() {
        assert_eq!(sanitize_fts5_query("   "), None);
        assert_eq!(sanitize_fts5_query("***"), None);
    }

    #[test]
    fn joins_tokens_with_and() {
        let sanitized = sanitize_fts5_query("nginx deployment").unwrap();
        assert_eq!(sanitized, "\"nginx\" AND \"deployment\"");
    }
}
