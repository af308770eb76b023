//! Escapes the reserved characters of Lucene/BM25-style query syntax so a
//! user's free-text query cannot be misinterpreted as field or boolean
//! syntax by the sparse branch.

const RESERVED: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\', '/',
];

/// Backslash-escape every reserved character. Idempotent on input containing
/// none of them.
pub fn escape(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for ch in query.chars() {
        if RESERVED.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
