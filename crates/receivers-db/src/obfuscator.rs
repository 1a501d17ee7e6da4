// SPDX-License-Identifier: Apache-2.0

//! SQL text obfuscation (§4.2): strips literals, collapses `IN` lists, and
//! normalizes whitespace before a statement is emitted as `db.statement`,
//! plus a stable fingerprint of the obfuscated form for grouping.

use std::sync::OnceLock;

fn string_literal() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"'(?:[^'\\]|\\.)*'").expect("valid regex"))
}

fn numeric_literal() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\b\d+(\.\d+)?\b").expect("valid regex"))
}

fn in_list() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)\bIN\s*\(\s*\?(\s*,\s*\?)*\s*\)").expect("valid regex")
    })
}

fn whitespace() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\s+").expect("valid regex"))
}

/// The obfuscated statement text plus a stable fingerprint over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscatedQuery {
    /// Literal-free, whitespace-normalized statement text.
    pub text: String,
    /// A stable hash of `text`, used as a query identity across invocations.
    pub fingerprint: String,
}

/// Obfuscates a raw SQL statement: removes string and numeric literals,
/// collapses placeholder `IN` lists to a single `?`, and normalizes
/// whitespace. Raw text is never retained by the caller once this runs.
#[must_use]
pub fn obfuscate(raw: &str) -> ObfuscatedQuery {
    let stripped = string_literal().replace_all(raw, "?");
    let stripped = numeric_literal().replace_all(&stripped, "?");
    let stripped = in_list().replace_all(&stripped, "IN (?)");
    let normalized = whitespace().replace_all(stripped.trim(), " ").into_owned();
    let fingerprint = blake3::hash(normalized.as_bytes()).to_hex().to_string();
    ObfuscatedQuery {
        text: normalized,
        fingerprint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_string_and_numeric_literals() {
        let result = obfuscate("SELECT * FROM users WHERE name = 'john' AND age > 30");
        assert_eq!(result.text, "SELECT * FROM users WHERE name = ? AND age > ?");
    }

    #[test]
    fn collapses_in_lists() {
        let result = obfuscate("SELECT * FROM t WHERE id IN (?, ?, ?)");
        assert_eq!(result.text, "SELECT * FROM t WHERE id IN (?)");
    }

    #[test]
    fn fingerprint_is_stable_across_literal_changes() {
        let a = obfuscate("SELECT * FROM users WHERE email = 'john@example.com'");
        let b = obfuscate("SELECT * FROM users WHERE email = 'jane@example.org'");
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn collapses_whitespace() {
        let result = obfuscate("SELECT   *\nFROM   t\t WHERE x = 1");
        assert_eq!(result.text, "SELECT * FROM t WHERE x = ?");
    }
}
