// SPDX-License-Identifier: Apache-2.0

//! Read-only statement pre-check (§4.2, §6): the generic SQL query receiver
//! only ever runs statements whose leading keyword is `SELECT` or `WITH`.

/// Returns `true` if `sql`'s leading keyword (ignoring whitespace and SQL
/// line/block comments) is `SELECT` or `WITH`.
#[must_use]
pub fn is_read_only(sql: &str) -> bool {
    leading_keyword(sql)
        .map(|kw| kw.eq_ignore_ascii_case("SELECT") || kw.eq_ignore_ascii_case("WITH"))
        .unwrap_or(false)
}

fn leading_keyword(sql: &str) -> Option<&str> {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = stripped.split_once('\n').map_or("", |(_, after)| after);
            continue;
        }
        if let Some(stripped) = rest.strip_prefix("/*") {
            rest = stripped.split_once("*/").map_or("", |(_, after)| after);
            continue;
        }
        break;
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_select_and_with() {
        assert!(is_read_only("SELECT * FROM t"));
        assert!(is_read_only("  with cte as (select 1) select * from cte"));
    }

    #[test]
    fn rejects_mutating_statements() {
        assert!(!is_read_only("DELETE FROM t"));
        assert!(!is_read_only("INSERT INTO t VALUES (1)"));
        assert!(!is_read_only("UPDATE t SET x = 1"));
        assert!(!is_read_only("DROP TABLE t"));
    }

    #[test]
    fn skips_leading_comments() {
        assert!(is_read_only("-- a comment\nSELECT 1"));
        assert!(is_read_only("/* block */ SELECT 1"));
    }
}
