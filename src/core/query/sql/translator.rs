use super::scanner::{self, LiteralMap, Scanner};
use crate::core::common::types::BackendMode;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;

/// One fixed dialect rewrite applied to client/server statements.
struct IdiomRule {
    pattern: Regex,
    replacement: &'static str,
    /// Flag-column comparisons; skipped for `UPDATE ... SET` statements.
    boolean: bool,
}

// Order matters: the literal-argument datetime() form must run before the bare
// DATETIME type rewrite, and the 'now' forms before the literal-argument form.
const IDIOMS: &[(&str, &str, bool)] = &[
    (r"(?i)\bdatetime\(\s*'now'\s*\)", "CURRENT_TIMESTAMP", false),
    (r"(?i)\bdate\(\s*'now'\s*\)", "CURRENT_DATE", false),
    (r"(?i)\bdatetime\(\s*'([^']+)'\s*\)", "'${1}'::TIMESTAMP", false),
    (r"(?i)\bBEGIN\s+(?:IMMEDIATE|EXCLUSIVE)\b", "START TRANSACTION", false),
    (r"(?i)\bDATETIME\b", "TIMESTAMP", false),
    (r"(?i)\bINTEGER\s+PRIMARY\s+KEY\s+AUTOINCREMENT\b", "SERIAL PRIMARY KEY", false),
    (r"(?i)\b(WHERE|AND|OR)\s+(is_active|is_deleted)\s*=\s*([01])\b", "${1} ${2}::int = ${3}", true),
];

#[allow(clippy::expect_used)]
fn idiom_rules() -> &'static [IdiomRule] {
    static RULES: OnceLock<Vec<IdiomRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        IDIOMS
            .iter()
            .map(|&(pattern, replacement, boolean)| IdiomRule {
                pattern: Regex::new(pattern).expect("valid idiom regex"),
                replacement,
                boolean,
            })
            .collect()
    })
}

/// Rewrites a statement written in the embedded dialect for the attached backend.
///
/// For [`BackendMode::Sqlite`] the input is returned borrowed and unchanged.
/// For [`BackendMode::Postgres`] non-literal `?` placeholders become `$1..$n`
/// in order, then the fixed idiom table is applied. A rewrite whose match
/// starts inside a quoted literal is skipped. Unrecognized syntax passes
/// through untouched; the driver reports it if it is actually invalid.
#[must_use]
pub fn translate(sql: &str, mode: BackendMode) -> Cow<'_, str> {
    match mode {
        BackendMode::Sqlite => Cow::Borrowed(sql),
        BackendMode::Postgres => {
            let mut out = rewrite_placeholders(sql);
            let set_exempt = is_update_set(&out);
            for rule in idiom_rules() {
                if rule.boolean && set_exempt {
                    continue;
                }
                let rewritten = match apply_rule(rule, &out) {
                    Cow::Owned(s) => Some(s),
                    Cow::Borrowed(_) => None,
                };
                if let Some(s) = rewritten {
                    out = Cow::Owned(s);
                }
            }
            out
        }
    }
}

fn apply_rule<'s>(rule: &IdiomRule, sql: &'s str) -> Cow<'s, str> {
    if !rule.pattern.is_match(sql) {
        return Cow::Borrowed(sql);
    }
    // Rescan: earlier rules may have shifted offsets.
    let literals = LiteralMap::of(sql);
    rule.pattern.replace_all(sql, |caps: &Captures<'_>| {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        if literals.in_literal(whole.start) {
            sql[whole].to_string()
        } else {
            let mut dst = String::new();
            caps.expand(rule.replacement, &mut dst);
            dst
        }
    })
}

/// Replaces each `?` outside quoted literals with `$n`, numbering left to right.
#[must_use]
pub fn rewrite_placeholders(sql: &str) -> Cow<'_, str> {
    if !sql.contains('?') {
        return Cow::Borrowed(sql);
    }
    let mut out = String::with_capacity(sql.len() + 8);
    let mut ordinal = 0usize;
    for span in Scanner::new(sql) {
        let text = span.text(sql);
        if span.in_literal {
            out.push_str(text);
            continue;
        }
        for ch in text.chars() {
            if ch == '?' {
                ordinal += 1;
                out.push('$');
                out.push_str(&ordinal.to_string());
            } else {
                out.push(ch);
            }
        }
    }
    Cow::Owned(out)
}

/// Number of `?` placeholders outside quoted literals.
#[must_use]
pub fn placeholder_count(sql: &str) -> usize {
    Scanner::new(sql)
        .filter(|s| !s.in_literal)
        .map(|s| s.text(sql).matches('?').count())
        .sum()
}

/// True if `keyword` occurs as a whole word outside quoted literals (ASCII case-insensitive).
#[must_use]
pub fn has_keyword(sql: &str, keyword: &str) -> bool {
    scanner::words(sql).any(|(_, w)| w.eq_ignore_ascii_case(keyword))
}

/// First word of the statement, outside literals.
#[must_use]
pub fn leading_keyword(sql: &str) -> Option<&str> {
    scanner::words(sql).next().map(|(_, w)| w)
}

#[must_use]
pub fn is_insert(sql: &str) -> bool {
    leading_keyword(sql).is_some_and(|w| w.eq_ignore_ascii_case("INSERT"))
}

#[must_use]
pub fn has_returning_clause(sql: &str) -> bool {
    has_keyword(sql, "RETURNING")
}

fn is_update_set(sql: &str) -> bool {
    leading_keyword(sql).is_some_and(|w| w.eq_ignore_ascii_case("UPDATE")) && has_keyword(sql, "SET")
}
