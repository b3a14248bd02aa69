use super::scanner;
use regex::Regex;
use std::sync::OnceLock;

/// Introspection-shaped statements the layer handles itself on the client/server backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoCommand {
    /// `PRAGMA table_info(<table>)`, recognized only as a whole statement.
    TableInfo(String),
    /// Any other `PRAGMA`: executed natively on SQLite, a no-op on PostgreSQL.
    OtherPragma,
}

#[allow(clippy::expect_used)]
fn table_info_pattern() -> &'static Regex {
    static TABLE_INFO: OnceLock<Regex> = OnceLock::new();
    TABLE_INFO.get_or_init(|| {
        Regex::new(r#"(?i)^\s*PRAGMA\s+table_info\s*\(\s*["']?(\w+)["']?\s*\)\s*;?\s*$"#)
            .expect("valid table_info regex")
    })
}

/// Classifies `sql` as a pseudo-command, or `None` for an ordinary statement.
#[must_use]
pub fn recognize(sql: &str) -> Option<PseudoCommand> {
    if let Some(caps) = table_info_pattern().captures(sql) {
        return caps.get(1).map(|m| PseudoCommand::TableInfo(m.as_str().to_string()));
    }
    let starts_with_pragma = scanner::words(sql).next().is_some_and(|(_, w)| w.eq_ignore_ascii_case("PRAGMA"));
    starts_with_pragma.then_some(PseudoCommand::OtherPragma)
}
