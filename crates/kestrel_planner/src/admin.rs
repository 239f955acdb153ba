//! The one administrative statement this layer owns:
//!
//! ```sql
//! UPDATE STATISTICS <table> [SET "<attribute>" = <bytes>]
//! ```
//!
//! With a SET clause the named attribute (only the guidepost width is
//! recognized) is changed and guideposts are re-collected; without one the
//! table is re-collected at its current width. A width of zero clears the
//! table's statistics, restoring "never split".

use kestrel_common::bail_plan;
use kestrel_common::error::{KestrelResult, StatsError};

/// The attribute name accepted in the SET clause.
pub const GUIDEPOST_WIDTH_ATTR: &str = "kestrel.stats.guidepost_width";

/// A parsed administrative statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminStatement {
    UpdateStatistics {
        /// Normalized (lowercased) table name.
        table: String,
        /// New guidepost width in bytes; `None` = re-collect at the current
        /// width, `Some(0)` = clear statistics.
        guidepost_width: Option<u64>,
    },
}

/// Parse an administrative statement. Keywords are case-insensitive; the
/// attribute name is case-sensitive and must be double-quoted.
pub fn parse_admin_statement(sql: &str) -> KestrelResult<AdminStatement> {
    let text = sql.trim().trim_end_matches(';').trim();
    let mut tokens = text.split_whitespace();

    expect_keyword(tokens.next(), "UPDATE")?;
    expect_keyword(tokens.next(), "STATISTICS")?;

    let table = match tokens.next() {
        Some(t) => normalize_ident(t)?,
        None => bail_plan!("UPDATE STATISTICS requires a table name"),
    };

    let rest: Vec<&str> = tokens.collect();
    if rest.is_empty() {
        return Ok(AdminStatement::UpdateStatistics {
            table,
            guidepost_width: None,
        });
    }

    if !rest[0].eq_ignore_ascii_case("SET") {
        bail_plan!("expected SET or end of statement, got {:?}", rest[0]);
    }
    let clause = rest[1..].join(" ");
    let (attr, value) = parse_set_clause(&clause)?;
    if attr != GUIDEPOST_WIDTH_ATTR {
        return Err(StatsError::UnknownAttribute(attr).into());
    }
    Ok(AdminStatement::UpdateStatistics {
        table,
        guidepost_width: Some(value),
    })
}

fn expect_keyword(token: Option<&str>, keyword: &str) -> KestrelResult<()> {
    match token {
        Some(t) if t.eq_ignore_ascii_case(keyword) => Ok(()),
        Some(t) => bail_plan!("expected {}, got {:?}", keyword, t),
        None => bail_plan!("expected {}, got end of statement", keyword),
    }
}

/// Lowercase an unquoted identifier, rejecting anything that is not a plain
/// SQL name.
fn normalize_ident(ident: &str) -> KestrelResult<String> {
    let ok = !ident.is_empty()
        && !ident.starts_with(|c: char| c.is_ascii_digit())
        && ident
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        bail_plan!("invalid table name {:?}", ident);
    }
    Ok(ident.to_ascii_lowercase())
}

/// Parse `"<attr>" = <bytes>`, tolerating absent whitespace around `=`.
fn parse_set_clause(clause: &str) -> KestrelResult<(String, u64)> {
    let clause = clause.trim();
    let Some(rest) = clause.strip_prefix('"') else {
        bail_plan!("SET attribute must be double-quoted");
    };
    let Some(close) = rest.find('"') else {
        bail_plan!("unterminated attribute name in SET clause");
    };
    let attr = rest[..close].to_string();
    let after = rest[close + 1..].trim_start();
    let Some(value_text) = after.strip_prefix('=') else {
        bail_plan!("expected = after attribute name");
    };
    let value_text = value_text.trim();
    if value_text.is_empty() || !value_text.bytes().all(|b| b.is_ascii_digit()) {
        bail_plan!("attribute value must be a non-negative integer, got {:?}", value_text);
    }
    let value: u64 = match value_text.parse() {
        Ok(v) => v,
        Err(_) => bail_plan!("attribute value {:?} out of range", value_text),
    };
    Ok((attr, value))
}
