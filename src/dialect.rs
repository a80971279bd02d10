//! SQL families the engine generates fragments for.
//!
//! Only SQLite and PostgreSQL have executable drivers; the remaining
//! families are generation targets selected through `engine.dialect`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A database family, keyed by the SQL it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseFamily {
    Sqlite,
    Postgres,
    Oracle,
    SqlServer,
    Db2,
    #[serde(rename = "db2_zos")]
    Db2Zos,
}

impl DatabaseFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseFamily::Sqlite => "sqlite",
            DatabaseFamily::Postgres => "postgres",
            DatabaseFamily::Oracle => "oracle",
            DatabaseFamily::SqlServer => "sql_server",
            DatabaseFamily::Db2 => "db2",
            DatabaseFamily::Db2Zos => "db2_zos",
        }
    }

    /// How this family bounds a filter to a fixed number of rows.
    pub fn pagination(&self) -> Pagination {
        match self {
            DatabaseFamily::Oracle => Pagination::AppendedRowLimit,
            DatabaseFamily::Db2Zos => Pagination::KeyRange,
            DatabaseFamily::SqlServer => Pagination::TopSubselect,
            DatabaseFamily::Sqlite | DatabaseFamily::Postgres | DatabaseFamily::Db2 => {
                Pagination::LimitedSubselect
            }
        }
    }

    /// Timestamp literal usable on the right-hand side of a comparison.
    pub fn timestamp_literal(&self, ts: NaiveDateTime) -> String {
        let text = ts.format("%Y-%m-%d %H:%M:%S");
        match self {
            DatabaseFamily::Sqlite => format!("'{text}'"),
            DatabaseFamily::Postgres => format!("TIMESTAMP '{text}'"),
            DatabaseFamily::Oracle => format!("TO_DATE('{text}', 'YYYY-MM-DD HH24:MI:SS')"),
            DatabaseFamily::SqlServer => format!("CONVERT(DATETIME, '{text}', 120)"),
            DatabaseFamily::Db2 | DatabaseFamily::Db2Zos => format!("TIMESTAMP('{text}')"),
        }
    }

    /// Quoted string literal with embedded quotes doubled.
    pub fn text_literal(&self, text: &str) -> String {
        format!("'{}'", text.replace('\'', "''"))
    }

    pub fn bool_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (DatabaseFamily::Postgres, true) => "TRUE",
            (DatabaseFamily::Postgres, false) => "FALSE",
            (_, true) => "1",
            (_, false) => "0",
        }
    }

    pub fn blob_literal(&self, bytes: &[u8]) -> String {
        let encoded = hex::encode(bytes);
        match self {
            DatabaseFamily::Postgres => format!("'\\x{encoded}'::bytea"),
            DatabaseFamily::Oracle => format!("HEXTORAW('{encoded}')"),
            DatabaseFamily::SqlServer => format!("0x{encoded}"),
            _ => format!("X'{encoded}'"),
        }
    }

    /// Bind marker of the `index`-th (1-based) statement parameter.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            DatabaseFamily::Postgres => format!("${index}"),
            DatabaseFamily::Oracle => format!(":{index}"),
            DatabaseFamily::SqlServer => format!("@P{index}"),
            DatabaseFamily::Sqlite | DatabaseFamily::Db2 | DatabaseFamily::Db2Zos => {
                "?".to_string()
            }
        }
    }

    /// Trailing clause limiting a subselect to `rows` rows, for families
    /// that have one.
    fn limit_clause(&self, rows: u64) -> String {
        match self {
            DatabaseFamily::Db2 | DatabaseFamily::Db2Zos => {
                format!("FETCH FIRST {rows} ROWS ONLY")
            }
            _ => format!("LIMIT {rows}"),
        }
    }
}

impl std::fmt::Display for DatabaseFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatabaseFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DatabaseFamily::Sqlite),
            "postgres" | "postgresql" => Ok(DatabaseFamily::Postgres),
            "oracle" => Ok(DatabaseFamily::Oracle),
            "sql_server" | "sqlserver" | "mssql" => Ok(DatabaseFamily::SqlServer),
            "db2" => Ok(DatabaseFamily::Db2),
            "db2_zos" | "db2zos" => Ok(DatabaseFamily::Db2Zos),
            other => Err(format!("unknown database family '{other}'")),
        }
    }
}

/// Row-count windowing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// `<filter> AND ROWNUM <= n`
    AppendedRowLimit,
    /// Primary-key range starting at the smallest matching key. The window
    /// can hold fewer than `n` rows, so progress is re-counted.
    KeyRange,
    /// `pk IN (SELECT pk ... ORDER BY pk <limit clause>)`
    LimitedSubselect,
    /// `pk IN (SELECT TOP n pk ... ORDER BY pk)`
    TopSubselect,
}

impl Pagination {
    /// Whether the emitted fragment must be re-counted to measure progress.
    pub fn recounts(&self) -> bool {
        matches!(self, Pagination::KeyRange)
    }

    /// Build a filter matching at most `rows` rows of `table` that satisfy
    /// `filter`.
    pub fn fragment(
        &self,
        family: DatabaseFamily,
        table: &str,
        key: &str,
        filter: &str,
        rows: u64,
    ) -> String {
        let filter = where_body(filter);
        match self {
            Pagination::AppendedRowLimit => format!("({filter}) AND ROWNUM <= {rows}"),
            Pagination::KeyRange => format!(
                "({filter}) AND {key} >= (SELECT MIN({key}) FROM {table} WHERE {filter}) \
                 AND {key} < (SELECT MIN({key}) + {rows} FROM {table} WHERE {filter})"
            ),
            Pagination::LimitedSubselect => format!(
                "{key} IN (SELECT {key} FROM {table} WHERE {filter} ORDER BY {key} {})",
                family.limit_clause(rows)
            ),
            Pagination::TopSubselect => {
                format!(
                    "{key} IN (SELECT TOP {rows} {key} FROM {table} WHERE {filter} ORDER BY {key})"
                )
            }
        }
    }
}

/// Body of a `WHERE` clause; an empty filter matches every row.
pub fn where_body(filter: &str) -> &str {
    let trimmed = filter.trim();
    if trimmed.is_empty() { "1=1" } else { trimmed }
}
