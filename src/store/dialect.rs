//! SQL dialect shims.
//!
//! The project store runs on SQLite; the global registry may be hosted on
//! PostgreSQL. The differences the stores care about are small and
//! mechanical: parameter placeholders, the current-time expression, and
//! how an insert asks for conflict rows to be ignored. Everything else is
//! shared SQL.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Render the placeholder for the 1-based parameter `n`.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
        }
    }

    /// Render `count` comma-separated placeholders starting at parameter
    /// `start` (1-based).
    pub fn placeholders(&self, start: usize, count: usize) -> String {
        (0..count)
            .map(|i| self.placeholder(start + i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// SQL expression yielding the current UTC time.
    pub fn now_expr(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "datetime('now')",
            Dialect::Postgres => "NOW()",
        }
    }

    /// Insert preamble for "ignore duplicates" semantics. Pairs with
    /// [`Dialect::ignore_conflict_suffix`].
    pub fn insert_ignore_preamble(&self, table: &str) -> String {
        match self {
            Dialect::Sqlite => format!("INSERT OR IGNORE INTO {table}"),
            Dialect::Postgres => format!("INSERT INTO {table}"),
        }
    }

    /// Conflict suffix completing the "ignore duplicates" insert.
    pub fn ignore_conflict_suffix(&self, conflict_target: &str) -> String {
        match self {
            Dialect::Sqlite => String::new(),
            Dialect::Postgres => format!(" ON CONFLICT ({conflict_target}) DO NOTHING"),
        }
    }

    /// Subdirectory of the embedded schema tree holding this dialect's
    /// migration files.
    pub fn schema_dir(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_differ_per_dialect() {
        assert_eq!(Dialect::Sqlite.placeholder(3), "?");
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Sqlite.placeholders(1, 3), "?, ?, ?");
        assert_eq!(Dialect::Postgres.placeholders(2, 3), "$2, $3, $4");
    }

    #[test]
    fn now_expression() {
        assert_eq!(Dialect::Sqlite.now_expr(), "datetime('now')");
        assert_eq!(Dialect::Postgres.now_expr(), "NOW()");
    }

    #[test]
    fn ignore_insert_round_trip() {
        let sql = format!(
            "{} (a, b) VALUES ({}){}",
            Dialect::Sqlite.insert_ignore_preamble("t"),
            Dialect::Sqlite.placeholders(1, 2),
            Dialect::Sqlite.ignore_conflict_suffix("a"),
        );
        assert_eq!(sql, "INSERT OR IGNORE INTO t (a, b) VALUES (?, ?)");

        let sql = format!(
            "{} (a, b) VALUES ({}){}",
            Dialect::Postgres.insert_ignore_preamble("t"),
            Dialect::Postgres.placeholders(1, 2),
            Dialect::Postgres.ignore_conflict_suffix("a"),
        );
        assert_eq!(
            sql,
            "INSERT INTO t (a, b) VALUES ($1, $2) ON CONFLICT (a) DO NOTHING"
        );
    }
}
