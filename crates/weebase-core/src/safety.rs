//! Safety policy and statement classification
//!
//! The policy is checked before any I/O. Free-form SQL is tokenized with the
//! connection's own dialect and classified by the leading keyword of each
//! statement in the batch. Read-only mode additionally parses the batch and
//! only admits a single statement whose syntax tree reads.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{Query, SetExpr, Statement, UtilityOption};
use sqlparser::dialect::Dialect as SqlParserDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::statement::MutationKind;
use crate::{Dialect, Result, WeebaseError};

/// Keywords that start a statement returning rows without writing
const QUERY_KEYWORDS: &[&str] = &["select", "with", "show", "pragma", "explain"];

/// Keywords blocked outright in safe mode
const DESTRUCTIVE_KEYWORDS: &[&str] = &["drop", "alter", "truncate"];

/// Reserved T-SQL words that only ever start or drive a writing statement.
/// SQL Server runs a batch without separators, so `SELECT 1 DELETE FROM t`
/// is two statements and every word of the batch has to be checked.
const TSQL_WRITE_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "merge", "drop", "alter", "truncate", "create", "exec",
    "execute", "grant", "revoke", "deny", "backup", "restore", "bulk", "dbcc", "kill", "shutdown",
];

/// Words that begin the statement an EXPLAIN describes. Anything before the
/// first of them is an EXPLAIN option.
const EXPLAINED_KEYWORDS: &[&str] = &[
    "select", "with", "values", "table", "insert", "update", "delete", "merge", "replace",
    "create", "drop", "alter", "truncate", "execute", "declare", "call",
];

/// Process-wide mutation policy, snapshotted per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyPolicy {
    /// Row mutations need explicit confirmation and destructive DDL is
    /// refused in the SQL console
    pub safe_mode_default: bool,
    /// Nothing may write
    pub read_only_mode: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            safe_mode_default: true,
            read_only_mode: false,
        }
    }
}

/// Whether a console statement returns rows or an affected count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Exec,
}

/// Words of one statement with whitespace and comments removed. Unquoted
/// words are lower-cased; quoted names, literals and punctuation keep their
/// rendered form and never match a keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Lead {
    first: String,
    rest: Vec<String>,
}

impl Lead {
    fn words(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.first.as_str()).chain(self.rest.iter().map(String::as_str))
    }

    fn write_mention(&self) -> Option<&str> {
        self.words().find(|word| TSQL_WRITE_KEYWORDS.contains(word))
    }

    /// EXPLAIN with an ANALYZE option executes the statement it explains
    fn explain_runs(&self) -> bool {
        self.first == "explain"
            && self
                .rest
                .iter()
                .take_while(|word| !EXPLAINED_KEYWORDS.contains(&word.as_str()))
                .any(|word| word == "analyze" || word == "analyse")
    }

    fn explained(&self) -> Option<&str> {
        self.rest
            .iter()
            .map(String::as_str)
            .find(|word| EXPLAINED_KEYWORDS.contains(word))
    }

    fn is_query(&self) -> bool {
        if !QUERY_KEYWORDS.contains(&self.first.as_str()) {
            return false;
        }
        if self.explain_runs() {
            return self
                .explained()
                .is_some_and(|word| word == "select" || word == "with" || word == "values");
        }
        true
    }

    fn is_destructive(&self) -> bool {
        DESTRUCTIVE_KEYWORDS.contains(&self.first.as_str())
    }

    /// First destructive keyword anywhere in the statement. A keyword
    /// directly followed by `(` is a function call, such as MySQL's
    /// `TRUNCATE(x, d)`.
    fn destructive_mention(&self) -> Option<&str> {
        let words: Vec<&str> = self.words().collect();
        words
            .iter()
            .enumerate()
            .find(|&(i, word)| {
                DESTRUCTIVE_KEYWORDS.contains(word) && words.get(i + 1) != Some(&"(")
            })
            .map(|(_, word)| *word)
    }
}

fn leads_from_tokens(tokens: Vec<Token>) -> Vec<Lead> {
    let mut leads = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for token in tokens {
        match token {
            Token::SemiColon => leads.extend(lead_from_words(&mut current)),
            Token::Whitespace(_) => {}
            Token::Word(word) if word.quote_style.is_none() => {
                current.push(word.value.to_ascii_lowercase())
            }
            other => current.push(other.to_string()),
        }
    }
    leads.extend(lead_from_words(&mut current));
    leads
}

fn lead_from_words(words: &mut Vec<String>) -> Option<Lead> {
    let mut drained = words.drain(..);
    let first = drained.next()?;
    Some(Lead {
        first,
        rest: drained.collect(),
    })
}

/// Whitespace splitting for text the tokenizer cannot read, such as an
/// unterminated string literal
fn leads_from_text(sql: &str) -> Vec<Lead> {
    sql.split(';')
        .filter_map(|stmt| {
            let mut words = stmt
                .split_whitespace()
                .map(|w| w.trim_start_matches('(').to_ascii_lowercase());
            let first = words.next()?;
            Some(Lead {
                first,
                rest: words.collect(),
            })
        })
        .collect()
}

fn statement_leads(dialect: &dyn SqlParserDialect, sql: &str) -> Vec<Lead> {
    match Tokenizer::new(dialect, sql).tokenize() {
        Ok(tokens) => leads_from_tokens(tokens),
        Err(e) => {
            tracing::debug!(error = %e, "tokenizer failed, classifying by whitespace");
            leads_from_text(sql)
        }
    }
}

fn explain_runs(analyze: bool, options: Option<&Vec<UtilityOption>>) -> bool {
    analyze
        || options.into_iter().flatten().any(|option| {
            let name = option.name.value.as_str();
            name.eq_ignore_ascii_case("analyze") || name.eq_ignore_ascii_case("analyse")
        })
}

fn query_reads(query: &Query) -> bool {
    let ctes_read = query
        .with
        .iter()
        .flat_map(|with| &with.cte_tables)
        .all(|cte| query_reads(&cte.query));
    ctes_read && query.locks.is_empty() && set_expr_reads(&query.body)
}

fn set_expr_reads(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => query_reads(query),
        SetExpr::SetOperation { left, right, .. } => set_expr_reads(left) && set_expr_reads(right),
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        SetExpr::Insert(_) | SetExpr::Update(_) => false,
    }
}

/// True when executing `statement` cannot write
fn statement_reads(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => query_reads(query),
        Statement::Explain {
            analyze,
            statement,
            options,
            ..
        } => !explain_runs(*analyze, options.as_ref()) || statement_reads(statement),
        Statement::ExplainTable { .. } => true,
        Statement::Pragma { value, .. } => value.is_none(),
        Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowViews { .. }
        | Statement::ShowCollation { .. } => true,
        _ => false,
    }
}

/// Keyword of the destructive DDL `statement` runs, if any
fn statement_destroys(statement: &Statement) -> Option<&'static str> {
    match statement {
        Statement::Drop { .. }
        | Statement::DropFunction { .. }
        | Statement::DropProcedure { .. }
        | Statement::DropSecret { .. }
        | Statement::DropPolicy { .. }
        | Statement::DropTrigger { .. } => Some("DROP"),
        Statement::Truncate { .. } => Some("TRUNCATE"),
        Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::AlterRole { .. }
        | Statement::AlterPolicy { .. } => Some("ALTER"),
        Statement::Explain {
            analyze,
            statement,
            options,
            ..
        } if explain_runs(*analyze, options.as_ref()) => statement_destroys(statement),
        _ => None,
    }
}

/// Dialects whose server splits a batch into statements without `;`
fn runs_unseparated_statements(dialect: &Dialect) -> bool {
    matches!(dialect, Dialect::SqlServer)
}

/// Lower-cased first keyword of every statement in `sql`
pub fn statement_keywords(dialect: &Dialect, sql: &str) -> Vec<String> {
    statement_leads(dialect.sqlparser_dialect().as_ref(), sql)
        .into_iter()
        .map(|lead| lead.first)
        .collect()
}

/// Classify by the first statement of the batch
pub fn classify(dialect: &Dialect, sql: &str) -> StatementKind {
    match statement_leads(dialect.sqlparser_dialect().as_ref(), sql).first() {
        Some(lead) if lead.is_query() => StatementKind::Query,
        _ => StatementKind::Exec,
    }
}

/// True when read-only mode would admit `sql`
pub fn is_read_only_sql(dialect: &Dialect, sql: &str) -> bool {
    let policy = SafetyPolicy {
        safe_mode_default: false,
        read_only_mode: true,
    };
    policy.check_sql(dialect, sql).is_ok()
}

fn read_only_violation(message: impl Into<String>) -> WeebaseError {
    WeebaseError::SafetyViolation(message.into())
}

impl SafetyPolicy {
    /// Gate a row mutation. Read-only mode refuses every mutation and safe
    /// mode refuses unconfirmed ones.
    pub fn check_mutation(&self, kind: MutationKind, confirmed: bool) -> Result<()> {
        if self.read_only_mode {
            return Err(WeebaseError::SafetyViolation(format!(
                "{} is not allowed in read-only mode",
                kind.operation()
            )));
        }
        if self.safe_mode_default && !confirmed {
            return Err(WeebaseError::SafetyViolation(format!(
                "confirmation required to {}",
                kind.operation()
            )));
        }
        Ok(())
    }

    /// Gate a console batch and report how its first statement runs
    pub fn check_sql(&self, dialect: &Dialect, sql: &str) -> Result<StatementKind> {
        let parser_dialect = dialect.sqlparser_dialect();
        let leads = statement_leads(parser_dialect.as_ref(), sql);
        let Some(first) = leads.first() else {
            return Err(WeebaseError::Validation("sql is required".into()));
        };
        let parsed = if self.read_only_mode || self.safe_mode_default {
            Some(Parser::parse_sql(parser_dialect.as_ref(), sql))
        } else {
            None
        };

        if self.read_only_mode {
            if let Some(lead) = leads.iter().find(|lead| !lead.is_query()) {
                return Err(WeebaseError::SafetyViolation(format!(
                    "{} statements are not allowed in read-only mode",
                    lead.first.to_ascii_uppercase()
                )));
            }
            if runs_unseparated_statements(dialect) {
                if let Some(word) = leads.iter().find_map(Lead::write_mention) {
                    return Err(WeebaseError::SafetyViolation(format!(
                        "{} statements are not allowed in read-only mode",
                        word.to_ascii_uppercase()
                    )));
                }
            }
            if let Some(parsed) = &parsed {
                verify_reads(parsed, first)?;
            }
        }
        if self.safe_mode_default {
            let scan_words = runs_unseparated_statements(dialect);
            if let Some(keyword) = destructive_keyword(parsed.as_ref(), &leads, scan_words) {
                return Err(WeebaseError::SafetyViolation(format!(
                    "{} statements are blocked in safe mode",
                    keyword
                )));
            }
        }

        Ok(if first.is_query() {
            StatementKind::Query
        } else {
            StatementKind::Exec
        })
    }
}

/// Read-only mode admits one statement whose syntax tree reads. Text the
/// parser cannot read is refused since nothing can vouch for it.
fn verify_reads(
    parsed: &std::result::Result<Vec<Statement>, ParserError>,
    first: &Lead,
) -> Result<()> {
    let statements = parsed.as_ref().map_err(|e| {
        read_only_violation(format!(
            "read-only mode cannot verify this statement: {}",
            e
        ))
    })?;
    match statements.as_slice() {
        [statement] if statement_reads(statement) => Ok(()),
        [_] => Err(read_only_violation(format!(
            "{} statement writes and is not allowed in read-only mode",
            first.first.to_ascii_uppercase()
        ))),
        _ => Err(read_only_violation(
            "read-only mode runs one statement at a time",
        )),
    }
}

/// Destructive keyword found by the leads and the syntax tree. When the
/// batch does not parse, or `scan_words` is set, every word of every
/// statement is scanned as well.
fn destructive_keyword(
    parsed: Option<&std::result::Result<Vec<Statement>, ParserError>>,
    leads: &[Lead],
    scan_words: bool,
) -> Option<String> {
    if let Some(lead) = leads.iter().find(|lead| lead.is_destructive()) {
        return Some(lead.first.to_ascii_uppercase());
    }
    if scan_words {
        if let Some(word) = leads.iter().find_map(Lead::destructive_mention) {
            return Some(word.to_ascii_uppercase());
        }
    }
    match parsed {
        Some(Ok(statements)) => statements
            .iter()
            .find_map(statement_destroys)
            .map(str::to_string),
        Some(Err(e)) => {
            tracing::debug!(error = %e, "parser failed, scanning every word for DDL");
            leads
                .iter()
                .find_map(Lead::destructive_mention)
                .map(str::to_ascii_uppercase)
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_only() -> SafetyPolicy {
        SafetyPolicy {
            safe_mode_default: false,
            read_only_mode: true,
        }
    }

    #[test]
    fn test_classify_first_statement() {
        let dialect = Dialect::Sqlite;
        assert_eq!(classify(&dialect, "  select 1"), StatementKind::Query);
        assert_eq!(
            classify(&dialect, "WITH t AS (SELECT 1) SELECT * FROM t"),
            StatementKind::Query
        );
        assert_eq!(classify(&dialect, "PRAGMA table_info(users)"), StatementKind::Query);
        assert_eq!(classify(&dialect, "-- comment\nSHOW TABLES"), StatementKind::Query);
        assert_eq!(classify(&dialect, "UPDATE users SET a = 1"), StatementKind::Exec);
        assert_eq!(
            classify(&Dialect::Postgres, "EXPLAIN ANALYZE DELETE FROM users"),
            StatementKind::Exec
        );
    }

    #[test]
    fn test_statement_keywords_splits_batches() {
        assert_eq!(
            statement_keywords(
                &Dialect::Postgres,
                "select 1; insert into t values (';'); ;  Drop table t"
            ),
            vec!["select", "insert", "drop"]
        );
    }

    #[test]
    fn test_unterminated_literal_falls_back_to_whitespace() {
        assert_eq!(
            statement_keywords(&Dialect::Postgres, "DELETE FROM t WHERE a = 'oops"),
            vec!["delete"]
        );
    }

    #[test]
    fn test_mysql_backslash_escape_does_not_hide_statements() {
        let sql = r"SELECT 'a\''; DELETE FROM t; -- '";
        assert_eq!(statement_keywords(&Dialect::MySql, sql), vec!["select", "delete"]);

        let err = read_only().check_sql(&Dialect::MySql, sql).unwrap_err();
        assert!(err.is_safety_violation());
        assert!(!is_read_only_sql(&Dialect::MySql, sql));

        let err = SafetyPolicy::default()
            .check_sql(&Dialect::MySql, r"SELECT 'a\''; DROP TABLE t; -- '")
            .unwrap_err();
        assert!(err.is_safety_violation());
    }

    #[test]
    fn test_sql_server_batch_without_semicolons_is_gated() {
        let err = read_only()
            .check_sql(&Dialect::SqlServer, "SELECT 1 DELETE FROM t")
            .unwrap_err();
        assert!(err.is_safety_violation());

        let err = SafetyPolicy::default()
            .check_sql(&Dialect::SqlServer, "SELECT 1 DROP TABLE t")
            .unwrap_err();
        assert!(err.is_safety_violation());
        assert!(err.to_string().contains("DROP"));

        // the parser reads the DELETE as a column alias here
        let err = read_only()
            .check_sql(&Dialect::SqlServer, "SELECT 1 DELETE FROM t")
            .unwrap_err();
        assert!(err.to_string().contains("DELETE"));

        assert_eq!(
            read_only()
                .check_sql(&Dialect::SqlServer, "SELECT TOP 5 [update] FROM t")
                .unwrap(),
            StatementKind::Query
        );
    }

    #[test]
    fn test_read_only_blocks_writes_anywhere_in_batch() {
        let policy = read_only();
        let dialect = Dialect::Postgres;
        assert_eq!(policy.check_sql(&dialect, "SELECT 1").unwrap(), StatementKind::Query);

        let err = policy.check_sql(&dialect, "DELETE FROM t").unwrap_err();
        assert!(err.is_safety_violation());

        let err = policy.check_sql(&dialect, "SELECT 1; DELETE FROM t").unwrap_err();
        assert!(err.is_safety_violation());
        assert!(!is_read_only_sql(&dialect, "SELECT 1; DELETE FROM t"));
    }

    #[test]
    fn test_read_only_runs_one_verified_statement() {
        let policy = read_only();
        let dialect = Dialect::Postgres;

        let err = policy.check_sql(&dialect, "SELECT 1; SELECT 2").unwrap_err();
        assert!(err.to_string().contains("one statement at a time"));

        let err = policy
            .check_sql(&dialect, "SELECT * INTO backup FROM users")
            .unwrap_err();
        assert!(err.is_safety_violation());

        let err = policy.check_sql(&dialect, "SELECT FROM WHERE (").unwrap_err();
        assert!(err.to_string().contains("cannot verify"));

        assert!(is_read_only_sql(&dialect, "WITH t AS (SELECT 1) SELECT * FROM t"));
    }

    #[test]
    fn test_explain_analyze_option_list_runs_the_statement() {
        let policy = read_only();
        let dialect = Dialect::Postgres;

        let err = policy
            .check_sql(&dialect, "EXPLAIN (ANALYZE) DELETE FROM t")
            .unwrap_err();
        assert!(err.is_safety_violation());
        assert_eq!(
            classify(&dialect, "EXPLAIN (FORMAT JSON, ANALYZE) UPDATE t SET a = 1"),
            StatementKind::Exec
        );

        assert_eq!(
            policy.check_sql(&dialect, "EXPLAIN SELECT * FROM t").unwrap(),
            StatementKind::Query
        );
        assert_eq!(
            policy
                .check_sql(&dialect, "EXPLAIN (ANALYZE, VERBOSE) SELECT * FROM t")
                .unwrap(),
            StatementKind::Query
        );
    }

    #[test]
    fn test_safe_mode_blocks_destructive_ddl() {
        let policy = SafetyPolicy::default();
        let dialect = Dialect::Postgres;
        for sql in [
            "DROP TABLE users",
            "alter table users add c int",
            "TRUNCATE users",
            "select 1; drop table x",
        ] {
            let err = policy.check_sql(&dialect, sql).unwrap_err();
            assert!(err.is_safety_violation(), "{sql}");
        }
        assert_eq!(
            policy.check_sql(&dialect, "DELETE FROM t WHERE id = 1").unwrap(),
            StatementKind::Exec
        );
    }

    #[test]
    fn test_truncate_function_is_not_ddl() {
        let policy = SafetyPolicy::default();
        assert_eq!(
            policy.check_sql(&Dialect::MySql, "SELECT TRUNCATE(1.25, 1)").unwrap(),
            StatementKind::Query
        );
    }

    #[test]
    fn test_quoted_identifier_is_not_a_keyword() {
        let policy = SafetyPolicy::default();
        assert!(policy.check_sql(&Dialect::Postgres, "\"drop\"").is_ok());
    }

    #[test]
    fn test_empty_sql_is_validation_error() {
        let err = SafetyPolicy::default()
            .check_sql(&Dialect::Postgres, " ;; -- nothing")
            .unwrap_err();
        assert!(matches!(err, WeebaseError::Validation(_)));
    }

    #[test]
    fn test_check_mutation() {
        let safe = SafetyPolicy::default();
        assert!(
            safe.check_mutation(MutationKind::Delete, false)
                .unwrap_err()
                .is_safety_violation()
        );
        assert!(safe.check_mutation(MutationKind::Delete, true).is_ok());

        let unsafe_mode = SafetyPolicy {
            safe_mode_default: false,
            read_only_mode: false,
        };
        assert!(unsafe_mode.check_mutation(MutationKind::Insert, false).is_ok());

        let err = read_only().check_mutation(MutationKind::Insert, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Safety violation: insert row is not allowed in read-only mode"
        );
    }
}
