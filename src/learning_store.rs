//! Learned Hint Store - remembers which SQL shapes worked
//!
//! After a query succeeds (whether it came from the synthesizer or from an external
//! fallback), the caller reports it here. The SQL is normalized to its shape, hashed,
//! and upserted as a `LearnedHint` with usage counters, a latency window and a bounded
//! set of example prompts. A separate prompt index remembers the exact SQL produced for
//! a (data source, prompt) pair so the engine can skip synthesis for repeat prompts.
//!
//! Architecture: `HintPersistence` trait with two backends
//! - `SqliteHintPersistence`: rusqlite, one row per pattern, upsert inside an
//!   IMMEDIATE transaction so concurrent writers serialize per database
//! - `MemoryHintPersistence`: process-local map, used when no database path is set
//!
//! `LearnedHintStore` fails soft: persistence errors are logged and reported as a
//! missing hint, never returned to the caller.

use crate::config::EngineConfig;
use crate::error::{NlSqlError, Result};
use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

lazy_static! {
    static ref STRING_LITERAL_RE: Regex = Regex::new(r"(?:\bN)?'(?:[^']|'')*'").unwrap();
    static ref NUMBER_LITERAL_RE: Regex = Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap();
    static ref TABLE_OBJECT_RE: Regex = Regex::new(
        r#"(?i)\b(FROM|JOIN)\s+((?:\[[^\]]+\]|"[^"]+"|[\w#@]+)(?:\s*\.\s*(?:\[[^\]]+\]|"[^"]+"|[\w#@]+))*)"#
    )
    .unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();

    static ref CTE_START_RE: Regex = Regex::new(r"^WITH\s+[\w\[]").unwrap();
    static ref CTE_DEFINITION_RE: Regex = Regex::new(
        r"(?:^WITH\s+|,\s*)(?:\[[^\]]+\]|\w+)(?:\s*\([^)]*\))?\s+AS\s*\("
    )
    .unwrap();
    static ref WINDOW_RE: Regex = Regex::new(r"\bOVER\s*\(").unwrap();
    static ref JOIN_RE: Regex = Regex::new(r"\bJOIN\b").unwrap();
    static ref GROUP_BY_RE: Regex = Regex::new(r"\bGROUP\s+BY\b").unwrap();
    static ref HAVING_RE: Regex = Regex::new(r"\bHAVING\b").unwrap();
    static ref AGGREGATE_RE: Regex = Regex::new(r"\b(?:COUNT|SUM|AVG|MIN|MAX)\s*\(").unwrap();
    static ref DATE_FUNCTION_RE: Regex = Regex::new(
        r"\b(?:GETDATE|GETUTCDATE|SYSDATETIME|DATEADD|DATEDIFF|DATEPART|DATENAME|EOMONTH|YEAR|MONTH|DAY|CURRENT_TIMESTAMP)\b"
    )
    .unwrap();
    static ref PIVOT_RE: Regex = Regex::new(r"\b(?:UN)?PIVOT\b").unwrap();
    static ref MERGE_RE: Regex = Regex::new(r"^MERGE\b").unwrap();
    static ref UNION_RE: Regex = Regex::new(r"\bUNION\b").unwrap();
    static ref CASE_RE: Regex = Regex::new(r"\bCASE\b").unwrap();
    static ref SUBQUERY_RE: Regex = Regex::new(r"\(\s*SELECT\b").unwrap();
    static ref WHERE_RE: Regex = Regex::new(r"\bWHERE\b").unwrap();
    static ref DML_RE: Regex = Regex::new(r"^(?:INSERT|UPDATE|DELETE)\b").unwrap();
}

/// Normalize SQL to its shape: literals and FROM/JOIN objects replaced by
/// placeholders, upper-cased, whitespace collapsed.
pub fn normalize_sql(sql: &str) -> String {
    let sql = STRING_LITERAL_RE.replace_all(sql, "?");
    let sql = NUMBER_LITERAL_RE.replace_all(&sql, "?");
    let sql = sql.to_uppercase();
    let sql = TABLE_OBJECT_RE.replace_all(&sql, "$1 TABLE");
    WHITESPACE_RE.replace_all(sql.trim(), " ").into_owned()
}

/// Objects named after FROM/JOIN, as written (`[dbo].[Students]`), in order of appearance.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let literals_removed = STRING_LITERAL_RE.replace_all(sql, "?");
    let mut tables: Vec<String> = Vec::new();
    for caps in TABLE_OBJECT_RE.captures_iter(&literals_removed) {
        let object = WHITESPACE_RE.replace_all(&caps[2], "").into_owned();
        if !tables.iter().any(|t| t.eq_ignore_ascii_case(&object)) {
            tables.push(object);
        }
    }
    tables
}

/// Fixed-length key for a normalized pattern (hex SHA-256).
pub fn pattern_hash(normalized_pattern: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_pattern.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lowercase, whitespace collapsed, trailing punctuation dropped.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| c == '?' || c == '.' || c == '!')
        .trim_end()
        .to_lowercase()
}

fn prompt_key(data_source_id: &str, normalized_prompt: &str) -> String {
    pattern_hash(&format!("{}\u{1f}{}", data_source_id, normalized_prompt))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintCategory {
    Cte,
    Window,
    Join,
    Aggregation,
    DateFunction,
    PivotMerge,
    FilteredSelect,
    BasicSelect,
    Dml,
    Other,
}

impl HintCategory {
    /// Classify a normalized pattern. First matching rule wins.
    pub fn classify(normalized: &str) -> Self {
        if CTE_START_RE.is_match(normalized) {
            HintCategory::Cte
        } else if WINDOW_RE.is_match(normalized) {
            HintCategory::Window
        } else if JOIN_RE.is_match(normalized) {
            HintCategory::Join
        } else if AGGREGATE_RE.is_match(normalized) || GROUP_BY_RE.is_match(normalized) {
            HintCategory::Aggregation
        } else if DATE_FUNCTION_RE.is_match(normalized) {
            HintCategory::DateFunction
        } else if PIVOT_RE.is_match(normalized) || MERGE_RE.is_match(normalized) {
            HintCategory::PivotMerge
        } else if normalized.starts_with("SELECT") && WHERE_RE.is_match(normalized) {
            HintCategory::FilteredSelect
        } else if normalized.starts_with("SELECT") {
            HintCategory::BasicSelect
        } else if DML_RE.is_match(normalized) {
            HintCategory::Dml
        } else {
            HintCategory::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HintCategory::Cte => "cte",
            HintCategory::Window => "window",
            HintCategory::Join => "join",
            HintCategory::Aggregation => "aggregation",
            HintCategory::DateFunction => "date_function",
            HintCategory::PivotMerge => "pivot_merge",
            HintCategory::FilteredSelect => "filtered_select",
            HintCategory::BasicSelect => "basic_select",
            HintCategory::Dml => "dml",
            HintCategory::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "cte" => HintCategory::Cte,
            "window" => HintCategory::Window,
            "join" => HintCategory::Join,
            "aggregation" => HintCategory::Aggregation,
            "date_function" => HintCategory::DateFunction,
            "pivot_merge" => HintCategory::PivotMerge,
            "filtered_select" => HintCategory::FilteredSelect,
            "basic_select" => HintCategory::BasicSelect,
            "dml" => HintCategory::Dml,
            _ => HintCategory::Other,
        }
    }
}

/// Structural complexity of a normalized pattern, from 1.0 up to `cap`.
pub fn complexity_score(normalized: &str, cap: f64) -> f64 {
    let count = |re: &Regex| re.find_iter(normalized).count() as f64;
    let ctes = if CTE_START_RE.is_match(normalized) {
        count(&CTE_DEFINITION_RE)
    } else {
        0.0
    };
    let score = 1.0
        + 0.5 * count(&JOIN_RE)
        + 0.3 * count(&GROUP_BY_RE)
        + 0.3 * count(&HAVING_RE)
        + 0.5 * ctes
        + 0.6 * count(&WINDOW_RE)
        + 0.7 * count(&PIVOT_RE)
        + 0.4 * count(&UNION_RE)
        + 0.2 * count(&CASE_RE)
        + 0.4 * count(&SUBQUERY_RE);
    score.min(cap)
}

/// Bounds applied when a hint is created or updated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HintLimits {
    pub example_prompt_limit: usize,
    pub execution_time_window: usize,
    pub max_complexity: f64,
}

impl From<&EngineConfig> for HintLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            example_prompt_limit: config.example_prompt_limit,
            execution_time_window: config.execution_time_window,
            max_complexity: config.max_complexity,
        }
    }
}

impl Default for HintLimits {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// One successful execution reported by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessObservation {
    pub prompt: String,
    pub sql: String,
    pub data_source_id: String,
    pub execution_time_ms: f64,
    pub result_row_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedHint {
    pub pattern_hash: String,
    pub normalized_pattern: String,
    /// Assigned when the hint is created, never changed afterwards
    pub category: HintCategory,
    /// SQL of the first successful observation
    pub sql_template: String,
    /// Data source of the first successful observation
    pub data_source_id: String,
    pub usage_count: u64,
    pub success_count: u64,
    /// 0-100
    pub success_rate: f64,
    /// Mean of `execution_times`
    pub avg_execution_ms: f64,
    /// Most recent execution times, oldest first
    pub execution_times: Vec<f64>,
    /// Distinct prompts, oldest first
    pub example_prompts: Vec<String>,
    pub complexity: f64,
    pub last_result_rows: u64,
    pub created_at: String,
    pub last_used_at: String,
}

impl LearnedHint {
    pub fn first_observation(observation: &SuccessObservation, limits: &HintLimits) -> Self {
        let normalized = normalize_sql(&observation.sql);
        let now = Utc::now().to_rfc3339();
        let mut hint = Self {
            pattern_hash: pattern_hash(&normalized),
            category: HintCategory::classify(&normalized),
            complexity: complexity_score(&normalized, limits.max_complexity),
            normalized_pattern: normalized,
            sql_template: observation.sql.clone(),
            data_source_id: observation.data_source_id.clone(),
            usage_count: 1,
            success_count: 1,
            success_rate: 100.0,
            avg_execution_ms: 0.0,
            execution_times: Vec::new(),
            example_prompts: Vec::new(),
            last_result_rows: observation.result_row_count,
            created_at: now.clone(),
            last_used_at: now,
        };
        hint.push_execution_time(observation.execution_time_ms, limits.execution_time_window);
        hint.push_prompt(&observation.prompt, limits.example_prompt_limit);
        hint
    }

    /// Fold a repeat success into the hint.
    pub fn apply_success(&mut self, observation: &SuccessObservation, limits: &HintLimits) {
        self.usage_count += 1;
        self.success_count += 1;
        self.refresh_success_rate();
        self.push_execution_time(observation.execution_time_ms, limits.execution_time_window);
        self.push_prompt(&observation.prompt, limits.example_prompt_limit);
        self.last_result_rows = observation.result_row_count;
        self.last_used_at = Utc::now().to_rfc3339();
    }

    /// A failed execution counts as a use without a success.
    pub fn apply_failure(&mut self) {
        self.usage_count += 1;
        self.refresh_success_rate();
        self.last_used_at = Utc::now().to_rfc3339();
    }

    fn refresh_success_rate(&mut self) {
        self.success_rate = if self.usage_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.usage_count as f64 * 100.0
        };
    }

    fn push_execution_time(&mut self, millis: f64, window: usize) {
        self.execution_times.push(millis);
        if self.execution_times.len() > window {
            let excess = self.execution_times.len() - window;
            self.execution_times.drain(..excess);
        }
        self.avg_execution_ms = if self.execution_times.is_empty() {
            0.0
        } else {
            self.execution_times.iter().sum::<f64>() / self.execution_times.len() as f64
        };
    }

    fn push_prompt(&mut self, prompt: &str, limit: usize) {
        let prompt = prompt.trim();
        if prompt.is_empty() || self.example_prompts.iter().any(|p| p == prompt) {
            return;
        }
        self.example_prompts.push(prompt.to_string());
        if self.example_prompts.len() > limit {
            let excess = self.example_prompts.len() - limit;
            self.example_prompts.drain(..excess);
        }
    }
}

/// SQL remembered for an exact (data source, prompt) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMatch {
    pub sql: String,
    pub hint: LearnedHint,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HintStats {
    pub total_hints: u64,
    pub total_usage: u64,
    pub total_successes: u64,
    /// Successes over uses across all hints, 0-100
    pub success_rate: f64,
    pub avg_complexity: f64,
    pub by_category: BTreeMap<String, u64>,
}

impl HintStats {
    fn from_hints<'a>(hints: impl Iterator<Item = &'a LearnedHint>) -> Self {
        let mut stats = HintStats::default();
        let mut complexity_sum = 0.0;
        for hint in hints {
            stats.total_hints += 1;
            stats.total_usage += hint.usage_count;
            stats.total_successes += hint.success_count;
            complexity_sum += hint.complexity;
            *stats
                .by_category
                .entry(hint.category.as_str().to_string())
                .or_default() += 1;
        }
        stats.finish(complexity_sum);
        stats
    }

    fn finish(&mut self, complexity_sum: f64) {
        if self.total_usage > 0 {
            self.success_rate = self.total_successes as f64 / self.total_usage as f64 * 100.0;
        }
        if self.total_hints > 0 {
            self.avg_complexity = complexity_sum / self.total_hints as f64;
        }
    }
}

/// Storage behind the hint store. Upserts must be atomic per pattern hash.
#[async_trait]
pub trait HintPersistence: Send + Sync {
    async fn upsert_success(&self, observation: SuccessObservation, limits: HintLimits) -> Result<LearnedHint>;

    /// `None` when the pattern has never succeeded.
    async fn record_failure(&self, pattern_hash: &str) -> Result<Option<LearnedHint>>;

    async fn find(&self, pattern_hash: &str) -> Result<Option<LearnedHint>>;

    async fn find_by_prompt(&self, data_source_id: &str, normalized_prompt: &str) -> Result<Option<PromptMatch>>;

    /// Most used first, then highest success rate.
    async fn top_hints(&self, limit: usize) -> Result<Vec<LearnedHint>>;

    async fn stats(&self) -> Result<HintStats>;
}

/// SQLite-backed persistence
pub struct SqliteHintPersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHintPersistence {
    /// Open or create the database file, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| NlSqlError::Database(format!("Failed to open hint database {}: {}", path.display(), e)))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NlSqlError::Database(format!("Failed to open in-memory database: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        info!("Learned hint store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| NlSqlError::PersistenceUnavailable("Hint database lock poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| NlSqlError::PersistenceUnavailable(format!("Hint store task failed: {}", e)))?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS learned_hints (
            pattern_hash TEXT PRIMARY KEY,
            normalized_pattern TEXT NOT NULL,
            category TEXT NOT NULL,
            sql_template TEXT NOT NULL,
            data_source_id TEXT NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 1,
            success_count INTEGER NOT NULL DEFAULT 1,
            success_rate REAL NOT NULL DEFAULT 100,
            avg_execution_ms REAL NOT NULL DEFAULT 0,
            execution_times TEXT NOT NULL DEFAULT '[]',
            example_prompts TEXT NOT NULL DEFAULT '[]',
            complexity REAL NOT NULL DEFAULT 1,
            last_result_rows INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            last_used_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_hints_usage ON learned_hints(usage_count DESC, success_rate DESC);
        CREATE INDEX IF NOT EXISTS idx_hints_category ON learned_hints(category);

        CREATE TABLE IF NOT EXISTS prompt_index (
            prompt_key TEXT PRIMARY KEY,
            data_source_id TEXT NOT NULL,
            normalized_prompt TEXT NOT NULL,
            pattern_hash TEXT NOT NULL,
            sql TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .map_err(|e| NlSqlError::Database(format!("Failed to create hint tables: {}", e)))
}

const HINT_COLUMNS: &str = "pattern_hash, normalized_pattern, category, sql_template, data_source_id, \
     usage_count, success_count, success_rate, avg_execution_ms, execution_times, example_prompts, \
     complexity, last_result_rows, created_at, last_used_at";

fn row_to_hint(row: &Row<'_>) -> rusqlite::Result<LearnedHint> {
    let category: String = row.get(2)?;
    let execution_times: String = row.get(9)?;
    let example_prompts: String = row.get(10)?;
    Ok(LearnedHint {
        pattern_hash: row.get(0)?,
        normalized_pattern: row.get(1)?,
        category: HintCategory::parse(&category),
        sql_template: row.get(3)?,
        data_source_id: row.get(4)?,
        usage_count: row.get::<_, i64>(5)?.max(0) as u64,
        success_count: row.get::<_, i64>(6)?.max(0) as u64,
        success_rate: row.get(7)?,
        avg_execution_ms: row.get(8)?,
        execution_times: parse_json_column(&execution_times, "execution_times"),
        example_prompts: parse_json_column(&example_prompts, "example_prompts"),
        complexity: row.get(11)?,
        last_result_rows: row.get::<_, i64>(12)?.max(0) as u64,
        created_at: row.get(13)?,
        last_used_at: row.get(14)?,
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned + Default>(value: &str, column: &str) -> T {
    serde_json::from_str(value).unwrap_or_else(|e| {
        warn!("Discarding unreadable {} column: {}", column, e);
        T::default()
    })
}

fn select_hint(conn: &Connection, hash: &str) -> Result<Option<LearnedHint>> {
    conn.query_row(
        &format!("SELECT {} FROM learned_hints WHERE pattern_hash = ?1", HINT_COLUMNS),
        params![hash],
        row_to_hint,
    )
    .optional()
    .map_err(|e| NlSqlError::Database(format!("Failed to read hint {}: {}", hash, e)))
}

fn write_hint(conn: &Connection, hint: &LearnedHint) -> Result<()> {
    conn.execute(
        &format!(
            r#"
            INSERT INTO learned_hints ({})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(pattern_hash) DO UPDATE SET
                usage_count = excluded.usage_count,
                success_count = excluded.success_count,
                success_rate = excluded.success_rate,
                avg_execution_ms = excluded.avg_execution_ms,
                execution_times = excluded.execution_times,
                example_prompts = excluded.example_prompts,
                last_result_rows = excluded.last_result_rows,
                last_used_at = excluded.last_used_at
            "#,
            HINT_COLUMNS
        ),
        params![
            hint.pattern_hash,
            hint.normalized_pattern,
            hint.category.as_str(),
            hint.sql_template,
            hint.data_source_id,
            hint.usage_count as i64,
            hint.success_count as i64,
            hint.success_rate,
            hint.avg_execution_ms,
            serde_json::to_string(&hint.execution_times)?,
            serde_json::to_string(&hint.example_prompts)?,
            hint.complexity,
            hint.last_result_rows as i64,
            hint.created_at,
            hint.last_used_at,
        ],
    )
    .map_err(|e| NlSqlError::Database(format!("Failed to upsert hint {}: {}", hint.pattern_hash, e)))?;
    Ok(())
}

#[async_trait]
impl HintPersistence for SqliteHintPersistence {
    async fn upsert_success(&self, observation: SuccessObservation, limits: HintLimits) -> Result<LearnedHint> {
        self.run(move |conn| {
            let normalized = normalize_sql(&observation.sql);
            let hash = pattern_hash(&normalized);
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| NlSqlError::Database(format!("Failed to start transaction: {}", e)))?;

            let hint = match select_hint(&tx, &hash)? {
                Some(mut hint) => {
                    hint.apply_success(&observation, &limits);
                    hint
                }
                None => LearnedHint::first_observation(&observation, &limits),
            };
            write_hint(&tx, &hint)?;

            let normalized_prompt = normalize_prompt(&observation.prompt);
            if !normalized_prompt.is_empty() {
                tx.execute(
                    r#"
                    INSERT INTO prompt_index (prompt_key, data_source_id, normalized_prompt, pattern_hash, sql, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(prompt_key) DO UPDATE SET
                        pattern_hash = excluded.pattern_hash,
                        sql = excluded.sql,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        prompt_key(&observation.data_source_id, &normalized_prompt),
                        observation.data_source_id,
                        normalized_prompt,
                        hint.pattern_hash,
                        observation.sql,
                        hint.last_used_at,
                    ],
                )
                .map_err(|e| NlSqlError::Database(format!("Failed to index prompt: {}", e)))?;
            }

            tx.commit()
                .map_err(|e| NlSqlError::Database(format!("Failed to commit hint: {}", e)))?;
            Ok(hint)
        })
        .await
    }

    async fn record_failure(&self, pattern_hash: &str) -> Result<Option<LearnedHint>> {
        let hash = pattern_hash.to_string();
        self.run(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| NlSqlError::Database(format!("Failed to start transaction: {}", e)))?;
            let Some(mut hint) = select_hint(&tx, &hash)? else {
                return Ok(None);
            };
            hint.apply_failure();
            write_hint(&tx, &hint)?;
            tx.commit()
                .map_err(|e| NlSqlError::Database(format!("Failed to commit hint: {}", e)))?;
            Ok(Some(hint))
        })
        .await
    }

    async fn find(&self, pattern_hash: &str) -> Result<Option<LearnedHint>> {
        let hash = pattern_hash.to_string();
        self.run(move |conn| select_hint(conn, &hash)).await
    }

    async fn find_by_prompt(&self, data_source_id: &str, normalized_prompt: &str) -> Result<Option<PromptMatch>> {
        let key = prompt_key(data_source_id, normalized_prompt);
        self.run(move |conn| {
            let indexed: Option<(String, String)> = conn
                .query_row(
                    "SELECT pattern_hash, sql FROM prompt_index WHERE prompt_key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| NlSqlError::Database(format!("Failed to read prompt index: {}", e)))?;
            let Some((hash, sql)) = indexed else {
                return Ok(None);
            };
            Ok(select_hint(conn, &hash)?.map(|hint| PromptMatch { sql, hint }))
        })
        .await
    }

    async fn top_hints(&self, limit: usize) -> Result<Vec<LearnedHint>> {
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM learned_hints ORDER BY usage_count DESC, success_rate DESC, pattern_hash LIMIT ?1",
                    HINT_COLUMNS
                ))
                .map_err(|e| NlSqlError::Database(format!("Failed to prepare query: {}", e)))?;
            let hints = stmt
                .query_map(params![limit as i64], row_to_hint)
                .map_err(|e| NlSqlError::Database(format!("Failed to query hints: {}", e)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hints)
        })
        .await
    }

    async fn stats(&self) -> Result<HintStats> {
        self.run(|conn| {
            let (total_hints, total_usage, total_successes, complexity_sum): (i64, i64, i64, f64) = conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(usage_count), 0), COALESCE(SUM(success_count), 0), \
                     COALESCE(SUM(complexity), 0.0) FROM learned_hints",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .map_err(|e| NlSqlError::Database(format!("Failed to read hint totals: {}", e)))?;

            let mut stmt = conn
                .prepare("SELECT category, COUNT(*) FROM learned_hints GROUP BY category")
                .map_err(|e| NlSqlError::Database(format!("Failed to prepare query: {}", e)))?;
            let by_category = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))
                .map_err(|e| NlSqlError::Database(format!("Failed to query categories: {}", e)))?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

            let mut stats = HintStats {
                total_hints: total_hints as u64,
                total_usage: total_usage as u64,
                total_successes: total_successes as u64,
                by_category,
                ..HintStats::default()
            };
            stats.finish(complexity_sum);
            Ok(stats)
        })
        .await
    }
}

/// Process-local persistence
#[derive(Default)]
pub struct MemoryHintPersistence {
    hints: Mutex<HashMap<String, LearnedHint>>,
    /// prompt key -> (pattern hash, sql)
    prompts: Mutex<HashMap<String, (String, String)>>,
}

impl MemoryHintPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> NlSqlError {
    NlSqlError::PersistenceUnavailable("Hint map lock poisoned".to_string())
}

#[async_trait]
impl HintPersistence for MemoryHintPersistence {
    async fn upsert_success(&self, observation: SuccessObservation, limits: HintLimits) -> Result<LearnedHint> {
        let hash = pattern_hash(&normalize_sql(&observation.sql));
        let hint = {
            let mut hints = self.hints.lock().map_err(poisoned)?;
            let hint = hints
                .entry(hash.clone())
                .and_modify(|hint| hint.apply_success(&observation, &limits))
                .or_insert_with(|| LearnedHint::first_observation(&observation, &limits));
            hint.clone()
        };
        let normalized_prompt = normalize_prompt(&observation.prompt);
        if !normalized_prompt.is_empty() {
            self.prompts.lock().map_err(poisoned)?.insert(
                prompt_key(&observation.data_source_id, &normalized_prompt),
                (hash, observation.sql),
            );
        }
        Ok(hint)
    }

    async fn record_failure(&self, pattern_hash: &str) -> Result<Option<LearnedHint>> {
        let mut hints = self.hints.lock().map_err(poisoned)?;
        Ok(hints.get_mut(pattern_hash).map(|hint| {
            hint.apply_failure();
            hint.clone()
        }))
    }

    async fn find(&self, pattern_hash: &str) -> Result<Option<LearnedHint>> {
        Ok(self.hints.lock().map_err(poisoned)?.get(pattern_hash).cloned())
    }

    async fn find_by_prompt(&self, data_source_id: &str, normalized_prompt: &str) -> Result<Option<PromptMatch>> {
        let indexed = self
            .prompts
            .lock()
            .map_err(poisoned)?
            .get(&prompt_key(data_source_id, normalized_prompt))
            .cloned();
        let Some((hash, sql)) = indexed else {
            return Ok(None);
        };
        Ok(self.find(&hash).await?.map(|hint| PromptMatch { sql, hint }))
    }

    async fn top_hints(&self, limit: usize) -> Result<Vec<LearnedHint>> {
        let hints = self.hints.lock().map_err(poisoned)?;
        let mut sorted: Vec<LearnedHint> = hints.values().cloned().collect();
        sorted.sort_by(|a, b| {
            b.usage_count
                .cmp(&a.usage_count)
                .then_with(|| {
                    b.success_rate
                        .partial_cmp(&a.success_rate)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.pattern_hash.cmp(&b.pattern_hash))
        });
        sorted.truncate(limit);
        Ok(sorted)
    }

    async fn stats(&self) -> Result<HintStats> {
        let hints = self.hints.lock().map_err(poisoned)?;
        Ok(HintStats::from_hints(hints.values()))
    }
}

/// Fail-soft front end over a `HintPersistence` backend
pub struct LearnedHintStore {
    backend: Arc<dyn HintPersistence>,
    limits: HintLimits,
}

impl LearnedHintStore {
    pub fn new(backend: Arc<dyn HintPersistence>, config: &EngineConfig) -> Self {
        Self {
            backend,
            limits: HintLimits::from(config),
        }
    }

    pub fn in_memory(config: &EngineConfig) -> Self {
        Self::new(Arc::new(MemoryHintPersistence::new()), config)
    }

    pub fn open_sqlite(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteHintPersistence::open(path)?), config))
    }

    /// SQLite at `hint_db_path` when configured and openable, otherwise in memory.
    pub fn from_config(config: &EngineConfig) -> Self {
        match &config.hint_db_path {
            Some(path) => match Self::open_sqlite(path, config) {
                Ok(store) => store,
                Err(e) => {
                    warn!("Hint database unavailable ({}), keeping hints in memory", e);
                    Self::in_memory(config)
                }
            },
            None => Self::in_memory(config),
        }
    }

    /// Record a successful execution. Returns the updated hint, or `None` when the
    /// backend is unavailable.
    pub async fn record_success(
        &self,
        prompt: &str,
        sql: &str,
        data_source_id: &str,
        execution_time_ms: f64,
        result_row_count: u64,
    ) -> Option<LearnedHint> {
        let observation = SuccessObservation {
            prompt: prompt.to_string(),
            sql: sql.to_string(),
            data_source_id: data_source_id.to_string(),
            execution_time_ms,
            result_row_count,
        };
        match self.backend.upsert_success(observation, self.limits).await {
            Ok(hint) => {
                if hint.usage_count == 1 {
                    info!(
                        "Learned new {} hint {} from '{}'",
                        hint.category.as_str(),
                        &hint.pattern_hash[..12],
                        prompt
                    );
                } else {
                    debug!(
                        "Updated hint {} (used {} times, {:.0}% success)",
                        &hint.pattern_hash[..12],
                        hint.usage_count,
                        hint.success_rate
                    );
                }
                Some(hint)
            }
            Err(e) => {
                warn!("Failed to record hint: {}", e);
                None
            }
        }
    }

    /// Record a failed execution of previously learned SQL.
    pub async fn record_failure(&self, sql: &str) -> Option<LearnedHint> {
        let hash = pattern_hash(&normalize_sql(sql));
        match self.backend.record_failure(&hash).await {
            Ok(hint) => hint,
            Err(e) => {
                warn!("Failed to record hint failure: {}", e);
                None
            }
        }
    }

    /// Exact lookup by normalized pattern (see `normalize_sql`).
    pub async fn lookup(&self, normalized_pattern: &str) -> Option<LearnedHint> {
        self.find_hash(&pattern_hash(normalized_pattern)).await
    }

    /// Lookup by raw SQL, normalizing first.
    pub async fn lookup_sql(&self, sql: &str) -> Option<LearnedHint> {
        self.lookup(&normalize_sql(sql)).await
    }

    async fn find_hash(&self, hash: &str) -> Option<LearnedHint> {
        match self.backend.find(hash).await {
            Ok(hint) => hint,
            Err(e) => {
                warn!("Hint lookup failed: {}", e);
                None
            }
        }
    }

    /// SQL previously recorded for this exact prompt on this data source.
    pub async fn lookup_prompt(&self, data_source_id: &str, prompt: &str) -> Option<PromptMatch> {
        let normalized = normalize_prompt(prompt);
        if normalized.is_empty() {
            return None;
        }
        match self.backend.find_by_prompt(data_source_id, &normalized).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Prompt lookup failed: {}", e);
                None
            }
        }
    }

    pub async fn top_hints(&self, limit: usize) -> Vec<LearnedHint> {
        self.backend.top_hints(limit).await.unwrap_or_else(|e| {
            warn!("Failed to list hints: {}", e);
            Vec::new()
        })
    }

    pub async fn stats(&self) -> HintStats {
        self.backend.stats().await.unwrap_or_else(|e| {
            warn!("Failed to read hint stats: {}", e);
            HintStats::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_sql() {
        let normalized = normalize_sql(
            "select  TOP (5) * from [dbo].[Students] s\n join Applications a on a.StudentId = s.Id where a.Status = 'rejected'",
        );
        assert_eq!(
            normalized,
            "SELECT TOP (?) * FROM TABLE S JOIN TABLE A ON A.STUDENTID = S.ID WHERE A.STATUS = ?"
        );
    }

    #[test]
    fn test_referenced_tables() {
        let tables = referenced_tables(
            "SELECT COUNT(*) FROM [dbo].[Students] WITH (NOLOCK) INNER JOIN Applications a \
             ON a.StudentId = [Students].[Id] WHERE a.Note = 'from nowhere'",
        );
        assert_eq!(tables, vec!["[dbo].[Students]", "Applications"]);
    }

    #[test]
    fn test_literals_and_tables_share_hash() {
        let a = normalize_sql("SELECT * FROM Students WHERE Id = 5 AND Name = N'Ana'");
        let b = normalize_sql("SELECT * FROM Teachers WHERE Id = 42 AND Name = 'O''Neil'");
        assert_eq!(pattern_hash(&a), pattern_hash(&b));
        assert_eq!(pattern_hash(&a).len(), 64);

        let c = normalize_sql("SELECT * FROM Teachers WHERE Age = 42");
        assert_ne!(pattern_hash(&a), pattern_hash(&c));
    }

    #[test]
    fn test_category_precedence() {
        let classify = |sql: &str| HintCategory::classify(&normalize_sql(sql));
        assert_eq!(
            classify("WITH recent AS (SELECT * FROM Orders) SELECT COUNT(*) FROM recent"),
            HintCategory::Cte
        );
        assert_eq!(
            classify("SELECT ROW_NUMBER() OVER (ORDER BY Id) FROM Orders o JOIN Items i ON i.OrderId = o.Id"),
            HintCategory::Window
        );
        assert_eq!(
            classify("SELECT COUNT(*) FROM Orders o JOIN Items i ON i.OrderId = o.Id"),
            HintCategory::Join
        );
        assert_eq!(classify("SELECT Region, SUM(Total) FROM Orders GROUP BY Region"), HintCategory::Aggregation);
        assert_eq!(classify("SELECT * FROM Orders WHERE YEAR(CreatedAt) = 2024"), HintCategory::DateFunction);
        assert_eq!(classify("SELECT * FROM Orders WITH (NOLOCK) WHERE Id = 1"), HintCategory::FilteredSelect);
        assert_eq!(classify("SELECT * FROM Orders"), HintCategory::BasicSelect);
        assert_eq!(classify("UPDATE Orders SET Total = 0"), HintCategory::Dml);
    }

    #[test]
    fn test_complexity_score() {
        let normalized = normalize_sql(
            "SELECT a.Id, CASE WHEN b.X = 1 THEN 1 ELSE 0 END FROM A a JOIN B b ON b.AId = a.Id \
             JOIN C c ON c.BId = b.Id GROUP BY a.Id HAVING COUNT(*) > 1",
        );
        let score = complexity_score(&normalized, 10.0);
        assert!((score - (1.0 + 1.0 + 0.3 + 0.3 + 0.2)).abs() < 1e-9, "score {}", score);
        assert_eq!(complexity_score(&normalized, 2.0), 2.0);
        assert_eq!(complexity_score("SELECT * FROM TABLE", 10.0), 1.0);
    }

    #[test]
    fn test_ring_buffers_are_bounded() {
        let limits = HintLimits {
            example_prompt_limit: 3,
            execution_time_window: 2,
            max_complexity: 10.0,
        };
        let observation = |prompt: &str, ms: f64| SuccessObservation {
            prompt: prompt.to_string(),
            sql: "SELECT * FROM Students".to_string(),
            data_source_id: "sis".to_string(),
            execution_time_ms: ms,
            result_row_count: 1,
        };
        let mut hint = LearnedHint::first_observation(&observation("a", 10.0), &limits);
        for (prompt, ms) in [("b", 20.0), ("a", 30.0), ("c", 40.0), ("d", 50.0)] {
            hint.apply_success(&observation(prompt, ms), &limits);
        }
        assert_eq!(hint.usage_count, 5);
        assert_eq!(hint.execution_times, vec![40.0, 50.0]);
        assert_eq!(hint.avg_execution_ms, 45.0);
        assert_eq!(hint.example_prompts, vec!["b", "c", "d"]);

        hint.apply_failure();
        assert_eq!(hint.usage_count, 6);
        assert_eq!(hint.success_count, 5);
        assert!((hint.success_rate - 500.0 / 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sqlite_roundtrip_and_prompt_index() {
        let temp_dir = TempDir::new().unwrap();
        let store = LearnedHintStore::open_sqlite(temp_dir.path().join("hints.db"), &EngineConfig::default()).unwrap();

        let sql = "SELECT COUNT(*) AS [Count] FROM [Students] WITH (NOLOCK)";
        let first = store.record_success("How many students?", sql, "sis", 12.0, 1).await.unwrap();
        assert_eq!(first.usage_count, 1);
        assert_eq!(first.category, HintCategory::Aggregation);

        let found = store.lookup(&normalize_sql(sql)).await.unwrap();
        assert_eq!(found.pattern_hash, first.pattern_hash);

        let by_prompt = store.lookup_prompt("sis", "how many   students").await.unwrap();
        assert_eq!(by_prompt.sql, sql);
        assert!(store.lookup_prompt("other", "how many students").await.is_none());

        let after_failure = store.record_failure(sql).await.unwrap();
        assert_eq!(after_failure.usage_count, 2);
        assert_eq!(after_failure.success_rate, 50.0);
        assert!(store.record_failure("DELETE FROM Nothing").await.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("hints.db");
        let config = EngineConfig::default();
        {
            let store = LearnedHintStore::open_sqlite(&path, &config).unwrap();
            store.record_success("list students", "SELECT * FROM Students", "sis", 3.0, 10).await;
        }
        let reopened = LearnedHintStore::open_sqlite(&path, &config).unwrap();
        let stats = reopened.stats().await;
        assert_eq!(stats.total_hints, 1);
        assert_eq!(stats.by_category.get("basic_select"), Some(&1));
    }

    #[tokio::test]
    async fn test_memory_top_hints_order() {
        let store = LearnedHintStore::in_memory(&EngineConfig::default());
        store.record_success("p1", "SELECT * FROM A", "sis", 1.0, 1).await;
        store.record_success("p2", "SELECT * FROM A WHERE X = 1", "sis", 1.0, 1).await;
        store.record_success("p3", "SELECT * FROM B WHERE X = 2", "sis", 1.0, 1).await;

        let top = store.top_hints(5).await;
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].category, HintCategory::FilteredSelect);
        assert_eq!(top[0].usage_count, 2);

        let stats = store.stats().await;
        assert_eq!(stats.total_usage, 3);
        assert_eq!(stats.success_rate, 100.0);
    }
}
