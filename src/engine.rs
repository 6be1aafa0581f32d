//! NL-to-SQL engine
//!
//! Owns the long-lived pieces (vocabulary, enum maps, gazetteer, learned hints) and
//! runs a prompt through them:
//! - learned-hint fast path for a prompt already seen on this data source
//! - otherwise a fresh `PatternSynthesizer` pass over the current vocabulary
//!
//! Vocabulary and gazetteer reloads swap an `Arc` under a lock, so a pass in flight
//! keeps the values it started with.

use crate::config::EngineConfig;
use crate::enum_resolver::{EnumDefinition, EnumResolver};
use crate::error::Result;
use crate::gazetteer::Gazetteer;
use crate::learning_store::{referenced_tables, HintStats, LearnedHint, LearnedHintStore};
use crate::metadata::SchemaSnapshot;
use crate::schema_resolver::tokenize;
use crate::synthesizer::{intent, GeneratedSql, PatternSynthesizer, Synthesis};
use crate::vocabulary::VocabularyStore;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

pub struct NlSqlEngine {
    config: EngineConfig,
    vocabulary: RwLock<Arc<VocabularyStore>>,
    enums: Arc<EnumResolver>,
    gazetteer: RwLock<Arc<Gazetteer>>,
    hints: LearnedHintStore,
}

impl NlSqlEngine {
    /// Default vocabulary and gazetteer, no enum maps, hints per `config.hint_db_path`.
    pub fn new(config: EngineConfig) -> Self {
        let hints = LearnedHintStore::from_config(&config);
        Self::with_components(
            config,
            VocabularyStore::with_defaults(),
            Arc::new(EnumResolver::new()),
            Gazetteer::with_defaults(),
            hints,
        )
    }

    pub fn with_components(
        config: EngineConfig,
        vocabulary: VocabularyStore,
        enums: Arc<EnumResolver>,
        gazetteer: Gazetteer,
        hints: LearnedHintStore,
    ) -> Self {
        Self {
            config,
            vocabulary: RwLock::new(Arc::new(vocabulary)),
            enums,
            gazetteer: RwLock::new(Arc::new(gazetteer)),
            hints,
        }
    }

    /// Engine configured from `NLSQL_*` variables and `.env`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(EngineConfig::from_env()?))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> Arc<VocabularyStore> {
        let guard = self.vocabulary.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn gazetteer(&self) -> Arc<Gazetteer> {
        let guard = self.gazetteer.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn enums(&self) -> &Arc<EnumResolver> {
        &self.enums
    }

    pub fn hints(&self) -> &LearnedHintStore {
        &self.hints
    }

    pub fn reload_vocabulary(&self, vocabulary: VocabularyStore) {
        let mut guard = self.vocabulary.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(vocabulary);
        info!("Vocabulary reloaded");
    }

    pub fn reload_gazetteer(&self, gazetteer: Gazetteer) {
        let places = gazetteer.len();
        let mut guard = self.gazetteer.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(gazetteer);
        info!("Gazetteer reloaded with {} places", places);
    }

    /// Extend the current vocabulary with what `schema` implies and swap it in.
    /// Returns the number of rules learned.
    pub fn learn_schema(&self, schema: &SchemaSnapshot) -> usize {
        let mut guard = self.vocabulary.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut vocabulary = VocabularyStore::clone(&guard);
        let learned = vocabulary.learn_from_schema(schema);
        *guard = Arc::new(vocabulary);
        info!("Learned {} vocabulary rules from {} tables", learned, schema.len());
        learned
    }

    /// Replace the enum map of one data source.
    pub fn load_enums(&self, data_source_id: &str, definition: &EnumDefinition) -> Result<()> {
        self.enums.load(definition, data_source_id)
    }

    /// Resolve `prompt` against `schema`. Never fails; an unresolvable prompt is
    /// `Synthesis::NotFound` for the caller's fallback.
    pub async fn synthesize(&self, prompt: &str, schema: &SchemaSnapshot, data_source_id: &str) -> Synthesis {
        if let Some(generated) = self.learned_fast_path(prompt, schema, data_source_id).await {
            return Synthesis::Generated(generated);
        }

        let synthesizer = PatternSynthesizer::new(
            self.vocabulary(),
            Arc::clone(&self.enums),
            self.gazetteer(),
            &self.config,
        );
        synthesizer.synthesize(prompt, schema, data_source_id)
    }

    async fn learned_fast_path(
        &self,
        prompt: &str,
        schema: &SchemaSnapshot,
        data_source_id: &str,
    ) -> Option<GeneratedSql> {
        let found = self.hints.lookup_prompt(data_source_id, prompt).await?;

        let mut tables: Vec<String> = Vec::new();
        for object in referenced_tables(&found.sql) {
            match schema.table(&object) {
                Some(table) => {
                    if !tables.contains(&table.name) {
                        tables.push(table.name.clone());
                    }
                }
                None => {
                    debug!(
                        "Ignoring learned SQL for '{}': table {} is not in the schema",
                        prompt, object
                    );
                    return None;
                }
            }
        }
        if tables.is_empty() {
            return None;
        }

        info!(
            "Using learned SQL for '{}' (used {} times)",
            prompt, found.hint.usage_count
        );
        Some(GeneratedSql {
            sql: self.enums.translate(data_source_id, &found.sql),
            tables,
            features: vec!["learned_hint".to_string()],
            intent: intent::classify(&tokenize(prompt)).intent,
            confidence: found.hint.success_rate,
        })
    }

    /// Report a successful execution of `sql` for `prompt`.
    pub async fn record_success(
        &self,
        prompt: &str,
        sql: &str,
        data_source_id: &str,
        execution_time_ms: f64,
        result_row_count: u64,
    ) -> Option<LearnedHint> {
        self.hints
            .record_success(prompt, sql, data_source_id, execution_time_ms, result_row_count)
            .await
    }

    pub async fn record_failure(&self, sql: &str) -> Option<LearnedHint> {
        self.hints.record_failure(sql).await
    }

    pub async fn hint_stats(&self) -> HintStats {
        self.hints.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TableInfo;
    use crate::synthesizer::Intent;
    use std::collections::BTreeMap;

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![
            TableInfo::new("Students")
                .with_column("Id", "int")
                .with_column("Name", "nvarchar")
                .with_primary_key("Id")
                .with_row_count(40),
            TableInfo::new("Applications")
                .with_column("Id", "int")
                .with_column("StudentId", "int")
                .with_column("Status", "int")
                .with_primary_key("Id")
                .with_foreign_key("StudentId", "Students", "Id")
                .with_row_count(90),
        ])
        .unwrap()
    }

    fn engine() -> NlSqlEngine {
        NlSqlEngine::new(EngineConfig::default())
    }

    #[tokio::test]
    async fn test_synthesizes_without_hints() {
        let engine = engine();
        let result = engine.synthesize("how many students", &schema(), "sis").await;
        match result {
            Synthesis::Generated(generated) => {
                assert_eq!(generated.intent, Intent::Count);
                assert!(!generated.features.contains(&"learned_hint".to_string()));
                assert!(generated.sql.starts_with("SELECT COUNT(*) AS [Count] FROM [Students]"));
            }
            Synthesis::NotFound { .. } => panic!("expected SQL"),
        }
    }

    #[tokio::test]
    async fn test_fast_path_reuses_recorded_sql() {
        let engine = engine();
        let recorded = "SELECT TOP (10) [Name] FROM [Students] ORDER BY [Name]";
        engine.record_success("Ten student names", recorded, "sis", 4.0, 10).await;

        let result = engine.synthesize("ten student names", &schema(), "sis").await;
        let Synthesis::Generated(generated) = result else {
            panic!("expected SQL");
        };
        assert_eq!(generated.sql, recorded);
        assert_eq!(generated.features, vec!["learned_hint"]);
        assert_eq!(generated.tables, vec!["Students"]);

        let other_source = engine.synthesize("ten student names", &schema(), "crm").await;
        assert_ne!(other_source.sql(), Some(recorded));
    }

    #[tokio::test]
    async fn test_fast_path_skips_stale_tables() {
        let engine = engine();
        engine
            .record_success("list zebras", "SELECT * FROM [Zebras]", "sis", 2.0, 3)
            .await;
        let result = engine.synthesize("list zebras", &schema(), "sis").await;
        assert!(!result.is_found());
    }

    #[tokio::test]
    async fn test_fast_path_translates_enum_text() {
        let engine = engine();
        let mut definition = BTreeMap::new();
        definition.insert(
            "Status".to_string(),
            vec![crate::enum_resolver::EnumValue {
                text: "rejected".to_string(),
                code: 5,
            }],
        );
        engine.load_enums("sis", &definition).unwrap();
        engine
            .record_success(
                "rejected applications",
                "SELECT * FROM [Applications] WHERE [Status] = 'rejected'",
                "sis",
                3.0,
                2,
            )
            .await;

        let result = engine.synthesize("rejected applications", &schema(), "sis").await;
        assert_eq!(result.sql(), Some("SELECT * FROM [Applications] WHERE [Status] = 5"));
    }

    #[test]
    fn test_reload_keeps_old_snapshot_alive() {
        let engine = engine();
        let before = engine.vocabulary();
        engine.reload_vocabulary(VocabularyStore::new());
        let after = engine.vocabulary();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(before.is_status_word("rejected"));
        assert!(!after.is_status_word("rejected"));
    }
}
