//! nlsql - schema-aware natural-language to SQL resolution
//!
//! Translates short prompts ("students with rejected applications") into T-SQL using
//! only introspected schema metadata and a small domain vocabulary:
//!
//! - `schema_resolver`: noisy nouns to real table and column identifiers
//! - `enum_resolver`: status words to integer codes per data source
//! - `gazetteer`: place names compared under an accent-insensitive collation
//! - `synthesizer`: intent, joins, predicates and rendering
//! - `learning_store`: SQL shapes that worked, with a prompt fast path
//! - `engine`: the façade tying them together

pub mod config;
pub mod engine;
pub mod enum_resolver;
pub mod error;
pub mod fuzzy_matcher;
pub mod gazetteer;
pub mod inflection;
pub mod learning_store;
pub mod logging;
pub mod metadata;
pub mod schema_resolver;
pub mod synthesizer;
pub mod vocabulary;

pub use config::EngineConfig;
pub use engine::NlSqlEngine;
pub use enum_resolver::{EnumDefinition, EnumResolver, EnumValue};
pub use error::{NlSqlError, Result};
pub use gazetteer::{Gazetteer, Place, PlaceKind};
pub use learning_store::{HintCategory, HintStats, LearnedHint, LearnedHintStore};
pub use metadata::{ColumnInfo, ForeignKey, SchemaSnapshot, TableInfo};
pub use schema_resolver::{ReferenceKind, ResolvedReference, SchemaResolver};
pub use synthesizer::{GeneratedSql, PatternSynthesizer, Synthesis};
pub use vocabulary::VocabularyStore;
