//! Pattern Synthesizer
//!
//! Turns a short prompt into T-SQL using only schema metadata, the vocabulary, the
//! enum maps and the gazetteer. The pass is deterministic and greedy:
//!
//! 1. Intent and modifiers from keywords (`intent`)
//! 2. Value words tagged as enum text or places (`values`)
//! 3. Candidate nouns resolved to tables; the most confident is the primary table
//! 4. Other tables joined over the shortest foreign-key path (`join_path`), or dropped
//! 5. Columns resolved inside the selected tables, phrase match before fuzzy match
//! 6. Enum predicates (`=`, `IN`, `<>`), location predicates (collated), NULL checks
//! 7. Plan rendered (`render`)
//!
//! The learned-hint fast path sits in front of this pass in `engine`.

pub mod intent;
pub mod join_path;
pub mod plan;
pub mod render;
pub mod values;

pub use intent::{AggregateFn, Intent, IntentAnalysis};
pub use plan::{ColumnRef, JoinKind, JoinStep, Predicate, QueryPlanFragment, Verb};
pub use render::SqlRenderer;
pub use values::ValueReference;

use crate::config::EngineConfig;
use crate::enum_resolver::EnumResolver;
use crate::error::NlSqlError;
use crate::gazetteer::Gazetteer;
use crate::inflection::{singular_key, split_identifier};
use crate::metadata::{SchemaSnapshot, TableInfo};
use crate::schema_resolver::{
    is_stop_word, tokenize, MatchKind, ReferenceKind, ResolvedReference, SchemaResolver,
};
use crate::vocabulary::VocabularyStore;
use intent::Ordinal;
use join_path::JoinGraph;
use plan::{OrderBy, OrderTarget};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest token window tried when matching column phrases
const MAX_PHRASE_WORDS: usize = 4;

/// SQL produced for a prompt, with what went into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    /// Tables referenced by the SQL, primary first
    pub tables: Vec<String>,
    /// Features used, e.g. `join`, `enum_filter`, `default_limit`
    pub features: Vec<String>,
    pub intent: Intent,
    /// Confidence of the primary table match (0-100)
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Synthesis {
    Generated(GeneratedSql),
    /// No table could be resolved; the caller routes the prompt to its fallback.
    NotFound { candidate_terms: Vec<String> },
}

impl Synthesis {
    pub fn sql(&self) -> Option<&str> {
        match self {
            Synthesis::Generated(generated) => Some(&generated.sql),
            Synthesis::NotFound { .. } => None,
        }
    }

    pub fn tables(&self) -> &[String] {
        match self {
            Synthesis::Generated(generated) => &generated.tables,
            Synthesis::NotFound { .. } => &[],
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Synthesis::Generated(_))
    }
}

#[derive(Debug, Clone)]
struct TableMatch {
    term: String,
    position: Option<usize>,
    reference: ResolvedReference,
}

#[derive(Debug, Clone)]
struct ColumnMention {
    column: ColumnRef,
    position: usize,
}

pub struct PatternSynthesizer {
    resolver: SchemaResolver,
    enums: Arc<EnumResolver>,
    gazetteer: Arc<Gazetteer>,
    renderer: SqlRenderer,
    config: EngineConfig,
}

impl PatternSynthesizer {
    pub fn new(
        vocabulary: Arc<VocabularyStore>,
        enums: Arc<EnumResolver>,
        gazetteer: Arc<Gazetteer>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            resolver: SchemaResolver::new(vocabulary, config),
            enums,
            gazetteer,
            renderer: SqlRenderer::new(config),
            config: config.clone(),
        }
    }

    pub fn resolver(&self) -> &SchemaResolver {
        &self.resolver
    }

    /// Build SQL for `prompt`, or `NotFound` when no table can be resolved.
    pub fn synthesize(&self, prompt: &str, schema: &SchemaSnapshot, data_source_id: &str) -> Synthesis {
        let tokens = tokenize(prompt);
        let analysis = intent::classify(&tokens);
        let value_refs = values::classify_value_words(&tokens, &self.enums, &self.gazetteer, data_source_id);
        let candidate_terms = self.resolver.extract_candidate_terms(prompt);

        // Step 1: tables
        let mut excluded: HashSet<usize> = value_positions(&value_refs);
        excluded.extend(analysis.modifier_positions());
        let mut table_matches = self.resolve_tables(&tokens, &candidate_terms, &excluded, schema);
        if table_matches.is_empty() {
            log_omission(&NlSqlError::NoMatch(format!(
                "no table resolved for prompt '{}' (terms: {:?})",
                prompt, candidate_terms
            )));
            return Synthesis::NotFound { candidate_terms };
        }
        let primary = table_matches.remove(0);
        let Some(primary_table) = schema.table(&primary.reference.identifier) else {
            return Synthesis::NotFound { candidate_terms };
        };
        let column_terms = self.reclassify_column_terms(&mut table_matches, primary_table);

        let mut features: Vec<String> = vec![analysis.intent.name().to_string()];
        let mut plan = QueryPlanFragment::new(verb_for(analysis.intent), primary_table.name.clone());

        // Step 2: joins
        self.plan_joins(&mut plan, &table_matches, &analysis, schema, &mut features);

        // Step 3: columns
        let mut consumed = value_positions(&value_refs);
        consumed.extend(
            std::iter::once(&primary)
                .chain(table_matches.iter().filter(|m| !column_terms.contains(&m.term)))
                .filter_map(|m| m.position),
        );
        let mentions = self.resolve_columns(&tokens, &candidate_terms, &consumed, &plan, schema, &mut features);
        self.assign_column_roles(&mut plan, &mentions, &analysis, &mut features);

        // Step 4: value predicates
        self.add_enum_predicates(&mut plan, &value_refs, &tokens, &analysis, schema, &mut features);
        self.add_location_predicates(&mut plan, &value_refs, &analysis, schema, &mut features);

        // Step 5: verb details, ordering and limits
        self.finish_plan(&mut plan, primary_table, &analysis, &mut features);

        let sql = self.renderer.render(&plan);
        info!("Synthesized SQL for '{}': {}", prompt, sql);

        Synthesis::Generated(GeneratedSql {
            sql,
            tables: plan.tables(),
            features,
            intent: analysis.intent,
            confidence: primary.reference.confidence,
        })
    }

    /// Resolve candidate nouns to tables, most confident first, earlier prompt
    /// position breaking ties.
    fn resolve_tables(
        &self,
        tokens: &[String],
        terms: &[String],
        excluded: &HashSet<usize>,
        schema: &SchemaSnapshot,
    ) -> Vec<TableMatch> {
        let candidates = SchemaResolver::table_candidates(schema);
        let threshold = self.config.prompt_table_threshold;
        let mut matches: Vec<TableMatch> = Vec::new();

        for term in terms {
            let position = tokens.iter().position(|t| t == term);
            if position.is_some_and(|p| excluded.contains(&p)) {
                continue;
            }
            if self.resolver.vocabulary().is_status_word(term) {
                continue;
            }
            let Some(reference) = self.resolver.resolve(term, &candidates, ReferenceKind::Table, threshold) else {
                continue;
            };
            debug!(
                "Term '{}' -> table '{}' ({:.1}, {:?})",
                term, reference.identifier, reference.confidence, reference.match_kind
            );
            let table_match = TableMatch {
                term: term.clone(),
                position,
                reference,
            };
            match matches
                .iter_mut()
                .find(|m| m.reference.identifier == table_match.reference.identifier)
            {
                Some(existing) => {
                    if table_match.reference.confidence > existing.reference.confidence {
                        *existing = table_match;
                    }
                }
                None => matches.push(table_match),
            }
        }

        matches.sort_by(|a, b| {
            b.reference
                .confidence
                .partial_cmp(&a.reference.confidence)
                .unwrap_or(Ordering::Equal)
        });
        matches
    }

    /// Fuzzy table matches whose term exactly names a column of the primary table are
    /// column references after all. Returns their terms.
    fn reclassify_column_terms(&self, matches: &mut Vec<TableMatch>, primary: &TableInfo) -> HashSet<String> {
        let mut column_terms = HashSet::new();
        matches.retain(|m| {
            let is_column = m.reference.match_kind == MatchKind::Fuzzy
                && self
                    .resolver
                    .resolve_column(&m.term, primary, 100.0)
                    .is_some();
            if is_column {
                debug!("Term '{}' names a column of '{}', not a table", m.term, primary.name);
                column_terms.insert(m.term.clone());
            }
            !is_column
        });
        column_terms
    }

    fn plan_joins(
        &self,
        plan: &mut QueryPlanFragment,
        matches: &[TableMatch],
        analysis: &IntentAnalysis,
        schema: &SchemaSnapshot,
        features: &mut Vec<String>,
    ) {
        if matches.is_empty() {
            return;
        }
        let graph = JoinGraph::build(schema);
        let mut joined = vec![plan.target_table.clone()];

        for table_match in matches {
            let table = &table_match.reference.identifier;
            if plan.has_table(table) {
                continue;
            }
            let absent = table_match.position.is_some_and(|p| analysis.is_negated(p));
            let path = match graph.find_path_from_any(&joined, table, self.config.max_join_depth) {
                Ok(path) => path,
                Err(e) => {
                    log_omission(&e);
                    debug!("Dropping table '{}'", table);
                    continue;
                }
            };

            let kind = if absent { JoinKind::Left } else { JoinKind::Inner };
            for edge in &path {
                if plan.has_table(&edge.to_table) {
                    continue;
                }
                if graph.is_junction(&edge.to_table) {
                    push_feature(features, "junction_bridge");
                }
                plan.joins.push(JoinStep::new(
                    &edge.from_table,
                    &edge.from_column,
                    &edge.to_table,
                    &edge.to_column,
                    kind,
                ));
                joined.push(edge.to_table.clone());
            }
            push_feature(features, "join");

            if absent {
                if let Some(last) = path.last() {
                    plan.predicates
                        .push(Predicate::is_null(ColumnRef::new(&last.to_table, &last.to_column)));
                }
                push_feature(features, "left_join");
                push_feature(features, "absence");
            }
        }
    }

    /// Column mentions inside the selected tables: multi-word and aliased phrases
    /// first, then single nouns by fuzzy match.
    fn resolve_columns(
        &self,
        tokens: &[String],
        terms: &[String],
        consumed: &HashSet<usize>,
        plan: &QueryPlanFragment,
        schema: &SchemaSnapshot,
        features: &mut Vec<String>,
    ) -> Vec<ColumnMention> {
        let tables: Vec<&TableInfo> = plan.tables().iter().filter_map(|t| schema.table(t)).collect();
        let mut consumed = consumed.clone();
        let mut mentions = Vec::new();

        let mut start = 0;
        while start < tokens.len() {
            let longest = MAX_PHRASE_WORDS.min(tokens.len() - start);
            let found = (1..=longest).rev().find_map(|span| {
                let window = &tokens[start..start + span];
                if (start..start + span).any(|p| consumed.contains(&p))
                    || window.iter().all(|w| is_stop_word(w))
                {
                    return None;
                }
                let phrase = window.join(" ");
                tables.iter().find_map(|table| {
                    self.phrase_column(&phrase, span, table)
                        .map(|column| (ColumnRef::new(&table.name, column), span))
                })
            });
            match found {
                Some((column, span)) => {
                    debug!(
                        "Phrase '{}' -> column {}.{}",
                        tokens[start..start + span].join(" "),
                        column.table,
                        column.column
                    );
                    consumed.extend(start..start + span);
                    mentions.push(ColumnMention { column, position: start });
                    push_feature(features, "phrase_column");
                    start += span;
                }
                None => start += 1,
            }
        }

        for term in terms {
            let Some(position) = tokens.iter().position(|t| t == term) else {
                continue;
            };
            if consumed.contains(&position) || self.resolver.vocabulary().is_status_word(term) {
                continue;
            }
            let best = tables
                .iter()
                .filter_map(|table| {
                    self.resolver
                        .resolve_default(term, &SchemaResolver::column_candidates(table), ReferenceKind::Column)
                        .map(|reference| (table.name.clone(), reference))
                })
                .fold(None::<(String, ResolvedReference)>, |best, candidate| match best {
                    Some(current) if current.1.confidence >= candidate.1.confidence => Some(current),
                    _ => Some(candidate),
                });
            match best {
                Some((table, reference)) => {
                    debug!("Term '{}' -> column {}.{}", term, table, reference.identifier);
                    consumed.insert(position);
                    mentions.push(ColumnMention {
                        column: ColumnRef::new(table, reference.identifier),
                        position,
                    });
                }
                None => debug!("Term '{}' matched no table or column", term),
            }
        }

        mentions.sort_by_key(|m| m.position);
        mentions
    }

    /// Column of `table` named by `phrase`. Single words only match through a
    /// vocabulary alias; plain single nouns go through fuzzy resolution instead.
    fn phrase_column(&self, phrase: &str, words: usize, table: &TableInfo) -> Option<String> {
        let expanded = self.resolver.vocabulary().expand_phrase(phrase);
        if words < 2 && expanded.is_none() {
            return None;
        }
        let keys: Vec<String> = std::iter::once(phrase)
            .chain(expanded)
            .map(singular_key)
            .collect();
        table
            .columns
            .iter()
            .find(|c| keys.contains(&singular_key(&c.name)))
            .map(|c| c.name.clone())
    }

    fn assign_column_roles(
        &self,
        plan: &mut QueryPlanFragment,
        mentions: &[ColumnMention],
        analysis: &IntentAnalysis,
        features: &mut Vec<String>,
    ) {
        for mention in mentions {
            let column = mention.column.clone();
            if analysis.group_terms.iter().any(|t| t.position == mention.position) {
                if !plan.group_by.contains(&column) {
                    plan.group_by.push(column);
                }
                push_feature(features, "group_by");
            } else if analysis
                .order_term
                .as_ref()
                .is_some_and(|t| t.position == mention.position)
            {
                let descending = analysis.descending.unwrap_or(
                    analysis
                        .limit
                        .is_some_and(|l| l.ordinal != Ordinal::First),
                );
                plan.order_by = Some(OrderBy {
                    target: OrderTarget::Column(column),
                    descending,
                });
                push_feature(features, "order_by");
            } else if analysis.is_negated(mention.position) {
                plan.predicates.push(Predicate::is_null(column));
                push_feature(features, "null_check");
            } else if analysis.is_presence(mention.position) {
                plan.predicates.push(Predicate::is_not_null(column));
                push_feature(features, "null_check");
            } else if matches!(plan.verb, Verb::Aggregate(_)) {
                if plan.aggregate_column.is_none() {
                    plan.aggregate_column = Some(column);
                }
            } else if plan.verb == Verb::Select && !plan.projection.contains(&column) {
                plan.projection.push(column);
            }
        }
    }

    fn add_enum_predicates(
        &self,
        plan: &mut QueryPlanFragment,
        value_refs: &[ValueReference],
        tokens: &[String],
        analysis: &IntentAnalysis,
        schema: &SchemaSnapshot,
        features: &mut Vec<String>,
    ) {
        let tables = plan.tables();
        let mut grouped: Vec<(ColumnRef, bool, Vec<i64>)> = Vec::new();

        for reference in value_refs {
            let ValueReference::EnumText(mention) = reference else {
                continue;
            };
            let column = tables.iter().find_map(|t| {
                let table = schema.table(t)?;
                table
                    .column(&mention.field)
                    .map(|c| ColumnRef::new(&table.name, &c.name))
            });
            let Some(column) = column else {
                log_omission(&NlSqlError::UnresolvedEnumText(format!(
                    "'{}' belongs to field '{}', which no selected table has",
                    mention.text, mention.field
                )));
                continue;
            };
            let negated = analysis.is_negated(mention.position);
            match grouped
                .iter_mut()
                .find(|(c, n, _)| *c == column && *n == negated)
            {
                Some((_, _, codes)) => codes.push(mention.code),
                None => grouped.push((column, negated, vec![mention.code])),
            }
        }

        for (position, token) in tokens.iter().enumerate() {
            let covered = value_refs.iter().any(|r| r.covers(position));
            if !covered && self.resolver.vocabulary().is_status_word(token) {
                log_omission(&NlSqlError::UnresolvedEnumText(format!(
                    "status word '{}' has no enum definition",
                    token
                )));
            }
        }

        for (column, negated, codes) in grouped {
            // A value on an anti-joined table narrows the match, it does not filter rows
            let anti_join = plan
                .joins
                .iter_mut()
                .find(|j| j.kind == JoinKind::Left && j.to_table == column.table);
            match anti_join {
                Some(join) => {
                    join.conditions.push(Predicate::codes(column, codes, false));
                    push_feature(features, "anti_join_filter");
                }
                None => plan.predicates.push(Predicate::codes(column, codes, negated)),
            }
            push_feature(features, "enum_filter");
        }
    }

    fn add_location_predicates(
        &self,
        plan: &mut QueryPlanFragment,
        value_refs: &[ValueReference],
        analysis: &IntentAnalysis,
        schema: &SchemaSnapshot,
        features: &mut Vec<String>,
    ) {
        let tables = plan.tables();
        let mut grouped: Vec<(ColumnRef, bool, Vec<String>)> = Vec::new();

        for reference in value_refs {
            let ValueReference::Location(mention) = reference else {
                continue;
            };
            let column = tables.iter().find_map(|t| {
                let table = schema.table(t)?;
                location_column(table, mention.place.kind.column_words())
                    .map(|c| ColumnRef::new(&table.name, c))
            });
            let Some(column) = column else {
                debug!(
                    "No {:?} column for place '{}' in {:?}",
                    mention.place.kind, mention.place.name, tables
                );
                continue;
            };
            let negated = analysis.is_negated(mention.position);
            match grouped
                .iter_mut()
                .find(|(c, n, _)| *c == column && *n == negated)
            {
                Some((_, _, places)) => places.push(mention.place.name.clone()),
                None => grouped.push((column, negated, vec![mention.place.name.clone()])),
            }
        }

        for (column, negated, places) in grouped {
            plan.predicates.push(Predicate::locations(column, places, negated));
            push_feature(features, "location_filter");
        }
    }

    fn finish_plan(
        &self,
        plan: &mut QueryPlanFragment,
        primary: &TableInfo,
        analysis: &IntentAnalysis,
        features: &mut Vec<String>,
    ) {
        let primary_key = primary
            .first_primary_key()
            .map(|pk| ColumnRef::new(&primary.name, pk));

        if let Verb::Aggregate(_) = plan.verb {
            if plan.aggregate_column.is_none() {
                plan.aggregate_column = primary
                    .non_key_columns()
                    .find(|c| c.is_numeric())
                    .map(|c| ColumnRef::new(&primary.name, &c.name));
            }
            if plan.aggregate_column.is_none() {
                debug!("No numeric column on '{}', counting rows instead", primary.name);
                plan.verb = Verb::Count;
                push_feature(features, "aggregate_fallback_count");
            }
        }

        if plan.verb == Verb::Count && !plan.joins.is_empty() {
            if let Some(pk) = &primary_key {
                plan.count_distinct = Some(pk.clone());
                push_feature(features, "distinct_count");
            }
        }

        if let Some(having) = analysis.having {
            if plan.group_by.is_empty() {
                debug!("Ignoring HAVING threshold on an ungrouped query");
            } else {
                plan.having = Some(having);
                push_feature(features, "having");
            }
        }

        if plan.verb == Verb::Exists {
            return;
        }

        let grouped = !plan.group_by.is_empty();
        match analysis.limit {
            Some(limit) if plan.verb == Verb::Select || grouped => {
                plan.limit = Some(limit.count);
                push_feature(features, "limit");
                if plan.order_by.is_none() {
                    let descending = analysis
                        .descending
                        .unwrap_or(limit.ordinal != Ordinal::First);
                    let target = if grouped {
                        Some(OrderTarget::CountStar)
                    } else {
                        primary_key
                            .clone()
                            .or_else(|| primary.columns.first().map(|c| ColumnRef::new(&primary.name, &c.name)))
                            .map(OrderTarget::Column)
                    };
                    if let Some(target) = target {
                        plan.order_by = Some(OrderBy { target, descending });
                        push_feature(features, "order_by");
                    }
                }
            }
            Some(_) => debug!("Row limit ignored for a single-row {} query", plan.verb.name()),
            None if analysis.intent.returns_rows() => {
                plan.limit = Some(self.config.default_row_limit);
                push_feature(features, "default_limit");
            }
            None => {}
        }

        if self.config.dirty_read_hint {
            push_feature(features, "dirty_read");
        }
    }
}

fn verb_for(intent: Intent) -> Verb {
    match intent {
        Intent::Count => Verb::Count,
        Intent::Aggregate(function) => Verb::Aggregate(function),
        Intent::Exists => Verb::Exists,
        Intent::List | Intent::Select => Verb::Select,
    }
}

fn value_positions(value_refs: &[ValueReference]) -> HashSet<usize> {
    value_refs
        .iter()
        .flat_map(|r| r.position()..r.position() + r.span())
        .collect()
}

/// First column whose words include one of `words`, trying words in order.
fn location_column<'a>(table: &'a TableInfo, words: &[&str]) -> Option<&'a str> {
    words.iter().find_map(|word| {
        table
            .columns
            .iter()
            .find(|c| split_identifier(&c.name).iter().any(|w| w == *word))
            .map(|c| c.name.as_str())
    })
}

/// Parts of a prompt that cannot be honoured are dropped; expected gaps log at debug.
fn log_omission(err: &NlSqlError) {
    if err.is_degradation() {
        debug!("Omitting: {}", err);
    } else {
        warn!("Omitting: {}", err);
    }
}

fn push_feature(features: &mut Vec<String>, feature: &str) {
    if !features.iter().any(|f| f == feature) {
        features.push(feature.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TableInfo;

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![
            TableInfo::new("Students")
                .with_column("Id", "int")
                .with_column("Name", "nvarchar")
                .with_column("City", "nvarchar")
                .with_column("Email", "nvarchar")
                .with_column("SocialSecurityNumber", "nvarchar")
                .with_column("Gpa", "decimal")
                .with_primary_key("Id")
                .with_row_count(120),
            TableInfo::new("Applications")
                .with_column("Id", "int")
                .with_column("StudentId", "int")
                .with_column("Status", "int")
                .with_primary_key("Id")
                .with_foreign_key("StudentId", "Students", "Id")
                .with_row_count(300),
        ])
        .unwrap()
    }

    fn synthesizer() -> PatternSynthesizer {
        let enums = EnumResolver::new();
        enums
            .load_json(
                r#"{"Status": [{"text": "pending", "code": 1}, {"text": "approved", "code": 2}, {"text": "rejected", "code": 5}]}"#,
                "sis",
            )
            .unwrap();
        PatternSynthesizer::new(
            Arc::new(VocabularyStore::with_defaults()),
            Arc::new(enums),
            Arc::new(Gazetteer::with_defaults()),
            &EngineConfig::default(),
        )
    }

    fn generated(synthesis: Synthesis) -> GeneratedSql {
        match synthesis {
            Synthesis::Generated(generated) => generated,
            Synthesis::NotFound { candidate_terms } => panic!("not found: {:?}", candidate_terms),
        }
    }

    #[test]
    fn test_list_defaults_to_top_100() {
        let out = generated(synthesizer().synthesize("list students", &schema(), "sis"));
        assert_eq!(out.sql, "SELECT TOP (100) [Students].* FROM [Students] WITH (NOLOCK)");
        assert_eq!(out.tables, vec!["Students"]);
        assert!(out.features.contains(&"default_limit".to_string()));
    }

    #[test]
    fn test_enum_in_list_and_negation() {
        let synth = synthesizer();
        let out = generated(synth.synthesize("count applications pending or approved", &schema(), "sis"));
        assert!(out.sql.contains("[Applications].[Status] IN (1, 2)"), "{}", out.sql);

        let out = generated(synth.synthesize("list applications not rejected", &schema(), "sis"));
        assert!(out.sql.contains("[Applications].[Status] <> 5"), "{}", out.sql);
    }

    #[test]
    fn test_absence_renders_left_join_is_null() {
        let out = generated(synthesizer().synthesize("students without applications", &schema(), "sis"));
        assert!(out.sql.contains("LEFT JOIN [Applications] WITH (NOLOCK) ON [Applications].[StudentId] = [Students].[Id]"));
        assert!(out.sql.contains("WHERE [Applications].[StudentId] IS NULL"));
        assert!(out.features.contains(&"absence".to_string()));
    }

    #[test]
    fn test_enum_on_absent_table_moves_into_join() {
        let synth = synthesizer();
        for prompt in ["students without rejected applications", "students with no rejected application"] {
            let out = generated(synth.synthesize(prompt, &schema(), "sis"));
            assert!(
                out.sql.contains(
                    "LEFT JOIN [Applications] WITH (NOLOCK) ON [Applications].[StudentId] = [Students].[Id] \
                     AND [Applications].[Status] = 5 WHERE [Applications].[StudentId] IS NULL"
                ),
                "{}",
                out.sql
            );
            assert!(!out.sql.contains("[Applications].[Status] <>"), "{}", out.sql);
            assert!(out.features.contains(&"anti_join_filter".to_string()));
        }
    }

    #[test]
    fn test_negated_place_excludes_it() {
        let synth = synthesizer();
        let out = generated(synth.synthesize("list students not from Bayamón", &schema(), "sis"));
        assert!(
            out.sql.contains("WHERE [Students].[City] COLLATE Latin1_General_CI_AI <> N'Bayamón'"),
            "{}",
            out.sql
        );

        let out = generated(synth.synthesize("list students from Bayamón", &schema(), "sis"));
        assert!(
            out.sql.contains("WHERE [Students].[City] COLLATE Latin1_General_CI_AI = N'Bayamón'"),
            "{}",
            out.sql
        );
    }

    #[test]
    fn test_phrase_and_presence_columns() {
        let synth = synthesizer();
        let out = generated(synth.synthesize("students with ssn", &schema(), "sis"));
        assert!(out.sql.contains("[Students].[SocialSecurityNumber] IS NOT NULL"), "{}", out.sql);

        let out = generated(synth.synthesize("students without email", &schema(), "sis"));
        assert!(out.sql.contains("[Students].[Email] IS NULL"), "{}", out.sql);
    }

    #[test]
    fn test_aggregate_and_grouping() {
        let synth = synthesizer();
        let out = generated(synth.synthesize("average gpa of students", &schema(), "sis"));
        assert_eq!(
            out.sql,
            "SELECT AVG([Students].[Gpa]) AS [AvgGpa] FROM [Students] WITH (NOLOCK)"
        );

        let out = generated(synth.synthesize("count students by city having more than 5", &schema(), "sis"));
        assert_eq!(
            out.sql,
            "SELECT [Students].[City], COUNT(*) AS [Count] FROM [Students] WITH (NOLOCK) \
             GROUP BY [Students].[City] HAVING COUNT(*) > 5"
        );
    }

    #[test]
    fn test_explicit_limit_orders_results() {
        let out = generated(synthesizer().synthesize("show top 5 students by gpa", &schema(), "sis"));
        assert_eq!(
            out.sql,
            "SELECT TOP (5) [Students].* FROM [Students] WITH (NOLOCK) ORDER BY [Students].[Gpa] DESC"
        );
    }

    #[test]
    fn test_exists_intent() {
        let out = generated(synthesizer().synthesize("are there any rejected applications", &schema(), "sis"));
        assert_eq!(
            out.sql,
            "SELECT CASE WHEN EXISTS (SELECT 1 FROM [Applications] WITH (NOLOCK) \
             WHERE [Applications].[Status] = 5) THEN 1 ELSE 0 END AS [Exists]"
        );
    }

    #[test]
    fn test_unknown_prompt_is_not_found() {
        let synthesis = synthesizer().synthesize("asdkjasdj", &schema(), "sis");
        assert!(!synthesis.is_found());
        assert!(synthesis.tables().is_empty());
        assert!(synthesis.sql().is_none());
    }
}
