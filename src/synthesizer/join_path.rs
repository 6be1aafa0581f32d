//! Join path discovery
//!
//! Foreign keys form an undirected graph over the tables of a snapshot. A path between
//! two tables is found by breadth-first search bounded by the configured depth.
//! Junction tables are visited before other neighbours so that, among equally short
//! paths, the one bridging through a junction wins. Self-referencing keys are not
//! traversed.

use crate::error::{NlSqlError, Result};
use crate::metadata::SchemaSnapshot;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// One oriented hop: `from_table.from_column = to_table.to_column`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl JoinEdge {
    fn reversed(&self) -> Self {
        Self {
            from_table: self.to_table.clone(),
            from_column: self.to_column.clone(),
            to_table: self.from_table.clone(),
            to_column: self.from_column.clone(),
        }
    }
}

pub struct JoinGraph {
    /// lowercase table -> outgoing edges, junction targets first
    adjacency: HashMap<String, Vec<JoinEdge>>,
    junctions: HashSet<String>,
}

impl JoinGraph {
    pub fn build(schema: &SchemaSnapshot) -> Self {
        let junctions: HashSet<String> = schema
            .tables()
            .filter(|t| t.is_junction() || (schema.has_junction_name(&t.name) && t.foreign_keys.len() >= 2))
            .map(|t| t.name.to_lowercase())
            .collect();

        let mut adjacency: HashMap<String, Vec<JoinEdge>> = HashMap::new();
        for table in schema.tables() {
            for fk in &table.foreign_keys {
                if fk.target_table.eq_ignore_ascii_case(&table.name) {
                    debug!("Skipping self-reference {}.{}", table.name, fk.column);
                    continue;
                }
                let Some(target) = schema.table(&fk.target_table) else {
                    debug!(
                        "Foreign key {}.{} points at unknown table '{}'",
                        table.name, fk.column, fk.target_table
                    );
                    continue;
                };
                let edge = JoinEdge {
                    from_table: table.name.clone(),
                    from_column: fk.column.clone(),
                    to_table: target.name.clone(),
                    to_column: fk.target_column.clone(),
                };
                adjacency
                    .entry(table.name.to_lowercase())
                    .or_default()
                    .push(edge.clone());
                adjacency
                    .entry(target.name.to_lowercase())
                    .or_default()
                    .push(edge.reversed());
            }
        }

        for edges in adjacency.values_mut() {
            edges.sort_by(|a, b| {
                let a_junction = junctions.contains(&a.to_table.to_lowercase());
                let b_junction = junctions.contains(&b.to_table.to_lowercase());
                b_junction
                    .cmp(&a_junction)
                    .then_with(|| a.to_table.cmp(&b.to_table))
                    .then_with(|| a.from_column.cmp(&b.from_column))
            });
        }

        Self { adjacency, junctions }
    }

    pub fn is_junction(&self, table: &str) -> bool {
        self.junctions.contains(&table.to_lowercase())
    }

    /// Shortest path of at most `max_depth` hops from `from` to `to`.
    pub fn find_path(&self, from: &str, to: &str, max_depth: usize) -> Result<Vec<JoinEdge>> {
        let start = from.to_lowercase();
        let goal = to.to_lowercase();
        if start == goal {
            return Ok(Vec::new());
        }

        let mut queue = VecDeque::new();
        queue.push_back((start.clone(), Vec::<JoinEdge>::new()));
        let mut seen = HashSet::new();
        seen.insert(start);

        while let Some((current, path)) = queue.pop_front() {
            if path.len() >= max_depth {
                continue;
            }
            let Some(edges) = self.adjacency.get(&current) else {
                continue;
            };
            for edge in edges {
                let next = edge.to_table.to_lowercase();
                if seen.contains(&next) {
                    continue;
                }
                let mut new_path = path.clone();
                new_path.push(edge.clone());
                if next == goal {
                    return Ok(new_path);
                }
                seen.insert(next.clone());
                queue.push_back((next, new_path));
            }
        }

        Err(NlSqlError::JoinPathNotFound(format!(
            "No foreign-key path from '{}' to '{}' within {} joins",
            from, to, max_depth
        )))
    }

    /// Shortest path from any table in `joined` to `to`; ties go to the earlier table.
    pub fn find_path_from_any(&self, joined: &[String], to: &str, max_depth: usize) -> Result<Vec<JoinEdge>> {
        joined
            .iter()
            .filter_map(|from| self.find_path(from, to, max_depth).ok())
            .min_by_key(|path| path.len())
            .ok_or_else(|| {
                NlSqlError::JoinPathNotFound(format!(
                    "No foreign-key path to '{}' within {} joins",
                    to, max_depth
                ))
            })
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
                .with_column("MentorId", "int")
                .with_primary_key("Id")
                .with_foreign_key("MentorId", "Students", "Id")
                .with_row_count(10),
            TableInfo::new("Cars").with_column("Id", "int").with_primary_key("Id").with_row_count(4),
            TableInfo::new("StudentCars")
                .with_column("StudentId", "int")
                .with_column("CarId", "int")
                .with_foreign_key("StudentId", "Students", "Id")
                .with_foreign_key("CarId", "Cars", "Id")
                .with_row_count(6),
            TableInfo::new("Parking")
                .with_column("Id", "int")
                .with_column("CarId", "int")
                .with_column("Lot", "nvarchar")
                .with_column("Fee", "money")
                .with_foreign_key("CarId", "Cars", "Id")
                .with_row_count(2),
            TableInfo::new("Orphans").with_column("Id", "int").with_row_count(1),
        ])
        .unwrap()
    }

    #[test]
    fn test_path_through_junction() {
        let graph = JoinGraph::build(&schema());
        assert!(graph.is_junction("StudentCars"));

        let path = graph.find_path("Students", "Cars", 3).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].to_table, "StudentCars");
        assert_eq!(path[0].to_column, "StudentId");
        assert_eq!(path[1].to_table, "Cars");
        assert_eq!(path[1].from_column, "CarId");
    }

    #[test]
    fn test_depth_limit() {
        let graph = JoinGraph::build(&schema());
        assert_eq!(graph.find_path("Students", "Parking", 3).unwrap().len(), 3);
        let err = graph.find_path("Students", "Parking", 2).unwrap_err();
        assert!(matches!(err, NlSqlError::JoinPathNotFound(_)));
    }

    #[test]
    fn test_unconnected_and_self_reference() {
        let graph = JoinGraph::build(&schema());
        assert!(graph.find_path("Students", "Orphans", 3).is_err());
        assert!(graph.find_path("Students", "students", 3).unwrap().is_empty());
    }

    #[test]
    fn test_path_from_any_joined_table() {
        let graph = JoinGraph::build(&schema());
        let joined = vec!["Students".to_string(), "Cars".to_string()];
        let path = graph.find_path_from_any(&joined, "Parking", 3).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].from_table, "Cars");
    }
}
