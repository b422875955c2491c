//! In-process `RowStore` backend.
//!
//! Implements the same contract as the HTTP backend over plain maps: rows
//! keyed by their `id` field, `graph` edges recorded from upsert
//! references, and cosine-ranked similarity search over stored embedding
//! texts. Used by the test suite and by local runs without a store
//! deployment.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::rows::RowSet;
use super::traits::{Embedding, References, RowStore};
use crate::error::StorageError;

#[derive(Default)]
struct Inner {
    /// table → rows (field → value).
    tables: HashMap<String, Vec<BTreeMap<String, Value>>>,
    /// relation → (source id, target id) edges.
    edges: HashMap<String, Vec<(String, String)>>,
    embeddings: Vec<StoredEmbedding>,
}

struct StoredEmbedding {
    text: String,
    vector: Vec<f32>,
    references: References,
}

/// In-memory row store.
#[derive(Default)]
pub struct MemoryRowStore {
    inner: Mutex<Inner>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows in a table (test helper).
    pub fn row_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.tables.get(table).map_or(0, Vec::len)
    }
}

// ── Condition grammar ───────────────────────────────────────────────

enum Clause {
    Eq(String, Value),
    Contains(String, String),
    In(String, Vec<String>),
}

fn unquote(s: &str) -> Option<&str> {
    let s = s.trim();
    s.strip_prefix('\'').and_then(|s| s.strip_suffix('\''))
}

fn parse_clause(clause: &str) -> Option<Clause> {
    if let Some((field, rest)) = clause.split_once(" CONTAINS ") {
        let needle = unquote(rest)?;
        return Some(Clause::Contains(field.trim().to_string(), needle.to_string()));
    }
    if let Some((field, rest)) = clause.split_once(" IN ") {
        let list = rest.trim().strip_prefix('(')?.strip_suffix(')')?;
        let values = list
            .split(',')
            .filter_map(|v| unquote(v).map(str::to_string))
            .collect();
        return Some(Clause::In(field.trim().to_string(), values));
    }
    if let Some((field, rest)) = clause.split_once('=') {
        let rest = rest.trim();
        let value = match unquote(rest) {
            Some(s) => Value::from(s),
            None => match rest.parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::from(rest),
            },
        };
        return Some(Clause::Eq(field.trim().to_string(), value));
    }
    None
}

fn parse_condition(condition: &str) -> Vec<Clause> {
    condition
        .split(" AND ")
        .filter_map(|part| {
            let clause = parse_clause(part.trim());
            if clause.is_none() {
                warn!(clause = part, "unparseable condition clause, ignoring");
            }
            clause
        })
        .collect()
}

fn cell_matches(cell: Option<&Value>, clause: &Clause) -> bool {
    match clause {
        Clause::Eq(_, want) => match (cell, want) {
            (Some(have), Value::Number(n)) => have.as_i64() == n.as_i64(),
            (Some(Value::String(have)), Value::String(want)) => have == want,
            _ => false,
        },
        Clause::Contains(_, needle) => cell
            .and_then(Value::as_str)
            .is_some_and(|s| s.contains(needle.as_str())),
        Clause::In(_, wanted) => cell
            .and_then(Value::as_str)
            .is_some_and(|s| wanted.iter().any(|w| w == s)),
    }
}

fn row_matches(row: &BTreeMap<String, Value>, clauses: &[Clause]) -> bool {
    clauses.iter().all(|clause| {
        let field = match clause {
            Clause::Eq(f, _) | Clause::Contains(f, _) | Clause::In(f, _) => f,
        };
        cell_matches(row.get(field), clause)
    })
}

fn row_id(row: &BTreeMap<String, Value>) -> Option<String> {
    row.get("id").and_then(Value::as_str).map(str::to_string)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

// ── RowStore impl ───────────────────────────────────────────────────

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn insert(
        &self,
        table: &str,
        fields: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let table_rows = inner.tables.entry(table.to_string()).or_default();
        for row in rows {
            let record: BTreeMap<String, Value> = fields
                .iter()
                .map(|f| f.to_string())
                .zip(row.into_iter())
                .collect();
            table_rows.push(record);
        }
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        fields: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let table_rows =
            inner
                .tables
                .get_mut(table)
                .ok_or_else(|| StorageError::Query {
                    table: table.to_string(),
                    reason: "no such table".to_string(),
                })?;
        for row in rows {
            let id = row.first().and_then(Value::as_str).map(str::to_string);
            let Some(id) = id else {
                return Err(StorageError::Query {
                    table: table.to_string(),
                    reason: "update row missing id".to_string(),
                });
            };
            let record = table_rows
                .iter_mut()
                .find(|r| row_id(r).as_deref() == Some(id.as_str()))
                .ok_or_else(|| StorageError::Query {
                    table: table.to_string(),
                    reason: format!("no row with id {id}"),
                })?;
            for (field, value) in fields.iter().zip(row.into_iter()) {
                record.insert(field.to_string(), value);
            }
        }
        Ok(())
    }

    async fn upsert(
        &self,
        table: &str,
        fields: &[&str],
        rows: Vec<Vec<Value>>,
        embedding: Option<Embedding>,
        references: References,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let mut row_ids = Vec::new();
        {
            let table_rows = inner.tables.entry(table.to_string()).or_default();
            for row in rows {
                let id = row.first().and_then(Value::as_str).map(str::to_string);
                let record: BTreeMap<String, Value> = fields
                    .iter()
                    .map(|f| f.to_string())
                    .zip(row.into_iter())
                    .collect();
                match id {
                    Some(id) => {
                        row_ids.push(id.clone());
                        match table_rows
                            .iter_mut()
                            .find(|r| row_id(r).as_deref() == Some(id.as_str()))
                        {
                            Some(existing) => existing.extend(record),
                            None => table_rows.push(record),
                        }
                    }
                    None => table_rows.push(record),
                }
            }
        }

        // Cross-reference edges: each upserted row points at every
        // referenced id in the `graph` relation.
        if !row_ids.is_empty() {
            let edges = inner.edges.entry("graph".to_string()).or_default();
            for source in &row_ids {
                for (_, targets) in &references {
                    for target in targets {
                        edges.push((source.clone(), target.clone()));
                    }
                }
            }
        }

        if let Some(embedding) = embedding {
            inner.embeddings.push(StoredEmbedding {
                text: embedding.text,
                vector: embedding.vector,
                references,
            });
        }

        Ok(())
    }

    async fn lookup(
        &self,
        table: &str,
        fields: &[&str],
        condition: Option<&str>,
    ) -> Result<RowSet, StorageError> {
        let inner = self.inner.lock().unwrap();
        let Some(table_rows) = inner.tables.get(table) else {
            return Ok(RowSet::default());
        };
        let clauses = condition.map(parse_condition).unwrap_or_default();
        let rows = table_rows
            .iter()
            .filter(|row| row_matches(row, &clauses))
            .map(|row| {
                fields
                    .iter()
                    .map(|f| row.get(*f).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(RowSet { rows })
    }

    async fn recursive_traversal(
        &self,
        relation: &str,
        source_field: &str,
        target_field: &str,
        start_condition: &str,
    ) -> Result<RowSet, StorageError> {
        let inner = self.inner.lock().unwrap();
        let edges = inner.edges.get(relation).cloned().unwrap_or_default();

        let Some(Clause::Eq(field, start)) = parse_clause(start_condition) else {
            return Err(StorageError::Query {
                table: relation.to_string(),
                reason: format!("unsupported traversal condition: {start_condition}"),
            });
        };
        let Some(start) = start.as_str().map(str::to_string) else {
            return Err(StorageError::Query {
                table: relation.to_string(),
                reason: "traversal start must be a string id".to_string(),
            });
        };
        // Walk edges away from the matched field: starting on the target
        // side yields descendants (sources), starting on the source side
        // yields ancestors (targets).
        let from_target = field == target_field;
        if !from_target && field != source_field {
            return Err(StorageError::Query {
                table: relation.to_string(),
                reason: format!("unknown traversal field: {field}"),
            });
        }

        let mut reached: Vec<String> = Vec::new();
        let mut frontier = vec![start];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for (source, target) in &edges {
                let (anchor, found) = if from_target {
                    (target, source)
                } else {
                    (source, target)
                };
                if frontier.contains(anchor) && !reached.contains(found) {
                    reached.push(found.clone());
                    next.push(found.clone());
                }
            }
            frontier = next;
        }

        let rows = reached.into_iter().map(|id| vec![Value::from(id)]).collect();
        Ok(RowSet { rows })
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<RowSet, StorageError> {
        let inner = self.inner.lock().unwrap();
        let mut scored: Vec<(f32, &StoredEmbedding)> = inner
            .embeddings
            .iter()
            .map(|e| (cosine(query, &e.vector), e))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let rows = scored
            .into_iter()
            .take(k)
            .map(|(score, e)| {
                let referenced = e
                    .references
                    .first()
                    .and_then(|(_, ids)| ids.first())
                    .cloned()
                    .unwrap_or_default();
                vec![
                    Value::from(referenced),
                    Value::from(e.text.clone()),
                    Value::from(f64::from(score)),
                ]
            })
            .collect();
        Ok(RowSet { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_row(id: &str, name: &str, object: &str, sequence: i64, status: &str) -> Vec<Value> {
        vec![
            json!(id),
            json!(name),
            json!(object),
            json!(sequence),
            json!(status),
        ]
    }

    const FIELDS: &[&str] = &["id", "name", "object", "sequence", "status"];

    #[tokio::test]
    async fn lookup_with_eq_condition() {
        let store = MemoryRowStore::new();
        store
            .insert(
                "task",
                FIELDS,
                vec![
                    task_row("t1", "root", "msg-1", 0, "Active"),
                    task_row("t2", "other", "msg-2", 0, "Active"),
                ],
            )
            .await
            .unwrap();

        let set = store
            .lookup("task", &["id"], Some("object = 'msg-1' AND sequence = 0"))
            .await
            .unwrap();
        assert_eq!(set.first_column(), vec!["t1"]);
    }

    #[tokio::test]
    async fn lookup_with_contains_and_in() {
        let store = MemoryRowStore::new();
        store
            .insert(
                "person",
                &["id", "name"],
                vec![
                    vec![json!("p1"), json!("John Smith")],
                    vec![json!("p2"), json!("Jane Doe")],
                ],
            )
            .await
            .unwrap();

        let set = store
            .lookup("person", &["id"], Some("name CONTAINS 'John'"))
            .await
            .unwrap();
        assert_eq!(set.first_column(), vec!["p1"]);

        let set = store
            .lookup("person", &["name"], Some("id IN ('p1', 'p2')"))
            .await
            .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn unknown_table_lookup_is_empty() {
        let store = MemoryRowStore::new();
        let set = store.lookup("nothing", &["id"], None).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn update_missing_row_fails() {
        let store = MemoryRowStore::new();
        store
            .insert("task", FIELDS, vec![task_row("t1", "a", "m", 0, "Active")])
            .await
            .unwrap();
        let err = store
            .update("task", &["id", "status"], vec![vec![json!("t9"), json!("Complete")]])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Query { .. }));
    }

    #[tokio::test]
    async fn upsert_merges_existing_row() {
        let store = MemoryRowStore::new();
        store
            .insert("task", FIELDS, vec![task_row("t1", "a", "m", 0, "Active")])
            .await
            .unwrap();
        store
            .upsert(
                "task",
                &["id", "status"],
                vec![vec![json!("t1"), json!("Complete")]],
                None,
                vec![],
            )
            .await
            .unwrap();

        assert_eq!(store.row_count("task"), 1);
        let set = store
            .lookup("task", &["name", "status"], Some("id = 't1'"))
            .await
            .unwrap();
        assert_eq!(set.rows[0], vec![json!("a"), json!("Complete")]);
    }

    #[tokio::test]
    async fn traversal_follows_reference_edges_transitively() {
        let store = MemoryRowStore::new();
        // root ← child ← grandchild, edges recorded child→parent.
        store
            .upsert(
                "task",
                &["id"],
                vec![vec![json!("child")]],
                None,
                vec![("task".into(), vec!["root".into()])],
            )
            .await
            .unwrap();
        store
            .upsert(
                "task",
                &["id"],
                vec![vec![json!("grandchild")]],
                None,
                vec![("task".into(), vec!["child".into()])],
            )
            .await
            .unwrap();

        let set = store
            .recursive_traversal("graph", "source_id", "target_id", "target_id = 'root'")
            .await
            .unwrap();
        let mut ids = set.first_column();
        ids.sort();
        assert_eq!(ids, vec!["child", "grandchild"]);
    }

    #[tokio::test]
    async fn similarity_search_ranks_by_cosine() {
        let store = MemoryRowStore::new();
        for (id, text, vector) in [
            ("t1", "about golf", vec![1.0_f32, 0.0]),
            ("t2", "about chess", vec![0.0_f32, 1.0]),
        ] {
            store
                .upsert(
                    "task",
                    &[],
                    vec![],
                    Some(Embedding {
                        text: text.to_string(),
                        vector,
                    }),
                    vec![("task".into(), vec![id.into()])],
                )
                .await
                .unwrap();
        }

        let set = store.similarity_search(&[1.0, 0.1], 1).await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.rows[0][1], json!("about golf"));
    }
}
