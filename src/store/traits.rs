//! `RowStore` trait — narrow async interface over the external
//! row/graph/vector store.
//!
//! The engine consumes the store's query semantics as a capability; it does
//! not reimplement them. Two backends exist: `HttpRowStore` (the real
//! service) and `MemoryRowStore` (in-process, used in tests and for local
//! runs without a store deployment).

use async_trait::async_trait;
use serde_json::Value;

use super::rows::RowSet;
use crate::error::StorageError;

/// Cross-reference payload attached to an upsert: `(table, target row ids)`.
/// Each upserted row gains a `graph` relation edge to every referenced id.
pub type References = Vec<(String, Vec<String>)>;

/// Embedding payload attached to an upsert, indexed for similarity search.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub text: String,
    pub vector: Vec<f32>,
}

/// Condition strings use a minimal grammar shared by both backends:
/// `field = 'value'`, `field = 0`, `field CONTAINS 'value'`,
/// `field IN ('a', 'b')`, clauses joined with ` AND `.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Insert rows into a table.
    async fn insert(
        &self,
        table: &str,
        fields: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), StorageError>;

    /// Update existing rows, matched on the first field (the row id).
    /// Only the listed fields are touched.
    async fn update(
        &self,
        table: &str,
        fields: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), StorageError>;

    /// Insert-or-update, optionally attaching an embedding and
    /// cross-reference edges. `rows` may be empty when the call only
    /// records an embedding against already-persisted rows.
    async fn upsert(
        &self,
        table: &str,
        fields: &[&str],
        rows: Vec<Vec<Value>>,
        embedding: Option<Embedding>,
        references: References,
    ) -> Result<(), StorageError>;

    /// Project `fields` from `table`, filtered by an optional condition.
    async fn lookup(
        &self,
        table: &str,
        fields: &[&str],
        condition: Option<&str>,
    ) -> Result<RowSet, StorageError>;

    /// Walk a relation transitively from the rows matching
    /// `start_condition`, returning one single-cell row per reached node.
    async fn recursive_traversal(
        &self,
        relation: &str,
        source_field: &str,
        target_field: &str,
        start_condition: &str,
    ) -> Result<RowSet, StorageError>;

    /// Ranked similarity search over stored embedding texts. Result rows
    /// are `[referenced id, text, score]`.
    async fn similarity_search(&self, query: &[f32], k: usize)
    -> Result<RowSet, StorageError>;
}
