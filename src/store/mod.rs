//! Persistence — row/graph/vector store access.

pub mod http;
pub mod memory;
pub mod rows;
pub mod traits;

pub use http::{HttpRowStore, StoreConfig};
pub use memory::MemoryRowStore;
pub use rows::RowSet;
pub use traits::{Embedding, References, RowStore};
