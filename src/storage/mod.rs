pub mod database;
pub mod lock;
pub mod metadata;
pub mod models;
pub mod paths;
pub mod semantic;

pub use database::Database;
pub use lock::WriteLock;
pub use metadata::MetadataStore;
pub use models::{SearchHit, StoredChunk};
pub use paths::{derive_doc_id, DataPaths};
pub use semantic::{SemanticStore, SqliteSemanticStore};
