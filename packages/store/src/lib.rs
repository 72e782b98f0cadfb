pub mod chart;
pub mod config;
pub mod ids;
pub mod kv;
pub mod local;
pub mod media;
pub mod merge;
pub mod models;
pub mod validate;

mod file_store;
mod memory;
pub use file_store::FileStore;
pub use memory::MemoryStore;

pub use config::CmsConfig;
pub use kv::KeyValueStore;
pub use local::{Durability, GithubCredentials, LocalBackup, LocalStore};
pub use merge::{merge_items, MergeCache, MergedView};
pub use models::{
    ChartEntry, Cover, CoverPayload, Item, ItemBody, ItemKind, ItemPayload, Movement, Snapshot,
    Stats, Status,
};
pub use validate::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("unknown item type: {0}")]
    UnknownKind(String),
    #[error("unknown chart movement: {0}")]
    UnknownMovement(String),
    #[error("Missing id for local update")]
    MissingId,
    #[error("item {id} is a {existing}, not a {requested}")]
    TypeMismatch {
        id: String,
        existing: ItemKind,
        requested: ItemKind,
    },
    #[error("invalid backup: {0}")]
    InvalidBackup(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
