//! # Filesystem-backed key-value store
//!
//! [`FileStore`] persists each key as one file under a base directory. It backs the
//! local persistence store on desktop clients so unpublished items, the cover
//! override, tombstones and saved credentials survive restarts.
//!
//! ## Layout
//!
//! ```text
//! <base_dir>/
//! ├── cms_local_items_v1      # JSON array of items
//! ├── cms_local_cover_v1      # JSON cover or absent
//! ├── cms_local_deleted_v1    # JSON array of ids
//! └── admin_token             # plain text settings keys
//! ```
//!
//! Keys are sanitised to `[A-Za-z0-9_.-]` before becoming filenames.

use std::path::{Path, PathBuf};

use crate::kv::KeyValueStore;
use crate::StoreError;

#[derive(Clone, Debug)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base.join(name)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.key_path(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.base)?;
        let path = self.key_path(key);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
