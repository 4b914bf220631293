//! Per-user recipe files: an append-only log of `FileRecipeEntry`
//! records, one file per rollover, named with the same monotonic
//! 16-byte scheme as share containers so recipe files list in creation
//! order. A recipe file accumulates entries until it would exceed
//! `RECIPE_FILE_SIZE`, at which point the next entry starts a fresh
//! file and the inode index gains a new version entry pointing at it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use dispersion_core::error::CoreError;

use super::model::{lex16_name, FileRecipeEntry};

/// Target size before a recipe file rolls over to a new one.
pub const RECIPE_FILE_SIZE: u64 = 4 * 1024 * 1024;

struct OpenRecipe {
    name: String,
    offset: u64,
}

pub struct RecipeStore {
    base_path: PathBuf,
    next_counter: Mutex<u64>,
    current: Mutex<Option<OpenRecipe>>,
}

impl RecipeStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(RecipeStore { base_path, next_counter: Mutex::new(0), current: Mutex::new(None) })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    /// Append one recipe entry, rolling to a new file if this entry
    /// would push the current file over `RECIPE_FILE_SIZE`. Returns
    /// `Some((file_name, offset))` whenever a new recipe file was
    /// started, so the inode index can record a new version entry;
    /// `None` when the entry landed in the already-open file.
    pub fn append(&self, entry: &FileRecipeEntry) -> Result<Option<(String, u32)>, CoreError> {
        let encoded = entry.encode();
        let mut current = self.current.lock().unwrap();

        let needs_new = match &*current {
            None => true,
            Some(open) => open.offset + encoded.len() as u64 > RECIPE_FILE_SIZE,
        };

        let mut rollover = None;
        if needs_new {
            let mut counter = self.next_counter.lock().unwrap();
            let name = lex16_name(*counter);
            *counter += 1;
            *current = Some(OpenRecipe { name: name.clone(), offset: 0 });
            rollover = Some((name, 0u32));
        }

        let open = current.as_mut().unwrap();
        let path = self.path_for(&open.name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        file.write_all(&encoded).map_err(|e| CoreError::Internal(e.to_string()))?;
        open.offset += encoded.len() as u64;

        Ok(rollover)
    }

    pub fn read_entry(&self, name: &str, offset: u32) -> Result<FileRecipeEntry, CoreError> {
        let bytes = fs::read(self.path_for(name)).map_err(|e| CoreError::Internal(e.to_string()))?;
        let start = offset as usize;
        if bytes.len() < start + FileRecipeEntry::ENCODED_SIZE {
            return Err(CoreError::Protocol("recipe offset out of range".into()));
        }
        FileRecipeEntry::decode(&bytes[start..start + FileRecipeEntry::ENCODED_SIZE])
    }

    pub fn read_all(&self, name: &str) -> Result<Vec<FileRecipeEntry>, CoreError> {
        let bytes = fs::read(self.path_for(name)).map_err(|e| CoreError::Internal(e.to_string()))?;
        let mut out = Vec::new();
        let mut off = 0;
        while off + FileRecipeEntry::ENCODED_SIZE <= bytes.len() {
            out.push(FileRecipeEntry::decode(&bytes[off..off + FileRecipeEntry::ENCODED_SIZE])?);
            off += FileRecipeEntry::ENCODED_SIZE;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(secret_id: i64) -> FileRecipeEntry {
        FileRecipeEntry { share_fp: vec![0u8; 32], secret_id, secret_size: 100, seg_id: 1, share_id: 0 }
    }

    #[test]
    fn first_append_starts_a_recipe_file() {
        let dir = tempdir().unwrap();
        let store = RecipeStore::new(dir.path()).unwrap();
        let rollover = store.append(&entry(1)).unwrap();
        assert!(rollover.is_some());
        let (name, offset) = rollover.unwrap();
        assert_eq!(offset, 0);
        let back = store.read_entry(&name, 0).unwrap();
        assert_eq!(back, entry(1));
    }

    #[test]
    fn subsequent_appends_stay_in_the_same_file_until_full() {
        let dir = tempdir().unwrap();
        let store = RecipeStore::new(dir.path()).unwrap();
        store.append(&entry(1)).unwrap();
        let rollover = store.append(&entry(2)).unwrap();
        assert!(rollover.is_none());
    }

    #[test]
    fn read_all_returns_every_entry_in_order() {
        let dir = tempdir().unwrap();
        let store = RecipeStore::new(dir.path()).unwrap();
        let (name, _) = store.append(&entry(1)).unwrap().unwrap();
        store.append(&entry(2)).unwrap();
        store.append(&entry(3)).unwrap();
        let all = store.read_all(&name).unwrap();
        assert_eq!(all, vec![entry(1), entry(2), entry(3)]);
    }
}
