//! Sled-backed inode index: one entry per `(user_id, path)`, used both
//! to resolve a file to its current recipe location on restore and to
//! detect intra-user duplicate uploads of the same path.

use dispersion_core::error::CoreError;

use super::inode::InodeIndexValue;

fn key_for(user_id: u32, path: &str) -> Vec<u8> {
    let mut key = user_id.to_be_bytes().to_vec();
    key.extend_from_slice(path.as_bytes());
    key
}

pub struct InodeIndexStore {
    tree: sled::Tree,
}

impl InodeIndexStore {
    pub fn new(db: &sled::Db, tree_name: &str) -> Result<Self, sled::Error> {
        Ok(InodeIndexStore { tree: db.open_tree(tree_name)? })
    }

    pub fn get(&self, user_id: u32, path: &str) -> Result<Option<InodeIndexValue>, CoreError> {
        match self.tree.get(key_for(user_id, path)).map_err(|e| CoreError::Internal(e.to_string()))? {
            Some(bytes) => Ok(Some(InodeIndexValue::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, path: &str, value: &InodeIndexValue) -> Result<(), CoreError> {
        self.tree
            .insert(key_for(value.user_id, path), value.encode())
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::inode::InodeIndexValue;

    #[test]
    fn get_returns_none_before_any_put() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = InodeIndexStore::new(&db, "inodes").unwrap();
        assert!(store.get(1, "/report.txt").unwrap().is_none());
    }

    #[test]
    fn put_then_get_roundtrips() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = InodeIndexStore::new(&db, "inodes").unwrap();
        let mut value = InodeIndexValue::new_file(1, "report.txt");
        value.push_version(1, 0).unwrap();
        store.put("/report.txt", &value).unwrap();
        let back = store.get(1, "/report.txt").unwrap().unwrap();
        assert_eq!(back, value);
    }
}
