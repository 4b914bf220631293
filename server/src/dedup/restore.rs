//! Restore path: given a user and a path, resolve the inode index to
//! its most recent recipe locations, replay every recipe entry across
//! however many recipe files a rollover history produced, and fetch
//! each share's bytes from its container. Mirrors the reference
//! system's restore flow, minus the network framing (that lives in
//! `frontend.rs`) and the cross-cloud k-of-N decode (that lives on the
//! client, which is the only side that holds shares from every cloud).

use std::collections::HashMap;

use dispersion_core::error::CoreError;

use super::engine::DedupCore;
use super::inode::InodeChildren;
use super::inode_store::InodeIndexStore;
use super::model::{FileRecipeEntry, MetaListEntry};
use super::recipe::RecipeStore;

/// One recovered share plus the recipe metadata that located it,
/// ordered the way it must be reassembled (ascending `secret_id`).
pub struct RestoredShare {
    pub entry: FileRecipeEntry,
    pub body: Vec<u8>,
}

/// `NO_DATA_CHUNKS_FOUND` in frontend terms: the path has no inode
/// entry for this user, or it names a directory rather than a file.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("no such file for this user")]
    NotFound,
    #[error("path names a directory, not a file")]
    IsDirectory,
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub fn restore_file(
    inodes: &InodeIndexStore,
    recipes: &RecipeStore,
    dedup: &DedupCore,
    user_id: u32,
    path: &str,
) -> Result<Vec<RestoredShare>, RestoreError> {
    let inode = inodes.get(user_id, path)?.ok_or(RestoreError::NotFound)?;
    let versions = match &inode.children {
        InodeChildren::File(entries) => entries,
        InodeChildren::Dir(_) => return Err(RestoreError::IsDirectory),
    };

    let mut out = Vec::new();
    for version in versions {
        let entries = recipes.read_all(&version.recipe_file_name)?;
        for entry in entries {
            let location = dedup
                .location_of(&entry.share_fp)?
                .ok_or_else(|| CoreError::Internal("recipe entry references an unknown share".into()))?;
            let body = dedup.read_share(&location)?;
            out.push(RestoredShare { entry, body });
        }
    }
    Ok(out)
}

/// Summarize `path`'s recipe into a MetaList (§4.6 download meta
/// phase): one entry per share stream (`share_id`), carrying the
/// highest `secret_id` recorded for it. Unlike `restore_file` this
/// never touches a share's body, so a client can use it to decide what
/// it still needs before paying for any container reads.
pub fn restore_meta_list(
    inodes: &InodeIndexStore,
    recipes: &RecipeStore,
    user_id: u32,
    path: &str,
) -> Result<Vec<MetaListEntry>, RestoreError> {
    let inode = inodes.get(user_id, path)?.ok_or(RestoreError::NotFound)?;
    let versions = match &inode.children {
        InodeChildren::File(entries) => entries,
        InodeChildren::Dir(_) => return Err(RestoreError::IsDirectory),
    };

    // `order` preserves first-seen order across share streams so the
    // returned `id` is stable run to run for an unchanged recipe;
    // `by_share` tracks the running max `secret_id` per stream, which
    // only ever grows as more entries are folded in (§8.8).
    let mut order: Vec<u32> = Vec::new();
    let mut by_share: HashMap<u32, i64> = HashMap::new();

    for version in versions {
        let entries = recipes.read_all(&version.recipe_file_name)?;
        for entry in entries {
            let max = by_share.entry(entry.share_id).or_insert_with(|| {
                order.push(entry.share_id);
                i64::MIN
            });
            if entry.secret_id > *max {
                *max = entry.secret_id;
            }
        }
    }

    Ok(order
        .into_iter()
        .enumerate()
        .map(|(id, share_id)| MetaListEntry { id: id as i32, share_id: share_id as i32, end_secret_id: by_share[&share_id] })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::inode::InodeIndexValue;
    use crate::storage::container::ContainerStore;
    use tempfile::tempdir;

    #[test]
    fn restoring_an_unknown_path_fails_not_found() {
        let dir = tempdir().unwrap();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let inodes = InodeIndexStore::new(&db, "inodes").unwrap();
        let recipes = RecipeStore::new(dir.path().join("recipes")).unwrap();
        let containers = ContainerStore::new(dir.path().join("containers")).unwrap();
        let dedup = DedupCore::new(&db, "shares", containers).unwrap();

        let err = restore_file(&inodes, &recipes, &dedup, 1, "/missing.txt").unwrap_err();
        assert!(matches!(err, RestoreError::NotFound));
    }

    #[test]
    fn meta_list_summarizes_one_entry_per_share_stream_with_ascending_end_secret_id() {
        let dir = tempdir().unwrap();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let inodes = InodeIndexStore::new(&db, "inodes").unwrap();
        let recipes = RecipeStore::new(dir.path().join("recipes")).unwrap();

        let entry = |secret_id: i64, share_id: u32| FileRecipeEntry {
            share_fp: vec![0u8; 32],
            secret_id,
            secret_size: 100,
            seg_id: 1,
            share_id,
        };

        let (name, _) = recipes.append(&entry(0, 0)).unwrap().unwrap();
        recipes.append(&entry(0, 1)).unwrap();
        recipes.append(&entry(1, 0)).unwrap();
        recipes.append(&entry(1, 1)).unwrap();

        let mut value = InodeIndexValue::new_file(1, "report.txt");
        value.push_version(name, 0).unwrap();
        inodes.put("/report.txt", &value).unwrap();

        let summary = restore_meta_list(&inodes, &recipes, 1, "/report.txt").unwrap();
        assert_eq!(summary.len(), 2);
        for entry in &summary {
            assert_eq!(entry.end_secret_id, 1);
        }
    }

    #[test]
    fn restoring_a_directory_path_fails_is_directory() {
        let dir = tempdir().unwrap();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let inodes = InodeIndexStore::new(&db, "inodes").unwrap();
        let recipes = RecipeStore::new(dir.path().join("recipes")).unwrap();
        let containers = ContainerStore::new(dir.path().join("containers")).unwrap();
        let dedup = DedupCore::new(&db, "shares", containers).unwrap();

        inodes.put("/docs", &InodeIndexValue::new_dir(1, "docs")).unwrap();
        let err = restore_file(&inodes, &recipes, &dedup, 1, "/docs").unwrap_err();
        assert!(matches!(err, RestoreError::IsDirectory));
    }
}
