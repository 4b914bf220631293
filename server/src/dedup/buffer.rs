//! Per-user buffering: recipe entries for one user accumulate in
//! memory and are flushed to the recipe store as one batch, either
//! once the batch would exceed `BUFFER_FLUSH_SIZE` or once the user's
//! connection has been idle past `BUFFER_IDLE_TIMEOUT` — the latter is
//! normal operation, not an error, so a short upload that never fills
//! a full container still lands on disk promptly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dispersion_core::error::CoreError;

use super::model::FileRecipeEntry;
use super::recipe::RecipeStore;

pub const BUFFER_FLUSH_SIZE: usize = 4 * 1024 * 1024;
pub const BUFFER_IDLE_TIMEOUT: Duration = Duration::from_secs(18);

struct PerUserBufferNode {
    pending: Vec<FileRecipeEntry>,
    pending_bytes: usize,
    last_use: Instant,
}

impl PerUserBufferNode {
    fn new() -> Self {
        PerUserBufferNode { pending: Vec::new(), pending_bytes: 0, last_use: Instant::now() }
    }
}

/// One rolled-over recipe file produced by a flush, to hand to the
/// inode index as a new version entry.
pub struct FlushedVersion {
    pub recipe_file_name: String,
    pub recipe_file_offset: u32,
}

pub struct BufferRegistry {
    nodes: Mutex<HashMap<u32, PerUserBufferNode>>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        BufferRegistry { nodes: Mutex::new(HashMap::new()) }
    }

    /// Queue one recipe entry for `user_id`, flushing immediately if
    /// this push would exceed `BUFFER_FLUSH_SIZE`.
    pub fn push(
        &self,
        recipes: &RecipeStore,
        user_id: u32,
        entry: FileRecipeEntry,
    ) -> Result<Vec<FlushedVersion>, CoreError> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.entry(user_id).or_insert_with(PerUserBufferNode::new);

        let entry_size = FileRecipeEntry::ENCODED_SIZE;
        if node.pending_bytes + entry_size > BUFFER_FLUSH_SIZE {
            let pending = std::mem::take(&mut node.pending);
            node.pending_bytes = 0;
            node.last_use = Instant::now();
            drop(nodes);
            let versions = self.drain_to_store(recipes, pending)?;

            let mut nodes = self.nodes.lock().unwrap();
            let node = nodes.entry(user_id).or_insert_with(PerUserBufferNode::new);
            node.pending.push(entry);
            node.pending_bytes += entry_size;
            node.last_use = Instant::now();
            return Ok(versions);
        }

        node.pending.push(entry);
        node.pending_bytes += entry_size;
        node.last_use = Instant::now();
        Ok(Vec::new())
    }

    fn drain_to_store(
        &self,
        recipes: &RecipeStore,
        pending: Vec<FileRecipeEntry>,
    ) -> Result<Vec<FlushedVersion>, CoreError> {
        let mut versions = Vec::new();
        for entry in &pending {
            if let Some((name, offset)) = recipes.append(entry)? {
                versions.push(FlushedVersion { recipe_file_name: name, recipe_file_offset: offset });
            }
        }
        Ok(versions)
    }

    /// Force-flush one user's buffer regardless of size, used on
    /// upload completion so the last partial batch isn't left pending.
    pub fn flush_user(&self, recipes: &RecipeStore, user_id: u32) -> Result<Vec<FlushedVersion>, CoreError> {
        let pending = {
            let mut nodes = self.nodes.lock().unwrap();
            match nodes.get_mut(&user_id) {
                Some(node) => {
                    node.last_use = Instant::now();
                    node.pending_bytes = 0;
                    std::mem::take(&mut node.pending)
                }
                None => return Ok(Vec::new()),
            }
        };
        self.drain_to_store(recipes, pending)
    }

    /// Flush every user whose buffer has been idle past
    /// `BUFFER_IDLE_TIMEOUT`; meant to run periodically on a sweeper
    /// task.
    pub fn sweep_idle(&self, recipes: &RecipeStore) -> Result<Vec<FlushedVersion>, CoreError> {
        let due: Vec<u32> = {
            let nodes = self.nodes.lock().unwrap();
            nodes
                .iter()
                .filter(|(_, node)| !node.pending.is_empty() && node.last_use.elapsed() >= BUFFER_IDLE_TIMEOUT)
                .map(|(id, _)| *id)
                .collect()
        };
        let mut versions = Vec::new();
        for user_id in due {
            versions.extend(self.flush_user(recipes, user_id)?);
        }
        Ok(versions)
    }
}

impl Default for BufferRegistry {
    fn default() -> Self {
        BufferRegistry::new()
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
    fn push_buffers_without_flushing_until_forced() {
        let dir = tempdir().unwrap();
        let recipes = RecipeStore::new(dir.path()).unwrap();
        let registry = BufferRegistry::new();
        let versions = registry.push(&recipes, 1, entry(1)).unwrap();
        assert!(versions.is_empty());
    }

    #[test]
    fn flush_user_drains_pending_entries_to_disk() {
        let dir = tempdir().unwrap();
        let recipes = RecipeStore::new(dir.path()).unwrap();
        let registry = BufferRegistry::new();
        registry.push(&recipes, 1, entry(1)).unwrap();
        registry.push(&recipes, 1, entry(2)).unwrap();
        let versions = registry.flush_user(&recipes, 1).unwrap();
        assert_eq!(versions.len(), 1);
        let all = recipes.read_all(&versions[0].recipe_file_name).unwrap();
        assert_eq!(all, vec![entry(1), entry(2)]);
    }

    #[test]
    fn sweep_idle_skips_users_below_the_timeout() {
        let dir = tempdir().unwrap();
        let recipes = RecipeStore::new(dir.path()).unwrap();
        let registry = BufferRegistry::new();
        registry.push(&recipes, 1, entry(1)).unwrap();
        let versions = registry.sweep_idle(&recipes).unwrap();
        assert!(versions.is_empty());
    }
}
