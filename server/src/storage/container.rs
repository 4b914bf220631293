//! Share containers: append-only 4MiB blobs that pack many small
//! shares together so the filesystem never sees one file per share.
//! Mirrors the reference system's container writer, which keeps a
//! single open container file per cloud and rolls over to a fresh
//! 16-byte-named file once the current one reaches its target size.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

use crate::dedup::model::lex16_name;

/// Target container size; matches the 4MiB buffer the reference
/// implementation accumulates per user before flushing to disk.
pub const CONTAINER_SIZE: u64 = 4 * 1024 * 1024;

/// How many containers the read-side LRU keeps warm in memory.
pub const NUM_OF_CACHED_CONTAINERS: usize = 4;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container not found: {0}")]
    NotFound(String),
}

struct OpenContainer {
    name: String,
    file: File,
    offset: u64,
}

/// Append-only writer side: hands out `(container_name, offset)` for
/// each share written, rolling to a new container once the current one
/// would exceed `CONTAINER_SIZE`.
pub struct ContainerStore {
    base_path: PathBuf,
    next_counter: Mutex<u64>,
    current: Mutex<Option<OpenContainer>>,
}

impl ContainerStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, ContainerError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(ContainerStore { base_path, next_counter: Mutex::new(0), current: Mutex::new(None) })
    }

    fn container_path(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    /// Append `body` to the currently open container, opening a fresh
    /// one first if none is open or the current one is full. Returns
    /// the container's name and the byte offset the share was written
    /// at.
    pub fn append(&self, body: &[u8]) -> Result<(String, u32), ContainerError> {
        let mut current = self.current.lock().unwrap();

        let needs_new = match &*current {
            None => true,
            Some(open) => open.offset + body.len() as u64 > CONTAINER_SIZE,
        };

        if needs_new {
            let mut counter = self.next_counter.lock().unwrap();
            let name = lex16_name(*counter);
            *counter += 1;
            let path = self.container_path(&name);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *current = Some(OpenContainer { name, file, offset: 0 });
        }

        let open = current.as_mut().unwrap();
        let offset = open.offset as u32;
        open.file.write_all(body)?;
        open.file.sync_data()?;
        open.offset += body.len() as u64;

        Ok((open.name.clone(), offset))
    }

    /// Read one share's bytes out of a container by name/offset/size.
    pub fn read_at(&self, name: &str, offset: u32, size: u32) -> Result<Vec<u8>, ContainerError> {
        let path = self.container_path(name);
        let mut file = File::open(&path).map_err(|_| ContainerError::NotFound(name.to_string()))?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_full(&self, name: &str) -> Result<Vec<u8>, ContainerError> {
        let path = self.container_path(name);
        fs::read(&path).map_err(|_| ContainerError::NotFound(name.to_string()))
    }
}

/// Read-side LRU cache over whole container contents, sized to
/// `NUM_OF_CACHED_CONTAINERS`. Reusing a warm container avoids reopening
/// the same file for every share belonging to it during a bulk restore.
pub struct ShareContainerCache {
    capacity: usize,
    entries: Mutex<VecDeque<(String, std::sync::Arc<Vec<u8>>)>>,
}

impl ShareContainerCache {
    pub fn new() -> Self {
        ShareContainerCache::with_capacity(NUM_OF_CACHED_CONTAINERS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ShareContainerCache { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Fetch a container's bytes, reading through `store` on a miss and
    /// evicting the least-recently-used entry if the cache is full.
    pub fn get_or_load(&self, store: &ContainerStore, name: &str) -> Result<std::sync::Arc<Vec<u8>>, ContainerError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(pos) = entries.iter().position(|(n, _)| n == name) {
            let (n, data) = entries.remove(pos).unwrap();
            entries.push_back((n, data.clone()));
            return Ok(data);
        }
        drop(entries);

        let data = std::sync::Arc::new(store.read_full(name)?);

        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back((name.to_string(), data.clone()));
        Ok(data)
    }
}

impl Default for ShareContainerCache {
    fn default() -> Self {
        ShareContainerCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_back_a_share() {
        let dir = tempdir().unwrap();
        let store = ContainerStore::new(dir.path()).unwrap();
        let (name, offset) = store.append(b"hello share").unwrap();
        let read = store.read_at(&name, offset, b"hello share".len() as u32).unwrap();
        assert_eq!(read, b"hello share");
    }

    #[test]
    fn rolls_to_a_new_container_past_the_size_target() {
        let dir = tempdir().unwrap();
        let store = ContainerStore::new(dir.path()).unwrap();
        let chunk = vec![0xAAu8; (CONTAINER_SIZE - 10) as usize];
        let (first_name, _) = store.append(&chunk).unwrap();
        let (second_name, second_offset) = store.append(b"overflow").unwrap();
        assert_ne!(first_name, second_name);
        assert_eq!(second_offset, 0);
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let dir = tempdir().unwrap();
        let store = ContainerStore::new(dir.path()).unwrap();
        let cache = ShareContainerCache::with_capacity(2);

        let (n0, _) = store.append(b"a").unwrap();
        let (n1, _) = store.append(&vec![0u8; CONTAINER_SIZE as usize]).unwrap();
        let (n2, _) = store.append(b"c").unwrap();

        cache.get_or_load(&store, &n0).unwrap();
        cache.get_or_load(&store, &n1).unwrap();
        cache.get_or_load(&store, &n2).unwrap(); // evicts n0

        let entries = cache.entries.lock().unwrap();
        assert!(!entries.iter().any(|(n, _)| n == &n0));
        assert!(entries.iter().any(|(n, _)| n == &n1));
        assert!(entries.iter().any(|(n, _)| n == &n2));
    }
}
