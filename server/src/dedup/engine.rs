//! The two-stage deduplication engine shared by the meta and data
//! services (`DedupCore` / `minDedupCore` in the reference system,
//! which differ only in buffer/container sizing — expressed here as
//! two `DedupCore` instances configured with different container
//! roots, rather than two separate types).
//!
//! Stage one is an intra-user check: has this user already stored a
//! share with this fingerprint? If so the share body never needs to be
//! looked up or compared again, just appended to this user's recipe.
//! Stage two is the inter-user/storage check against the global share
//! fingerprint index: if another user already stored identical share
//! bytes, bump its reference count and append the stored location to
//! this user's recipe without writing the body again; otherwise the
//! share is genuinely new and gets appended to a container.

use std::collections::HashSet;
use std::sync::Mutex;

use dispersion_core::error::CoreError;

use crate::storage::container::ContainerStore;

use super::model::ShareIndexValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// Genuinely new content: the caller must write the share body.
    New,
    /// This user already holds this exact share (stage one hit).
    DuplicateSameUser,
    /// Another user already holds this exact share (stage two hit);
    /// the reference count has been bumped for this user.
    DuplicateOtherUser,
}

/// Where a share's body lives once dedup has resolved a decision,
/// whether newly written or already on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLocation {
    pub container_name: String,
    pub container_offset: u32,
    pub share_size: u32,
}

pub struct DedupCore {
    index: sled::Tree,
    container_store: ContainerStore,
    intra_user_seen: Mutex<HashSet<(u32, Vec<u8>)>>,
}

impl DedupCore {
    pub fn new(db: &sled::Db, tree_name: &str, container_store: ContainerStore) -> Result<Self, sled::Error> {
        let index = db.open_tree(tree_name)?;
        Ok(DedupCore { index, container_store, intra_user_seen: Mutex::new(HashSet::new()) })
    }

    fn lookup(&self, fp: &[u8]) -> Result<Option<ShareIndexValue>, CoreError> {
        match self.index.get(fp).map_err(|e| CoreError::Internal(e.to_string()))? {
            Some(bytes) => Ok(Some(ShareIndexValue::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store(&self, fp: &[u8], value: &ShareIndexValue) -> Result<(), CoreError> {
        self.index
            .insert(fp, value.encode())
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(())
    }

    /// Stage one/stage two dedup check against `fp` alone, with no body
    /// in hand: this is what lets the client-assisted protocol (§4.5)
    /// decide whether a share needs its body sent at all. A hit fully
    /// commits the decision (ref count bumped, intra-user cache marked)
    /// since the fingerprint alone identifies the content; only a miss
    /// (`None`, meaning the content is genuinely new) defers anything,
    /// namely the body write that `store_new` performs.
    pub fn check_duplicate(&self, user_id: u32, fp: &[u8]) -> Result<Option<(DedupDecision, ShareLocation)>, CoreError> {
        {
            let mut seen = self.intra_user_seen.lock().unwrap();
            let key = (user_id, fp.to_vec());
            if seen.contains(&key) {
                if let Some(existing) = self.lookup(fp)? {
                    return Ok(Some((
                        DedupDecision::DuplicateSameUser,
                        ShareLocation {
                            container_name: existing.container_name,
                            container_offset: existing.container_offset,
                            share_size: existing.share_size,
                        },
                    )));
                }
            }
            seen.insert(key);
        }

        if let Some(mut existing) = self.lookup(fp)? {
            let already_counted = existing.user_refs.iter().any(|(u, _)| *u == user_id);
            existing.bump_user(user_id);
            self.store(fp, &existing)?;
            let location = ShareLocation {
                container_name: existing.container_name,
                container_offset: existing.container_offset,
                share_size: existing.share_size,
            };
            let decision = if already_counted { DedupDecision::DuplicateSameUser } else { DedupDecision::DuplicateOtherUser };
            return Ok(Some((decision, location)));
        }

        Ok(None)
    }

    /// Write a genuinely new share's body to a container and index it.
    /// Callers must have already gotten a `None` from `check_duplicate`
    /// for this `fp`; this never re-checks.
    pub fn store_new(&self, user_id: u32, fp: &[u8], body: &[u8]) -> Result<ShareLocation, CoreError> {
        let (container_name, container_offset) = self.container_store.append(body)?;
        let value = ShareIndexValue {
            container_name: container_name.clone(),
            container_offset,
            share_size: body.len() as u32,
            user_refs: vec![(user_id, 1)],
        };
        self.store(fp, &value)?;
        Ok(ShareLocation { container_name, container_offset, share_size: body.len() as u32 })
    }

    /// Decide how to handle one incoming share for `user_id`, writing
    /// its body and updating the index as needed. Returns the decision
    /// plus the location the caller should record in that user's
    /// recipe. A convenience wrapper over `check_duplicate`/`store_new`
    /// for callers that already have the body in hand.
    pub fn process_share(
        &self,
        user_id: u32,
        fp: &[u8],
        body: &[u8],
    ) -> Result<(DedupDecision, ShareLocation), CoreError> {
        if let Some(hit) = self.check_duplicate(user_id, fp)? {
            return Ok(hit);
        }
        let location = self.store_new(user_id, fp, body)?;
        Ok((DedupDecision::New, location))
    }

    /// Look up a previously-stored share's location without affecting
    /// reference counts or the intra-user cache; used by the restore
    /// path, which already knows the fingerprint from a recipe entry.
    pub fn location_of(&self, fp: &[u8]) -> Result<Option<ShareLocation>, CoreError> {
        Ok(self.lookup(fp)?.map(|v| ShareLocation {
            container_name: v.container_name,
            container_offset: v.container_offset,
            share_size: v.share_size,
        }))
    }

    pub fn read_share(&self, location: &ShareLocation) -> Result<Vec<u8>, CoreError> {
        self.container_store
            .read_at(&location.container_name, location.container_offset, location.share_size)
            .map_err(|e| CoreError::Internal(e.to_string()))
    }

    /// Total reference count recorded for a fingerprint, across all
    /// users who hold it. Zero if the fingerprint is unknown.
    pub fn ref_count(&self, fp: &[u8]) -> Result<u32, CoreError> {
        Ok(self.lookup(fp)?.map(|v| v.total_ref_count()).unwrap_or(0))
    }
}

impl From<crate::storage::container::ContainerError> for CoreError {
    fn from(err: crate::storage::container::ContainerError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine(dir: &std::path::Path) -> DedupCore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let containers = ContainerStore::new(dir.join("containers")).unwrap();
        DedupCore::new(&db, "shares", containers).unwrap()
    }

    #[test]
    fn new_share_is_written_once() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let fp = vec![1u8; 32];
        let (decision, location) = engine.process_share(1, &fp, b"payload").unwrap();
        assert_eq!(decision, DedupDecision::New);
        assert_eq!(engine.read_share(&location).unwrap(), b"payload");
        assert_eq!(engine.ref_count(&fp).unwrap(), 1);
    }

    #[test]
    fn same_user_reupload_is_stage_one_duplicate() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let fp = vec![2u8; 32];
        engine.process_share(1, &fp, b"payload").unwrap();
        let (decision, _) = engine.process_share(1, &fp, b"payload").unwrap();
        assert_eq!(decision, DedupDecision::DuplicateSameUser);
        assert_eq!(engine.ref_count(&fp).unwrap(), 1);
    }

    #[test]
    fn check_duplicate_is_none_for_new_content_and_store_new_writes_it() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let fp = vec![9u8; 32];
        assert!(engine.check_duplicate(1, &fp).unwrap().is_none());
        let location = engine.store_new(1, &fp, b"payload").unwrap();
        assert_eq!(engine.read_share(&location).unwrap(), b"payload");

        let (decision, _) = engine.check_duplicate(1, &fp).unwrap().unwrap();
        assert_eq!(decision, DedupDecision::DuplicateSameUser);
    }

    #[test]
    fn other_user_reupload_is_stage_two_duplicate_and_bumps_ref_count() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let fp = vec![3u8; 32];
        engine.process_share(1, &fp, b"payload").unwrap();
        let (decision, location) = engine.process_share(2, &fp, b"payload").unwrap();
        assert_eq!(decision, DedupDecision::DuplicateOtherUser);
        assert_eq!(engine.ref_count(&fp).unwrap(), 2);
        assert_eq!(engine.read_share(&location).unwrap(), b"payload");
    }
}
