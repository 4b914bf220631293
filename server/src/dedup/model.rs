//! The on-disk record shapes for one cloud's deduplication store:
//! share fingerprint index entries, inode index entries, file recipes
//! and share containers. Mirrors `dataStruct.hh`'s typedefs, which are
//! packed C structs on disk; here each gets an explicit little-endian
//! encode/decode pair instead of a `memcpy`'d struct, since Rust gives
//! no layout guarantee equivalent to C's.

use dispersion_core::error::CoreError;

/// Internal file names (recipe files, share containers) are a fixed
/// 16-byte identifier, lexically monotonic so a directory listing
/// sorts them in creation order.
pub const INTERNAL_FILE_NAME_SIZE: usize = 16;

pub const FP_SIZE: usize = 32;

/// Render a monotonically increasing file id (e.g. a per-user recipe
/// sequence number) as a fixed-width, lexicographically sortable name.
pub fn lex16_name(counter: u64) -> String {
    format!("{counter:016x}")
}

/// One entry in the share fingerprint index: where a share's body
/// lives, and which users currently reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareIndexValue {
    pub container_name: String,
    pub container_offset: u32,
    pub share_size: u32,
    pub user_refs: Vec<(u32, u32)>, // (user_id, ref_count)
}

impl ShareIndexValue {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INTERNAL_FILE_NAME_SIZE + 12 + self.user_refs.len() * 8);
        let mut name_bytes = [0u8; INTERNAL_FILE_NAME_SIZE];
        let src = self.container_name.as_bytes();
        let n = src.len().min(INTERNAL_FILE_NAME_SIZE);
        name_bytes[..n].copy_from_slice(&src[..n]);
        buf.extend_from_slice(&name_bytes);
        buf.extend_from_slice(&self.container_offset.to_le_bytes());
        buf.extend_from_slice(&self.share_size.to_le_bytes());
        buf.extend_from_slice(&(self.user_refs.len() as u32).to_le_bytes());
        for (user_id, ref_cnt) in &self.user_refs {
            buf.extend_from_slice(&user_id.to_le_bytes());
            buf.extend_from_slice(&ref_cnt.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < INTERNAL_FILE_NAME_SIZE + 12 {
            return Err(CoreError::Protocol("truncated share index value".into()));
        }
        let name_bytes = &buf[..INTERNAL_FILE_NAME_SIZE];
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(INTERNAL_FILE_NAME_SIZE);
        let container_name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
        let mut off = INTERNAL_FILE_NAME_SIZE;
        let container_offset = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let share_size = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let count = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()) as usize;
        off += 4;
        let mut user_refs = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.len() < off + 8 {
                return Err(CoreError::Protocol("truncated share index user-ref list".into()));
            }
            let user_id = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            let ref_cnt = u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap());
            user_refs.push((user_id, ref_cnt));
            off += 8;
        }
        Ok(ShareIndexValue { container_name, container_offset, share_size, user_refs })
    }

    pub fn bump_user(&mut self, user_id: u32) {
        if let Some(entry) = self.user_refs.iter_mut().find(|(u, _)| *u == user_id) {
            entry.1 += 1;
        } else {
            self.user_refs.push((user_id, 1));
        }
    }

    pub fn total_ref_count(&self) -> u32 {
        self.user_refs.iter().map(|(_, c)| *c).sum()
    }
}

/// One recipe entry: which share, from which secret, lives at this
/// position in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecipeEntry {
    pub share_fp: Vec<u8>,
    pub secret_id: i64,
    pub secret_size: u32,
    pub seg_id: u64,
    pub share_id: u32,
}

impl FileRecipeEntry {
    pub const ENCODED_SIZE: usize = FP_SIZE + 8 + 4 + 8 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.extend_from_slice(&self.share_fp);
        buf.extend_from_slice(&self.secret_id.to_le_bytes());
        buf.extend_from_slice(&self.secret_size.to_le_bytes());
        buf.extend_from_slice(&self.seg_id.to_le_bytes());
        buf.extend_from_slice(&self.share_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < Self::ENCODED_SIZE {
            return Err(CoreError::Protocol("truncated recipe entry".into()));
        }
        let share_fp = buf[0..FP_SIZE].to_vec();
        let mut off = FP_SIZE;
        let secret_id = i64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let secret_size = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let seg_id = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let share_id = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        Ok(FileRecipeEntry { share_fp, secret_id, secret_size, seg_id, share_id })
    }
}

/// Header prefixing every file recipe: owner, total size, share count.
#[derive(Debug, Clone, Copy)]
pub struct FileRecipeHead {
    pub user_id: u32,
    pub file_size: u64,
    pub num_shares: u32,
}

impl FileRecipeHead {
    pub const ENCODED_SIZE: usize = 4 + 8 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.extend_from_slice(&self.user_id.to_le_bytes());
        buf.extend_from_slice(&self.file_size.to_le_bytes());
        buf.extend_from_slice(&self.num_shares.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < Self::ENCODED_SIZE {
            return Err(CoreError::Protocol("truncated recipe head".into()));
        }
        let user_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let file_size = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        let num_shares = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        Ok(FileRecipeHead { user_id, file_size, num_shares })
    }
}

/// An inode index value's file-entry list points at `(recipe file,
/// offset)` for every version of a file, one entry per secret-id
/// rollover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeFileEntry {
    pub recipe_file_name: String,
    pub recipe_file_offset: u32,
}

/// A short summary line for `MetaList`: for one share-id stream, the
/// last secret id already delivered, so a resumed download can skip
/// shares the client already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaListEntry {
    pub id: i32,
    pub share_id: i32,
    pub end_secret_id: i64,
}

impl MetaListEntry {
    pub const ENCODED_SIZE: usize = 4 + 4 + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.share_id.to_le_bytes());
        buf.extend_from_slice(&self.end_secret_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < Self::ENCODED_SIZE {
            return Err(CoreError::Protocol("truncated meta list entry".into()));
        }
        let id = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let share_id = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        let end_secret_id = i64::from_le_bytes(buf[8..16].try_into().unwrap());
        Ok(MetaListEntry { id, share_id, end_secret_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_index_value_roundtrips() {
        let value = ShareIndexValue {
            container_name: lex16_name(7),
            container_offset: 1024,
            share_size: 512,
            user_refs: vec![(1, 3), (2, 1)],
        };
        let encoded = value.encode();
        let decoded = ShareIndexValue::decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn bump_user_adds_or_increments() {
        let mut value = ShareIndexValue {
            container_name: lex16_name(0),
            container_offset: 0,
            share_size: 0,
            user_refs: vec![],
        };
        value.bump_user(9);
        value.bump_user(9);
        value.bump_user(10);
        assert_eq!(value.total_ref_count(), 3);
    }

    #[test]
    fn recipe_entry_roundtrips() {
        let entry = FileRecipeEntry {
            share_fp: vec![0xAB; FP_SIZE],
            secret_id: 42,
            secret_size: 1000,
            seg_id: 7,
            share_id: 2,
        };
        let encoded = entry.encode();
        assert_eq!(encoded.len(), FileRecipeEntry::ENCODED_SIZE);
        let decoded = FileRecipeEntry::decode(&encoded).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn meta_list_entry_roundtrips() {
        let entry = MetaListEntry { id: 3, share_id: 1, end_secret_id: 42 };
        let encoded = entry.encode();
        assert_eq!(encoded.len(), MetaListEntry::ENCODED_SIZE);
        assert_eq!(MetaListEntry::decode(&encoded).unwrap(), entry);
    }

    #[test]
    fn lex16_names_sort_monotonically() {
        let a = lex16_name(1);
        let b = lex16_name(2);
        let c = lex16_name(16);
        let mut names = vec![c.clone(), a.clone(), b.clone()];
        names.sort();
        assert_eq!(names, vec![a, b, c]);
    }
}
