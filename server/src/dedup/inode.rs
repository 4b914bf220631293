//! First-stage (intra-user) dedup index: one entry per path component a
//! user has stored, distinguishing directories (whose value lists child
//! fingerprints) from files (whose value lists recipe-file locations,
//! one per version/rollover).

use dispersion_core::error::CoreError;

use super::model::{InodeFileEntry, FP_SIZE, INTERNAL_FILE_NAME_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    Dir,
    File,
}

impl InodeType {
    fn tag(self) -> u8 {
        match self {
            InodeType::Dir => 0,
            InodeType::File => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CoreError> {
        match tag {
            0 => Ok(InodeType::Dir),
            1 => Ok(InodeType::File),
            other => Err(CoreError::Protocol(format!("unknown inode type tag {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeChildren {
    Dir(Vec<Vec<u8>>),          // child inode fingerprints
    File(Vec<InodeFileEntry>),  // one entry per version
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeIndexValue {
    pub user_id: u32,
    pub short_name: String,
    pub children: InodeChildren,
}

impl InodeIndexValue {
    pub fn inode_type(&self) -> InodeType {
        match self.children {
            InodeChildren::Dir(_) => InodeType::Dir,
            InodeChildren::File(_) => InodeType::File,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let name_bytes = self.short_name.as_bytes();
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.user_id.to_le_bytes());
        buf.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        buf.push(self.inode_type().tag());
        match &self.children {
            InodeChildren::Dir(fps) => {
                buf.extend_from_slice(&(fps.len() as u32).to_le_bytes());
                buf.extend_from_slice(name_bytes);
                for fp in fps {
                    buf.extend_from_slice(fp);
                }
            }
            InodeChildren::File(entries) => {
                buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
                buf.extend_from_slice(name_bytes);
                for entry in entries {
                    let mut name = [0u8; INTERNAL_FILE_NAME_SIZE];
                    let src = entry.recipe_file_name.as_bytes();
                    let n = src.len().min(INTERNAL_FILE_NAME_SIZE);
                    name[..n].copy_from_slice(&src[..n]);
                    buf.extend_from_slice(&name);
                    buf.extend_from_slice(&entry.recipe_file_offset.to_le_bytes());
                }
            }
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < 13 {
            return Err(CoreError::Protocol("truncated inode index value".into()));
        }
        let user_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let name_len = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
        let inode_type = InodeType::from_tag(buf[8])?;
        let num_children = u32::from_le_bytes(buf[9..13].try_into().unwrap()) as usize;
        let mut off = 13;
        if buf.len() < off + name_len {
            return Err(CoreError::Protocol("truncated inode short name".into()));
        }
        let short_name = String::from_utf8_lossy(&buf[off..off + name_len]).into_owned();
        off += name_len;

        let children = match inode_type {
            InodeType::Dir => {
                let mut fps = Vec::with_capacity(num_children);
                for _ in 0..num_children {
                    if buf.len() < off + FP_SIZE {
                        return Err(CoreError::Protocol("truncated inode child fp".into()));
                    }
                    fps.push(buf[off..off + FP_SIZE].to_vec());
                    off += FP_SIZE;
                }
                InodeChildren::Dir(fps)
            }
            InodeType::File => {
                let mut entries = Vec::with_capacity(num_children);
                for _ in 0..num_children {
                    if buf.len() < off + INTERNAL_FILE_NAME_SIZE + 4 {
                        return Err(CoreError::Protocol("truncated inode file entry".into()));
                    }
                    let name_bytes = &buf[off..off + INTERNAL_FILE_NAME_SIZE];
                    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(INTERNAL_FILE_NAME_SIZE);
                    let recipe_file_name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
                    off += INTERNAL_FILE_NAME_SIZE;
                    let recipe_file_offset = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
                    off += 4;
                    entries.push(InodeFileEntry { recipe_file_name, recipe_file_offset });
                }
                InodeChildren::File(entries)
            }
        };

        Ok(InodeIndexValue { user_id, short_name, children })
    }

    pub fn new_file(user_id: u32, short_name: impl Into<String>) -> Self {
        InodeIndexValue { user_id, short_name: short_name.into(), children: InodeChildren::File(Vec::new()) }
    }

    pub fn new_dir(user_id: u32, short_name: impl Into<String>) -> Self {
        InodeIndexValue { user_id, short_name: short_name.into(), children: InodeChildren::Dir(Vec::new()) }
    }

    /// Append a new recipe-file location, used on every rollover (the
    /// current recipe file exceeding its segment limit) as well as on
    /// first write.
    pub fn push_version(&mut self, recipe_file_name: impl Into<String>, offset: u32) -> Result<(), CoreError> {
        match &mut self.children {
            InodeChildren::File(entries) => {
                entries.push(InodeFileEntry { recipe_file_name: recipe_file_name.into(), recipe_file_offset: offset });
                Ok(())
            }
            InodeChildren::Dir(_) => Err(CoreError::Precondition("cannot push a version onto a directory inode".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::model::lex16_name;

    #[test]
    fn file_inode_roundtrips() {
        let mut value = InodeIndexValue::new_file(3, "report.txt");
        value.push_version(lex16_name(1), 0).unwrap();
        value.push_version(lex16_name(2), 4096).unwrap();
        let encoded = value.encode();
        let decoded = InodeIndexValue::decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn dir_inode_roundtrips() {
        let value = InodeIndexValue {
            user_id: 1,
            short_name: "docs".into(),
            children: InodeChildren::Dir(vec![vec![1u8; FP_SIZE], vec![2u8; FP_SIZE]]),
        };
        let encoded = value.encode();
        let decoded = InodeIndexValue::decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn pushing_a_version_onto_a_directory_is_rejected() {
        let mut value = InodeIndexValue::new_dir(1, "docs");
        assert!(value.push_version(lex16_name(1), 0).is_err());
    }
}
