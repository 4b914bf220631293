//! The meta and data front ends: both speak the same framing (user id
//! preamble, then a stream of indicator-tagged frames) and both run the
//! same share-ingest logic against their own `DedupCore` — the
//! reference system keeps these as two separate services only because
//! their buffer/container sizes differ, not because the protocol does.

use std::sync::Arc;

use dispersion_core::protocol::{client_action, decode_i32, decode_user_id, encode_i32, server_status};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::dedup::{
    restore_file, restore_meta_list, BufferRegistry, DedupCore, FileRecipeEntry, FlushedVersion, InodeChildren,
    InodeFileEntry, InodeIndexStore, InodeIndexValue, MetaListEntry, RecipeStore, RestoreError,
};

pub struct ServiceState {
    pub dedup: DedupCore,
    pub buffers: BufferRegistry,
    pub recipes: RecipeStore,
    pub inodes: InodeIndexStore,
}

pub async fn serve(listener: TcpListener, state: Arc<ServiceState>, label: &'static str) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            tracing::info!(%peer, label, "connection accepted");
            if let Err(err) = handle_connection(stream, state).await {
                tracing::warn!(%peer, label, error = %err, "connection handler aborted");
            }
            tracing::info!(%peer, label, "connection closed");
        });
    }
}

async fn read_frame(stream: &mut TcpStream) -> anyhow::Result<Option<(i32, Vec<u8>)>> {
    let mut header = [0u8; 8];
    if let Err(err) = stream.read_exact(&mut header).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(err.into());
    }
    let indicator = decode_i32(header[0..4].try_into().unwrap());
    let len = decode_i32(header[4..8].try_into().unwrap());
    if len < 0 {
        anyhow::bail!("negative frame length {len}");
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(Some((indicator, payload)))
}

async fn write_status(stream: &mut TcpStream, status: i32) -> anyhow::Result<()> {
    stream.write_all(&encode_i32(status)).await?;
    Ok(())
}

/// Terminal markers on the download path share the `indicator ‖ len`
/// frame header with `SEND_DATA` frames (netclient's `request_download`
/// loop always reads a full 8-byte header before deciding whether a
/// frame is a share or the end), so these always carry a zero length
/// rather than the bare 4-byte status `write_status` sends elsewhere.
async fn write_status_frame(stream: &mut TcpStream, status: i32) -> anyhow::Result<()> {
    stream.write_all(&encode_i32(status)).await?;
    stream.write_all(&encode_i32(0)).await?;
    Ok(())
}

/// Wire shape of a share's metadata-only entry frame, the first step of
/// the client-assisted dedup protocol (§4.5): `share_fp[32] ‖
/// secret_id:i64 LE ‖ secret_size:u32 LE ‖ seg_id:u64 LE ‖ share_id:u32
/// LE`. No body travels in this frame; the server answers with
/// `SHARE_DUPLICATE`/`SHARE_NOT_DUPLICATE` before any body is sent.
const SHARE_ENTRY_SIZE: usize = 32 + 8 + 4 + 8 + 4;

fn parse_share_entry(payload: &[u8]) -> anyhow::Result<FileRecipeEntry> {
    if payload.len() < SHARE_ENTRY_SIZE {
        anyhow::bail!("truncated share entry");
    }
    let share_fp = payload[0..32].to_vec();
    let mut off = 32;
    let secret_id = i64::from_le_bytes(payload[off..off + 8].try_into().unwrap());
    off += 8;
    let secret_size = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
    off += 4;
    let seg_id = u64::from_le_bytes(payload[off..off + 8].try_into().unwrap());
    off += 8;
    let share_id = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
    Ok(FileRecipeEntry { share_fp, secret_id, secret_size, seg_id, share_id })
}

/// Wire shape of the body-only follow-up frame a client sends after a
/// `SHARE_NOT_DUPLICATE` reply: `share_fp[32] ‖ body`. The fingerprint
/// is repeated so the server can confirm the follow-up answers the
/// entry it just asked about.
fn parse_share_body(payload: &[u8]) -> anyhow::Result<(&[u8], &[u8])> {
    if payload.len() < 32 {
        anyhow::bail!("truncated share body frame");
    }
    Ok((&payload[0..32], &payload[32..]))
}

/// Fold newly flushed recipe-file locations into the uploader's inode
/// entry for `path`, creating the file inode on first write. Every
/// cloud tracks its own inode index independently, so this runs the
/// same way regardless of which/how many other clouds are configured.
fn register_versions(
    inodes: &InodeIndexStore,
    user_id: u32,
    path: &str,
    versions: Vec<FlushedVersion>,
) -> anyhow::Result<()> {
    if versions.is_empty() {
        return Ok(());
    }
    let short_name = path.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or(path).to_string();
    let mut value = match inodes.get(user_id, path)? {
        Some(v) => v,
        None => InodeIndexValue::new_file(user_id, short_name),
    };
    for version in versions {
        value.push_version(version.recipe_file_name, version.recipe_file_offset)?;
    }
    inodes.put(path, &value)?;
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, state: Arc<ServiceState>) -> anyhow::Result<()> {
    let mut user_id_buf = [0u8; 4];
    stream.read_exact(&mut user_id_buf).await?;
    let user_id = decode_user_id(user_id_buf);
    tracing::debug!(user_id, "user id preamble received");

    // Set by `SEND_FILE_META`, which a client sends once per upload
    // before its chunk shares, so the inode index can be kept current
    // as the per-user buffer flushes (or on connection close).
    let mut current_path: Option<String> = None;

    loop {
        let Some((indicator, payload)) = read_frame(&mut stream).await? else {
            break;
        };

        match indicator {
            client_action::SEND_FILE_META => {
                current_path = Some(String::from_utf8_lossy(&payload).into_owned());
                write_status(&mut stream, server_status::METACORE_END).await?;
            }
            client_action::SEND_META | client_action::SEND_DATA => {
                let entry = match parse_share_entry(&payload) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::warn!(user_id, error = %err, "malformed share entry");
                        write_status(&mut stream, server_status::METACORE_NOT_END).await?;
                        continue;
                    }
                };

                // Every share gets its own recipe entry regardless of
                // dedup decision: `DuplicateSameUser`/`DuplicateOtherUser`
                // only mean the body is already on disk, not that this
                // file's byte sequence doesn't need a slot referencing it
                // (the same content can legitimately recur at multiple
                // offsets, in this file or another one entirely).
                if let Some((decision, _location)) = state.dedup.check_duplicate(user_id, &entry.share_fp)? {
                    tracing::debug!(
                        user_id,
                        share_fp = %hex::encode(&entry.share_fp),
                        decision = ?decision,
                        "share deduplicated without a body transfer"
                    );
                    let versions = state.buffers.push(&state.recipes, user_id, entry)?;
                    if let Some(path) = &current_path {
                        register_versions(&state.inodes, user_id, path, versions)?;
                    }
                    write_status(&mut stream, server_status::SHARE_DUPLICATE).await?;
                    continue;
                }

                write_status(&mut stream, server_status::SHARE_NOT_DUPLICATE).await?;

                let Some((body_indicator, body_payload)) = read_frame(&mut stream).await? else {
                    break;
                };
                if body_indicator != indicator {
                    anyhow::bail!("expected a body follow-up frame, got indicator {body_indicator}");
                }
                let (body_fp, body) = match parse_share_body(&body_payload) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::warn!(user_id, error = %err, "malformed share body frame");
                        write_status(&mut stream, server_status::METACORE_NOT_END).await?;
                        continue;
                    }
                };
                if body_fp != entry.share_fp.as_slice() {
                    anyhow::bail!("body follow-up fingerprint does not match the entry it answers");
                }

                state.dedup.store_new(user_id, &entry.share_fp, body)?;
                tracing::debug!(user_id, share_fp = %hex::encode(&entry.share_fp), "share stored as new");
                let versions = state.buffers.push(&state.recipes, user_id, entry)?;
                if let Some(path) = &current_path {
                    register_versions(&state.inodes, user_id, path, versions)?;
                }
                write_status(&mut stream, server_status::METACORE_END).await?;
            }
            client_action::GET_STAT => {
                write_status(&mut stream, server_status::NOT_LAST_SHARE_SERVER).await?;
            }
            client_action::INIT_DOWNLOAD => {
                let path = String::from_utf8_lossy(&payload).into_owned();
                match restore_file(&state.inodes, &state.recipes, &state.dedup, user_id, &path) {
                    Ok(shares) => {
                        for restored in &shares {
                            let mut frame_payload = restored.entry.encode();
                            frame_payload.extend_from_slice(&(restored.body.len() as u32).to_le_bytes());
                            frame_payload.extend_from_slice(&restored.body);
                            stream.write_all(&encode_i32(client_action::SEND_DATA)).await?;
                            stream.write_all(&encode_i32(frame_payload.len() as i32)).await?;
                            stream.write_all(&frame_payload).await?;
                        }
                        write_status_frame(&mut stream, server_status::END_DOWNLOAD_INDICATOR).await?;
                    }
                    Err(RestoreError::NotFound) | Err(RestoreError::IsDirectory) => {
                        write_status_frame(&mut stream, server_status::NO_DATA_CHUNKS_FOUND).await?;
                    }
                    Err(RestoreError::Core(err)) => {
                        tracing::warn!(user_id, error = %err, "restore failed");
                        write_status_frame(&mut stream, server_status::NO_DATA_CHUNKS_FOUND).await?;
                    }
                }
            }
            client_action::INIT_META_REQUEST => {
                let path = String::from_utf8_lossy(&payload).into_owned();
                match restore_meta_list(&state.inodes, &state.recipes, user_id, &path) {
                    Ok(entries) => {
                        let mut frame_payload = Vec::with_capacity(4 + entries.len() * MetaListEntry::ENCODED_SIZE);
                        frame_payload.extend_from_slice(&(entries.len() as i32).to_le_bytes());
                        for entry in &entries {
                            frame_payload.extend_from_slice(&entry.encode());
                        }
                        stream.write_all(&encode_i32(server_status::SEND_META_LIST)).await?;
                        stream.write_all(&encode_i32(frame_payload.len() as i32)).await?;
                        stream.write_all(&frame_payload).await?;
                        write_status_frame(&mut stream, server_status::END_DOWNLOAD_INDICATOR).await?;
                    }
                    Err(RestoreError::NotFound) | Err(RestoreError::IsDirectory) => {
                        write_status_frame(&mut stream, server_status::NO_DATA_CHUNKS_FOUND).await?;
                    }
                    Err(RestoreError::Core(err)) => {
                        tracing::warn!(user_id, error = %err, "meta list restore failed");
                        write_status_frame(&mut stream, server_status::NO_DATA_CHUNKS_FOUND).await?;
                    }
                }
            }
            _ => {
                tracing::warn!(user_id, indicator, "unrecognized action indicator");
                break;
            }
        }
    }

    let final_versions = state.buffers.flush_user(&state.recipes, user_id)?;
    if let Some(path) = &current_path {
        register_versions(&state.inodes, user_id, path, final_versions)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_share_entry() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[7u8; 32]);
        payload.extend_from_slice(&42i64.to_le_bytes());
        payload.extend_from_slice(&100u32.to_le_bytes());
        payload.extend_from_slice(&1u64.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());

        let entry = parse_share_entry(&payload).unwrap();
        assert_eq!(entry.secret_id, 42);
        assert_eq!(entry.share_fp, vec![7u8; 32]);
    }

    #[test]
    fn rejects_a_truncated_share_entry() {
        assert!(parse_share_entry(&[0u8; 10]).is_err());
    }

    #[test]
    fn parses_a_share_body_follow_up_frame() {
        let mut payload = vec![7u8; 32];
        payload.extend_from_slice(b"hello");
        let (fp, body) = parse_share_body(&payload).unwrap();
        assert_eq!(fp, &[7u8; 32]);
        assert_eq!(body, b"hello");
    }

    #[test]
    fn rejects_a_truncated_share_body_frame() {
        assert!(parse_share_body(&[0u8; 10]).is_err());
    }

    #[test]
    fn register_versions_creates_then_extends_a_file_inode() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let inodes = InodeIndexStore::new(&db, "inodes").unwrap();

        register_versions(
            &inodes,
            1,
            "/report.txt",
            vec![FlushedVersion { recipe_file_name: "0000000000000000".into(), recipe_file_offset: 0 }],
        )
        .unwrap();
        let after_first = inodes.get(1, "/report.txt").unwrap().unwrap();
        assert_eq!(after_first.children, InodeChildren::File(vec![InodeFileEntry {
            recipe_file_name: "0000000000000000".into(),
            recipe_file_offset: 0,
        }]));

        register_versions(
            &inodes,
            1,
            "/report.txt",
            vec![FlushedVersion { recipe_file_name: "0000000000000001".into(), recipe_file_offset: 4096 }],
        )
        .unwrap();
        let after_second = inodes.get(1, "/report.txt").unwrap().unwrap();
        match after_second.children {
            InodeChildren::File(entries) => assert_eq!(entries.len(), 2),
            InodeChildren::Dir(_) => panic!("expected a file inode"),
        }
    }

    #[test]
    fn register_versions_is_a_no_op_with_no_flushed_versions() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let inodes = InodeIndexStore::new(&db, "inodes").unwrap();
        register_versions(&inodes, 1, "/report.txt", Vec::new()).unwrap();
        assert!(inodes.get(1, "/report.txt").unwrap().is_none());
    }
}
