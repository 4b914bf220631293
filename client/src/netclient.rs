//! Plain-TCP client side of the meta/data protocol: connect, send the
//! big-endian user id preamble once, then a stream of little-endian
//! indicator-tagged frames. Mirrors `dispersion_core::protocol`'s frame
//! shape from the sending side.

use std::io::{Read, Write};
use std::net::TcpStream;

use dispersion_core::protocol::{client_action, decode_i32, encode_i32, encode_user_id, server_status};

pub struct FrontendConnection {
    stream: TcpStream,
}

impl FrontendConnection {
    pub fn connect(addr: &str, user_id: u32) -> std::io::Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        stream.write_all(&encode_user_id(user_id))?;
        Ok(FrontendConnection { stream })
    }

    /// Send one share through the client-assisted dedup protocol (§4.5):
    /// first an entry-only frame (`fp[32] ‖ secret_id:i64 LE ‖
    /// secret_size:u32 LE ‖ seg_id:u64 LE ‖ share_id:u32 LE`, no body).
    /// If the server already has this fingerprint it replies
    /// `SHARE_DUPLICATE` and the body is never sent. Otherwise it
    /// replies `SHARE_NOT_DUPLICATE` and this follows up with a
    /// body-only frame (`fp[32] ‖ body`) that the final status answers.
    pub fn send_share(
        &mut self,
        indicator: i32,
        fp: &[u8],
        secret_id: i64,
        secret_size: u32,
        seg_id: u64,
        share_id: u32,
        body: &[u8],
    ) -> std::io::Result<i32> {
        let mut entry = Vec::with_capacity(32 + 8 + 4 + 8 + 4);
        entry.extend_from_slice(fp);
        entry.extend_from_slice(&secret_id.to_le_bytes());
        entry.extend_from_slice(&secret_size.to_le_bytes());
        entry.extend_from_slice(&seg_id.to_le_bytes());
        entry.extend_from_slice(&share_id.to_le_bytes());

        self.stream.write_all(&encode_i32(indicator))?;
        self.stream.write_all(&encode_i32(entry.len() as i32))?;
        self.stream.write_all(&entry)?;

        let mut status = [0u8; 4];
        self.stream.read_exact(&mut status)?;
        let first = decode_i32(status);

        if first != server_status::SHARE_NOT_DUPLICATE {
            // Already on disk under this fingerprint; the server
            // recorded the recipe entry from the metadata alone.
            return Ok(first);
        }

        let mut body_frame = Vec::with_capacity(32 + body.len());
        body_frame.extend_from_slice(fp);
        body_frame.extend_from_slice(body);

        self.stream.write_all(&encode_i32(indicator))?;
        self.stream.write_all(&encode_i32(body_frame.len() as i32))?;
        self.stream.write_all(&body_frame)?;

        self.stream.read_exact(&mut status)?;
        Ok(decode_i32(status))
    }

    /// Announce the path an upload's shares belong to. Sent once before
    /// a file's shares so the server can fold its own buffer flushes
    /// into an inode entry for that path as they happen, rather than
    /// needing the plaintext name decoded out of a share body.
    pub fn send_file_meta(&mut self, path: &str) -> std::io::Result<i32> {
        self.stream.write_all(&encode_i32(client_action::SEND_FILE_META))?;
        self.stream.write_all(&encode_i32(path.len() as i32))?;
        self.stream.write_all(path.as_bytes())?;

        let mut status = [0u8; 4];
        self.stream.read_exact(&mut status)?;
        Ok(decode_i32(status))
    }

    /// Request a restore of `path`, reading back the stream of shares
    /// the server sends until the terminating status indicator.
    pub fn request_download(&mut self, path: &str) -> std::io::Result<Vec<(i64, u32, u64, u32, Vec<u8>)>> {
        self.stream.write_all(&encode_i32(client_action::INIT_DOWNLOAD))?;
        self.stream.write_all(&encode_i32(path.len() as i32))?;
        self.stream.write_all(path.as_bytes())?;

        let mut shares = Vec::new();
        loop {
            let mut header = [0u8; 8];
            self.stream.read_exact(&mut header)?;
            let indicator = decode_i32(header[0..4].try_into().unwrap());
            let len = decode_i32(header[4..8].try_into().unwrap());

            if indicator != client_action::SEND_DATA {
                break; // terminal status indicator, not a share frame
            }

            let mut payload = vec![0u8; len as usize];
            self.stream.read_exact(&mut payload)?;
            if payload.len() < 32 + 8 + 4 + 8 + 4 + 4 {
                break;
            }
            let mut off = 32;
            let secret_id = i64::from_le_bytes(payload[off..off + 8].try_into().unwrap());
            off += 8;
            let secret_size = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
            off += 4;
            let seg_id = u64::from_le_bytes(payload[off..off + 8].try_into().unwrap());
            off += 8;
            let share_id = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
            off += 4;
            let body_len = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap()) as usize;
            off += 4;
            let body = payload[off..off + body_len].to_vec();
            shares.push((secret_id, secret_size, seg_id, share_id, body));
        }
        Ok(shares)
    }

    /// Request the MetaList summary of `path` over the meta channel
    /// (§4.6 download meta phase): for every share stream (`share_id`)
    /// in the file's recipe, the highest `secret_id` already recorded
    /// there. Returns `(id, share_id, end_secret_id)` tuples.
    pub fn request_meta_list(&mut self, path: &str) -> std::io::Result<Vec<(i32, i32, i64)>> {
        self.stream.write_all(&encode_i32(client_action::INIT_META_REQUEST))?;
        self.stream.write_all(&encode_i32(path.len() as i32))?;
        self.stream.write_all(path.as_bytes())?;

        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header)?;
        let indicator = decode_i32(header[0..4].try_into().unwrap());
        let len = decode_i32(header[4..8].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;

        let mut entries = Vec::new();
        if indicator != server_status::SEND_META_LIST {
            // No recipe for this path; the single frame we already read
            // was the terminal status, not a MetaList payload.
            return Ok(entries);
        }

        if payload.len() >= 4 {
            let count = i32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
            let mut off = 4;
            for _ in 0..count {
                if payload.len() < off + 16 {
                    break;
                }
                let id = i32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
                let share_id = i32::from_le_bytes(payload[off + 4..off + 8].try_into().unwrap());
                let end_secret_id = i64::from_le_bytes(payload[off + 8..off + 16].try_into().unwrap());
                entries.push((id, share_id, end_secret_id));
                off += 16;
            }
        }

        // The MetaList payload is always followed by a terminal status
        // frame, mirroring `request_download`'s share-stream-then-status
        // shape.
        let mut trailer = [0u8; 8];
        self.stream.read_exact(&mut trailer)?;

        Ok(entries)
    }
}
