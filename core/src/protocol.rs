//! Wire protocol constants and frame encoding shared by every endpoint:
//! the meta port, the data port and the Key Manager port all speak the
//! same "action indicator, then payload" framing, just with different
//! indicator vocabularies.
//!
//! Every multi-byte integer on the wire is little-endian (the host's
//! native order in the reference implementation) with one exception:
//! the user id sent once, immediately after a TCP connection is
//! established, is big-endian (`htonl`). That asymmetry is preserved
//! here rather than "fixed", since both ends must agree on it to
//! interoperate.

/// Action indicators sent by the client to the meta/data front ends.
pub mod client_action {
    pub const SEND_META: i32 = -1;
    pub const SEND_DATA: i32 = -2;
    pub const SEND_FILE_META: i32 = -8;
    pub const GET_STAT: i32 = -3;
    pub const INIT_DOWNLOAD: i32 = -7;
    pub const INIT_META_REQUEST: i32 = -9;
}

/// Status/response indicators sent back by the server.
pub mod server_status {
    pub const NO_DATA_CHUNKS_FOUND: i32 = -6;
    pub const END_OF_DATA_CHUNKS: i32 = -51;
    pub const END_DOWNLOAD_INDICATOR: i32 = -12;
    pub const FILE_RECIPE_SUCCESS: i32 = -111;
    pub const SEND_META_LIST: i32 = 1001;
    pub const LAST_SHARE_SERVER: i32 = -909;
    pub const NOT_LAST_SHARE_SERVER: i32 = 909;
    pub const METACORE_NOT_END: i32 = -707;
    pub const METACORE_END: i32 = 707;
    /// Reply to a metadata-only share entry: the fingerprint is already
    /// known, so the client must not send a body frame for it (§4.5
    /// STAT step, collapsed to one bit per share rather than a batched
    /// bitmap since each share round-trips individually here).
    pub const SHARE_DUPLICATE: i32 = 2001;
    /// Reply to a metadata-only share entry: the fingerprint is new:
    /// the client must follow up with a body frame carrying the bytes.
    pub const SHARE_NOT_DUPLICATE: i32 = 2002;
}

/// Serialize the one-time user id preamble sent immediately after
/// connecting to any of the three front ends, in network byte order.
pub fn encode_user_id(user_id: u32) -> [u8; 4] {
    user_id.to_be_bytes()
}

pub fn decode_user_id(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Every other integer on the wire (action indicators, lengths, share
/// counts) is a little-endian `i32`.
pub fn encode_i32(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

pub fn decode_i32(bytes: [u8; 4]) -> i32 {
    i32::from_le_bytes(bytes)
}

/// A length-prefixed frame: `indicator:i32 LE ‖ len:i32 LE ‖ payload`,
/// the shape `sendFileMeta`/`sendMeta`/`sendData` all share.
pub struct Frame {
    pub indicator: i32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(indicator: i32, payload: Vec<u8>) -> Self {
        Frame { indicator, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.payload.len());
        buf.extend_from_slice(&encode_i32(self.indicator));
        buf.extend_from_slice(&encode_i32(self.payload.len() as i32));
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a frame from a buffer that already holds the whole thing;
    /// real transports read the 8-byte header first to learn how many
    /// payload bytes to read next, then call this on the assembled
    /// buffer.
    pub fn decode(buf: &[u8]) -> Option<Frame> {
        if buf.len() < 8 {
            return None;
        }
        let indicator = decode_i32(buf[0..4].try_into().ok()?);
        let len = decode_i32(buf[4..8].try_into().ok()?);
        if len < 0 {
            return None;
        }
        let len = len as usize;
        if buf.len() < 8 + len {
            return None;
        }
        Some(Frame { indicator, payload: buf[8..8 + len].to_vec() })
    }
}

/// Fixed 128-byte request/response unit on the Key Manager channel: a
/// batch count followed by that many 128-byte blinded RSA elements (see
/// `blind::RSA_ELEMENT_SIZE`), matching `KeyEx::keyExchange`'s wire
/// shape (`count:i32 LE ‖ element[count]`).
pub fn encode_km_batch(elements: &[[u8; crate::blind::RSA_ELEMENT_SIZE]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + elements.len() * crate::blind::RSA_ELEMENT_SIZE);
    buf.extend_from_slice(&encode_i32(elements.len() as i32));
    for el in elements {
        buf.extend_from_slice(el);
    }
    buf
}

pub fn decode_km_batch(buf: &[u8]) -> Option<Vec<[u8; crate::blind::RSA_ELEMENT_SIZE]>> {
    if buf.len() < 4 {
        return None;
    }
    let count = decode_i32(buf[0..4].try_into().ok()?) as usize;
    let elem = crate::blind::RSA_ELEMENT_SIZE;
    if buf.len() < 4 + count * elem {
        return None;
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let mut e = [0u8; crate::blind::RSA_ELEMENT_SIZE];
        e.copy_from_slice(&buf[4 + i * elem..4 + (i + 1) * elem]);
        out.push(e);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_roundtrips_big_endian() {
        let encoded = encode_user_id(42);
        assert_eq!(encoded, [0, 0, 0, 42]);
        assert_eq!(decode_user_id(encoded), 42);
    }

    #[test]
    fn frame_roundtrips() {
        let frame = Frame::new(client_action::SEND_DATA, vec![1, 2, 3, 4, 5]);
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.indicator, client_action::SEND_DATA);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn km_batch_roundtrips() {
        let mut el = [0u8; crate::blind::RSA_ELEMENT_SIZE];
        el[0] = 0xAB;
        let batch = vec![el, el];
        let encoded = encode_km_batch(&batch);
        let decoded = decode_km_batch(&encoded).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn truncated_frame_fails_to_decode() {
        assert!(Frame::decode(&[0u8; 4]).is_none());
    }
}
