//! The data model shared across every pipeline stage: `Chunk` mutated in
//! place as it flows client-side, `Segment` accumulation state, and the
//! `Share`/`MetaNode` types produced by the encoder and consumed by the
//! collector, uploader and server.

/// A chunk produced by the chunker and mutated exactly once by each
/// downstream stage: the hasher writes `fp`, the key client writes
/// `key`/`seg_id`/`km_cloud_index`, the encoder rewrites `payload` as
/// concatenated shares.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: u64,
    pub seg_id: u64,
    pub payload: Vec<u8>,
    /// Content fingerprint, written by the hasher.
    pub fp: Vec<u8>,
    /// Convergent per-segment key, written by the key client.
    pub key: Vec<u8>,
    /// True on the final chunk of the stream; carries the end-of-stream
    /// sentinel through the pipeline alongside normal chunk data.
    pub end: bool,
    pub km_cloud_index: u8,
}

impl Chunk {
    pub fn new(id: u64, payload: Vec<u8>, end: bool) -> Self {
        Chunk {
            id,
            seg_id: 0,
            payload,
            fp: Vec::new(),
            key: Vec::new(),
            end,
            km_cloud_index: 0,
        }
    }
}

/// One share of an encoded chunk, addressed by `(seg_id, share_id)`
/// within a cloud's upload queue.
#[derive(Debug, Clone)]
pub struct Share {
    pub seg_id: u64,
    pub share_id: u32,
    pub body: Vec<u8>,
    pub fp: Vec<u8>,
}

/// Describes one share independent of its body; this is what travels in
/// metadata chunks and recipe entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaNode {
    pub share_fp: Vec<u8>,
    pub secret_id: i64,
    pub secret_size: u32,
    pub share_size: u32,
    pub seg_id: u64,
    pub share_id: u32,
}

/// A packed batch of `MetaNode`s for one `(segment, cloud)`, carrying a
/// negative synthetic secret id so it never collides with a positive
/// data-chunk secret id.
#[derive(Debug, Clone)]
pub struct MetaChunk {
    pub secret_id: i64,
    pub seg_id: u64,
    pub share_id: u32,
    pub nodes: Vec<MetaNode>,
}

impl MetaChunk {
    /// Serialize as `count:i32 little-endian ‖ MetaNode[count]`, each
    /// MetaNode as `share_fp ‖ secret_id:i64 ‖ secret_size:u32 ‖
    /// share_size:u32 ‖ seg_id:u64 ‖ share_id:u32`, all little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.nodes.len() * 64);
        buf.extend_from_slice(&(self.nodes.len() as i32).to_le_bytes());
        for node in &self.nodes {
            buf.extend_from_slice(&node.share_fp);
            buf.extend_from_slice(&node.secret_id.to_le_bytes());
            buf.extend_from_slice(&node.secret_size.to_le_bytes());
            buf.extend_from_slice(&node.share_size.to_le_bytes());
            buf.extend_from_slice(&node.seg_id.to_le_bytes());
            buf.extend_from_slice(&node.share_id.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8], fp_size: usize) -> Option<Vec<MetaNode>> {
        if buf.len() < 4 {
            return None;
        }
        let count = i32::from_le_bytes(buf[0..4].try_into().ok()?) as usize;
        let entry_size = fp_size + 8 + 4 + 4 + 8 + 4;
        let mut nodes = Vec::with_capacity(count);
        let mut off = 4;
        for _ in 0..count {
            if buf.len() < off + entry_size {
                return None;
            }
            let share_fp = buf[off..off + fp_size].to_vec();
            let mut p = off + fp_size;
            let secret_id = i64::from_le_bytes(buf[p..p + 8].try_into().ok()?);
            p += 8;
            let secret_size = u32::from_le_bytes(buf[p..p + 4].try_into().ok()?);
            p += 4;
            let share_size = u32::from_le_bytes(buf[p..p + 4].try_into().ok()?);
            p += 4;
            let seg_id = u64::from_le_bytes(buf[p..p + 8].try_into().ok()?);
            p += 8;
            let share_id = u32::from_le_bytes(buf[p..p + 4].try_into().ok()?);
            off += entry_size;
            nodes.push(MetaNode {
                share_fp,
                secret_id,
                secret_size,
                share_size,
                seg_id,
                share_id,
            });
        }
        Some(nodes)
    }
}

/// Accumulation state for the segment currently being built by the
/// segmenter. Reset after each boundary (§A.3 segment boundary rules).
pub struct SegmentBuilder {
    pub chunks: Vec<Chunk>,
    pub accumulated_size: u64,
    pub min_fp: Vec<u8>,
}

impl SegmentBuilder {
    pub fn new(fp_size: usize) -> Self {
        SegmentBuilder {
            chunks: Vec::new(),
            accumulated_size: 0,
            min_fp: vec![0xFFu8; fp_size],
        }
    }

    pub fn push(&mut self, chunk: Chunk) {
        if self.chunks.is_empty() || chunk.fp < self.min_fp {
            self.min_fp = chunk.fp.clone();
        }
        self.accumulated_size += chunk.payload.len() as u64;
        self.chunks.push(chunk);
    }

    pub fn reset(&mut self, fp_size: usize) {
        self.chunks.clear();
        self.accumulated_size = 0;
        self.min_fp = vec![0xFFu8; fp_size];
    }
}
