//! Shared primitives for the dispersed-storage client and server:
//! chunking, segmentation, convergent dispersal codecs, blinded key
//! exchange and the wire protocol frame types that tie them together.

pub mod blind;
pub mod chunk;
pub mod chunker;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod gf256;
pub mod protocol;
pub mod segment;

pub use chunk::{Chunk, MetaChunk, MetaNode, SegmentBuilder, Share};
pub use chunker::{ChunkSpan, Chunker, ChunkerMode};
pub use codec::{CdScheme, Codec, Encoded};
pub use crypto::{CryptoPrimitive, SecurityLevel};
pub use error::CoreError;
pub use gf256::{Gf256, Matrix};
pub use segment::{Segmenter, SegmenterConfig};
