//! Content-defined and fixed-size chunking over an in-memory buffer,
//! plus a trace-driven mode for reproducible dedup-ratio measurement.
//! Boundaries are a pure function of file content: the same bytes yield
//! the same chunk list regardless of how the caller happened to buffer
//! them (property §A.8.1).

use crate::error::CoreError;

/// The base for the rolling polynomial hash, a prime larger than 255
/// (the max byte value), matching open-vcdiff's convention.
const POLY_BASE: u32 = 257;

#[derive(Debug, Clone, Copy)]
pub enum ChunkerMode {
    Fixed { avg_chunk_size: usize },
    Variable {
        avg_chunk_size: usize,
        min_chunk_size: usize,
        max_chunk_size: usize,
        sliding_window_size: usize,
    },
}

/// A chunk boundary as a half-open byte range `[start, end)` into the
/// original buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

pub struct Chunker {
    mode: ChunkerMode,
    poly_mod: u32,
    power_lut: Vec<u32>,
    remove_lut: [u32; 256],
    anchor_mask: u32,
}

impl Chunker {
    pub fn new(mode: ChunkerMode) -> Result<Self, CoreError> {
        match mode {
            ChunkerMode::Fixed { avg_chunk_size } => {
                if avg_chunk_size == 0 {
                    return Err(CoreError::Precondition(
                        "avg_chunk_size must be > 0".into(),
                    ));
                }
                Ok(Chunker {
                    mode,
                    poly_mod: 0,
                    power_lut: Vec::new(),
                    remove_lut: [0u32; 256],
                    anchor_mask: 0,
                })
            }
            ChunkerMode::Variable {
                avg_chunk_size,
                min_chunk_size,
                max_chunk_size,
                sliding_window_size,
            } => {
                if min_chunk_size >= avg_chunk_size {
                    return Err(CoreError::Precondition(
                        "min_chunk_size must be < avg_chunk_size".into(),
                    ));
                }
                if max_chunk_size <= avg_chunk_size {
                    return Err(CoreError::Precondition(
                        "max_chunk_size must be > avg_chunk_size".into(),
                    ));
                }
                if !avg_chunk_size.is_power_of_two() {
                    return Err(CoreError::Precondition(
                        "avg_chunk_size must be a power of two".into(),
                    ));
                }

                let poly_mod: u32 = 1 << 23;

                let mut power_lut = vec![0u32; sliding_window_size];
                power_lut[0] = 1;
                for i in 1..sliding_window_size {
                    power_lut[i] = (power_lut[i - 1].wrapping_mul(POLY_BASE)) & (poly_mod - 1);
                }

                let mut remove_lut = [0u32; 256];
                for i in 0..256u32 {
                    let mut v = (i.wrapping_mul(power_lut[sliding_window_size - 1])) & (poly_mod - 1);
                    if v != 0 {
                        v = poly_mod - v;
                    }
                    remove_lut[i as usize] = v;
                }

                let anchor_mask = (avg_chunk_size as u32) - 1;

                Ok(Chunker {
                    mode,
                    poly_mod,
                    power_lut,
                    remove_lut,
                    anchor_mask,
                })
            }
        }
    }

    pub fn chunk(&self, buffer: &[u8]) -> Vec<ChunkSpan> {
        match self.mode {
            ChunkerMode::Fixed { avg_chunk_size } => self.fixed_size_chunking(buffer, avg_chunk_size),
            ChunkerMode::Variable {
                min_chunk_size,
                max_chunk_size,
                sliding_window_size,
                ..
            } => self.var_size_chunking(buffer, min_chunk_size, max_chunk_size, sliding_window_size),
        }
    }

    fn fixed_size_chunking(&self, buffer: &[u8], avg_chunk_size: usize) -> Vec<ChunkSpan> {
        let len = buffer.len();
        if len == 0 {
            return vec![ChunkSpan { start: 0, end: 0 }];
        }
        let mut spans = Vec::new();
        let mut start = 0;
        while start < len {
            let end = (start + avg_chunk_size).min(len);
            spans.push(ChunkSpan { start, end });
            start = end;
        }
        spans
    }

    fn var_size_chunking(
        &self,
        buffer: &[u8],
        min_chunk_size: usize,
        max_chunk_size: usize,
        sliding_window_size: usize,
    ) -> Vec<ChunkSpan> {
        let len = buffer.len();
        if len == 0 {
            return vec![ChunkSpan { start: 0, end: 0 }];
        }

        let mut spans = Vec::new();
        let mut start = 0usize;

        while start < len {
            let candidate = (start + min_chunk_size).min(len);
            let limit = (start + max_chunk_size).min(len);
            let mut cut = candidate;

            if candidate < len && candidate >= sliding_window_size {
                let mut win_fp: u32 = 0;
                for i in 0..sliding_window_size {
                    let idx = cut - 1 - i;
                    win_fp = win_fp.wrapping_add(
                        (buffer[idx] as u32).wrapping_mul(self.power_lut[i]) & (self.poly_mod - 1),
                    );
                }
                win_fp &= self.poly_mod - 1;

                while (win_fp & self.anchor_mask) != 0 && cut < limit {
                    let removed = buffer[cut - sliding_window_size];
                    let added = buffer[cut];
                    win_fp = ((win_fp.wrapping_add(self.remove_lut[removed as usize]))
                        .wrapping_mul(POLY_BASE)
                        .wrapping_add(added as u32))
                        & (self.poly_mod - 1);
                    cut += 1;
                }
            } else {
                cut = limit;
            }

            spans.push(ChunkSpan { start, end: cut });
            start = cut;
        }

        spans
    }
}

/// One line of a trace-driven FSL chunking file: `fp_hex:6B` followed by
/// a decimal size. Produces a synthetic chunk whose payload is the
/// 6-byte fingerprint repeated to fill `size`, used for reproducible
/// dedup-ratio measurement without real file content.
pub fn parse_trace_line(line: &str, max_chunk_size: usize) -> Option<(Vec<u8>, usize)> {
    let mut parts = line.split(|c: char| c == ':' || c == '\t' || c == ' ');
    let mut fp = Vec::with_capacity(6);
    for _ in 0..6 {
        let item = parts.next()?;
        fp.push(u8::from_str_radix(item, 16).ok()?);
    }
    let size_item = parts.next()?;
    let size: usize = size_item.trim().parse().ok()?;
    if size > max_chunk_size {
        return None;
    }
    Some((fp, size))
}

pub fn synthesize_trace_chunk(fp: &[u8], size: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(size);
    while payload.len() < size {
        let take = (size - payload.len()).min(fp.len());
        payload.extend_from_slice(&fp[..take]);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_chunking_covers_whole_buffer() {
        let chunker = Chunker::new(ChunkerMode::Fixed { avg_chunk_size: 100 }).unwrap();
        let buf = vec![0u8; 950];
        let spans = chunker.chunk(&buf);
        assert_eq!(spans.first().unwrap().start, 0);
        assert_eq!(spans.last().unwrap().end, 950);
        for w in spans.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
        assert_eq!(spans.last().unwrap().end - spans.last().unwrap().start, 50);
    }

    #[test]
    fn variable_chunking_covers_whole_buffer_and_respects_bounds() {
        let chunker = Chunker::new(ChunkerMode::Variable {
            avg_chunk_size: 8192,
            min_chunk_size: 2048,
            max_chunk_size: 16384,
            sliding_window_size: 48,
        })
        .unwrap();

        let mut buf = Vec::with_capacity(200_000);
        let mut x: u32 = 88172645463325252;
        for _ in 0..200_000 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            buf.push((x & 0xff) as u8);
        }

        let spans = chunker.chunk(&buf);
        assert_eq!(spans.first().unwrap().start, 0);
        assert_eq!(spans.last().unwrap().end, buf.len());
        for w in spans.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
        for (i, span) in spans.iter().enumerate() {
            let size = span.end - span.start;
            if i + 1 != spans.len() {
                assert!(size >= 2048 && size <= 16384, "chunk size {} out of bounds", size);
            }
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let chunker = Chunker::new(ChunkerMode::Variable {
            avg_chunk_size: 1024,
            min_chunk_size: 256,
            max_chunk_size: 2048,
            sliding_window_size: 48,
        })
        .unwrap();
        let buf: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let a = chunker.chunk(&buf);
        let b = chunker.chunk(&buf);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_construction() {
        assert!(Chunker::new(ChunkerMode::Variable {
            avg_chunk_size: 100,
            min_chunk_size: 200,
            max_chunk_size: 300,
            sliding_window_size: 48,
        })
        .is_err());

        assert!(Chunker::new(ChunkerMode::Variable {
            avg_chunk_size: 100,
            min_chunk_size: 10,
            max_chunk_size: 50,
            sliding_window_size: 48,
        })
        .is_err());
    }

    #[test]
    fn trace_line_parses_and_synthesizes() {
        let (fp, size) = parse_trace_line("aabbccddeeff:1234", 4096).unwrap();
        assert_eq!(fp, vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(size, 1234);
        let chunk = synthesize_trace_chunk(&fp, size);
        assert_eq!(chunk.len(), size);
        assert_eq!(&chunk[0..6], &fp[..]);
    }

    #[test]
    fn trace_line_over_max_is_skipped() {
        assert!(parse_trace_line("aabbccddeeff:9999", 100).is_none());
    }
}
