//! Bloom filter with a stable wire format.
//!
//! Filters are built on one process, cached, and handed to browsers as an
//! opaque blob that comes back on later requests, possibly to another
//! process. Hashing therefore uses `fxhash` (no per-process seed) followed by
//! a splitmix64 finalizer, and the serialized layout is fixed:
//!
//! ```text
//! "BF" | version:u8 | hashes:u8 | bits:u64le | items:u64le | words:[u64le]
//! ```
//!
//! encoded as standard base64.
//!
//! `has` never returns a false negative. The false-positive rate is bounded
//! by the rate the filter was sized for as long as no more than the expected
//! number of items is inserted.
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::SegmentError;

const MAGIC: &[u8; 2] = b"BF";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 2 + 1 + 1 + 8 + 8;
const MAX_HASHES: u32 = 32;
const SECOND_HASH_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    words: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    items: u64,
}

impl BloomFilter {
    /// Size a filter for `expected_items` at the given false-positive rate.
    pub fn with_rate(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2)
            .round()
            .clamp(1.0, MAX_HASHES as f64) as u32;
        let num_words = num_bits.div_ceil(64) as usize;

        Self {
            words: vec![0; num_words],
            num_bits,
            num_hashes,
            items: 0,
        }
    }

    pub fn insert<T: AsRef<[u8]>>(&mut self, item: T) {
        let (h1, h2) = hash_pair(item.as_ref());
        for i in 0..self.num_hashes {
            let idx = self.index(h1, h2, i);
            self.words[(idx / 64) as usize] |= 1u64 << (idx % 64);
        }
        self.items += 1;
    }

    /// `false` means definitely absent, `true` means probably present.
    pub fn has<T: AsRef<[u8]>>(&self, item: T) -> bool {
        let (h1, h2) = hash_pair(item.as_ref());
        (0..self.num_hashes).all(|i| {
            let idx = self.index(h1, h2, i);
            self.words[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
        })
    }

    /// Number of insertions performed.
    pub fn len(&self) -> u64 {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn serialize(&self) -> String {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.words.len() * 8);
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.push(self.num_hashes as u8);
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        buf.extend_from_slice(&self.items.to_le_bytes());
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        STANDARD.encode(buf)
    }

    pub fn deserialize(encoded: &str) -> Result<Self, SegmentError> {
        let buf = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SegmentError::InvalidFilter(e.to_string()))?;
        if buf.len() < HEADER_LEN || &buf[..2] != MAGIC {
            return Err(SegmentError::InvalidFilter("missing header".into()));
        }
        if buf[2] != VERSION {
            return Err(SegmentError::InvalidFilter(format!(
                "unsupported version {}",
                buf[2]
            )));
        }
        let num_hashes = u32::from(buf[3]);
        let num_bits = read_u64(&buf[4..12]);
        let items = read_u64(&buf[12..20]);
        if num_hashes == 0 || num_hashes > MAX_HASHES || num_bits == 0 {
            return Err(SegmentError::InvalidFilter("invalid parameters".into()));
        }

        let body = &buf[HEADER_LEN..];
        let expected_words = num_bits.div_ceil(64);
        if body.len() as u64 != expected_words * 8 {
            return Err(SegmentError::InvalidFilter(format!(
                "expected {} words, got {} bytes",
                expected_words,
                body.len()
            )));
        }
        let words = body.chunks_exact(8).map(read_u64).collect();

        Ok(Self {
            words,
            num_bits,
            num_hashes,
            items,
        })
    }

    #[inline]
    fn index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % self.num_bits
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

#[inline]
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[inline]
fn hash_pair(bytes: &[u8]) -> (u64, u64) {
    let h1 = mix(fxhash::hash64(bytes));
    // Odd step so every probe sequence visits distinct bits.
    let h2 = mix(h1 ^ SECOND_HASH_SALT) | 1;
    (h1, h2)
}
