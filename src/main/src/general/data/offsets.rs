use std::{
    collections::HashMap,
    hash::{BuildHasherDefault, Hash, Hasher},
};

/// Spatial address of a chunk, one offset per dimension.
pub type Offsets = Vec<usize>;

pub type Lengths = Vec<usize>;

pub type Strides = Vec<usize>;

pub type OffsetsMap<V> = HashMap<Offsets, V, BuildHasherDefault<OffsetsHasher>>;

const SEED: u64 = 0x51_7c_c1_b7_27_22_0a_95;

/// Order-sensitive hasher for offset keys.
///
/// Every word is folded in with a rotate, xor and multiply, so `[0, 2]` and
/// `[2, 0]` land on different hashes where a plain xor of component hashes
/// would collide.
#[derive(Default, Clone, Copy)]
pub struct OffsetsHasher {
    state: u64,
}

impl OffsetsHasher {
    #[inline]
    fn mix(&mut self, word: u64) {
        self.state = (self.state.rotate_left(5) ^ word).wrapping_mul(SEED);
    }
}

impl Hasher for OffsetsHasher {
    fn finish(&self) -> u64 {
        // final avalanche so low bits depend on every component
        let mut h = self.state;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut words = bytes.chunks_exact(8);
        for word in &mut words {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(word);
            self.mix(u64::from_le_bytes(buf));
        }
        let rest = words.remainder();
        if !rest.is_empty() {
            let mut buf = [0u8; 8];
            buf[..rest.len()].copy_from_slice(rest);
            self.mix(u64::from_le_bytes(buf));
        }
    }

    fn write_u64(&mut self, v: u64) {
        self.mix(v);
    }

    fn write_usize(&mut self, v: usize) {
        self.mix(v as u64);
    }
}

/// Hash of an offset sequence as used by every chunk map.
pub fn offsets_hash(offsets: &[usize]) -> u64 {
    let mut hasher = OffsetsHasher::default();
    offsets.hash(&mut hasher);
    hasher.finish()
}

pub fn new_offsets_map<V>(capacity: usize) -> OffsetsMap<V> {
    HashMap::with_capacity_and_hasher(capacity, BuildHasherDefault::default())
}
