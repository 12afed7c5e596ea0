use std::hash::Hasher;

use serde::Serialize;

/// A deterministic FNV-1a 64-bit hasher.
///
/// `DefaultHasher` is randomized per process, which makes it useless for
/// comparing two runs of the simulator.
#[derive(Debug)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Hash of the bincode encoding of `value`.
pub fn hash_serialized<T: Serialize + ?Sized>(value: &T) -> Result<u64, bincode::Error> {
    let bytes = bincode::serialize(value)?;
    let mut hasher = FnvHasher::new();
    hasher.write(&bytes);
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_hashes_to_offset_basis() {
        assert_eq!(FnvHasher::new().finish(), 0xcbf29ce484222325);
    }

    #[test]
    fn serialized_hash_is_stable_and_sensitive() {
        let a = hash_serialized(&vec![1u32, 2, 3]).unwrap();
        let b = hash_serialized(&vec![1u32, 2, 3]).unwrap();
        let c = hash_serialized(&vec![1u32, 2, 4]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
