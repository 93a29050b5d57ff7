//! Checksum engine: per-chunk hashes and the running transfer hash.
//!
//! Both ends of a transfer must agree on this module byte for byte:
//! the chunk hash covers exactly one chunk's payload, and the running
//! hash absorbs every payload of a transfer in send order. The algorithm
//! is unkeyed 256-bit BLAKE3 on both sides. There is no I/O here.

/// Length of every digest on the wire.
pub const DIGEST_LEN: usize = 32;

/// A BLAKE3 digest.
pub type Digest = [u8; DIGEST_LEN];

/// Hash a byte slice on its own, returning a 32-byte BLAKE3 digest.
pub fn chunk_hash(data: &[u8]) -> Digest {
    *blake3::hash(data).as_bytes()
}

/// Incremental hash over the concatenation of all payloads of one transfer.
///
/// `digest()` reports the state so far without consuming or resetting it,
/// so the sender can stamp every chunk with the post-absorb digest and the
/// receiver can compare after each chunk.
///
/// # Example
/// ```
/// use ferry_core::checksum::{chunk_hash, RunningHash};
/// let mut h = RunningHash::new();
/// h.absorb(b"hello ");
/// h.absorb(b"world");
/// assert_eq!(h.digest(), chunk_hash(b"hello world"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct RunningHash(blake3::Hasher);

impl RunningHash {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    /// Feed the next payload into the accumulator.
    pub fn absorb(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Current accumulated digest. Does not reset.
    pub fn digest(&self) -> Digest {
        *self.0.finalize().as_bytes()
    }

    /// Total bytes absorbed since construction or the last reset.
    pub fn absorbed(&self) -> u64 {
        self.0.count()
    }

    /// Start over, as if freshly constructed.
    pub fn reset(&mut self) {
        self.0.reset();
    }
}
