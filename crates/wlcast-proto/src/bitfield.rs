/// Per-frame chunk tracking using a compact bitmap.
///
/// A frame can span up to 65535 chunks, so the bitmap is sized per frame
/// rather than fixed. The backing words are reused across frames when the
/// new frame needs no more than the previous one did.

/// Bitmap recording which chunks of the frame being assembled have arrived.
#[derive(Clone, Debug, Default)]
pub struct ChunkBitmap {
    words: Vec<u64>,
    chunk_count: u16,
    received_count: u16,
}

impl ChunkBitmap {
    /// Create a bitmap for a frame of `chunk_count` chunks.
    #[cfg(test)]
    pub fn new(chunk_count: u16) -> Self {
        let mut bitmap = Self::default();
        bitmap.reset(chunk_count);
        bitmap
    }

    /// Mark a chunk as received. Returns true if it was newly received (not duplicate).
    #[inline]
    pub fn set(&mut self, chunk_index: u16) -> bool {
        if chunk_index >= self.chunk_count {
            return false;
        }
        let idx = chunk_index as usize;
        let mask = 1u64 << (idx % 64);
        let word = &mut self.words[idx / 64];
        if *word & mask != 0 {
            return false; // already set
        }
        *word |= mask;
        self.received_count += 1;
        true
    }

    /// Check if a chunk has been received.
    #[cfg(test)]
    pub fn get(&self, chunk_index: u16) -> bool {
        if chunk_index >= self.chunk_count {
            return false;
        }
        let idx = chunk_index as usize;
        self.words[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// Returns true once every chunk has been received.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.chunk_count > 0 && self.received_count >= self.chunk_count
    }

    #[inline]
    pub fn received(&self) -> u16 {
        self.received_count
    }

    #[cfg(test)]
    pub fn total(&self) -> u16 {
        self.chunk_count
    }

    #[cfg(test)]
    pub fn missing_count(&self) -> u16 {
        self.chunk_count - self.received_count
    }

    /// Reset the bitmap for a new frame of `chunk_count` chunks.
    pub fn reset(&mut self, chunk_count: u16) {
        let words = (chunk_count as usize).div_ceil(64);
        self.words.clear();
        self.words.resize(words, 0);
        self.chunk_count = chunk_count;
        self.received_count = 0;
    }
}
