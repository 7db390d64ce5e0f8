//! ChunkedArena: append-only region with address-stable elements.
//!
//! Each chunk is a `Vec` allocated up front with room for `chunk_size`
//! elements and never pushed past that length, so its buffer is never
//! reallocated. Growing the arena only appends new chunks. An element's
//! address therefore stays fixed until the arena itself is dropped; the
//! caches rely on this to hand out references that outlive their locks.
//!
//! Elements are addressed by their allocation order (`0..len`).

pub const DEFAULT_CHUNK_SIZE: usize = 256;

pub(crate) struct ChunkedArena<T> {
    chunks: Vec<Vec<T>>,
    chunk_size: usize,
    len: usize,
}

impl<T> ChunkedArena<T> {
    pub(crate) fn with_chunk_size(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "arena chunk size must be non-zero");
        Self {
            chunks: Vec::new(),
            chunk_size,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Move `value` into the arena and return its position.
    pub(crate) fn alloc(&mut self, value: T) -> usize {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() < self.chunk_size => {
                debug_assert!(chunk.len() < chunk.capacity());
                chunk.push(value);
            }
            _ => {
                let mut chunk = Vec::with_capacity(self.chunk_size);
                chunk.push(value);
                self.chunks.push(chunk);
            }
        }
        let pos = self.len;
        self.len += 1;
        pos
    }

    #[inline]
    pub(crate) fn get(&self, pos: usize) -> Option<&T> {
        if pos >= self.len {
            return None;
        }
        self.chunks
            .get(pos / self.chunk_size)
            .and_then(|c| c.get(pos % self.chunk_size))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.chunks.iter().flat_map(|c| c.iter())
    }

    /// Number of chunks allocated so far.
    #[cfg(test)]
    pub(crate) fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl<T> Default for ChunkedArena<T> {
    fn default() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }
}
