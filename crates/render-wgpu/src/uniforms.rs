/// CPU staging for one frame's constant uploads.
///
/// Every `upload_constants` call gets its own slice of a single uniform
/// buffer, bound later through a dynamic offset. Draws recorded earlier in
/// the frame keep seeing the bytes they were recorded with.
#[derive(Debug, Clone)]
pub struct UniformArena {
    data: Vec<u8>,
    alignment: usize,
}

impl UniformArena {
    /// `alignment` is the device's `min_uniform_buffer_offset_alignment`.
    pub fn new(alignment: u32) -> Self {
        Self {
            data: Vec::new(),
            alignment: (alignment as usize).max(1),
        }
    }

    /// Append `bytes` at the next aligned offset and return that offset.
    pub fn push(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.data.len().next_multiple_of(self.alignment);
        self.data.resize(offset, 0);
        self.data.extend_from_slice(bytes);
        offset as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
