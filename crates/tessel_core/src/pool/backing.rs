/// Storage a [`super::SizeClassAllocator`] carves chunks from.
///
/// `grow` must keep the existing contents at the same offsets.
pub trait BackingBuffer: Send {
    fn size(&self) -> u64;

    fn grow(&mut self, new_size: u64);
}

/// CPU-resident backing store. Used by tests and headless tooling.
#[derive(Debug, Default)]
pub struct HostBuffer {
    bytes: Vec<u8>,
}

impl HostBuffer {
    pub fn with_size(size: u64) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl BackingBuffer for HostBuffer {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn grow(&mut self, new_size: u64) {
        debug_assert!(new_size >= self.size());
        self.bytes.resize(new_size as usize, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_preserves_contents() {
        let mut buffer = HostBuffer::with_size(8);
        buffer.bytes_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        buffer.grow(32);
        assert_eq!(buffer.size(), 32);
        assert_eq!(&buffer.bytes()[..4], &[1, 2, 3, 4]);
        assert!(buffer.bytes()[4..].iter().all(|&b| b == 0));
    }
}
