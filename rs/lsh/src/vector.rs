use anyhow::{Error, Result};
use num_traits::AsPrimitive;

/// Element type of an indexed vector. Projection products are always
/// accumulated in f32, so elements only need a lossless-enough conversion.
pub trait VectorElement: Copy + AsPrimitive<f32> + std::fmt::Debug + 'static {}

// Only f32 and u8
impl VectorElement for f32 {}
impl VectorElement for u8 {}

/// Read-only dataset abstraction the index trains on and hashes from.
/// Rows are 0-indexed and contiguous in memory.
pub trait VectorStorage<T: VectorElement> {
    fn get(&self, id: u32) -> Option<&[T]>;

    // Number of vectors in the storage
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Number of dimensions of each vector
    fn num_features(&self) -> usize;
}

/// Flat in-memory row-major storage.
pub struct InMemoryVectorStorage<T: VectorElement> {
    data: Vec<T>,
    num_features: usize,
}

impl<T: VectorElement> InMemoryVectorStorage<T> {
    pub fn new(num_features: usize) -> Self {
        Self {
            data: Vec::new(),
            num_features,
        }
    }

    pub fn append(&mut self, vector: &[T]) -> Result<()> {
        if vector.len() != self.num_features {
            return Err(Error::msg(
                "Vector must have the same dimension as the storage",
            ));
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }
}

impl<T: VectorElement> VectorStorage<T> for InMemoryVectorStorage<T> {
    fn get(&self, id: u32) -> Option<&[T]> {
        let start = id as usize * self.num_features;
        let end = start + self.num_features;
        if end > self.data.len() {
            return None;
        }
        Some(&self.data[start..end])
    }

    fn len(&self) -> usize {
        self.data.len() / self.num_features
    }

    fn num_features(&self) -> usize {
        self.num_features
    }
}
