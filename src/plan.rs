use crate::{Error, Result};

/// Offsets to request, `0..total_rows` stepped by `page_size`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    page_size: u64,
    offsets: Vec<u64>,
}

impl FetchPlan {
    pub fn new(total_rows: u64, page_size: u64) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::Config("page size must be greater than zero".into()));
        }
        let step = usize::try_from(page_size)
            .map_err(|_| Error::Config(format!("page size {page_size} is too large")))?;
        let offsets = (0..total_rows).step_by(step).collect();
        Ok(Self {
            page_size,
            offsets,
        })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Consecutive groups of at most `batch_size` offsets, in increasing order.
    pub fn batches(&self, batch_size: usize) -> std::slice::Chunks<'_, u64> {
        self.offsets.chunks(batch_size.max(1))
    }
}
