/// A source of batches with a declared per-epoch batch count.
///
/// The driver checks `num_batches` of both sources before pulling anything,
/// then pulls one batch from each per step.
pub trait BatchLoader {
    type Batch;

    /// Number of batches one epoch of this loader yields.
    fn num_batches(&self) -> usize;

    /// Iterate the batches of one epoch.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Self::Batch> + '_>;
}

/// In-memory loader over pre-built batches.
///
/// Counts how many batches have been pulled across all epochs, which lets
/// callers check whether a run touched the data at all.
#[derive(Debug, Clone)]
pub struct VecLoader<T> {
    batches: Vec<T>,
    declared: usize,
    pulled: usize,
}

impl<T: Clone> VecLoader<T> {
    /// Loader whose declared count equals the number of batches.
    pub fn new(batches: Vec<T>) -> Self {
        let declared = batches.len();
        Self {
            batches,
            declared,
            pulled: 0,
        }
    }

    /// Loader that reports `declared` batches regardless of how many it holds.
    pub fn with_declared(batches: Vec<T>, declared: usize) -> Self {
        Self {
            batches,
            declared,
            pulled: 0,
        }
    }

    /// Total batches handed out so far.
    pub fn pulled(&self) -> usize {
        self.pulled
    }
}

impl<T: Clone> BatchLoader for VecLoader<T> {
    type Batch = T;

    fn num_batches(&self) -> usize {
        self.declared
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = T> + '_> {
        let pulled = &mut self.pulled;
        Box::new(
            self.batches
                .iter()
                .take(self.declared)
                .cloned()
                .inspect(move |_| *pulled += 1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_loader_counts_pulls() {
        let mut loader = VecLoader::new(vec![1, 2, 3]);
        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.pulled(), 0);

        let first_two: Vec<i32> = loader.batches().take(2).collect();
        assert_eq!(first_two, vec![1, 2]);
        assert_eq!(loader.pulled(), 2);

        let all: Vec<i32> = loader.batches().collect();
        assert_eq!(all, vec![1, 2, 3]);
        assert_eq!(loader.pulled(), 5);
    }

    #[test]
    fn test_declared_count_caps_iteration() {
        let mut loader = VecLoader::with_declared(vec![1, 2, 3], 2);
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.batches().count(), 2);

        let mut short = VecLoader::with_declared(vec![1], 4);
        assert_eq!(short.num_batches(), 4);
        assert_eq!(short.batches().count(), 1);
    }
}
