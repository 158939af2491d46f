use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const DEFAULT_PARTITIONS: u32 = 256;

/// Hashes keys into a fixed number of local partitions.
#[derive(Debug, Clone)]
pub struct PartitionManager {
    num_partitions: u32,
}

impl PartitionManager {
    /// A count of zero is raised to one.
    pub fn new(num_partitions: u32) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
        }
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    pub fn get_partition(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.num_partitions)) as u32
    }
}

impl Default for PartitionManager {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}
