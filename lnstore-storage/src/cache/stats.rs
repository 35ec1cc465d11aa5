/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Walks answered from the cache.
    pub hits: u64,
    /// Walks that needed a store fetch.
    pub misses: u64,
    /// Cached leaf values.
    pub leaves: u64,
    /// Cached branch nodes, root excluded.
    pub branches: u64,
    /// Branches (root included) marked as holding their whole subtree.
    pub complete_branches: u64,
    /// Per-child authority entries across all branches.
    pub lut_entries: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
