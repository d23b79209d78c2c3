//! Statistics reported by the engine: garbage collection, unique-table and
//! operator-cache behavior, and the (inactive) reordering counters.

use std::fmt;
use std::time::Duration;

/// Statistics about garbage collections.
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Node table size at the time of the collection.
    pub nodes: usize,
    /// Free slots after the collection.
    pub freenodes: usize,
    /// Free-list allocations since the previous collection.
    pub reusednodes: u64,
    /// Duration of the last collection.
    pub time: Duration,
    /// Cumulative collection time.
    pub sumtime: Duration,
    /// Number of collections so far.
    pub num: usize,
}

impl fmt::Display for GcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Garbage collection #{}: {} nodes / {} free / {} reused since last gc / {:.3}s / {:.3}s total",
            self.num,
            self.nodes,
            self.freenodes,
            self.reusednodes,
            self.time.as_secs_f64(),
            self.sumtime.as_secs_f64(),
        )
    }
}

/// Statistics about the unique table and the operator caches.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub unique_access: u64,
    pub unique_chain: u64,
    pub unique_hit: u64,
    pub unique_miss: u64,
    /// `make_node` calls short-circuited by the `low == high` rule.
    pub unique_trivial: u64,
    pub op_hit: u64,
    pub op_miss: u64,
    pub op_overwrite: u64,
}

impl CacheStats {
    pub fn unique_hit_rate(&self) -> f64 {
        let total = self.unique_hit + self.unique_miss;
        if total == 0 {
            0.0
        } else {
            self.unique_hit as f64 / total as f64
        }
    }

    pub fn op_hit_rate(&self) -> f64 {
        let total = self.op_hit + self.op_miss;
        if total == 0 {
            0.0
        } else {
            self.op_hit as f64 / total as f64
        }
    }
}

// The report format follows the classic printStat layout.
impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Cache statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "Unique Trivial: {}", self.unique_trivial)?;
        writeln!(f, "Unique Access:  {}", self.unique_access)?;
        writeln!(f, "Unique Hit:     {}", self.unique_hit)?;
        writeln!(f, "Unique Miss:    {}", self.unique_miss)?;
        writeln!(f, "Unique Chain:   {}", self.unique_chain)?;
        writeln!(f, "=> Hit rate =   {:.3}", self.unique_hit_rate())?;
        writeln!(f, "Operator Hits:  {}", self.op_hit)?;
        writeln!(f, "Operator Miss:  {}", self.op_miss)?;
        writeln!(f, "Operator Overwrite: {}", self.op_overwrite)?;
        writeln!(f, "=> Hit rate =   {:.3}", self.op_hit_rate())
    }
}

/// Statistics about variable reordering. Reordering itself is not
/// implemented; the hooks and counters exist so instrumented builds keep a
/// stable surface.
#[derive(Debug, Clone, Default)]
pub struct ReorderStats {
    pub time: Duration,
    pub usednum_before: usize,
    pub usednum_after: usize,
}

impl ReorderStats {
    /// Percentage of nodes gained by the last reordering.
    pub fn gain(&self) -> isize {
        if self.usednum_before == 0 {
            return 0;
        }
        (100 * (self.usednum_before as isize - self.usednum_after as isize))
            / self.usednum_before as isize
    }
}

impl fmt::Display for ReorderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Went from {} to {} nodes, gain = {}% ({:.3} sec)",
            self.usednum_before,
            self.usednum_after,
            self.gain(),
            self.time.as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_stats_display() {
        let stats = GcStats {
            nodes: 1024,
            freenodes: 512,
            reusednodes: 100,
            time: Duration::from_millis(5),
            sumtime: Duration::from_millis(25),
            num: 3,
        };
        let text = stats.to_string();
        assert!(text.contains("Garbage collection #3"));
        assert!(text.contains("1024 nodes"));
        assert!(text.contains("512 free"));
    }

    #[test]
    fn test_hit_rates() {
        let stats = CacheStats {
            unique_hit: 3,
            unique_miss: 1,
            op_hit: 0,
            op_miss: 0,
            ..CacheStats::default()
        };
        assert!((stats.unique_hit_rate() - 0.75).abs() < 1e-9);
        assert_eq!(stats.op_hit_rate(), 0.0);
    }

    #[test]
    fn test_reorder_gain() {
        let stats = ReorderStats {
            usednum_before: 200,
            usednum_after: 150,
            ..ReorderStats::default()
        };
        assert_eq!(stats.gain(), 25);
        assert_eq!(ReorderStats::default().gain(), 0);
    }
}
