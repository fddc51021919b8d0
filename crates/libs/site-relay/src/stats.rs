use std::sync::atomic::{AtomicU64, Ordering};

/// Instance-scoped counters for the management surface. All fields are
/// monotonic accumulators, safe under concurrent increment (spec's shared
/// state policy).
#[derive(Default)]
pub struct RelayStats {
    pub relayed: AtomicU64,
    pub forwarded: AtomicU64,
    pub forward_to_local_mbr: AtomicU64,
    pub delivered: AtomicU64,
    pub site_unreachable: AtomicU64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            relayed: self.relayed.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_to_local_mbr: self.forward_to_local_mbr.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            site_unreachable: self.site_unreachable.load(Ordering::Relaxed),
        }
    }

    pub fn incr_relayed(&self) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_forward_to_local_mbr(&self) {
        self.forward_to_local_mbr.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_site_unreachable(&self) {
        self.site_unreachable.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub relayed: u64,
    pub forwarded: u64,
    pub forward_to_local_mbr: u64,
    pub delivered: u64,
    pub site_unreachable: u64,
}

/// Wall-clock nanosecond min/max/avg histogram for bundler flushes, gated
/// behind a constructor flag (§4.1 "if stats are enabled").
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushStats {
    count: u64,
    total_ns: u64,
    min_ns: u64,
    max_ns: u64,
}

impl FlushStats {
    pub fn record(&mut self, elapsed_ns: u64) {
        self.count += 1;
        self.total_ns += elapsed_ns;
        self.min_ns = if self.count == 1 { elapsed_ns } else { self.min_ns.min(elapsed_ns) };
        self.max_ns = self.max_ns.max(elapsed_ns);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min_ns(&self) -> u64 {
        self.min_ns
    }

    pub fn max_ns(&self) -> u64 {
        self.max_ns
    }

    pub fn avg_ns(&self) -> u64 {
        if self.count == 0 { 0 } else { self.total_ns / self.count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_stats_tracks_min_max_avg() {
        let mut stats = FlushStats::default();
        stats.record(100);
        stats.record(300);
        stats.record(200);
        assert_eq!(stats.min_ns(), 100);
        assert_eq!(stats.max_ns(), 300);
        assert_eq!(stats.avg_ns(), 200);
        assert_eq!(stats.count(), 3);
    }

    #[test]
    fn relay_stats_counters_increment() {
        let stats = RelayStats::default();
        stats.incr_relayed();
        stats.incr_relayed();
        stats.incr_forward_to_local_mbr();
        let snap = stats.snapshot();
        assert_eq!(snap.relayed, 2);
        assert_eq!(snap.forward_to_local_mbr, 1);
    }
}
