// Per-entry dispatch counters (ticks)
//
// Kept unconditionally: a handful of adds per dispatch. The report
// module reads and resets them every interval.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub runs: u32,
    pub max_cost: u64,
    pub total_cost: u64,
    pub max_latency: u64,
    pub total_latency: u64,
    /// tasks: late beyond the compensation window, phase dropped
    pub desyncs: u32,
    /// events: accepted triggers
    pub triggers: u32,
}

impl DispatchStats {
    pub fn record(&mut self, cost: u64, latency: u64) {
        self.runs = self.runs.wrapping_add(1);
        self.max_cost = self.max_cost.max(cost);
        self.total_cost = self.total_cost.saturating_add(cost);
        self.max_latency = self.max_latency.max(latency);
        self.total_latency = self.total_latency.saturating_add(latency);
    }

    pub fn avg_latency(&self) -> u64 {
        if self.runs == 0 {
            0
        } else {
            self.total_latency / self.runs as u64
        }
    }

    /// Interval counters back to zero; desync count survives
    pub fn reset_interval(&mut self) {
        *self = Self {
            desyncs: self.desyncs,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_reset() {
        let mut s = DispatchStats::default();
        s.record(10, 2);
        s.record(30, 4);
        s.desyncs = 1;
        assert_eq!(s.runs, 2);
        assert_eq!(s.max_cost, 30);
        assert_eq!(s.total_cost, 40);
        assert_eq!(s.avg_latency(), 3);

        s.reset_interval();
        assert_eq!(s.runs, 0);
        assert_eq!(s.max_cost, 0);
        assert_eq!(s.desyncs, 1);
    }
}
