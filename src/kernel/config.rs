// Scheduler tuning knobs
//
// Compile-time defaults match the firmware build; a board can override
// them from a SCHED.TXT style key=value blob before creating the
// scheduler. Unknown keys are ignored so old files keep loading.

/// Direction in which task priorities are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriorityOrder {
    /// larger number runs first
    #[default]
    HigherFirst,
    /// smaller number runs first
    LowerFirst,
}

impl PriorityOrder {
    pub(crate) fn before(self, a: u8, b: u8) -> core::cmp::Ordering {
        match self {
            PriorityOrder::HigherFirst => b.cmp(&a),
            PriorityOrder::LowerFirst => a.cmp(&b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// lateness a task may accumulate before it gets resynced instead of phase locked
    pub comp_range_us: u64,
    /// longest sleep the run loop will ever recommend
    pub idle_ceiling_us: u64,
    pub priority_order: PriorityOrder,
    pub event_allow_duplicate: bool,
    /// max argument count (and packed 32-bit slots) of a deferred call
    pub runlater_max_args: usize,
    /// release deferred-call storage after this long without entries
    pub runlater_shrink_after_us: u64,
    /// statistics report interval; None = reporting off
    pub report_period_us: Option<u64>,
    /// rows per table in the report
    pub report_max_lines: usize,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl SchedConfig {
    pub const fn defaults() -> Self {
        Self {
            comp_range_us: 1_000,
            idle_ceiling_us: 1_000_000,
            priority_order: PriorityOrder::HigherFirst,
            event_allow_duplicate: false,
            runlater_max_args: 10,
            runlater_shrink_after_us: 10_000_000,
            report_period_us: None,
            report_max_lines: 20,
        }
    }

    pub fn sanitize(&mut self) {
        self.idle_ceiling_us = self.idle_ceiling_us.clamp(1_000, 60_000_000);
        self.comp_range_us = self.comp_range_us.min(self.idle_ceiling_us);
        self.runlater_max_args = self.runlater_max_args.clamp(1, 32);
        if let Some(p) = self.report_period_us {
            self.report_period_us = if p == 0 { None } else { Some(p.max(100_000)) };
        }
        self.report_max_lines = self.report_max_lines.clamp(1, 200);
    }

    /// Parse a key=value blob on top of the defaults.
    pub fn parse(data: &[u8]) -> Self {
        let mut cfg = Self::defaults();
        for line in data.split(|&b| b == b'\n') {
            let line = trim(line);
            if line.is_empty() || line[0] == b'#' {
                continue;
            }
            if let Some(eq) = line.iter().position(|&b| b == b'=') {
                let key = trim(&line[..eq]);
                let val = trim(&line[eq + 1..]);
                cfg.apply(key, val);
            }
        }
        cfg.sanitize();
        log::info!(
            "sched: config ceiling={}us comp={}us report={:?}",
            cfg.idle_ceiling_us,
            cfg.comp_range_us,
            cfg.report_period_us
        );
        cfg
    }

    fn apply(&mut self, key: &[u8], val: &[u8]) {
        match key {
            b"comp_range_us" => {
                if let Some(v) = parse_u64(val) {
                    self.comp_range_us = v;
                }
            }
            b"idle_ceiling_us" => {
                if let Some(v) = parse_u64(val) {
                    self.idle_ceiling_us = v;
                }
            }
            b"priority_order" => match val {
                b"high" => self.priority_order = PriorityOrder::HigherFirst,
                b"low" => self.priority_order = PriorityOrder::LowerFirst,
                _ => {}
            },
            b"event_allow_duplicate" => {
                if let Some(v) = parse_u64(val) {
                    self.event_allow_duplicate = v != 0;
                }
            }
            b"runlater_max_args" => {
                if let Some(v) = parse_u64(val) {
                    self.runlater_max_args = v as usize;
                }
            }
            b"runlater_shrink_after_us" => {
                if let Some(v) = parse_u64(val) {
                    self.runlater_shrink_after_us = v;
                }
            }
            b"report_period_ms" => {
                if let Some(v) = parse_u64(val) {
                    self.report_period_us = if v == 0 { None } else { Some(v.saturating_mul(1_000)) };
                }
            }
            b"report_max_lines" => {
                if let Some(v) = parse_u64(val) {
                    self.report_max_lines = v as usize;
                }
            }
            _ => {}
        }
    }

    /// Serialize into `buf`, returns bytes written (truncates if short).
    pub fn write(&self, buf: &mut [u8]) -> usize {
        let mut wr = TxtWriter::new(buf);
        wr.put(b"# pulp-sched config\n");
        wr.put(b"# lines starting with # are ignored\n\n");
        wr.kv_num(b"comp_range_us", self.comp_range_us);
        wr.kv_num(b"idle_ceiling_us", self.idle_ceiling_us);
        wr.kv_str(
            b"priority_order",
            match self.priority_order {
                PriorityOrder::HigherFirst => b"high",
                PriorityOrder::LowerFirst => b"low",
            },
        );
        wr.kv_num(b"event_allow_duplicate", self.event_allow_duplicate as u64);
        wr.kv_num(b"runlater_max_args", self.runlater_max_args as u64);
        wr.kv_num(b"runlater_shrink_after_us", self.runlater_shrink_after_us);
        wr.put(b"\n# 0 = no periodic report\n");
        wr.kv_num(b"report_period_ms", self.report_period_us.map_or(0, |us| us / 1_000));
        wr.kv_num(b"report_max_lines", self.report_max_lines as u64);
        wr.len()
    }
}

fn trim(s: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = s.len();
    while start < end && matches!(s[start], b' ' | b'\t' | b'\r') {
        start += 1;
    }
    while end > start && matches!(s[end - 1], b' ' | b'\t' | b'\r') {
        end -= 1;
    }
    &s[start..end]
}

fn parse_u64(s: &[u8]) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut val: u64 = 0;
    for &b in s {
        if b == b'_' {
            continue;
        }
        if !b.is_ascii_digit() {
            return None;
        }
        val = val.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some(val)
}

// cursor writer over a caller buffer
struct TxtWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> TxtWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, data: &[u8]) {
        let n = data.len().min(self.buf.len() - self.pos);
        self.buf[self.pos..self.pos + n].copy_from_slice(&data[..n]);
        self.pos += n;
    }

    fn put_u64(&mut self, val: u64) {
        let mut digits = [0u8; 20];
        let mut i = digits.len();
        let mut v = val;
        loop {
            i -= 1;
            digits[i] = b'0' + (v % 10) as u8;
            v /= 10;
            if v == 0 {
                break;
            }
        }
        self.put(&digits[i..]);
    }

    fn kv_num(&mut self, key: &[u8], val: u64) {
        self.put(key);
        self.put(b"=");
        self.put_u64(val);
        self.put(b"\n");
    }

    fn kv_str(&mut self, key: &[u8], val: &[u8]) {
        self.put(key);
        self.put(b"=");
        self.put(val);
        self.put(b"\n");
    }

    fn len(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_overrides_defaults() {
        let txt = b"# board overrides\n\
                    comp_range_us = 250\r\n\
                    priority_order=low\n\
                    report_period_ms=5000\n\
                    bogus_key=7\n\
                    runlater_max_args=4\n";
        let cfg = SchedConfig::parse(txt);
        assert_eq!(cfg.comp_range_us, 250);
        assert_eq!(cfg.priority_order, PriorityOrder::LowerFirst);
        assert_eq!(cfg.report_period_us, Some(5_000_000));
        assert_eq!(cfg.runlater_max_args, 4);
        assert_eq!(cfg.idle_ceiling_us, 1_000_000);
        assert!(!cfg.event_allow_duplicate);
    }

    #[test]
    fn write_then_parse_keeps_values() {
        let mut cfg = SchedConfig::defaults();
        cfg.idle_ceiling_us = 250_000;
        cfg.event_allow_duplicate = true;
        cfg.report_period_us = Some(2_000_000);
        cfg.report_max_lines = 8;

        let mut buf = [0u8; 512];
        let n = cfg.write(&mut buf);
        assert_eq!(SchedConfig::parse(&buf[..n]), cfg);
    }

    #[test]
    fn sanitize_clamps() {
        let cfg = SchedConfig::parse(b"idle_ceiling_us=5\nrunlater_max_args=0\nreport_period_ms=1\n");
        assert_eq!(cfg.idle_ceiling_us, 1_000);
        assert_eq!(cfg.comp_range_us, 1_000);
        assert_eq!(cfg.runlater_max_args, 1);
        assert_eq!(cfg.report_period_us, Some(100_000));
    }

    #[test]
    fn garbage_values_keep_defaults() {
        let cfg = SchedConfig::parse(b"comp_range_us=fast\npriority_order=sideways\n");
        assert_eq!(cfg, SchedConfig::defaults());
    }
}
