// Monotonic time base
//
// The platform owns the hardware timer; the scheduler only needs a
// free-running tick counter and its rate. Everything user facing is in
// microseconds, tables store ticks.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::Mutex;

pub trait Clock {
    /// Free-running tick counter, never goes backwards
    fn now_ticks(&self) -> u64;
    /// Ticks per second
    fn tick_hz(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ticks(&self) -> u64 {
        (**self).now_ticks()
    }

    fn tick_hz(&self) -> u64 {
        (**self).tick_hz()
    }
}

/// Cached conversion between ticks, microseconds and frequencies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    tick_hz: u64,
}

impl TimeBase {
    pub const fn new(tick_hz: u64) -> Self {
        Self {
            tick_hz: if tick_hz == 0 { 1 } else { tick_hz },
        }
    }

    pub const fn tick_hz(&self) -> u64 {
        self.tick_hz
    }

    pub const fn ticks_to_us(&self, ticks: u64) -> u64 {
        (ticks as u128 * 1_000_000 / self.tick_hz as u128) as u64
    }

    pub const fn us_to_ticks(&self, us: u64) -> u64 {
        (us as u128 * self.tick_hz as u128 / 1_000_000) as u64
    }

    /// Period in ticks for `hz`, at least one tick. None for zero,
    /// negative or non-finite rates.
    pub fn hz_to_period(&self, hz: f32) -> Option<u64> {
        if !hz.is_finite() || hz <= 0.0 {
            return None;
        }
        let period = (self.tick_hz as f64 / hz as f64) as u64;
        Some(period.max(1))
    }

    pub fn period_to_hz(&self, period: u64) -> f32 {
        (self.tick_hz as f64 / period.max(1) as f64) as f32
    }
}

/// Clock advanced by hand: host tests and simulation
pub struct ManualClock {
    ticks: Mutex<Cell<u64>>,
    hz: u64,
}

impl ManualClock {
    pub const fn new(tick_hz: u64) -> Self {
        Self {
            ticks: Mutex::new(Cell::new(0)),
            hz: tick_hz,
        }
    }

    pub fn set_ticks(&self, ticks: u64) {
        critical_section::with(|cs| self.ticks.borrow(cs).set(ticks));
    }

    pub fn advance_ticks(&self, ticks: u64) {
        critical_section::with(|cs| {
            let t = self.ticks.borrow(cs);
            t.set(t.get().wrapping_add(ticks));
        });
    }

    pub fn advance_us(&self, us: u64) {
        self.advance_ticks(TimeBase::new(self.hz).us_to_ticks(us));
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> u64 {
        critical_section::with(|cs| self.ticks.borrow(cs).get())
    }

    fn tick_hz(&self) -> u64 {
        self.hz
    }
}

/// Tick counter fed by a periodic timer interrupt.
///
/// The ISR calls [`UptimeClock::tick`]; when the board slows the timer
/// down while idle it raises the weight so uptime stays in base ticks.
pub struct UptimeClock {
    // cs: riscv32imc has no atomic add
    ticks: Mutex<Cell<u64>>,
    weight: AtomicU32,
    hz: u64,
}

impl UptimeClock {
    pub const fn new(tick_hz: u64) -> Self {
        Self {
            ticks: Mutex::new(Cell::new(0)),
            weight: AtomicU32::new(1),
            hz: tick_hz,
        }
    }

    #[inline]
    pub fn tick(&self) {
        let weight = self.weight.load(Ordering::Relaxed) as u64;
        critical_section::with(|cs| {
            let ticks = self.ticks.borrow(cs);
            ticks.set(ticks.get().wrapping_add(weight));
        });
    }

    /// Base ticks per timer interrupt
    pub fn set_tick_weight(&self, weight: u32) {
        self.weight.store(weight.max(1), Ordering::Release);
    }
}

impl Clock for UptimeClock {
    fn now_ticks(&self) -> u64 {
        critical_section::with(|cs| self.ticks.borrow(cs).get())
    }

    fn tick_hz(&self) -> u64 {
        self.hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        let tb = TimeBase::new(32_768);
        assert_eq!(tb.us_to_ticks(1_000_000), 32_768);
        assert_eq!(tb.ticks_to_us(32_768), 1_000_000);
        assert_eq!(tb.hz_to_period(1.0), Some(32_768));
        assert_eq!(tb.hz_to_period(1_000_000.0), Some(1));
        assert_eq!(tb.hz_to_period(0.0), None);
        assert_eq!(tb.hz_to_period(-3.0), None);
        assert_eq!(tb.hz_to_period(f32::NAN), None);
    }

    #[test]
    fn uptime_weight() {
        static CLK: UptimeClock = UptimeClock::new(100);
        CLK.tick();
        CLK.set_tick_weight(10);
        CLK.tick();
        assert_eq!(CLK.now_ticks(), 11);
    }

    #[test]
    fn manual_clock_advances() {
        let clk = ManualClock::new(1_000);
        clk.advance_us(5_000);
        assert_eq!(clk.now_ticks(), 5);
        clk.set_ticks(100);
        assert_eq!((&clk).now_ticks(), 100);
    }
}
