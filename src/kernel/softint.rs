// Software interrupts: 8 main channels x 8 sub channels
//
// Producers (ISRs, tasks, drivers) OR bits in from any context; only the
// run loop clears them. A trigger writes the sub mask before the main
// bit and the drain clears main before snapshotting sub, so a trigger
// racing a drain lands either in this pass or in the next one.
// Repeated triggers of the same bit before a drain coalesce.

use core::sync::atomic::{AtomicU8, Ordering};

use alloc::boxed::Box;

use super::scheduler::Scheduler;

pub const CHANNELS: u8 = 8;

/// Handler invoked once per pending main channel with its sub mask
pub type SoftIntFn<C> = Box<dyn FnMut(&mut Scheduler<C>, u8, u8)>;

pub struct SoftInt {
    main: AtomicU8,
    sub: [AtomicU8; CHANNELS as usize],
}

/// Process wide instance for ISRs that have no scheduler handle
pub static SOFT_INT: SoftInt = SoftInt::new();

impl Default for SoftInt {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftInt {
    pub const fn new() -> Self {
        Self {
            main: AtomicU8::new(0),
            sub: [const { AtomicU8::new(0) }; CHANNELS as usize],
        }
    }

    /// Set `sub` on channel `main`. Out of range values are ignored.
    pub fn trigger(&self, main: u8, sub: u8) -> bool {
        if main >= CHANNELS || sub >= CHANNELS {
            return false;
        }
        // cs: riscv32imc has no atomic or
        critical_section::with(|_| {
            let s = &self.sub[main as usize];
            s.store(s.load(Ordering::Relaxed) | (1 << sub), Ordering::Relaxed);
            let m = self.main.load(Ordering::Relaxed);
            self.main.store(m | (1 << main), Ordering::Release);
        });
        true
    }

    pub fn is_pending(&self) -> bool {
        self.main.load(Ordering::Acquire) != 0
    }

    pub fn pending_mask(&self) -> u8 {
        self.main.load(Ordering::Acquire)
    }

    /// Consume every pending channel, calling `f(main, sub_mask)` once
    /// per channel. Returns the number of channels handled.
    pub fn drain(&self, mut f: impl FnMut(u8, u8)) -> usize {
        let pending = self.main.load(Ordering::Acquire);
        if pending == 0 {
            return 0;
        }

        let mut handled = 0;
        for ch in 0..CHANNELS {
            if pending & (1 << ch) == 0 {
                continue;
            }
            let mask = critical_section::with(|_| {
                let m = self.main.load(Ordering::Relaxed);
                self.main.store(m & !(1 << ch), Ordering::Relaxed);
                let s = &self.sub[ch as usize];
                let mask = s.load(Ordering::Relaxed);
                s.store(0, Ordering::Relaxed);
                mask
            });
            f(ch, mask);
            handled += 1;
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn coalesces_until_drained() {
        let si = SoftInt::new();
        assert!(si.trigger(3, 1));
        assert!(si.trigger(3, 1));
        assert!(si.trigger(3, 5));
        assert!(si.trigger(0, 7));
        assert_eq!(si.pending_mask(), 0b0000_1001);

        let mut seen = Vec::new();
        assert_eq!(si.drain(|m, s| seen.push((m, s))), 2);
        assert_eq!(seen, [(0, 0b1000_0000), (3, 0b0010_0010)]);

        assert!(!si.is_pending());
        assert_eq!(si.drain(|_, _| panic!("nothing pending")), 0);
    }

    #[test]
    fn out_of_range_ignored() {
        let si = SoftInt::new();
        assert!(!si.trigger(8, 0));
        assert!(!si.trigger(0, 8));
        assert!(!si.is_pending());
    }

    #[test]
    fn trigger_from_handler_lands_next_drain() {
        let si = SoftInt::new();
        si.trigger(2, 0);
        let mut calls = 0;
        si.drain(|m, _| {
            calls += 1;
            si.trigger(m, 1);
        });
        assert_eq!(calls, 1);
        assert_eq!(si.pending_mask(), 1 << 2);
    }
}
