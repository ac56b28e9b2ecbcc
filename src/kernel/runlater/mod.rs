// RunLater: call a plain function once, some time from now
//
// The function pointer is stored erased next to a monomorphized
// trampoline that knows how to unpack its arguments. One heap buffer
// per call holds the packed arguments; it is dropped right after the
// call (or on cancel). At most one deferred call runs per pass.

pub mod args;

use alloc::vec::Vec;
use core::mem;

use self::args::{PackArgs, Slot};
use super::error::{Result, SchedError};
use super::scheduler::Scheduler;
use super::time::Clock;

pub use self::args::PackArg;

struct Deferred {
    func: *const (),
    invoke: unsafe fn(*const (), &[Slot]),
    run_at_us: u64,
    args: Option<Vec<Slot>>,
}

impl Deferred {
    fn invoke(self) {
        let slots = self.args.as_deref().unwrap_or(&[]);
        // SAFETY: `invoke` was instantiated for the same `A` that erased `func`
        unsafe { (self.invoke)(self.func, slots) }
    }
}

unsafe fn trampoline<A: PackArgs>(func: *const (), slots: &[Slot]) {
    debug_assert_eq!(slots.len(), A::SLOTS);
    // SAFETY: caller guarantees `func` came from `erase::<A>`
    let f: A::Func = unsafe { mem::transmute_copy(&func) };
    A::call(f, slots);
}

fn erase<A: PackArgs>(f: A::Func) -> *const () {
    const { assert!(size_of::<fn()>() == size_of::<*const ()>()) };
    debug_assert_eq!(size_of::<A::Func>(), size_of::<*const ()>());
    // SAFETY: A::Func is a fn pointer, pointer sized
    unsafe { mem::transmute_copy(&f) }
}

/// Pending deferred call, as listed by [`Scheduler::run_later_pending`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredInfo {
    pub func: *const (),
    pub run_at_us: u64,
    pub slots: usize,
}

pub(crate) struct RunLaterTable {
    list: Vec<Deferred>,
    // last pass that saw the table non-empty
    busy_at_us: u64,
}

impl RunLaterTable {
    pub(crate) const fn new(now_us: u64) -> Self {
        Self {
            list: Vec::new(),
            busy_at_us: now_us,
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.list.capacity()
    }
}

impl<C: Clock + 'static> Scheduler<C> {
    /// Call `f(args..)` once, `delay_us` from now.
    ///
    /// `f` must be a fn pointer (`f as fn(u8, u32)`); the [`run_later!`]
    /// macro does that cast for you.
    ///
    /// [`run_later!`]: crate::run_later
    pub fn run_later<A: PackArgs>(&mut self, f: A::Func, delay_us: u64, args: A) -> Result<()> {
        let max = self.config.runlater_max_args;
        if A::ARGC > max {
            log::warn!("runlater: {} args, max {}", A::ARGC, max);
            return Err(SchedError::TooManyArgs { argc: A::ARGC, max });
        }
        if A::SLOTS > max {
            log::warn!("runlater: {} slots, max {}", A::SLOTS, max);
            return Err(SchedError::ArgsTooLarge { slots: A::SLOTS, max });
        }

        let buf = if A::SLOTS == 0 {
            None
        } else {
            let mut v = Vec::new();
            v.try_reserve_exact(A::SLOTS).map_err(|_| SchedError::Alloc)?;
            args.pack(&mut v);
            Some(v)
        };
        self.later.list.try_reserve(1).map_err(|_| SchedError::Alloc)?;

        let run_at_us = self.now_us().saturating_add(delay_us);
        self.later.list.push(Deferred {
            func: erase::<A>(f),
            invoke: trampoline::<A>,
            run_at_us,
            args: buf,
        });
        Ok(())
    }

    /// Drop the first pending call of `f` (`f as *const ()`). Returns
    /// whether one was found.
    pub fn run_later_cancel(&mut self, f: *const ()) -> bool {
        match self.later.list.iter().position(|d| d.func == f) {
            Some(idx) => {
                self.later.list.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn run_later_count(&self) -> usize {
        self.later.list.len()
    }

    pub fn run_later_pending(&self) -> impl Iterator<Item = DeferredInfo> + '_ {
        self.later.list.iter().map(|d| DeferredInfo {
            func: d.func,
            run_at_us: d.run_at_us,
            slots: d.args.as_ref().map_or(0, Vec::len),
        })
    }

    pub(crate) fn poll_run_later(&mut self) -> Option<u64> {
        let now = self.now_us();
        if self.later.list.is_empty() {
            let idle = now.saturating_sub(self.later.busy_at_us);
            if self.later.list.capacity() > 0 && idle >= self.config.runlater_shrink_after_us {
                self.later.list = Vec::new();
                log::debug!("runlater: idle {}us, storage released", idle);
            }
            return None;
        }
        self.later.busy_at_us = now;

        if let Some(idx) = self.later.list.iter().position(|d| now >= d.run_at_us) {
            let call = self.later.list.remove(idx);
            call.invoke();
            return Some(0);
        }
        self.later.list.iter().map(|d| d.run_at_us - now).min()
    }
}

/// Defer a call: `run_later!(sched, f, delay_us, args..)`.
///
/// Casts `f` to the matching fn pointer and packs the arguments.
#[macro_export]
macro_rules! run_later {
    ($sched:expr, $f:expr, $delay_us:expr $(, $arg:expr)* $(,)?) => {
        $sched.run_later(
            $f as fn($($crate::__run_later_infer!($arg)),*),
            $delay_us,
            ($($arg,)*),
        )
    };
}

/// Cancel the first pending call of `f`: `run_later_cancel!(sched, f)`.
#[macro_export]
macro_rules! run_later_cancel {
    ($sched:expr, $f:expr) => {
        $sched.run_later_cancel($f as *const ())
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __run_later_infer {
    ($arg:expr) => {
        _
    };
}

#[cfg(test)]
mod tests {
    use crate::kernel::config::SchedConfig;
    use crate::kernel::error::SchedError;
    use crate::kernel::scheduler::Scheduler;
    use crate::kernel::scheduler::tests::sched;
    use crate::kernel::softint::SoftInt;
    use crate::kernel::time::ManualClock;
    use alloc::boxed::Box;
    use core::cell::Cell;

    std::thread_local! {
        static NARROW: Cell<Option<(u8, i8, u16, i16, u32, i32)>> = const { Cell::new(None) };
        static WIDE: Cell<Option<(u64, i64, u64)>> = const { Cell::new(None) };
        static MISC: Cell<Option<(u32, bool, char, usize, isize)>> = const { Cell::new(None) };
        static HITS: Cell<u32> = const { Cell::new(0) };
    }

    fn narrow(a: u8, b: i8, c: u16, d: i16, e: u32, f: i32) {
        NARROW.with(|n| n.set(Some((a, b, c, d, e, f))));
    }

    fn wide(a: u64, b: i64, c: f64) {
        WIDE.with(|w| w.set(Some((a, b, c.to_bits()))));
    }

    fn misc(a: f32, b: bool, c: char, d: usize, e: isize) {
        MISC.with(|m| m.set(Some((a.to_bits(), b, c, d, e))));
    }

    fn hit() {
        HITS.with(|h| h.set(h.get() + 1));
    }

    fn hits() -> u32 {
        HITS.with(Cell::get)
    }

    #[allow(clippy::too_many_arguments)]
    fn ten(_: u8, _: u8, _: u8, _: u8, _: u8, _: u8, _: u8, _: u8, _: u8, _: u64) {}

    #[test]
    fn arguments_round_trip_bit_exact() {
        let mut s = sched();
        crate::run_later!(s, narrow, 0, 0xFEu8, -128i8, 0xBEEFu16, -2i16, u32::MAX, i32::MIN).unwrap();
        crate::run_later!(s, wide, 0, 0xDEAD_BEEF_0BAD_F00Du64, -1i64, f64::MIN_POSITIVE).unwrap();
        crate::run_later!(s, misc, 0, f32::NAN, true, 'ß', usize::MAX, isize::MIN).unwrap();

        for _ in 0..3 {
            assert_eq!(s.run(false), 0);
        }
        assert_eq!(s.run_later_count(), 0);

        assert_eq!(
            NARROW.with(Cell::get),
            Some((0xFE, -128, 0xBEEF, -2, u32::MAX, i32::MIN))
        );
        assert_eq!(
            WIDE.with(Cell::get),
            Some((0xDEAD_BEEF_0BAD_F00D, -1, f64::MIN_POSITIVE.to_bits()))
        );
        assert_eq!(
            MISC.with(Cell::get),
            Some((f32::NAN.to_bits(), true, 'ß', usize::MAX, isize::MIN))
        );
    }

    #[test]
    fn runs_once_after_delay() {
        HITS.with(|h| h.set(0));
        let mut s = sched();
        crate::run_later!(s, hit, 5_000).unwrap();

        assert_eq!(s.run(false), 5_000);
        assert_eq!(hits(), 0);
        s.clock().advance_us(5_000);
        assert_eq!(s.run(false), 0);
        assert_eq!(hits(), 1);
        s.run(false);
        assert_eq!(hits(), 1);
    }

    #[test]
    fn one_call_per_pass() {
        HITS.with(|h| h.set(0));
        let mut s = sched();
        crate::run_later!(s, hit, 0).unwrap();
        crate::run_later!(s, hit, 0).unwrap();
        s.run(false);
        assert_eq!(hits(), 1);
        s.run(false);
        assert_eq!(hits(), 2);
    }

    #[test]
    fn oversized_calls_rejected_up_front() {
        let mut s = sched();
        // ten args but eleven slots
        let r = crate::run_later!(s, ten, 0, 1u8, 2u8, 3u8, 4u8, 5u8, 6u8, 7u8, 8u8, 9u8, 10u64);
        assert_eq!(r, Err(SchedError::ArgsTooLarge { slots: 11, max: 10 }));

        let mut cfg = SchedConfig::defaults();
        cfg.runlater_max_args = 2;
        let softint: &'static SoftInt = Box::leak(Box::new(SoftInt::new()));
        let mut s2 = Scheduler::with_config(ManualClock::new(1_000_000), cfg).with_softint(softint);
        let r = crate::run_later!(s2, wide, 0, 1u64, 2i64, 3.0f64);
        assert_eq!(r, Err(SchedError::TooManyArgs { argc: 3, max: 2 }));

        assert_eq!(s.run_later_count(), 0);
        assert_eq!(s2.run_later_count(), 0);
    }

    #[test]
    fn cancel_removes_first_match() {
        let mut s = sched();
        crate::run_later!(s, hit, 100).unwrap();
        crate::run_later!(s, wide, 100, 1u64, 1i64, 1.0f64).unwrap();
        crate::run_later!(s, hit, 200).unwrap();

        assert!(crate::run_later_cancel!(s, hit));
        assert_eq!(s.run_later_count(), 2);
        let first = s.run_later_pending().next().unwrap();
        assert_eq!(first.slots, 6);

        assert!(crate::run_later_cancel!(s, hit));
        assert!(!crate::run_later_cancel!(s, hit));
        assert_eq!(s.run_later_count(), 1);
    }

    #[test]
    fn idle_storage_is_released() {
        let mut s = sched();
        crate::run_later!(s, hit, 0).unwrap();
        s.run(false);
        assert!(s.later.capacity() > 0);

        s.clock().advance_us(9_000_000);
        s.run(false);
        assert!(s.later.capacity() > 0);

        s.clock().advance_us(1_000_000);
        s.run(false);
        assert_eq!(s.later.capacity(), 0);
    }
}
