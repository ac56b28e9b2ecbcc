// The run loop
//
// One Scheduler owns every table: periodic tasks, events, coroutines and
// deferred calls, plus a binding to a soft-interrupt block. Each pass
// visits them in a fixed order:
//
//   softint -> tasks -> coroutines -> runlater -> events
//
// and folds their "next due" answers into one recommended sleep, capped
// by the idle ceiling. Callbacks receive &mut Scheduler so they can
// create, delete and trigger things; each table detects that through a
// generation counter and stops its scan.

use alloc::boxed::Box;

use super::config::SchedConfig;
use super::coroutine::CortnTable;
use super::event::EventTable;
use super::report::ReportState;
use super::runlater::RunLaterTable;
use super::softint::{SOFT_INT, SoftInt, SoftIntFn};
use super::task::TaskTable;
use super::time::{Clock, TimeBase};
use super::wake::{self, IdleFn};

pub struct Scheduler<C: Clock> {
    clock: C,
    time: TimeBase,
    pub(crate) config: SchedConfig,

    pub(crate) tasks: TaskTable<C>,
    pub(crate) events: EventTable<C>,
    pub(crate) cortns: CortnTable<C>,
    pub(crate) later: RunLaterTable,

    softint: &'static SoftInt,
    softint_handler: Option<SoftIntFn<C>>,
    idle_hook: Option<IdleFn>,

    pub(crate) report: ReportState,
}

impl<C: Clock + 'static> Scheduler<C> {
    pub fn new(clock: C) -> Self {
        Self::with_config(clock, SchedConfig::defaults())
    }

    pub fn with_config(clock: C, mut config: SchedConfig) -> Self {
        config.sanitize();
        let time = TimeBase::new(clock.tick_hz());
        let now = clock.now_ticks();
        log::info!(
            "sched: tick {}Hz, ceiling {}us",
            time.tick_hz(),
            config.idle_ceiling_us
        );
        Self {
            clock,
            time,
            config,
            tasks: TaskTable::new(),
            events: EventTable::new(),
            cortns: CortnTable::new(),
            later: RunLaterTable::new(time.ticks_to_us(now)),
            softint: &SOFT_INT,
            softint_handler: None,
            idle_hook: None,
            report: ReportState::new(now),
        }
    }

    /// Bind to a different soft-interrupt block (default: [`SOFT_INT`])
    pub fn with_softint(mut self, softint: &'static SoftInt) -> Self {
        self.softint = softint;
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn time(&self) -> TimeBase {
        self.time
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn softint(&self) -> &'static SoftInt {
        self.softint
    }

    #[inline]
    pub fn now_ticks(&self) -> u64 {
        self.clock.now_ticks()
    }

    #[inline]
    pub fn now_us(&self) -> u64 {
        self.time.ticks_to_us(self.clock.now_ticks())
    }

    /// Shorthand for `self.softint().trigger(main, sub)`
    pub fn soft_int_trigger(&self, main: u8, sub: u8) -> bool {
        self.softint.trigger(main, sub)
    }

    pub fn set_softint_handler(&mut self, f: impl FnMut(&mut Scheduler<C>, u8, u8) + 'static) {
        self.softint_handler = Some(Box::new(f));
    }

    /// Replace the low-power wait used by `run(true)`
    pub fn set_idle_hook(&mut self, f: impl FnMut(u64) + 'static) {
        self.idle_hook = Some(Box::new(f));
    }

    /// Run the scheduler.
    ///
    /// `block = false`: one pass, returns the recommended sleep in µs.
    /// `block = true`: never returns; sleeps through the idle hook
    /// whenever nothing is due.
    pub fn run(&mut self, block: bool) -> u64 {
        loop {
            let sleep_us = self.pass();

            if self.maybe_report(sleep_us) && block {
                continue;
            }
            if !block {
                return sleep_us;
            }
            if sleep_us > 0 {
                self.idle(sleep_us);
            }
        }
    }

    fn pass(&mut self) -> u64 {
        self.poll_softint();

        let mut next = self.poll_tasks();
        next = min_due(next, self.poll_cortns());
        next = min_due(next, self.poll_run_later());
        self.poll_events();
        // armed after its slot was visited
        if self.events.any_due() || self.softint.is_pending() {
            return 0;
        }

        let ceiling = self.config.idle_ceiling_us;
        next.map_or(ceiling, |us| us.min(ceiling))
    }

    fn poll_softint(&mut self) {
        if !self.softint.is_pending() {
            return;
        }
        let softint = self.softint;
        let mut handler = self.softint_handler.take();
        softint.drain(|main, mask| match handler.as_mut() {
            Some(f) => f(self, main, mask),
            None => log::debug!("softint: ch {} mask {:#04x} unhandled", main, mask),
        });
        // a handler may have installed a replacement
        if self.softint_handler.is_none() {
            self.softint_handler = handler;
        }
    }

    fn idle(&mut self, us: u64) {
        match self.idle_hook.as_mut() {
            Some(hook) => hook(us),
            None => wake::idle_wait(&self.clock, us),
        }
    }
}

#[inline]
pub(crate) fn min_due(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kernel::time::ManualClock;
    use alloc::rc::Rc;
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    /// 1 MHz manual clock (1 tick = 1 µs) starting at t = 1 s, bound to a
    /// private soft-interrupt block so parallel tests don't share bits.
    pub(crate) fn sched() -> Scheduler<ManualClock> {
        let clock = ManualClock::new(1_000_000);
        clock.set_ticks(1_000_000);
        let softint: &'static SoftInt = Box::leak(Box::new(SoftInt::new()));
        Scheduler::new(clock).with_softint(softint)
    }

    #[test]
    fn empty_scheduler_sleeps_ceiling() {
        let mut s = sched();
        assert_eq!(s.run(false), 1_000_000);
    }

    #[test]
    fn recommendation_never_exceeds_ceiling() {
        let mut cfg = SchedConfig::defaults();
        cfg.idle_ceiling_us = 50_000;
        let clock = ManualClock::new(1_000_000);
        let softint: &'static SoftInt = Box::leak(Box::new(SoftInt::new()));
        let mut s = Scheduler::with_config(clock, cfg).with_softint(softint);

        s.task_create("slow", 0.5, true, 0, |_| {}).unwrap();
        assert_eq!(s.run(false), 0); // first run, due immediately
        assert_eq!(s.run(false), 50_000); // next due in 2 s, capped
    }

    #[test]
    fn softint_handler_sees_coalesced_mask() {
        let mut s = sched();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        s.set_softint_handler(move |_, main, mask| log.borrow_mut().push((main, mask)));

        s.soft_int_trigger(1, 0);
        s.soft_int_trigger(1, 0);
        s.soft_int_trigger(1, 4);
        s.run(false);
        s.run(false);

        assert_eq!(*seen.borrow(), [(1, 0b1_0001)]);
    }

    #[test]
    fn softint_runs_before_tasks() {
        let mut s = sched();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = order.clone();
        s.task_create("t", 10.0, true, 0, move |_| o.borrow_mut().push("task"))
            .unwrap();
        let o = order.clone();
        s.set_softint_handler(move |_, _, _| o.borrow_mut().push("softint"));
        s.soft_int_trigger(0, 0);

        s.run(false);
        assert_eq!(*order.borrow(), ["softint", "task"]);
    }

    #[test]
    fn event_armed_behind_the_scan_keeps_pass_awake() {
        let mut s = sched();
        let hits = Rc::new(Cell::new(0u32));
        let h = hits.clone();
        s.event_create("a", true, move |_, _| h.set(h.get() + 1)).unwrap();
        s.event_create("b", true, |s, _| s.event_trigger_none("a").unwrap())
            .unwrap();

        s.event_trigger_none("b").unwrap();
        assert_eq!(s.run(false), 0);
        assert!(s.event_is_pending("a"));
        assert_eq!(s.run(false), 1_000_000);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn softint_raised_after_drain_keeps_pass_awake() {
        let mut s = sched();
        let seen = Rc::new(Cell::new(0u32));
        let n = seen.clone();
        s.set_softint_handler(move |_, _, _| n.set(n.get() + 1));
        s.event_create("kick", true, |s, _| {
            s.soft_int_trigger(3, 1);
        })
        .unwrap();

        s.event_trigger_none("kick").unwrap();
        assert_eq!(s.run(false), 0);
        assert_eq!(seen.get(), 0);
        assert_eq!(s.run(false), 1_000_000);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn blocking_run_uses_idle_hook() {
        let clock: &'static ManualClock = Box::leak(Box::new(ManualClock::new(1_000_000)));
        let softint: &'static SoftInt = Box::leak(Box::new(SoftInt::new()));
        let mut s = Scheduler::new(clock).with_softint(softint);

        let naps = Rc::new(Cell::new(0u32));
        let n = naps.clone();
        s.set_idle_hook(move |us| {
            assert!(us > 0 && us <= 1_000_000);
            n.set(n.get() + 1);
            clock.advance_us(us);
        });

        // the task panics out of the blocking loop after a few naps
        let n = naps.clone();
        s.task_create("stop", 1000.0, true, 0, move |_| {
            if n.get() >= 3 {
                panic!("done");
            }
        })
        .unwrap();

        let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            s.run(true);
        }));
        assert!(r.is_err());
        assert!(naps.get() >= 3);
    }
}
