// Events: named callbacks armed by a trigger
//
// A trigger stores an argument and marks the event pending; the next
// pass runs every pending, enabled event once. The argument is either a
// 'static borrow owned by the caller or a copy owned by the scheduler,
// dropped when the callback is done with it.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem;

use super::error::{Result, SchedError};
use super::scheduler::Scheduler;
use super::stats::DispatchStats;
use super::time::Clock;

pub type EventFn<C> = Box<dyn FnMut(&mut Scheduler<C>, EventArg)>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventArg {
    #[default]
    None,
    /// caller keeps ownership
    Static(&'static [u8]),
    /// scheduler-owned copy
    Owned(Vec<u8>),
}

impl EventArg {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EventArg::None => &[],
            EventArg::Static(b) => b,
            EventArg::Owned(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, EventArg::Owned(_))
    }
}

/// Row returned by [`Scheduler::event_list`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventInfo {
    pub name: &'static str,
    pub enabled: bool,
    pub pending: bool,
    pub stats: DispatchStats,
}

pub(crate) struct Event<C: Clock> {
    pub(crate) id: u32,
    pub(crate) name: &'static str,
    callback: Option<EventFn<C>>,
    pub(crate) enabled: bool,
    pub(crate) pending: bool,
    arg: EventArg,
    pub(crate) trigger_tick: u64,
    pub(crate) stats: DispatchStats,
}

pub(crate) struct EventTable<C: Clock> {
    pub(crate) list: Vec<Event<C>>,
    generation: u32,
    next_id: u32,
}

impl<C: Clock> EventTable<C> {
    pub(crate) const fn new() -> Self {
        Self {
            list: Vec::new(),
            generation: 0,
            next_id: 1,
        }
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.list.iter().position(|e| e.name == name)
    }

    fn by_id_mut(&mut self, id: u32) -> Option<&mut Event<C>> {
        self.list.iter_mut().find(|e| e.id == id)
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Armed and enabled, so due on the next pass
    pub(crate) fn any_due(&self) -> bool {
        self.list.iter().any(|e| e.enabled && e.pending)
    }
}

impl<C: Clock + 'static> Scheduler<C> {
    pub fn event_create(
        &mut self,
        name: &'static str,
        enabled: bool,
        callback: impl FnMut(&mut Scheduler<C>, EventArg) + 'static,
    ) -> Result<()> {
        if !self.config.event_allow_duplicate && self.events.find(name).is_some() {
            return Err(SchedError::Duplicate);
        }
        self.events.list.try_reserve(1).map_err(|_| SchedError::Alloc)?;

        let id = self.events.next_id;
        self.events.next_id = id.wrapping_add(1);
        self.events.list.push(Event {
            id,
            name,
            callback: Some(Box::new(callback)),
            enabled,
            pending: false,
            arg: EventArg::None,
            trigger_tick: 0,
            stats: DispatchStats::default(),
        });
        self.events.touch();
        log::info!("event: created {}", name);
        Ok(())
    }

    pub fn event_delete(&mut self, name: &str) -> Result<()> {
        let idx = self.events.find(name).ok_or(SchedError::NotFound)?;
        self.events.list.remove(idx);
        self.events.touch();
        log::info!("event: deleted {}", name);
        Ok(())
    }

    /// Also drops any pending trigger and its argument.
    pub fn event_set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let idx = self.events.find(name).ok_or(SchedError::NotFound)?;
        let ev = &mut self.events.list[idx];
        ev.enabled = enabled;
        ev.pending = false;
        ev.arg = EventArg::None;
        Ok(())
    }

    /// Trigger with a caller-owned argument
    pub fn event_trigger(&mut self, name: &str, arg: &'static [u8]) -> Result<()> {
        self.arm(name, EventArg::Static(arg))
    }

    /// Trigger with a copy of `arg`; the copy lives until the callback returns
    pub fn event_trigger_ex(&mut self, name: &str, arg: &[u8]) -> Result<()> {
        // validate before copying so a failed trigger allocates nothing
        self.arm_check(name)?;
        let mut copy = Vec::new();
        copy.try_reserve_exact(arg.len()).map_err(|_| SchedError::Alloc)?;
        copy.extend_from_slice(arg);
        self.arm(name, EventArg::Owned(copy))
    }

    pub fn event_trigger_none(&mut self, name: &str) -> Result<()> {
        self.arm(name, EventArg::None)
    }

    fn arm_check(&self, name: &str) -> Result<usize> {
        let idx = self.events.find(name).ok_or(SchedError::NotFound)?;
        if !self.events.list[idx].enabled {
            return Err(SchedError::Disabled);
        }
        Ok(idx)
    }

    fn arm(&mut self, name: &str, arg: EventArg) -> Result<()> {
        let idx = self.arm_check(name)?;
        let now = self.now_ticks();
        let ev = &mut self.events.list[idx];
        // re-trigger replaces (and drops) the previous argument
        ev.arg = arg;
        if !ev.pending {
            ev.trigger_tick = now;
        }
        ev.pending = true;
        ev.stats.triggers = ev.stats.triggers.wrapping_add(1);
        Ok(())
    }

    pub fn event_count(&self) -> usize {
        self.events.list.len()
    }

    pub fn event_exists(&self, name: &str) -> bool {
        self.events.find(name).is_some()
    }

    pub fn event_is_enabled(&self, name: &str) -> bool {
        self.events.find(name).is_some_and(|i| self.events.list[i].enabled)
    }

    pub fn event_is_pending(&self, name: &str) -> bool {
        self.events.find(name).is_some_and(|i| self.events.list[i].pending)
    }

    pub fn event_list(&self) -> impl Iterator<Item = EventInfo> + '_ {
        self.events.list.iter().map(|e| EventInfo {
            name: e.name,
            enabled: e.enabled,
            pending: e.pending,
            stats: e.stats,
        })
    }

    /// Run every armed event once. Stops early if a callback changed
    /// the table; the rest stay armed for the next pass.
    pub(crate) fn poll_events(&mut self) {
        let generation = self.events.generation;
        let mut i = 0;
        while i < self.events.list.len() {
            let ev = &mut self.events.list[i];
            i += 1;
            if !ev.enabled || !ev.pending {
                continue;
            }
            let Some(mut callback) = ev.callback.take() else {
                continue;
            };
            ev.pending = false;
            let arg = mem::take(&mut ev.arg);
            let id = ev.id;
            let triggered = ev.trigger_tick;
            let start = self.now_ticks();
            let latency = start.saturating_sub(triggered);

            callback(self, arg);

            let cost = self.now_ticks().saturating_sub(start);
            if let Some(ev) = self.events.by_id_mut(id) {
                ev.callback = Some(callback);
                ev.stats.record(cost, latency);
            }
            if self.events.generation != generation {
                log::debug!("event: table changed during dispatch, pass cut short");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::kernel::config::SchedConfig;
    use crate::kernel::error::SchedError;
    use crate::kernel::event::EventArg;
    use crate::kernel::scheduler::Scheduler;
    use crate::kernel::scheduler::tests::sched;
    use crate::kernel::softint::SoftInt;
    use crate::kernel::time::ManualClock;
    use alloc::boxed::Box;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};

    #[test]
    fn owned_copy_survives_caller_buffer() {
        let mut s = sched();
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        s.event_create("rx", true, move |_, arg| {
            assert!(arg.is_owned());
            g.borrow_mut().extend_from_slice(arg.as_bytes());
        })
        .unwrap();

        let mut buf = *b"hello";
        s.event_trigger_ex("rx", &buf).unwrap();
        buf.copy_from_slice(b"XXXXX");
        s.run(false);

        assert_eq!(&got.borrow()[..], b"hello");
        assert_eq!(&buf, b"XXXXX");
        assert!(!s.event_is_pending("rx"));
    }

    #[test]
    fn static_arg_is_passed_through() {
        static MSG: &[u8] = b"static";
        let mut s = sched();
        let seen = Rc::new(Cell::new(false));
        let f = seen.clone();
        s.event_create("e", true, move |_, arg| {
            assert_eq!(arg, EventArg::Static(MSG));
            assert_eq!(arg.as_bytes().as_ptr(), MSG.as_ptr());
            f.set(true);
        })
        .unwrap();
        s.event_trigger("e", MSG).unwrap();
        s.run(false);
        assert!(seen.get());
    }

    #[test]
    fn retrigger_replaces_argument() {
        let mut s = sched();
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        s.event_create("e", true, move |_, arg| g.borrow_mut().push(arg.as_bytes().to_vec()))
            .unwrap();
        s.event_trigger_ex("e", b"one").unwrap();
        s.event_trigger_ex("e", b"two").unwrap();
        s.run(false);
        assert_eq!(*got.borrow(), [b"two".to_vec()]);
    }

    #[test]
    fn disabled_or_unknown_trigger_fails() {
        let mut s = sched();
        s.event_create("e", false, |_, _| panic!("must not run")).unwrap();
        assert_eq!(s.event_trigger_ex("e", b"x"), Err(SchedError::Disabled));
        assert_eq!(s.event_trigger_none("nope"), Err(SchedError::NotFound));
        assert!(!s.event_is_pending("e"));
        s.run(false);
    }

    #[test]
    fn disable_clears_pending() {
        let mut s = sched();
        s.event_create("e", true, |_, _| panic!("must not run")).unwrap();
        s.event_trigger_ex("e", b"payload").unwrap();
        s.event_set_enabled("e", false).unwrap();
        s.event_set_enabled("e", true).unwrap();
        assert!(!s.event_is_pending("e"));
        s.run(false);
    }

    #[test]
    fn duplicates_follow_config() {
        let mut s = sched();
        s.event_create("e", true, |_, _| {}).unwrap();
        assert_eq!(s.event_create("e", true, |_, _| {}), Err(SchedError::Duplicate));

        let mut cfg = SchedConfig::defaults();
        cfg.event_allow_duplicate = true;
        let softint: &'static SoftInt = Box::leak(Box::new(SoftInt::new()));
        let mut s = Scheduler::with_config(ManualClock::new(1_000), cfg).with_softint(softint);
        s.event_create("e", true, |_, _| {}).unwrap();
        s.event_create("e", true, |_, _| {}).unwrap();
        assert_eq!(s.event_count(), 2);
    }

    #[test]
    fn mutation_cuts_pass_short() {
        let mut s = sched();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        s.event_create("first", true, move |s, _| {
            h.set(h.get() + 1);
            s.event_create("late", true, |_, _| {}).unwrap();
        })
        .unwrap();
        let h = hits.clone();
        s.event_create("second", true, move |_, _| h.set(h.get() + 10)).unwrap();

        s.event_trigger_none("first").unwrap();
        s.event_trigger_none("second").unwrap();
        s.run(false);
        assert_eq!(hits.get(), 1);
        assert!(s.event_is_pending("second"));
        s.run(false);
        assert_eq!(hits.get(), 11);
    }

    #[test]
    fn callback_can_delete_its_own_event() {
        let mut s = sched();
        s.event_create("gone", true, |s, _| s.event_delete("gone").unwrap()).unwrap();
        s.event_trigger_none("gone").unwrap();
        s.run(false);
        assert!(!s.event_exists("gone"));
    }

    #[test]
    fn latency_and_runs_are_counted() {
        let mut s = sched();
        s.event_create("e", true, |_, _| {}).unwrap();
        s.event_trigger_none("e").unwrap();
        s.clock().advance_us(250);
        s.run(false);
        let ev = &s.events.list[0];
        assert_eq!(ev.stats.runs, 1);
        assert_eq!(ev.stats.triggers, 1);
        assert_eq!(ev.stats.max_latency, 250);
    }
}
