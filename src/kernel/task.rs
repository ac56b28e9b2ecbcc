// Periodic tasks
//
// Fixed-rate bodies kept in priority order (stable: equal priorities
// keep creation order). One scan per pass dispatches at most the first
// due task; slightly late tasks keep their phase, very late ones resync
// to now so they don't burst to catch up.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::config::PriorityOrder;
use super::error::{Result, SchedError};
use super::scheduler::Scheduler;
use super::stats::DispatchStats;
use super::time::Clock;

pub type TaskFn<C> = Box<dyn FnMut(&mut Scheduler<C>)>;

pub(crate) struct Task<C: Clock> {
    pub(crate) id: u32,
    pub(crate) name: &'static str,
    // None while the body is executing
    body: Option<TaskFn<C>>,
    pub(crate) period: u64,
    pub(crate) last_run: u64,
    pub(crate) enabled: bool,
    pub(crate) priority: u8,
    pub(crate) stats: DispatchStats,
}

/// Snapshot returned by [`Scheduler::task_info`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskInfo {
    pub name: &'static str,
    pub enabled: bool,
    pub priority: u8,
    /// ticks
    pub period: u64,
    pub freq_hz: f32,
    pub last_run: u64,
    pub stats: DispatchStats,
}

pub(crate) struct TaskTable<C: Clock> {
    pub(crate) list: Vec<Task<C>>,
    pub(crate) generation: u32,
    next_id: u32,
}

impl<C: Clock> TaskTable<C> {
    pub(crate) const fn new() -> Self {
        Self {
            list: Vec::new(),
            generation: 0,
            next_id: 1,
        }
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.list.iter().position(|t| t.name == name)
    }

    fn by_id_mut(&mut self, id: u32) -> Option<&mut Task<C>> {
        self.list.iter_mut().find(|t| t.id == id)
    }

    fn resort(&mut self, order: PriorityOrder) {
        self.list.sort_by(|a, b| order.before(a.priority, b.priority));
        debug_assert!(self.list.windows(2).all(|w| order
            .before(w[0].priority, w[1].priority)
            .is_le()));
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

impl<C: Clock + 'static> Scheduler<C> {
    /// Register a periodic body running at `freq_hz`. The task is due
    /// immediately once enabled.
    pub fn task_create(
        &mut self,
        name: &'static str,
        freq_hz: f32,
        enabled: bool,
        priority: u8,
        body: impl FnMut(&mut Scheduler<C>) + 'static,
    ) -> Result<()> {
        let period = self.time().hz_to_period(freq_hz).ok_or(SchedError::InvalidArg)?;
        self.tasks.list.try_reserve(1).map_err(|_| SchedError::Alloc)?;

        let now = self.now_ticks();
        let id = self.tasks.next_id;
        self.tasks.next_id = id.wrapping_add(1);
        self.tasks.list.push(Task {
            id,
            name,
            body: Some(Box::new(body)),
            period,
            last_run: now.wrapping_sub(period),
            enabled,
            priority,
            stats: DispatchStats::default(),
        });
        self.tasks.resort(self.config.priority_order);
        self.tasks.touch();
        log::info!("task: created {} @ {}Hz pri {}", name, freq_hz, priority);
        Ok(())
    }

    pub fn task_delete(&mut self, name: &str) -> Result<()> {
        let idx = self.tasks.find(name).ok_or(SchedError::NotFound)?;
        self.tasks.list.remove(idx);
        self.tasks.touch();
        log::info!("task: deleted {}", name);
        Ok(())
    }

    /// Enabling makes the task due immediately.
    pub fn task_set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let now = self.now_ticks();
        let idx = self.tasks.find(name).ok_or(SchedError::NotFound)?;
        let task = &mut self.tasks.list[idx];
        task.enabled = enabled;
        if enabled {
            task.last_run = now.wrapping_sub(task.period);
        }
        Ok(())
    }

    pub fn task_set_freq(&mut self, name: &str, freq_hz: f32) -> Result<()> {
        let period = self.time().hz_to_period(freq_hz).ok_or(SchedError::InvalidArg)?;
        let now = self.now_ticks();
        let idx = self.tasks.find(name).ok_or(SchedError::NotFound)?;
        let task = &mut self.tasks.list[idx];
        task.period = period;
        task.last_run = now.wrapping_sub(period);
        Ok(())
    }

    pub fn task_set_priority(&mut self, name: &str, priority: u8) -> Result<()> {
        let idx = self.tasks.find(name).ok_or(SchedError::NotFound)?;
        self.tasks.list[idx].priority = priority;
        self.tasks.resort(self.config.priority_order);
        self.tasks.touch();
        Ok(())
    }

    /// Push the next run back by `delay_us`, counted from now or from the
    /// task's current schedule.
    pub fn task_delay(&mut self, name: &str, delay_us: u64, from_now: bool) -> Result<()> {
        let delay = self.time().us_to_ticks(delay_us);
        let now = self.now_ticks();
        let idx = self.tasks.find(name).ok_or(SchedError::NotFound)?;
        let task = &mut self.tasks.list[idx];
        task.last_run = if from_now {
            now.wrapping_add(delay)
        } else {
            task.last_run.wrapping_add(delay)
        };
        Ok(())
    }

    /// Run a task's body right now, outside its schedule. The schedule
    /// itself is left alone.
    pub fn task_run_now(&mut self, name: &str) -> Result<()> {
        let idx = self.tasks.find(name).ok_or(SchedError::NotFound)?;
        let id = self.tasks.list[idx].id;
        // already running further up the stack
        let mut body = self.tasks.list[idx].body.take().ok_or(SchedError::Disabled)?;
        body(self);
        if let Some(task) = self.tasks.by_id_mut(id) {
            task.body = Some(body);
        }
        Ok(())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.list.len()
    }

    pub fn task_exists(&self, name: &str) -> bool {
        self.tasks.find(name).is_some()
    }

    pub fn task_is_enabled(&self, name: &str) -> bool {
        self.tasks.find(name).is_some_and(|i| self.tasks.list[i].enabled)
    }

    pub fn task_info(&self, name: &str) -> Option<TaskInfo> {
        let task = &self.tasks.list[self.tasks.find(name)?];
        Some(TaskInfo {
            name: task.name,
            enabled: task.enabled,
            priority: task.priority,
            period: task.period,
            freq_hz: self.time().period_to_hz(task.period),
            last_run: task.last_run,
            stats: task.stats,
        })
    }

    /// Task names in dispatch order
    pub fn task_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.list.iter().map(|t| t.name)
    }

    /// One scan: dispatch the first due task and return Some(0), or the
    /// µs until the earliest enabled task is due.
    pub(crate) fn poll_tasks(&mut self) -> Option<u64> {
        if self.tasks.list.is_empty() {
            return None;
        }

        let now = self.now_ticks();
        let time = self.time();
        let comp = time.us_to_ticks(self.config.comp_range_us);

        let mut sleep: Option<u64> = None;
        let mut due = None;
        for (i, task) in self.tasks.list.iter_mut().enumerate() {
            if !task.enabled {
                continue;
            }
            let next = task.last_run.wrapping_add(task.period);
            if now >= next {
                let latency = now - next;
                if latency <= comp {
                    task.last_run = next;
                } else {
                    task.last_run = now;
                    task.stats.desyncs = task.stats.desyncs.wrapping_add(1);
                    log::warn!(
                        "task: {} late by {}us, resync",
                        task.name,
                        time.ticks_to_us(latency)
                    );
                }
                due = Some((i, latency));
                break;
            }
            let wait = time.ticks_to_us(next - now);
            sleep = Some(sleep.map_or(wait, |s| s.min(wait)));
        }

        let Some((idx, latency)) = due else {
            return sleep;
        };

        let id = self.tasks.list[idx].id;
        let Some(mut body) = self.tasks.list[idx].body.take() else {
            log::warn!("task: {} re-entered, skipped", self.tasks.list[idx].name);
            return Some(0);
        };

        let generation = self.tasks.generation;
        let start = self.now_ticks();
        body(self);
        let cost = self.now_ticks().saturating_sub(start);

        if self.tasks.generation != generation {
            log::debug!("task: table changed during dispatch");
        }
        // may be gone if the body deleted itself
        if let Some(task) = self.tasks.by_id_mut(id) {
            task.body = Some(body);
            task.stats.record(cost, latency);
        }
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use crate::kernel::config::{PriorityOrder, SchedConfig};
    use crate::kernel::error::SchedError;
    use crate::kernel::scheduler::Scheduler;
    use crate::kernel::scheduler::tests::sched;
    use crate::kernel::softint::SoftInt;
    use crate::kernel::time::ManualClock;
    use alloc::boxed::Box;
    use alloc::rc::Rc;
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    fn recorder(
        log: &Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl FnMut(&mut Scheduler<ManualClock>) + 'static {
        let log = log.clone();
        move |_| log.borrow_mut().push(name)
    }

    #[test]
    fn priority_order_higher_first() {
        let mut s = sched();
        let log = Rc::new(RefCell::new(Vec::new()));
        s.task_create("low", 10.0, true, 1, recorder(&log, "low")).unwrap();
        s.task_create("high", 10.0, true, 9, recorder(&log, "high")).unwrap();
        s.task_create("mid", 10.0, true, 5, recorder(&log, "mid")).unwrap();
        s.task_create("mid2", 10.0, true, 5, recorder(&log, "mid2")).unwrap();

        // all due at once: one per pass, highest first, ties in creation order
        for _ in 0..4 {
            assert_eq!(s.run(false), 0);
        }
        assert_eq!(*log.borrow(), ["high", "mid", "mid2", "low"]);
        assert_eq!(s.task_names().collect::<Vec<_>>(), ["high", "mid", "mid2", "low"]);
    }

    #[test]
    fn priority_order_lower_first() {
        let mut cfg = SchedConfig::defaults();
        cfg.priority_order = PriorityOrder::LowerFirst;
        let softint: &'static SoftInt = Box::leak(Box::new(SoftInt::new()));
        let mut s = Scheduler::with_config(ManualClock::new(1_000_000), cfg).with_softint(softint);
        let log = Rc::new(RefCell::new(Vec::new()));
        s.task_create("b", 1.0, true, 3, recorder(&log, "b")).unwrap();
        s.task_create("a", 1.0, true, 0, recorder(&log, "a")).unwrap();

        s.run(false);
        s.run(false);
        assert_eq!(*log.borrow(), ["a", "b"]);

        s.task_set_priority("b", 0).unwrap();
        // stable: equal priorities keep table order
        assert_eq!(s.task_names().collect::<Vec<_>>(), ["a", "b"]);
        s.task_set_priority("a", 7).unwrap();
        assert_eq!(s.task_names().collect::<Vec<_>>(), ["b", "a"]);
    }

    #[test]
    fn phase_lock_within_window() {
        let mut s = sched();
        s.task_create("tick", 100.0, true, 0, |_| {}).unwrap(); // 10 ms
        s.run(false);
        let base = s.task_info("tick").unwrap().last_run;

        // 500 µs late: inside the 1 ms window, phase kept
        s.clock().advance_us(10_500);
        assert_eq!(s.run(false), 0);
        let info = s.task_info("tick").unwrap();
        assert_eq!(info.last_run, base + 10_000);
        assert_eq!(info.stats.desyncs, 0);
        assert_eq!(info.stats.max_latency, 500);

        // next one is due 9.5 ms from now
        assert_eq!(s.run(false), 9_500);
    }

    #[test]
    fn resync_when_too_late() {
        let mut s = sched();
        s.task_create("tick", 100.0, true, 0, |_| {}).unwrap();
        s.run(false);

        s.clock().advance_us(15_000);
        s.run(false);
        let now = s.now_ticks();
        let info = s.task_info("tick").unwrap();
        assert_eq!(info.last_run, now);
        assert_eq!(info.stats.desyncs, 1);

        // no burst: a full period until the next run
        assert_eq!(s.run(false), 10_000);
    }

    #[test]
    fn one_task_per_pass() {
        let mut s = sched();
        let hits = Rc::new(Cell::new(0));
        for name in ["a", "b", "c"] {
            let h = hits.clone();
            s.task_create(name, 1.0, true, 0, move |_| h.set(h.get() + 1)).unwrap();
        }
        s.run(false);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn disabled_tasks_do_not_run_and_enable_is_immediate() {
        let mut s = sched();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        s.task_create("t", 1.0, false, 0, move |_| h.set(h.get() + 1)).unwrap();

        assert_eq!(s.run(false), 1_000_000);
        assert_eq!(hits.get(), 0);

        s.task_set_enabled("t", true).unwrap();
        assert_eq!(s.run(false), 0);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn delay_from_now_and_from_schedule() {
        let mut s = sched();
        s.task_create("t", 10.0, true, 0, |_| {}).unwrap();
        s.run(false);
        let base = s.task_info("t").unwrap().last_run;

        s.task_delay("t", 50_000, false).unwrap();
        assert_eq!(s.task_info("t").unwrap().last_run, base + 50_000);

        s.clock().advance_us(1_000);
        s.task_delay("t", 20_000, true).unwrap();
        assert_eq!(s.task_info("t").unwrap().last_run, s.now_ticks() + 20_000);
        assert_eq!(s.run(false), 120_000);
    }

    #[test]
    fn set_freq_changes_period() {
        let mut s = sched();
        s.task_create("t", 10.0, true, 0, |_| {}).unwrap();
        s.run(false);
        s.task_set_freq("t", 1000.0).unwrap();
        let info = s.task_info("t").unwrap();
        assert_eq!(info.period, 1_000);
        assert!((info.freq_hz - 1000.0).abs() < 0.01);
        assert_eq!(s.run(false), 0);
        assert_eq!(s.task_set_freq("t", 0.0), Err(SchedError::InvalidArg));
    }

    #[test]
    fn unknown_names_are_not_found() {
        let mut s = sched();
        assert_eq!(s.task_delete("x"), Err(SchedError::NotFound));
        assert_eq!(s.task_set_enabled("x", true), Err(SchedError::NotFound));
        assert_eq!(s.task_set_priority("x", 1), Err(SchedError::NotFound));
        assert_eq!(s.task_delay("x", 1, true), Err(SchedError::NotFound));
        assert_eq!(s.task_create("x", f32::INFINITY, true, 0, |_| {}), Err(SchedError::InvalidArg));
        assert_eq!(s.task_count(), 0);
    }

    #[test]
    fn body_can_delete_itself_and_create_others() {
        let mut s = sched();
        s.task_create("once", 10.0, true, 5, |s| {
            s.task_delete("once").unwrap();
            s.task_create("next", 10.0, true, 0, |_| {}).unwrap();
        })
        .unwrap();

        s.run(false);
        assert!(!s.task_exists("once"));
        assert!(s.task_exists("next"));
        assert_eq!(s.task_count(), 1);
    }

    #[test]
    fn run_now_leaves_schedule() {
        let mut s = sched();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        s.task_create("t", 1.0, true, 0, move |_| h.set(h.get() + 1)).unwrap();
        s.run(false);
        let before = s.task_info("t").unwrap().last_run;
        s.task_run_now("t").unwrap();
        assert_eq!(hits.get(), 2);
        assert_eq!(s.task_info("t").unwrap().last_run, before);
    }
}
