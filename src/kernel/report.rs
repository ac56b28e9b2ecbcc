// Periodic statistics report
//
// With `report_period_us` set, the run loop renders one table per
// subsystem every interval, logs it line by line at info level and
// starts a fresh interval. The first interval is only a baseline: boot
// work would dominate it. Time spent printing is added back to every
// task's schedule so reporting does not show up as lateness.

use alloc::string::String;
use core::fmt::{self, Write};

use super::coroutine::CortnState;
use super::scheduler::Scheduler;
use super::stats::DispatchStats;
use super::time::{Clock, TimeBase};

// usage above this (percent of the interval) is flagged with '!'
const HOT_USAGE: f32 = 20.0;

pub(crate) struct ReportState {
    // start of the current interval (ticks)
    since: u64,
    baseline: bool,
    sleep_sum: u64,
    sleep_passes: u32,
}

impl ReportState {
    pub(crate) const fn new(now_ticks: u64) -> Self {
        Self {
            since: now_ticks,
            baseline: true,
            sleep_sum: 0,
            sleep_passes: 0,
        }
    }

    fn note_sleep(&mut self, us: u64) {
        self.sleep_sum = self.sleep_sum.saturating_add(us);
        self.sleep_passes = self.sleep_passes.wrapping_add(1);
    }

    fn avg_sleep_us(&self) -> u64 {
        if self.sleep_passes == 0 {
            0
        } else {
            self.sleep_sum / self.sleep_passes as u64
        }
    }
}

struct Row<'a> {
    time: TimeBase,
    period: u64,
    stats: &'a DispatchStats,
}

impl Row<'_> {
    fn usage(&self) -> f32 {
        if self.period == 0 {
            return 0.0;
        }
        self.stats.total_cost as f32 / self.period as f32 * 100.0
    }

    fn flag(&self) -> char {
        if self.usage() > HOT_USAGE { '!' } else { ' ' }
    }

    fn us(&self, ticks: u64) -> u64 {
        self.time.ticks_to_us(ticks)
    }
}

impl<C: Clock + 'static> Scheduler<C> {
    /// Called once per pass. Returns true if a report was emitted.
    pub(crate) fn maybe_report(&mut self, sleep_us: u64) -> bool {
        let Some(period_us) = self.config.report_period_us else {
            return false;
        };
        let now = self.now_ticks();
        if self.report.baseline {
            self.report.baseline = false;
            self.reset_interval(now, 0);
            return false;
        }
        self.report.note_sleep(sleep_us);
        let elapsed = now.saturating_sub(self.report.since);
        if elapsed < self.time().us_to_ticks(period_us) {
            return false;
        }

        let text = self.render_report();
        for line in text.lines() {
            log::info!("{}", line);
        }
        let done = self.now_ticks();
        self.reset_interval(done, done.saturating_sub(now));
        true
    }

    /// Render the statistics of the current interval without resetting them
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        let period = self.now_ticks().saturating_sub(self.report.since);
        if self.write_report(&mut out, period).is_err() {
            log::warn!("report: formatting failed");
        }
        out
    }

    fn write_report(&self, out: &mut String, period: u64) -> fmt::Result {
        let time = self.time();
        let max = self.config.report_max_lines;
        let mut busy: u64 = 0;
        let mut desyncs: u32 = 0;

        if !self.tasks.list.is_empty() {
            writeln!(out, "[ Task Report ]------------------------------------------")?;
            writeln!(out, " No | Pri | Run | Tmax  | Usage | LTavg | LTmax | Name")?;
            for (i, task) in self.tasks.list.iter().enumerate() {
                busy = busy.saturating_add(task.stats.total_cost);
                desyncs = desyncs.saturating_add(task.stats.desyncs);
                if i >= max {
                    continue;
                }
                let row = Row { time, period, stats: &task.stats };
                if !task.enabled {
                    writeln!(
                        out,
                        "x{:<4} {:<5} -     -       -       -       -       {}",
                        i, task.priority, task.name
                    )?;
                    continue;
                }
                writeln!(
                    out,
                    "{}{:<4} {:<5} {:<5} {:<7} {:<7.3} {:<7} {:<7} {}",
                    row.flag(),
                    i,
                    task.priority,
                    task.stats.runs,
                    row.us(task.stats.max_cost),
                    row.usage(),
                    row.us(task.stats.avg_latency()),
                    row.us(task.stats.max_latency),
                    task.name
                )?;
            }
            more(out, self.tasks.list.len(), max)?;
        }

        if !self.events.list.is_empty() {
            writeln!(out, "[ Event Report ]-----------------------------------------")?;
            writeln!(out, " No | Tri | Run | Tmax  | Usage | LTavg | LTmax | Name")?;
            for (i, ev) in self.events.list.iter().enumerate() {
                busy = busy.saturating_add(ev.stats.total_cost);
                if i >= max {
                    continue;
                }
                let row = Row { time, period, stats: &ev.stats };
                let flag = if ev.enabled { row.flag() } else { 'x' };
                if ev.stats.runs == 0 {
                    writeln!(
                        out,
                        "{}{:<4} {:<5} {:<5} -       -       -       -       {}",
                        flag, i, ev.stats.triggers, ev.stats.runs, ev.name
                    )?;
                    continue;
                }
                writeln!(
                    out,
                    "{}{:<4} {:<5} {:<5} {:<7} {:<7.3} {:<7} {:<7} {}",
                    flag,
                    i,
                    ev.stats.triggers,
                    ev.stats.runs,
                    row.us(ev.stats.max_cost),
                    row.usage(),
                    row.us(ev.stats.avg_latency()),
                    row.us(ev.stats.max_latency),
                    ev.name
                )?;
            }
            more(out, self.events.list.len(), max)?;
        }

        if !self.cortns.list.is_empty() {
            writeln!(out, "[ Coroutine Report ]-------------------------------------")?;
            writeln!(out, " No | State    | Depth | Tmax  | Usage | Stack | Name")?;
            for (i, info) in self.cortn_list().enumerate() {
                busy = busy.saturating_add(info.stats.total_cost);
                if i >= max {
                    continue;
                }
                let row = Row { time, period, stats: &info.stats };
                let flag = if info.state == CortnState::Stopped { 'x' } else { row.flag() };
                writeln!(
                    out,
                    "{}{:<4} {:<10} {:<7} {:<7} {:<7.3} {:<7} {}",
                    flag,
                    i,
                    info.state.as_str(),
                    info.depth,
                    row.us(info.stats.max_cost),
                    row.usage(),
                    info.locals_bytes,
                    info.name
                )?;
            }
            more(out, self.cortns.list.len(), max)?;
        }

        let idle = if period == 0 {
            100.0
        } else {
            period.saturating_sub(busy) as f32 / period as f32 * 100.0
        };
        writeln!(out, "[ System Stats ]-----------------------------------------")?;
        writeln!(
            out,
            " Clock: {}Hz / Dur: {:.2}s / Idle: {:.2}% / AvgSleep: {}us / Desync: {} / Later: {}",
            time.tick_hz(),
            time.ticks_to_us(period) as f32 / 1_000_000.0,
            idle,
            self.report.avg_sleep_us(),
            desyncs,
            self.run_later_count()
        )
    }

    // Start a new interval; `offset` is the time spent printing
    fn reset_interval(&mut self, now: u64, offset: u64) {
        for task in &mut self.tasks.list {
            task.last_run = task.last_run.wrapping_add(offset);
            task.stats.reset_interval();
        }
        for ev in &mut self.events.list {
            if ev.pending {
                ev.trigger_tick = ev.trigger_tick.wrapping_add(offset);
            }
            ev.stats.reset_interval();
        }
        for co in &mut self.cortns.list {
            co.stats.reset_interval();
        }
        self.report.since = now;
        self.report.sleep_sum = 0;
        self.report.sleep_passes = 0;
    }
}

fn more(out: &mut String, len: usize, max: usize) -> fmt::Result {
    if len > max {
        writeln!(out, " ... {} more", len - max)?;
    }
    Ok(())
}
