// Stackless coroutines
//
// A coroutine body is a plain fn over a Ctx and its own locals block.
// It suspends by storing a non-zero resume marker for its frame and
// returning Poll::Pending; the next dispatch enters it from the top
// again and the body jumps to the marker with a `match`. Nested calls
// get their own frame (marker + locals) one level deeper. A suspended
// child returns Pending up through every parent and re-entry walks back
// down the same path, so no stack survives between dispatches.
//
// Frames grow on the first nested call at a depth and are dropped when
// that call completes; the root frame lives as long as the coroutine.

pub mod ctx;
pub mod sync;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;
use core::mem;
use core::task::Poll;

use super::error::{Result, SchedError};
use super::scheduler::Scheduler;
use super::stats::DispatchStats;
use super::time::Clock;

pub use self::ctx::Ctx;
use self::sync::{CortnBarrier, CortnMutex};

pub type CortnId = u32;

/// Coroutine body: `fn(cx, locals) -> Poll<()>`
pub type CortnFn<C, L> = fn(&mut Ctx<'_, C>, &mut L) -> Poll<()>;

/// Mailbox payload
pub type Msg = Box<dyn Any>;

type Entry<C> = Box<dyn FnMut(&mut Ctx<'_, C>) -> Poll<()>>;

/// What happens when the root body finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CortnMode {
    /// disable, keep the record
    Once,
    /// start over on the next pass
    Loop,
    /// remove the record
    AutoDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CortnState {
    Ready,
    Running,
    Sleeping,
    Awaiting,
    Stopped,
}

impl CortnState {
    pub const fn as_str(self) -> &'static str {
        match self {
            CortnState::Ready => "ready",
            CortnState::Running => "running",
            CortnState::Sleeping => "sleeping",
            CortnState::Awaiting => "awaiting",
            CortnState::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// runnable once now >= µs
    At(u64),
    /// only a message, mutex handoff or barrier release wakes it
    External,
}

pub(crate) struct Frame {
    // marker stored by the body when it suspends; 0 = finished / fresh
    pub(crate) resume: u16,
    // marker this frame was entered with on the current dispatch
    pub(crate) entry: u16,
    pub(crate) locals: Option<Box<dyn Any>>,
    pub(crate) locals_size: usize,
}

impl Frame {
    pub(crate) const fn new() -> Self {
        Self {
            resume: 0,
            entry: 0,
            locals: None,
            locals_size: 0,
        }
    }
}

#[derive(Default)]
pub(crate) struct Handle {
    pub(crate) frames: Vec<Frame>,
    // frame being executed during a dispatch
    pub(crate) depth: usize,
    pub(crate) max_depth: usize,
}

impl Handle {
    /// Nesting left suspended from the last dispatch
    fn nesting(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    fn locals_bytes(&self) -> usize {
        self.frames.iter().map(|f| f.locals_size).sum()
    }

    fn footprint(&self) -> Footprint {
        Footprint {
            depth: self.nesting(),
            max_depth: self.max_depth,
            locals_bytes: self.locals_bytes(),
        }
    }
}

// handle figures as of the start of the running dispatch
#[derive(Debug, Clone, Copy, Default)]
struct Footprint {
    depth: usize,
    max_depth: usize,
    locals_bytes: usize,
}

pub(crate) struct Coroutine<C: Clock> {
    pub(crate) id: CortnId,
    pub(crate) name: &'static str,
    entry: Option<Entry<C>>,
    pub(crate) enabled: bool,
    pub(crate) mode: CortnMode,
    pub(crate) wake: Wake,
    pub(crate) msg: Option<Msg>,
    pub(crate) handle: Handle,
    // deleted from inside its own body; removed after it returns
    pub(crate) kill: bool,
    // restarted from inside its own body; cleared after it returns
    restart: bool,
    parked: Footprint,
    pub(crate) stats: DispatchStats,
}

/// Snapshot returned by [`Scheduler::cortn_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CortnInfo {
    pub name: &'static str,
    pub state: CortnState,
    pub mode: CortnMode,
    pub depth: usize,
    pub max_depth: usize,
    pub locals_bytes: usize,
    pub stats: DispatchStats,
}

pub(crate) struct CortnTable<C: Clock> {
    pub(crate) list: Vec<Coroutine<C>>,
    pub(crate) mutexes: Vec<CortnMutex>,
    pub(crate) barriers: Vec<CortnBarrier>,
    pub(crate) generation: u32,
    // bumped whenever a waiting coroutine is made runnable from outside
    pub(crate) woken: u32,
    pub(crate) current: Option<CortnId>,
    next_id: CortnId,
}

impl<C: Clock> CortnTable<C> {
    pub(crate) const fn new() -> Self {
        Self {
            list: Vec::new(),
            mutexes: Vec::new(),
            barriers: Vec::new(),
            generation: 0,
            woken: 0,
            current: None,
            next_id: 1,
        }
    }

    pub(crate) fn find(&self, name: &str) -> Option<usize> {
        self.list.iter().position(|c| c.name == name)
    }

    pub(crate) fn by_id(&self, id: CortnId) -> Option<&Coroutine<C>> {
        self.list.iter().find(|c| c.id == id)
    }

    pub(crate) fn by_id_mut(&mut self, id: CortnId) -> Option<&mut Coroutine<C>> {
        self.list.iter_mut().find(|c| c.id == id)
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn note_wake(&mut self) {
        self.woken = self.woken.wrapping_add(1);
    }

    fn remove(&mut self, idx: usize) {
        let co = self.list.remove(idx);
        self.forget(co.id);
        self.touch();
    }
}

impl<C: Clock + 'static> Scheduler<C> {
    /// Create a coroutine running `entry` with `locals` as its root
    /// locals block.
    pub fn cortn_create<L: 'static>(
        &mut self,
        name: &'static str,
        entry: CortnFn<C, L>,
        locals: L,
        enabled: bool,
        mode: CortnMode,
    ) -> Result<()> {
        let mut frames = Vec::new();
        frames.try_reserve(1).map_err(|_| SchedError::Alloc)?;
        frames.push(Frame::new());
        self.cortns.list.try_reserve(1).map_err(|_| SchedError::Alloc)?;

        let mut init = Some(locals);
        let root: Entry<C> =
            Box::new(move |cx: &mut Ctx<'_, C>| cx.enter_frame(entry, || init.take()));

        let id = self.cortns.next_id;
        self.cortns.next_id = id.wrapping_add(1);
        let now = self.now_us();
        self.cortns.list.push(Coroutine {
            id,
            name,
            entry: Some(root),
            enabled,
            mode,
            wake: Wake::At(now),
            msg: None,
            handle: Handle {
                frames,
                depth: 0,
                max_depth: 0,
            },
            kill: false,
            restart: false,
            parked: Footprint::default(),
            stats: DispatchStats::default(),
        });
        self.cortns.touch();
        log::info!("cortn: created {} ({:?})", name, mode);
        Ok(())
    }

    /// Start a one-shot coroutine that removes itself when done
    pub fn cortn_run<L: 'static>(&mut self, name: &'static str, entry: CortnFn<C, L>, locals: L) -> Result<()> {
        self.cortn_create(name, entry, locals, true, CortnMode::AutoDelete)
    }

    /// Remove a coroutine. From inside its own body the removal happens
    /// once the body returns.
    pub fn cortn_delete(&mut self, name: &str) -> Result<()> {
        let idx = self.cortns.find(name).ok_or(SchedError::NotFound)?;
        let co = &mut self.cortns.list[idx];
        if self.cortns.current == Some(co.id) {
            co.kill = true;
            co.mode = CortnMode::AutoDelete;
            return Ok(());
        }
        self.cortns.remove(idx);
        log::info!("cortn: deleted {}", name);
        Ok(())
    }

    pub fn cortn_stop(&mut self, name: &str) -> Result<()> {
        self.cortn_delete(name)
    }

    /// `clear_state` drops any suspended position and nested frames so
    /// the body starts from the top; root locals are kept. From inside
    /// its own body the clear happens once the body returns.
    pub fn cortn_set_enabled(&mut self, name: &str, enabled: bool, clear_state: bool) -> Result<()> {
        let idx = self.cortns.find(name).ok_or(SchedError::NotFound)?;
        let co = &mut self.cortns.list[idx];
        co.enabled = enabled;
        if !clear_state {
            return Ok(());
        }
        if self.cortns.current == Some(co.id) {
            co.restart = true;
            return Ok(());
        }
        self.restart_cortn(idx);
        Ok(())
    }

    fn restart_cortn(&mut self, idx: usize) {
        let now = self.now_us();
        let co = &mut self.cortns.list[idx];
        co.restart = false;
        co.handle.frames.truncate(1);
        if let Some(root) = co.handle.frames.first_mut() {
            root.resume = 0;
        }
        co.msg = None;
        co.wake = Wake::At(now);
        let id = co.id;
        self.cortns.forget(id);
        self.cortns.note_wake();
    }

    /// Hand `msg` to a coroutine and wake it
    pub fn cortn_send_msg<M: Any>(&mut self, name: &str, msg: M) -> Result<()> {
        let now = self.now_us();
        let idx = self.cortns.find(name).ok_or(SchedError::NotFound)?;
        let co = &mut self.cortns.list[idx];
        if !co.enabled {
            return Err(SchedError::Disabled);
        }
        co.msg = Some(Box::new(msg));
        co.wake = Wake::At(now);
        self.cortns.note_wake();
        Ok(())
    }

    pub fn cortn_exists(&self, name: &str) -> bool {
        self.cortns.find(name).is_some()
    }

    pub fn cortn_count(&self) -> usize {
        self.cortns.list.len()
    }

    /// Exists and is not stopped
    pub fn cortn_is_running(&self, name: &str) -> bool {
        self.cortns.find(name).is_some_and(|i| self.cortns.list[i].enabled)
    }

    pub fn cortn_is_waiting_msg(&self, name: &str) -> bool {
        self.cortns.find(name).is_some_and(|i| {
            let co = &self.cortns.list[i];
            co.enabled && co.wake == Wake::External && co.msg.is_none()
        })
    }

    pub fn cortn_state(&self, name: &str) -> Option<CortnState> {
        let co = &self.cortns.list[self.cortns.find(name)?];
        Some(self.state_of(co))
    }

    /// Nesting depth a suspended coroutine is parked at
    pub fn cortn_depth(&self, name: &str) -> Option<usize> {
        let co = &self.cortns.list[self.cortns.find(name)?];
        Some(self.footprint_of(co).depth)
    }

    pub fn cortn_info(&self, name: &str) -> Option<CortnInfo> {
        let co = &self.cortns.list[self.cortns.find(name)?];
        Some(self.info_of(co))
    }

    /// All coroutines in dispatch order
    pub fn cortn_list(&self) -> impl Iterator<Item = CortnInfo> + '_ {
        self.cortns.list.iter().map(|co| self.info_of(co))
    }

    fn state_of(&self, co: &Coroutine<C>) -> CortnState {
        if !co.enabled {
            return CortnState::Stopped;
        }
        if self.cortns.current == Some(co.id) {
            return CortnState::Running;
        }
        match co.wake {
            Wake::External => CortnState::Awaiting,
            Wake::At(t) if t > self.now_us() => CortnState::Sleeping,
            Wake::At(_) => CortnState::Ready,
        }
    }

    // the running coroutine's handle is out on loan to its Ctx
    fn footprint_of(&self, co: &Coroutine<C>) -> Footprint {
        if self.cortns.current == Some(co.id) {
            co.parked
        } else {
            co.handle.footprint()
        }
    }

    fn info_of(&self, co: &Coroutine<C>) -> CortnInfo {
        let fp = self.footprint_of(co);
        CortnInfo {
            name: co.name,
            state: self.state_of(co),
            mode: co.mode,
            depth: fp.depth,
            max_depth: fp.max_depth,
            locals_bytes: fp.locals_bytes,
            stats: co.stats,
        }
    }

    /// One scan: dispatch every runnable coroutine. Returns 0 if any is
    /// still runnable, otherwise the µs to the nearest wake time.
    pub(crate) fn poll_cortns(&mut self) -> Option<u64> {
        if self.cortns.list.is_empty() {
            return None;
        }

        let generation = self.cortns.generation;
        // a wake can land on a slot the scan already passed
        let woken = self.cortns.woken;
        let mut sleep: Option<u64> = None;
        let mut i = 0;
        while i < self.cortns.list.len() {
            let now = self.now_us();
            let co = &self.cortns.list[i];
            i += 1;
            if !co.enabled {
                continue;
            }
            match co.wake {
                Wake::External => continue,
                Wake::At(t) if t > now => {
                    let wait = t - now;
                    sleep = Some(sleep.map_or(wait, |s| s.min(wait)));
                    continue;
                }
                Wake::At(_) => {}
            }

            let id = co.id;
            self.dispatch_cortn(id);
            if self.cortns.generation != generation {
                return Some(0);
            }

            let now = self.now_us();
            if let Some(co) = self.cortns.by_id(id) {
                if let (true, Wake::At(t)) = (co.enabled, co.wake) {
                    let wait = t.saturating_sub(now);
                    sleep = Some(sleep.map_or(wait, |s| s.min(wait)));
                }
            }
        }
        if self.cortns.woken != woken {
            return Some(0);
        }
        sleep
    }

    fn dispatch_cortn(&mut self, id: CortnId) {
        let Some(co) = self.cortns.by_id_mut(id) else {
            return;
        };
        let Some(mut entry) = co.entry.take() else {
            return;
        };
        let name = co.name;
        co.parked = co.handle.footprint();
        let mut handle = mem::take(&mut co.handle);
        handle.depth = 0;
        if let Some(root) = handle.frames.first_mut() {
            root.entry = mem::take(&mut root.resume);
        }

        let outer = self.cortns.current.replace(id);
        let start = self.now_ticks();
        let poll = {
            let mut cx = Ctx::new(self, &mut handle, id, name);
            entry(&mut cx)
        };
        let cost = self.now_ticks().saturating_sub(start);
        self.cortns.current = outer;

        let now = self.now_us();
        let Some(idx) = self.cortns.list.iter().position(|c| c.id == id) else {
            return;
        };
        let co = &mut self.cortns.list[idx];
        co.entry = Some(entry);
        co.stats.record(cost, 0);
        let done = handle.frames.first().is_none_or(|root| root.resume == 0);
        if done && poll.is_pending() {
            log::warn!("cortn: {} pending without a resume marker", name);
        }
        co.handle = handle;
        if co.kill {
            log::info!("cortn: deleted {}", name);
            self.cortns.remove(idx);
            return;
        }
        if co.restart {
            log::debug!("cortn: {} restarted", name);
            self.restart_cortn(idx);
            return;
        }
        if !done {
            return;
        }

        match co.mode {
            CortnMode::AutoDelete => {
                log::debug!("cortn: {} finished, removed", name);
                self.cortns.remove(idx);
            }
            CortnMode::Loop => {
                co.wake = Wake::At(now);
            }
            CortnMode::Once => {
                log::debug!("cortn: {} finished, stopped", name);
                co.enabled = false;
            }
        }
    }
}
