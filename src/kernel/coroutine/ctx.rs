// Coroutine context: what a body sees while it runs
//
// Every suspending operation takes the marker to resume at. Operations
// that wait on a condition take the marker of the point they are called
// from (`here`) so the body re-evaluates them on the next dispatch;
// unconditional suspends take the marker to continue at (`next`).
// Markers are per frame, must be non-zero and only need to be unique
// within one body.

use alloc::boxed::Box;
use core::any::Any;
use core::mem;
use core::task::Poll;

use super::{CortnFn, CortnId, Frame, Handle, Msg, Wake};
use crate::kernel::error::Result;
use crate::kernel::scheduler::Scheduler;
use crate::kernel::time::Clock;

pub struct Ctx<'a, C: Clock> {
    pub(crate) sched: &'a mut Scheduler<C>,
    hd: &'a mut Handle,
    pub(crate) id: CortnId,
    name: &'static str,
}

impl<'a, C: Clock + 'static> Ctx<'a, C> {
    pub(crate) fn new(
        sched: &'a mut Scheduler<C>,
        hd: &'a mut Handle,
        id: CortnId,
        name: &'static str,
    ) -> Self {
        Self { sched, hd, id, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> CortnId {
        self.id
    }

    /// The scheduler this coroutine runs on
    pub fn sched(&mut self) -> &mut Scheduler<C> {
        self.sched
    }

    pub fn now_us(&self) -> u64 {
        self.sched.now_us()
    }

    /// Nesting level of the frame currently executing (root = 0)
    pub fn depth(&self) -> usize {
        self.hd.depth
    }

    /// Marker this frame was resumed at; 0 on a fresh start
    pub fn resume_point(&self) -> u16 {
        self.hd.frames.get(self.hd.depth).map_or(0, |f| f.entry)
    }

    pub(crate) fn suspend_at(&mut self, marker: u16) {
        debug_assert_ne!(marker, 0, "resume markers must be non-zero");
        if let Some(frame) = self.hd.frames.get_mut(self.hd.depth) {
            frame.resume = marker;
        }
    }

    fn clear_marker(&mut self) {
        if let Some(frame) = self.hd.frames.get_mut(self.hd.depth) {
            frame.resume = 0;
        }
    }

    pub(crate) fn set_wake(&mut self, wake: Wake) {
        if let Some(co) = self.sched.cortns.by_id_mut(self.id) {
            co.wake = wake;
        }
    }

    /// Give up the CPU for one pass, continue at `next`
    pub fn yield_to(&mut self, next: u16) -> Poll<()> {
        self.suspend_at(next);
        Poll::Pending
    }

    /// Sleep `us`, continue at `next`
    pub fn delay_us(&mut self, next: u16, us: u64) -> Poll<()> {
        let at = self.now_us().saturating_add(us);
        self.set_wake(Wake::At(at));
        self.suspend_at(next);
        Poll::Pending
    }

    pub fn delay_ms(&mut self, next: u16, ms: u64) -> Poll<()> {
        self.delay_us(next, ms.saturating_mul(1_000))
    }

    /// Ready once `cond` holds, re-checked every pass
    pub fn yield_until(&mut self, here: u16, cond: bool) -> Poll<()> {
        if cond {
            return Poll::Ready(());
        }
        self.yield_to(here)
    }

    /// Ready once `cond` holds, re-checked every `us`
    pub fn delay_until(&mut self, here: u16, cond: bool, us: u64) -> Poll<()> {
        if cond {
            return Poll::Ready(());
        }
        self.delay_us(here, us)
    }

    /// Run `child` one level deeper with default locals; Ready once it
    /// has finished.
    pub fn call<L: Default + 'static>(&mut self, here: u16, child: CortnFn<C, L>) -> Poll<()> {
        self.call_with(here, child, L::default)
    }

    /// Like [`Ctx::call`], `init` builds the child's locals on first entry
    pub fn call_with<L: 'static>(
        &mut self,
        here: u16,
        child: CortnFn<C, L>,
        init: impl FnOnce() -> L,
    ) -> Poll<()> {
        self.suspend_at(here);
        if !self.await_enter() {
            // no memory for the frame; retry on the next pass
            return Poll::Pending;
        }
        let mut init = Some(init);
        let _ = self.enter_frame(child, || init.take().map(|f| f()));
        if self.await_return() {
            self.clear_marker();
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    /// Wait for a message sent with `cortn_send_msg`
    pub fn recv_msg(&mut self, here: u16) -> Poll<Msg> {
        if let Some(msg) = self.take_msg() {
            return Poll::Ready(msg);
        }
        self.set_wake(Wake::External);
        self.suspend_at(here);
        Poll::Pending
    }

    /// Mailbox content without waiting
    pub fn take_msg(&mut self) -> Option<Msg> {
        self.sched.cortns.by_id_mut(self.id)?.msg.take()
    }

    /// Wait until no coroutine called `name` exists
    pub fn join(&mut self, here: u16, name: &str) -> Poll<()> {
        let gone = !self.sched.cortn_exists(name);
        self.delay_until(here, gone, 1_000)
    }

    /// Start another coroutine (auto-delete mode)
    pub fn spawn<L: 'static>(&mut self, name: &'static str, entry: CortnFn<C, L>, locals: L) -> Result<()> {
        self.sched.cortn_run(name, entry, locals)
    }

    /// Finish now and remove this coroutine whatever its mode
    pub fn delete_self(&mut self) -> Poll<()> {
        if let Some(co) = self.sched.cortns.by_id_mut(self.id) {
            co.kill = true;
        }
        self.clear_marker();
        Poll::Ready(())
    }

    /// Run `f` on this frame's locals, allocating them with `init` on
    /// first entry.
    pub(crate) fn enter_frame<L: 'static>(
        &mut self,
        f: CortnFn<C, L>,
        init: impl FnOnce() -> Option<L>,
    ) -> Poll<()> {
        let depth = self.hd.depth;
        let Some(frame) = self.hd.frames.get_mut(depth) else {
            return Poll::Ready(());
        };

        let mut locals: Box<dyn Any> = match frame.locals.take() {
            Some(b) if b.is::<L>() => b,
            stale => {
                if stale.is_some() {
                    log::warn!("cortn: {} locals changed type at depth {}", self.name, depth);
                }
                let Some(l) = init() else {
                    log::error!("cortn: {} has no locals at depth {}", self.name, depth);
                    frame.resume = 0;
                    return Poll::Ready(());
                };
                frame.locals_size = size_of::<L>();
                Box::new(l)
            }
        };

        let poll = match locals.downcast_mut::<L>() {
            Some(l) => f(self, l),
            None => Poll::Ready(()),
        };
        if let Some(frame) = self.hd.frames.get_mut(depth) {
            frame.locals = Some(locals);
        }
        poll
    }

    fn await_enter(&mut self) -> bool {
        let next = self.hd.depth + 1;
        if next >= self.hd.frames.len() {
            if self.hd.frames.try_reserve(1).is_err() {
                log::warn!("cortn: {} no memory for depth {}", self.name, next);
                return false;
            }
            self.hd.frames.push(Frame::new());
            self.hd.max_depth = self.hd.max_depth.max(next);
        }
        self.hd.depth = next;
        let frame = &mut self.hd.frames[next];
        frame.entry = mem::take(&mut frame.resume);
        true
    }

    // true once the child at depth+1 has finished; its frame and locals
    // are dropped then
    fn await_return(&mut self) -> bool {
        let child = self.hd.depth;
        self.hd.depth = child.saturating_sub(1);
        if self.hd.frames.get(child).is_some_and(|f| f.resume != 0) {
            return false;
        }
        self.hd.frames.truncate(child);
        true
    }
}
