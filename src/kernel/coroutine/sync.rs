// Named mutexes and barriers for coroutines
//
// Both are created on first use by name and never freed; firmware uses
// a handful of fixed names. A mutex is handed straight to the first
// living waiter on release, so it never looks unlocked to a third
// coroutine in between. A barrier releases everyone once `target`
// coroutines are waiting (target 0 = only on explicit release).

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::task::Poll;

use super::ctx::Ctx;
use super::{CortnId, CortnTable, Wake};
use crate::kernel::error::{Result, SchedError};
use crate::kernel::scheduler::Scheduler;
use crate::kernel::time::Clock;

pub(crate) struct CortnMutex {
    name: &'static str,
    owner: Option<CortnId>,
    waiters: VecDeque<CortnId>,
}

pub(crate) struct CortnBarrier {
    name: &'static str,
    target: usize,
    waiting: Vec<CortnId>,
    // released but not yet resumed
    passed: Vec<CortnId>,
}

impl CortnBarrier {
    fn take_passed(&mut self, id: CortnId) -> bool {
        match self.passed.iter().position(|&w| w == id) {
            Some(pos) => {
                self.passed.swap_remove(pos);
                true
            }
            None => false,
        }
    }
}

impl<C: Clock> CortnTable<C> {
    fn mutex(&mut self, name: &'static str) -> Option<&mut CortnMutex> {
        let idx = match self.mutexes.iter().position(|m| m.name == name) {
            Some(idx) => idx,
            None => {
                self.mutexes.try_reserve(1).ok()?;
                self.mutexes.push(CortnMutex {
                    name,
                    owner: None,
                    waiters: VecDeque::new(),
                });
                self.mutexes.len() - 1
            }
        };
        self.mutexes.get_mut(idx)
    }

    fn barrier(&mut self, name: &'static str) -> Option<&mut CortnBarrier> {
        let idx = match self.barriers.iter().position(|b| b.name == name) {
            Some(idx) => idx,
            None => {
                self.barriers.try_reserve(1).ok()?;
                self.barriers.push(CortnBarrier {
                    name,
                    target: 0,
                    waiting: Vec::new(),
                    passed: Vec::new(),
                });
                self.barriers.len() - 1
            }
        };
        self.barriers.get_mut(idx)
    }

    /// Pass the mutex to the next waiter that still exists, or unlock it
    fn hand_off(&mut self, idx: usize, now_us: u64) {
        let Some(m) = self.mutexes.get_mut(idx) else {
            return;
        };
        m.owner = None;
        while let Some(w) = m.waiters.pop_front() {
            if let Some(co) = self.list.iter_mut().find(|c| c.id == w) {
                m.owner = Some(w);
                co.wake = Wake::At(now_us);
                self.woken = self.woken.wrapping_add(1);
                break;
            }
        }
    }

    /// Drop every reference to `id` from mutexes and barriers. Called when
    /// a coroutine goes away or restarts.
    pub(crate) fn forget(&mut self, id: CortnId) {
        for i in 0..self.mutexes.len() {
            let m = &mut self.mutexes[i];
            m.waiters.retain(|&w| w != id);
            if m.owner == Some(id) {
                // woken waiter is due right away
                self.hand_off(i, 0);
            }
        }
        for b in &mut self.barriers {
            b.waiting.retain(|&w| w != id);
            b.passed.retain(|&w| w != id);
        }
    }
}

impl<C: Clock + 'static> Scheduler<C> {
    /// Unlock `name`, handing it to the first waiting coroutine
    pub fn cortn_mutex_release(&mut self, name: &str) -> Result<()> {
        let idx = self
            .cortns
            .mutexes
            .iter()
            .position(|m| m.name == name)
            .ok_or(SchedError::NotFound)?;
        let now = self.now_us();
        self.cortns.hand_off(idx, now);
        Ok(())
    }

    pub fn cortn_mutex_is_locked(&self, name: &str) -> bool {
        self.cortns
            .mutexes
            .iter()
            .any(|m| m.name == name && m.owner.is_some())
    }

    /// Let every coroutine waiting at `name` through. Returns how many.
    pub fn cortn_barrier_release(&mut self, name: &str) -> Result<usize> {
        let now = self.now_us();
        let table = &mut self.cortns;
        let b = table
            .barriers
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or(SchedError::NotFound)?;
        b.passed
            .try_reserve(b.waiting.len())
            .map_err(|_| SchedError::Alloc)?;

        let released = b.waiting.len();
        for w in b.waiting.drain(..) {
            b.passed.push(w);
            if let Some(co) = table.list.iter_mut().find(|c| c.id == w) {
                co.wake = Wake::At(now);
                table.woken = table.woken.wrapping_add(1);
            }
        }
        Ok(released)
    }

    /// Release automatically once `target` coroutines wait (0 = never)
    pub fn cortn_barrier_set_target(&mut self, name: &'static str, target: usize) -> Result<()> {
        let b = self.cortns.barrier(name).ok_or(SchedError::Alloc)?;
        b.target = target;
        if target > 0 && b.waiting.len() >= target {
            self.cortn_barrier_release(name)?;
        }
        Ok(())
    }

    pub fn cortn_barrier_waiting(&self, name: &str) -> usize {
        self.cortns
            .barriers
            .iter()
            .find(|b| b.name == name)
            .map_or(0, |b| b.waiting.len())
    }
}

impl<C: Clock + 'static> Ctx<'_, C> {
    /// Take mutex `name`, waiting behind earlier callers
    pub fn acquire(&mut self, here: u16, name: &'static str) -> Poll<()> {
        let id = self.id;
        let Some(m) = self.sched.cortns.mutex(name) else {
            return self.yield_to(here);
        };
        match m.owner {
            None => {
                m.owner = Some(id);
                Poll::Ready(())
            }
            // handed over by release
            Some(owner) if owner == id => Poll::Ready(()),
            Some(_) => {
                if !m.waiters.contains(&id) {
                    if m.waiters.try_reserve(1).is_err() {
                        return self.yield_to(here);
                    }
                    m.waiters.push_back(id);
                }
                self.set_wake(Wake::External);
                self.suspend_at(here);
                Poll::Pending
            }
        }
    }

    pub fn release(&mut self, name: &str) {
        if self.sched.cortn_mutex_release(name).is_err() {
            log::warn!("cortn: {} released unknown mutex {}", self.name(), name);
        }
    }

    /// Wait at barrier `name` until it is released
    pub fn barrier(&mut self, here: u16, name: &'static str) -> Poll<()> {
        let id = self.id;
        let Some(b) = self.sched.cortns.barrier(name) else {
            return self.yield_to(here);
        };
        if b.take_passed(id) {
            return Poll::Ready(());
        }
        if !b.waiting.contains(&id) {
            if b.waiting.try_reserve(1).is_err() {
                return self.yield_to(here);
            }
            b.waiting.push(id);
        }
        if b.target > 0 && b.waiting.len() >= b.target {
            if self.sched.cortn_barrier_release(name).is_ok() {
                if let Some(b) = self.sched.cortns.barrier(name) {
                    b.take_passed(id);
                }
                return Poll::Ready(());
            }
            return self.yield_to(here);
        }
        self.set_wake(Wake::External);
        self.suspend_at(here);
        Poll::Pending
    }
}
