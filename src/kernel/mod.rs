// Cooperative run-to-completion scheduler
// Single core, no preemption. Everything runs from `Scheduler::run`;
// ISRs only raise soft interrupts or tick the uptime clock.
//
// task:      fixed-rate bodies, priority ordered, phase locked
// event:     named callbacks armed by a trigger
// coroutine: stackless resumable bodies with nesting, mailbox, mutex
// runlater:  one-shot deferred calls with packed arguments
// softint:   8x8 coalescing soft-interrupt bitmap
// report:    periodic timing tables over the log facade

pub mod config;
pub mod coroutine;
pub mod error;
pub mod event;
pub mod report;
pub mod runlater;
pub mod scheduler;
pub mod shell;
pub mod softint;
pub mod stats;
pub mod task;
pub mod time;
pub mod wake;

pub use config::{PriorityOrder, SchedConfig};
pub use coroutine::{CortnFn, CortnId, CortnInfo, CortnMode, CortnState, Ctx, Msg};
pub use error::{Result, SchedError};
pub use event::{EventArg, EventFn, EventInfo};
pub use runlater::{DeferredInfo, PackArg};
pub use runlater::args::PackArgs;
pub use scheduler::Scheduler;
pub use softint::{SOFT_INT, SoftInt};
pub use stats::DispatchStats;
pub use task::{TaskFn, TaskInfo};
pub use time::{Clock, ManualClock, TimeBase, UptimeClock};
pub use wake::wait_for_interrupt;
