// Cooperative scheduler for small single-core targets (no_std + alloc)
//
// Periodic tasks, events, stackless coroutines, deferred calls and a
// soft-interrupt mux, all driven from one run loop. Host builds use
// ManualClock or a std clock; firmware brings its own Clock.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod kernel;

pub use kernel::{Result, SchedConfig, SchedError, Scheduler};
