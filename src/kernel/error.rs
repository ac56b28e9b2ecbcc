// Scheduler error type
//
// Every fallible table operation reports through SchedError; nothing
// panics for expected conditions (unknown name, full heap, bad args).

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// No task/event/coroutine with that name
    NotFound,
    /// Target exists but is disabled (event trigger)
    Disabled,
    /// Name already registered and duplicates are not allowed
    Duplicate,
    /// Heap could not grow a table or argument buffer
    Alloc,
    /// Out of range value (frequency, channel, ...)
    InvalidArg,
    /// Deferred call has more arguments than the configured maximum
    TooManyArgs { argc: usize, max: usize },
    /// Packed arguments need more 32-bit slots than allowed
    ArgsTooLarge { slots: usize, max: usize },
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::NotFound => write!(f, "not found"),
            SchedError::Disabled => write!(f, "disabled"),
            SchedError::Duplicate => write!(f, "duplicate name"),
            SchedError::Alloc => write!(f, "out of memory"),
            SchedError::InvalidArg => write!(f, "invalid argument"),
            SchedError::TooManyArgs { argc, max } => {
                write!(f, "too many arguments ({} > {})", argc, max)
            }
            SchedError::ArgsTooLarge { slots, max } => {
                write!(f, "arguments too large ({} slots > {})", slots, max)
            }
        }
    }
}

pub type Result<T> = core::result::Result<T, SchedError>;
