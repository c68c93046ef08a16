use std::process;

use thiserror::Error;

/// Failure kinds for [`crate::heap::MemManager`] construction. Each variant
/// corresponds to one init phase so callers over the C ABI get a distinct
/// non-zero code per failing phase.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    #[error("cell allocator init failed")]
    Allocator,
    #[error("memcell block allocation failed")]
    Block,
    #[error("free-cell list init failed")]
    FreeCells,
    #[error("manager init failed")]
    Manager,
}

impl InitError {
    /// C-ABI return code. Zero is reserved for success.
    pub fn code(self) -> i32 {
        match self {
            InitError::Allocator => 1,
            InitError::Block => 2,
            InitError::FreeCells => 3,
            InitError::Manager => 4,
        }
    }
}

/// Runtime failures surfaced by allocation and the string operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("index out of bounds: {start}..{end} on string of length {len}")]
    IndexOutOfBounds { start: usize, end: usize, len: usize },
}

/// Sink invoked for failures compiled code cannot recover from. Installed
/// per manager so tests can observe failures without exiting the process.
pub type FailureSink = fn(&RuntimeError) -> !;

/// Default sink: report on stderr and terminate.
pub fn exit_failure_sink(err: &RuntimeError) -> ! {
    eprintln!("runtime error: {}", err);
    process::exit(1);
}
