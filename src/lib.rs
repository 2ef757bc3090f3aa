// `no_std` in any normal build; integration and unit tests run under the
// host's std test harness, which needs `std` linked in to drive them.
#![cfg_attr(not(test), no_std)]

//! The kernel core as a library: process table and scheduler, trap/
//! interrupt entry-exit, the supervisor-call dispatcher, and the unified
//! open-file/per-process descriptor table. The `corekern` binary
//! (`src/main.rs`) is a thin shell around this crate — real hardware
//! bring-up and the reset/IRQ/SVC trampoline are a platform integrator's
//! job, out of this repository's scope.

pub mod arch;
pub mod fs;
pub mod kernel;
pub mod libcore;

/// Process table capacity.
pub const MAX_PROCS: usize = 16;
/// Open-file table capacity; per-process descriptor tables are the same
/// length.
pub const MAX_FDS: usize = 16;
/// Per-pipe circular buffer capacity, in bytes.
pub const PIPE_BUF_SIZE: usize = 32;
/// Per-process stack size, in bytes.
pub const STACK_BYTES: usize = 0x2000;
