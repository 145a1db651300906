use core::fmt;
use std::io::Write;
use thiserror::Error;

/// the only recoverable failure: the heap couldn't hand over memory or a table slot.
/// generated code never sees this; the infallible entry points turn it
/// into `report_and_terminate`.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AllocError {
    #[error("out of memory mapping a region of {bytes} bytes for {slab_size}-byte slabs")]
    RegionExhausted { slab_size: usize, bytes: usize },

    #[error("out of memory allocating a {bytes}-byte fallback buffer")]
    FallbackExhausted { bytes: usize },

    #[error("heap extent table is full")]
    ExtentTableFull,

    #[error("string literal table is full")]
    LiteralTableFull,
}

/// write the message and end the process. there is no recovery path.
pub fn report_and_terminate(message: &dyn fmt::Display) -> ! {
    log::error!("fatal: {}", message);
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "{}", message);
    let _ = out.flush();
    std::process::abort()
}
