//! Error types for petabuf.
//!
//! Every fatal condition described in the design (system-call failure,
//! page table exhaustion, bad invocation) is represented here and
//! propagated straight out of `main`; there is no retry path.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PetabufError {
    #[error("usage: petabuf (reads stdin, writes stdout; no options)")]
    Usage,

    #[error("failed to probe physical memory: {0}")]
    Probe(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("memory mapping failed: {0}")]
    Mmap(#[source] io::Error),

    #[error("spill path for page {idx} exceeds PATH_MAX")]
    SpillPath { idx: u32 },

    #[error("page table exhausted at {tablesz} pages")]
    TableExhausted { tablesz: u32 },
}

pub type Result<T> = std::result::Result<T, PetabufError>;
