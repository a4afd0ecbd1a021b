//! Sizing constants for the paged elastic FIFO.
//!
//! Production code always uses these directly. Unit tests that need to
//! exercise table exhaustion without pinning 2^26 real pages instead use
//! `PageManager`'s `#[cfg(test)]` `tablesz_override` (see
//! `page_manager::tests::pin_past_shrunk_table_is_fatal`) rather than
//! shrinking `TABLESZ` itself.

/// Size of a single page, in bytes: 16 MiB.
pub const PAGESZ: usize = 1 << 24;

/// Number of page slots in the table: addresses ~1 PiB of backlog.
pub const TABLESZ: u32 = 1 << 26;

/// Size of the headroom reserve: four pages.
pub const HEADROOM_SIZE: usize = 4 * PAGESZ;
