//! petabuf: an elastic, page-spilling FIFO that sits between a producer
//! and a consumer on a Unix pipeline, absorbing bursts up to ~1 PiB by
//! spilling pages to local disk once the memory budget is exhausted.
//!
//! Usage: `producer | petabuf | consumer`. Takes no arguments.

mod constants;
mod error;
mod headroom;
mod ioloop;
mod memory_probe;
mod page_manager;
mod page_table;
mod spillfile;

use std::process::ExitCode;

use log::{error, info};

use constants::PAGESZ;
use error::{PetabufError, Result};
use headroom::Headroom;
use ioloop::IoLoop;
use page_manager::PageManager;
use spillfile::SpillFiles;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    if std::env::args().count() > 1 {
        return Err(PetabufError::Usage);
    }

    let headroom = Headroom::acquire()?;

    let memsize = memory_probe::total_physical_memory()?;
    let nfree = memsize / PAGESZ as u64 / 2;
    info!("probed {memsize} bytes physical memory, nfree budget = {nfree} pages");

    let spill = SpillFiles::new()?;
    info!("spill directory: {}", spill.dir().display());

    let pages = PageManager::new(spill, nfree);
    let mut io_loop = IoLoop::new(pages, headroom)?;
    io_loop.run()
}
