//! The readiness-driven copy loop: the single control flow of the whole
//! program. Cursors start at `(0, 0)`; the loop pins slot 0, then
//! alternates between asking the OS which side is ready and moving
//! bytes on whichever side(s) answered.

use std::io;

use log::{debug, info, trace};

use crate::constants::{PAGESZ, TABLESZ};
use crate::error::{PetabufError, Result};
use crate::headroom::Headroom;
use crate::page_manager::PageManager;
use crate::page_table::PageAddr;

const STDIN_FD: libc::c_int = 0;
const STDOUT_FD: libc::c_int = 1;

pub struct IoLoop {
    pages: PageManager,
    headroom: Headroom,
    rpos: PageAddr,
    wpos: PageAddr,
    input_done: bool,
    bytes_copied: u64,
}

impl IoLoop {
    pub fn new(pages: PageManager, headroom: Headroom) -> Result<Self> {
        set_nonblocking(STDIN_FD)?;
        set_nonblocking(STDOUT_FD)?;
        let mut loop_ = IoLoop {
            pages,
            headroom,
            rpos: PageAddr::zero(),
            wpos: PageAddr::zero(),
            input_done: false,
            bytes_copied: 0,
        };
        loop_.pages.pin(0, &mut loop_.headroom)?;
        Ok(loop_)
    }

    /// Run until the input stream closes and every buffered byte has
    /// drained to output.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let ntoread = self.ntoread();
            let ntowrite = self.ntowrite();
            trace!(
                "loop: rpos={:?} wpos={:?} ntoread={} ntowrite={}",
                self.rpos, self.wpos, ntoread, ntowrite
            );

            if ntoread == 0 && ntowrite == 0 {
                break;
            }

            let (readable, writable) = self.poll_ready(ntoread > 0, ntowrite > 0)?;

            if readable {
                self.do_read(ntoread)?;
            }
            if writable {
                // Recompute rather than reuse the pre-read `ntowrite`: when
                // wpos and rpos share a page, the read just above can make
                // more bytes available to this same write attempt. Handling
                // read before write, and re-deriving the count here, is what
                // lets those bytes go out this iteration instead of next.
                self.do_write(self.ntowrite())?;
            }
        }

        info!("drained {} bytes, exiting cleanly", self.bytes_copied);
        Ok(())
    }

    fn ntoread(&self) -> usize {
        if self.input_done {
            0
        } else {
            PAGESZ - self.rpos.off as usize
        }
    }

    fn ntowrite(&self) -> usize {
        if self.wpos.idx < self.rpos.idx {
            PAGESZ - self.wpos.off as usize
        } else {
            (self.rpos.off - self.wpos.off) as usize
        }
    }

    fn poll_ready(&self, want_read: bool, want_write: bool) -> Result<(bool, bool)> {
        let mut fds = [
            libc::pollfd { fd: STDIN_FD, events: libc::POLLIN, revents: 0 },
            libc::pollfd { fd: STDOUT_FD, events: libc::POLLOUT, revents: 0 },
        ];
        let nfds = match (want_read, want_write) {
            (true, true) => 2,
            (true, false) => 1,
            (false, true) => {
                fds[0] = fds[1];
                1
            }
            (false, false) => unreachable!("caller already checked both counts are nonzero"),
        };

        loop {
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), nfds as libc::nfds_t, -1) };
            if rc >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(PetabufError::Io(err));
        }

        if want_read && want_write {
            Ok((
                fds[0].revents & libc::POLLIN != 0,
                fds[1].revents & libc::POLLOUT != 0,
            ))
        } else if want_read {
            Ok((fds[0].revents & libc::POLLIN != 0, false))
        } else {
            Ok((false, fds[0].revents & libc::POLLOUT != 0))
        }
    }

    fn do_read(&mut self, ntoread: usize) -> Result<()> {
        let buf = self.pages.ptr(self.rpos);
        let n = unsafe { libc::read(STDIN_FD, buf as *mut libc::c_void, ntoread) };
        if n < 0 {
            return ignore_transient_error("read");
        }
        if n == 0 {
            debug!("input closed after {} bytes", self.bytes_copied);
            self.input_done = true;
            return Ok(());
        }

        let n = n as u32;
        self.rpos.off += n;
        if self.rpos.off == PAGESZ as u32 {
            if self.rpos.idx != self.wpos.idx {
                self.pages.unpin(self.rpos.idx);
            }
            let next = self.rpos.idx + 1;
            if next >= TABLESZ {
                return Err(PetabufError::TableExhausted { tablesz: TABLESZ });
            }
            self.pages.pin(next, &mut self.headroom)?;
            self.rpos = PageAddr { idx: next, off: 0 };
        }
        Ok(())
    }

    fn do_write(&mut self, ntowrite: usize) -> Result<()> {
        let buf = self.pages.ptr(self.wpos);
        let n = unsafe { libc::write(STDOUT_FD, buf as *const libc::c_void, ntowrite) };
        if n < 0 {
            return ignore_transient_error("write");
        }
        if n == 0 {
            return Ok(());
        }

        let n = n as u32;
        self.wpos.off += n;
        self.bytes_copied += n as u64;
        if self.wpos.off == PAGESZ as u32 {
            let done = self.wpos.idx;
            self.pages.unpin(done);
            self.pages.free(done);
            let next = done + 1;
            self.pages.pin(next, &mut self.headroom)?;
            self.wpos = PageAddr { idx: next, off: 0 };
        }
        Ok(())
    }
}

fn ignore_transient_error(op: &str) -> Result<()> {
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK || code == libc::EINTR => {
            trace!("{op}: transient ({err}), retrying next iteration");
            Ok(())
        }
        _ => Err(PetabufError::Io(err)),
    }
}

fn set_nonblocking(fd: libc::c_int) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(PetabufError::Io(io::Error::last_os_error()));
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(PetabufError::Io(io::Error::last_os_error()));
        }
    }
    Ok(())
}
