//! Headroom reserve: a single 64 MiB allocation held only to be released
//! on the first ENOMEM, giving the subsequent file-backed mapping room
//! to succeed. Never reacquired once released.

use std::ptr;

use crate::constants::HEADROOM_SIZE;
use crate::error::{PetabufError, Result};

pub struct Headroom {
    base: Option<*mut libc::c_void>,
}

impl Headroom {
    pub fn acquire() -> Result<Self> {
        // SAFETY: anonymous private mapping, not backed by any fd.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                HEADROOM_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PetabufError::Mmap(std::io::Error::last_os_error()));
        }
        Ok(Headroom { base: Some(ptr) })
    }

    pub fn is_held(&self) -> bool {
        self.base.is_some()
    }

    /// Release the reserve. A no-op if already released.
    pub fn release(&mut self) {
        if let Some(ptr) = self.base.take() {
            // SAFETY: `ptr`/`HEADROOM_SIZE` match the successful mmap above.
            unsafe {
                libc::munmap(ptr, HEADROOM_SIZE);
            }
        }
    }
}

impl Drop for Headroom {
    fn drop(&mut self) {
        self.release();
    }
}
