//! Memory probe: total physical memory of the host, queried once at
//! startup via `sysinfo(2)`.

use crate::error::{PetabufError, Result};

/// Total physical memory of the host, in bytes.
pub fn total_physical_memory() -> Result<u64> {
    // SAFETY: `info` is a plain-old-data struct zero-initialized before
    // the call; `sysinfo` only ever writes through the pointer we give it.
    unsafe {
        let mut info: libc::sysinfo = std::mem::zeroed();
        if libc::sysinfo(&mut info) != 0 {
            return Err(PetabufError::Probe(std::io::Error::last_os_error()));
        }
        Ok(info.totalram as u64 * info.mem_unit as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_nonzero_memory() {
        // Any real host has at least one page of RAM.
        assert!(total_physical_memory().unwrap() > 0);
    }
}
