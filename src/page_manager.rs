//! The page manager: `pin`, `unpin`, `free`, `ptr`, and the counters that
//! drive the memory-pressure policy. Every operation here is synchronous
//! and is only ever called from the single-threaded I/O loop.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::ptr;

use log::debug;

use crate::constants::{PAGESZ, TABLESZ};
use crate::error::{PetabufError, Result};
use crate::page_table::{PageAddr, PageState, PageTable};
use crate::spillfile::SpillFiles;

pub struct PageManager {
    table: PageTable,
    spill: SpillFiles,
    /// Anonymous-page budget; forced to 0 permanently on first ENOMEM.
    nfree: u64,
    nmapped: u64,
    nondisk: u64,
    headroom_released: bool,
    #[cfg(test)]
    force_enomem: bool,
    /// Test-local shrink of the effective table size, so the exhaustion
    /// path can be driven without actually pinning 2^26 real pages.
    #[cfg(test)]
    tablesz_override: Option<u32>,
}

impl PageManager {
    pub fn new(spill: SpillFiles, nfree: u64) -> Self {
        PageManager {
            table: PageTable::new(),
            spill,
            nfree,
            nmapped: 0,
            nondisk: 0,
            headroom_released: false,
            #[cfg(test)]
            force_enomem: false,
            #[cfg(test)]
            tablesz_override: None,
        }
    }

    pub fn nfree(&self) -> u64 { self.nfree }
    pub fn nmapped(&self) -> u64 { self.nmapped }
    pub fn nondisk(&self) -> u64 { self.nondisk }

    /// True once the one-way ENOMEM demotion has happened.
    pub fn headroom_released(&self) -> bool { self.headroom_released }

    #[cfg(test)]
    pub fn set_force_enomem(&mut self, force: bool) { self.force_enomem = force; }

    #[cfg(test)]
    pub fn set_tablesz_override(&mut self, tablesz: u32) { self.tablesz_override = Some(tablesz); }

    fn tablesz(&self) -> u32 {
        #[cfg(test)]
        if let Some(t) = self.tablesz_override {
            return t;
        }
        TABLESZ
    }

    /// Ensure slot `idx` is mapped, per the state table in the design.
    pub fn pin(&mut self, idx: u32, headroom: &mut crate::headroom::Headroom) -> Result<()> {
        let tablesz = self.tablesz();
        if idx >= tablesz {
            return Err(PetabufError::TableExhausted { tablesz });
        }

        let state = self.table.state(idx);
        if state.contains(PageState::MAPPED) {
            return Ok(());
        }

        if state.contains(PageState::ONDISK) {
            // {ONDISK} -> {MAPPED, ONDISK}: re-materialise the file mapping.
            let base = self.map_existing_file(idx)?;
            let slot = self.table.slot_mut(idx);
            slot.base = Some(base);
            slot.state.insert(PageState::MAPPED);
            self.nmapped += 1;
            debug!("page {idx}: remapped from disk");
            return Ok(());
        }

        // state == {}
        if self.nfree > 0 {
            match self.map_anonymous() {
                Ok(base) => {
                    let slot = self.table.slot_mut(idx);
                    slot.base = Some(base);
                    slot.state = PageState::MAPPED;
                    self.nmapped += 1;
                    self.nfree -= 1;
                    debug!("page {idx}: fresh anonymous page, nfree={}", self.nfree);
                    return Ok(());
                }
                Err(e) if is_enomem(&e) => {
                    debug!("page {idx}: ENOMEM on anonymous mmap, demoting to disk-backed");
                    self.nfree = 0;
                    if !self.headroom_released {
                        headroom.release();
                        self.headroom_released = true;
                    }
                    // Fall through to the on-disk creation branch below.
                }
                Err(e) => return Err(e),
            }
        }

        // {} with nfree == 0, or fallen through from the ENOMEM branch above.
        let base = self.create_file_backed(idx)?;
        let slot = self.table.slot_mut(idx);
        slot.base = Some(base);
        slot.state = PageState::MAPPED | PageState::ONDISK;
        self.nmapped += 1;
        self.nondisk += 1;
        debug!("page {idx}: created disk-backed, nondisk={}", self.nondisk);
        Ok(())
    }

    /// Surrender the in-memory mapping of a disk-backed page. A no-op on
    /// purely anonymous pages: they have no other backing to fall back to.
    pub fn unpin(&mut self, idx: u32) {
        let state = self.table.state(idx);
        if state == (PageState::MAPPED | PageState::ONDISK) {
            let slot = self.table.slot_mut(idx);
            if let Some(base) = slot.base.take() {
                unsafe {
                    libc::munmap(base as *mut libc::c_void, PAGESZ);
                }
            }
            slot.state.remove(PageState::MAPPED);
            self.nmapped -= 1;
            debug!("page {idx}: unpinned (kept on disk)");
        }
        // {MAPPED} alone, or not mapped at all: no-op.
    }

    /// Permanently release a slot's storage.
    pub fn free(&mut self, idx: u32) {
        let state = self.table.state(idx);
        if state.contains(PageState::ONDISK) {
            debug_assert!(!state.contains(PageState::MAPPED), "free on disk page requires unpin first");
            let path = self.spill.path_for(idx).expect("path length already validated at creation");
            let _ = std::fs::remove_file(&path);
            self.nondisk -= 1;
            self.table.remove(idx);
            debug!("page {idx}: freed (unlinked spill file)");
        } else if state.contains(PageState::MAPPED) {
            let slot = self.table.slot_mut(idx);
            if let Some(base) = slot.base.take() {
                unsafe {
                    libc::munmap(base as *mut libc::c_void, PAGESZ);
                }
            }
            self.nmapped -= 1;
            self.nfree += 1;
            self.table.remove(idx);
            debug!("page {idx}: freed (anonymous), nfree={}", self.nfree);
        }
        // else: no-op, slot already {}.
    }

    /// Byte pointer for a page address. Precondition: the slot is mapped.
    pub fn ptr(&self, addr: PageAddr) -> *mut u8 {
        debug_assert!((addr.off as usize) < PAGESZ);
        let slot = self.table.slot(addr.idx).expect("ptr() on unmapped slot");
        debug_assert!(slot.state.contains(PageState::MAPPED));
        let base = slot.base.expect("MAPPED slot must have a base");
        unsafe { base.add(addr.off as usize) }
    }

    fn map_anonymous(&self) -> Result<*mut u8> {
        #[cfg(test)]
        if self.force_enomem {
            return Err(PetabufError::Mmap(std::io::Error::from_raw_os_error(libc::ENOMEM)));
        }
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                PAGESZ,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PetabufError::Mmap(std::io::Error::last_os_error()));
        }
        Ok(ptr as *mut u8)
    }

    fn create_file_backed(&self, idx: u32) -> Result<*mut u8> {
        let path = self.spill.path_for(idx)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode_owner_only()
            .open(&path)
            .map_err(PetabufError::Io)?;
        file.set_len(PAGESZ as u64).map_err(PetabufError::Io)?;
        self.mmap_shared(&file)
    }

    fn map_existing_file(&self, idx: u32) -> Result<*mut u8> {
        let path = self.spill.path_for(idx)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(PetabufError::Io)?;
        self.mmap_shared(&file)
    }

    fn mmap_shared(&self, file: &std::fs::File) -> Result<*mut u8> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                PAGESZ,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PetabufError::Mmap(std::io::Error::last_os_error()));
        }
        // `file` closes here (descriptor no longer needed once mapped),
        // matching the design's "close the descriptor" step.
        Ok(ptr as *mut u8)
    }
}

fn is_enomem(e: &PetabufError) -> bool {
    matches!(e, PetabufError::Mmap(io) if io.raw_os_error() == Some(libc::ENOMEM))
}

/// Small extension so file creation always uses mode 0600, matching the
/// spill-file factory's contract.
trait OpenOptionsExt2 {
    fn mode_owner_only(&mut self) -> &mut Self;
}

impl OpenOptionsExt2 for OpenOptions {
    fn mode_owner_only(&mut self) -> &mut Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(0o600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spillfile::SpillFiles;

    fn manager() -> PageManager {
        let spill = SpillFiles::new_for_test().unwrap();
        PageManager::new(spill, 2)
    }

    impl Drop for PageManager {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(self.spill.dir());
        }
    }

    #[test]
    fn pin_anonymous_then_free_returns_budget() {
        let mut pm = manager();
        let mut hr = crate::headroom::Headroom::acquire().unwrap();
        pm.pin(0, &mut hr).unwrap();
        assert_eq!(pm.nfree(), 1);
        assert_eq!(pm.nmapped(), 1);
        pm.free(0);
        assert_eq!(pm.nfree(), 2);
        assert_eq!(pm.nmapped(), 0);
    }

    #[test]
    fn pin_past_budget_goes_to_disk() {
        let mut pm = manager();
        let mut hr = crate::headroom::Headroom::acquire().unwrap();
        pm.pin(0, &mut hr).unwrap();
        pm.pin(1, &mut hr).unwrap();
        assert_eq!(pm.nfree(), 0);
        pm.pin(2, &mut hr).unwrap();
        assert_eq!(pm.nondisk(), 1);
        assert_eq!(pm.nmapped(), 3);
        pm.unpin(2);
        assert_eq!(pm.nmapped(), 2);
        pm.pin(2, &mut hr).unwrap();
        assert_eq!(pm.nmapped(), 3);
        pm.free(2);
        assert_eq!(pm.nondisk(), 0);
        pm.free(1);
        pm.free(0);
        assert_eq!(pm.nfree(), 2);
    }

    #[test]
    fn unpin_anonymous_is_noop() {
        let mut pm = manager();
        let mut hr = crate::headroom::Headroom::acquire().unwrap();
        pm.pin(0, &mut hr).unwrap();
        pm.unpin(0);
        assert_eq!(pm.nmapped(), 1, "anonymous pages cannot be unpinned");
    }

    #[test]
    fn enomem_triggers_one_way_demotion() {
        let mut pm = manager();
        let mut hr = crate::headroom::Headroom::acquire().unwrap();
        pm.set_force_enomem(true);
        pm.pin(0, &mut hr).unwrap();
        assert_eq!(pm.nfree(), 0, "ENOMEM clamps nfree to 0");
        assert!(!hr.is_held(), "headroom released on first ENOMEM");
        assert!(pm.headroom_released());
        assert_eq!(pm.nondisk(), 1, "slot went straight to disk-backed");

        // Demotion is one-way: even if allocation would now succeed
        // (force_enomem stays set here, but nfree is already 0 regardless),
        // subsequent fresh slots still go straight to disk.
        pm.pin(1, &mut hr).unwrap();
        assert_eq!(pm.nondisk(), 2);
        assert_eq!(pm.nfree(), 0);
    }

    #[test]
    fn pin_past_shrunk_table_is_fatal() {
        let mut pm = manager();
        pm.set_tablesz_override(2);
        let mut hr = crate::headroom::Headroom::acquire().unwrap();
        pm.pin(0, &mut hr).unwrap();
        pm.pin(1, &mut hr).unwrap();
        let err = pm.pin(2, &mut hr).unwrap_err();
        assert!(matches!(err, PetabufError::TableExhausted { tablesz: 2 }));
    }

    #[test]
    fn ptr_roundtrips_bytes() {
        let mut pm = manager();
        let mut hr = crate::headroom::Headroom::acquire().unwrap();
        pm.pin(0, &mut hr).unwrap();
        let p = pm.ptr(PageAddr { idx: 0, off: 10 });
        unsafe {
            *p = 0x42;
            assert_eq!(*p, 0x42);
        }
        pm.free(0);
    }
}
