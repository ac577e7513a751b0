//! Page-content measurement table.
//!
//! Grounded on `guest.c`'s `kvm_page_data`/`hyp_page_data` array,
//! `add_range_info`/`get_range_info`/`free_range_info`/`verify_range`,
//! and `compfunc` (a `qsort`/`bsearch` comparator on physical address).
//! The table is kept sorted by IPA after every insertion so lookups stay
//! `O(log n)` via binary search, exactly mirroring the C original's
//! `qsort` + `bsearch` pairing — just with `sha2` standing in for
//! whatever `calc_hash` resolved to on the host side (never specified in
//! the retrieved sources beyond its 32-byte digest).

use crate::error::{HvError, HvResult};
use crate::platform::MAX_MEASUREMENTS;

/// Computes an opaque content digest. Abstracted behind a trait so tests
/// can swap in a trivial deterministic hash instead of paying `sha2`'s
/// cost, and so a future digest algorithm change doesn't ripple through
/// the measurement table's logic.
pub trait Hasher {
    fn digest(&self, bytes: &[u8]) -> [u8; 32];
}

/// Default digest, backed by `sha2`'s `no_std`-capable SHA-256.
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn digest(&self, bytes: &[u8]) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    ipa: u64,
    vmid: u16,
    len: u64,
    digest: [u8; 32],
}

/// Sorted-by-IPA table of page measurements, one per guest, bounded by
/// `MAX_PAGING_BLOCKS` (`guest.c`'s `MAX_PAGING_BLOCKS`-sized
/// `hyp_page_data` array).
#[derive(Debug, PartialEq, Eq)]
pub struct MeasurementTable<const N: usize = MAX_MEASUREMENTS> {
    entries: [Option<Entry>; N],
    len: usize,
}

impl<const N: usize> MeasurementTable<N> {
    pub const fn new() -> Self {
        Self {
            entries: [None; N],
            len: 0,
        }
    }

    fn find_index(&self, ipa: u64) -> Result<usize, usize> {
        self.entries[..self.len].binary_search_by_key(&ipa, |e| e.as_ref().unwrap().ipa)
    }

    /// Records (or updates) the measurement of `len` bytes at host
    /// address `addr`, identified by guest IPA `ipa`. Mirrors
    /// `add_range_info`.
    pub fn record(
        &mut self,
        hasher: &dyn Hasher,
        vmid: u16,
        ipa: u64,
        bytes: &[u8],
    ) -> HvResult<()> {
        if ipa == 0 || bytes.is_empty() {
            return Err(HvError::Einval);
        }
        let digest = hasher.digest(bytes);
        match self.find_index(ipa) {
            Ok(idx) => {
                let e = self.entries[idx].as_mut().unwrap();
                e.vmid = vmid;
                e.len = bytes.len() as u64;
                e.digest = digest;
                Ok(())
            }
            Err(insert_at) => {
                if self.len == N {
                    return Err(HvError::Enospc);
                }
                for i in (insert_at..self.len).rev() {
                    self.entries[i + 1] = self.entries[i];
                }
                self.entries[insert_at] = Some(Entry {
                    ipa,
                    vmid,
                    len: bytes.len() as u64,
                    digest,
                });
                self.len += 1;
                Ok(())
            }
        }
    }

    /// Mirrors `free_range_info`: drops the measurement for `ipa` if one
    /// exists. A no-op otherwise, matching the original's silent return.
    pub fn forget(&mut self, ipa: u64) {
        if let Ok(idx) = self.find_index(ipa) {
            for i in idx..self.len - 1 {
                self.entries[i] = self.entries[i + 1];
            }
            self.entries[self.len - 1] = None;
            self.len -= 1;
        }
    }

    /// Mirrors `verify_range`: confirms the page at `ipa` still belongs
    /// to `vmid` and that `bytes` hashes to the recorded digest.
    pub fn verify(&self, hasher: &dyn Hasher, vmid: u16, ipa: u64, bytes: &[u8]) -> HvResult<()> {
        let idx = self.find_index(ipa).map_err(|_| HvError::Enoent)?;
        let entry = self.entries[idx].as_ref().unwrap();
        if entry.vmid != vmid {
            return Err(HvError::Efault);
        }
        if entry.len != bytes.len() as u64 {
            return Err(HvError::Einval);
        }
        let digest = hasher.digest(bytes);
        if digest != entry.digest {
            return Err(HvError::Einval);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every measurement owned by `vmid`, used during guest
    /// teardown alongside `free_guest_tables`.
    pub fn forget_guest(&mut self, vmid: u16) {
        let mut write = 0;
        for read in 0..self.len {
            let entry = self.entries[read];
            if entry.map(|e| e.vmid != vmid).unwrap_or(false) {
                self.entries[write] = entry;
                write += 1;
            }
        }
        for slot in self.entries[write..self.len].iter_mut() {
            *slot = None;
        }
        self.len = write;
    }
}

impl<const N: usize> Default for MeasurementTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHasher(u8);
    impl Hasher for FixedHasher {
        fn digest(&self, bytes: &[u8]) -> [u8; 32] {
            let mut d = [0u8; 32];
            d[0] = self.0 ^ bytes.iter().fold(0u8, |a, b| a ^ b);
            d
        }
    }

    #[test]
    fn record_then_verify_matches() {
        let mut table: MeasurementTable<8> = MeasurementTable::new();
        let hasher = FixedHasher(0);
        let page = [1u8, 2, 3, 4];
        table.record(&hasher, 5, 0x1000, &page).unwrap();
        assert!(table.verify(&hasher, 5, 0x1000, &page).is_ok());
    }

    #[test]
    fn verify_detects_content_tamper() {
        let mut table: MeasurementTable<8> = MeasurementTable::new();
        let hasher = FixedHasher(0);
        let page = [1u8, 2, 3, 4];
        table.record(&hasher, 5, 0x1000, &page).unwrap();
        let tampered = [9u8, 2, 3, 4];
        assert_eq!(
            table.verify(&hasher, 5, 0x1000, &tampered),
            Err(HvError::Einval)
        );
    }

    #[test]
    fn verify_detects_wrong_owner() {
        let mut table: MeasurementTable<8> = MeasurementTable::new();
        let hasher = FixedHasher(0);
        let page = [1u8, 2, 3, 4];
        table.record(&hasher, 5, 0x1000, &page).unwrap();
        assert_eq!(
            table.verify(&hasher, 6, 0x1000, &page),
            Err(HvError::Efault)
        );
    }

    #[test]
    fn forget_removes_entry() {
        let mut table: MeasurementTable<8> = MeasurementTable::new();
        let hasher = FixedHasher(0);
        let page = [1u8];
        table.record(&hasher, 1, 0x2000, &page).unwrap();
        table.forget(0x2000);
        assert_eq!(table.verify(&hasher, 1, 0x2000, &page), Err(HvError::Enoent));
    }

    #[test]
    fn table_stays_sorted_after_out_of_order_inserts() {
        let mut table: MeasurementTable<8> = MeasurementTable::new();
        let hasher = FixedHasher(0);
        let page = [1u8];
        for ipa in [0x5000, 0x1000, 0x9000, 0x3000] {
            table.record(&hasher, 1, ipa, &page).unwrap();
        }
        let ipas: Vec<u64> = table.entries[..table.len]
            .iter()
            .map(|e| e.unwrap().ipa)
            .collect();
        let mut sorted = ipas.clone();
        sorted.sort();
        assert_eq!(ipas, sorted);
    }

    #[test]
    fn exhaustion_returns_enospc() {
        let mut table: MeasurementTable<2> = MeasurementTable::new();
        let hasher = FixedHasher(0);
        let page = [1u8];
        table.record(&hasher, 1, 0x1000, &page).unwrap();
        table.record(&hasher, 1, 0x2000, &page).unwrap();
        assert_eq!(
            table.record(&hasher, 1, 0x3000, &page),
            Err(HvError::Enospc)
        );
    }

    #[test]
    fn forget_guest_only_drops_matching_owner() {
        let mut table: MeasurementTable<8> = MeasurementTable::new();
        let hasher = FixedHasher(0);
        let page = [1u8];
        table.record(&hasher, 1, 0x1000, &page).unwrap();
        table.record(&hasher, 2, 0x2000, &page).unwrap();
        table.forget_guest(1);
        assert_eq!(table.len(), 1);
        assert!(table.verify(&hasher, 2, 0x2000, &page).is_ok());
    }
}
