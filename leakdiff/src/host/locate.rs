//! Locating a table that has no symbol of its own.

use crate::error::{ LeakError, Result };

/// Describes where a table of 64-bit words lives relative to some symbol
/// whose address is known at runtime.
///
/// The offsets are specific to one build of the image containing the table.
/// Since they are easy to get wrong, [`TableLocator::locate`] always checks
/// the sum of the table's elements before returning an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableLocator {
    /// Offset of the reference symbol within the image.
    pub anchor_offset: usize,
    /// Offset of the table within the image.
    pub table_offset: usize,
    /// Number of 64-bit elements in the table.
    pub elem_count: usize,
    /// Expected sum of all elements.
    pub expected_sum: u64,
}

/// A located and validated table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Table {
    pub addr: usize,
    pub len: usize,
}
impl Table {
    /// Address of element `idx`.
    pub fn elem_addr(&self, idx: usize) -> usize {
        self.addr + idx * 8
    }
}

impl TableLocator {
    /// The GF(2) squaring table used by OpenSSL's `BN_GF2m_mod_sqr_arr`,
    /// relative to `BN_gcd` (for one particular build of libcrypto).
    pub const OPENSSL_SQR_TB: Self = Self {
        anchor_offset: 0x9c500,
        table_offset: 0x19f620,
        elem_count: 16,
        expected_sum: 680,
    };

    /// Address of the table given the runtime address of the anchor.
    pub fn table_addr(&self, anchor_addr: usize) -> usize {
        anchor_addr.wrapping_sub(self.anchor_offset)
            .wrapping_add(self.table_offset)
    }

    /// Sum of the table elements at `addr`.
    ///
    /// # Safety
    /// `addr..addr + 8 * elem_count` must be mapped and readable.
    pub unsafe fn checksum(&self, addr: usize) -> u64 {
        (0..self.elem_count).fold(0u64, |acc, i| {
            let elem = std::ptr::read_unaligned((addr + i * 8) as *const u64);
            acc.wrapping_add(elem)
        })
    }

    /// Compute the table address and validate its contents.
    ///
    /// # Safety
    /// The address computed from `anchor_addr` must point into mapped,
    /// readable memory spanning the whole table.
    pub unsafe fn locate(&self, anchor_addr: usize) -> Result<Table> {
        let addr = self.table_addr(anchor_addr);
        let actual = self.checksum(addr);
        if actual != self.expected_sum {
            return Err(LeakError::ChecksumMismatch {
                addr, expected: self.expected_sum, actual
            });
        }
        tracing::debug!("table @ {:016x} (offset {} into its line)",
            addr, addr % 64);
        Ok(Table { addr, len: self.elem_count * 8 })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[repr(C)]
    struct Image {
        anchor: [u64; 3],
        padding: [u64; 5],
        table: [u64; 16],
    }

    static IMAGE: Image = Image {
        anchor: [0; 3],
        padding: [0xffff; 5],
        table: [
            0, 1, 4, 5, 16, 17, 20, 21,
            64, 65, 68, 69, 80, 81, 84, 85,
        ],
    };

    fn locator() -> TableLocator {
        TableLocator {
            anchor_offset: 0x1000,
            table_offset: 0x1000 + std::mem::offset_of!(Image, table),
            elem_count: 16,
            expected_sum: 680,
        }
    }

    #[test]
    fn locates_table() {
        let anchor = IMAGE.anchor.as_ptr() as usize;
        let table = unsafe { locator().locate(anchor) }.unwrap();
        assert_eq!(table.addr, IMAGE.table.as_ptr() as usize);
        assert_eq!(table.len, 128);
        assert_eq!(table.elem_addr(2), table.addr + 16);
    }

    #[test]
    fn wrong_offset_fails_checksum() {
        let anchor = IMAGE.anchor.as_ptr() as usize;
        let mut loc = locator();
        loc.table_offset -= 8;
        match unsafe { loc.locate(anchor) } {
            Err(LeakError::ChecksumMismatch { expected, actual, .. }) => {
                assert_eq!(expected, 680);
                assert_eq!(actual, 0xffff + 680 - 85);
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
