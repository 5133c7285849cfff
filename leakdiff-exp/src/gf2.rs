//! Table-driven squaring in GF(2)\[x\], the target of the `flush-reload`
//! binary.
//!
//! Squaring a binary polynomial interleaves its bits with zeros. Like
//! OpenSSL's `BN_GF2m_mod_sqr_arr`, this is done one nibble at a time with
//! a 16-entry lookup table, so the sequence of table indexes is exactly the
//! sequence of input nibbles.

use leakdiff::Channel;
use leakdiff::host::{ Table, TableLocator };

/// `SQR_TB[n]` is `n` with a zero bit inserted above each bit.
pub const SQR_TB: [u64; 16] = [
     0,  1,  4,  5, 16, 17, 20, 21,
    64, 65, 68, 69, 80, 81, 84, 85,
];

/// Sum of all elements of [`SQR_TB`].
pub const SQR_TB_SUM: u64 = 680;

/// Some memory laid out like a library image: a reference symbol at the
/// start, the table somewhere after it (not aligned to a cache line), and
/// enough padding on either side to cover a reload window.
#[repr(C, align(64))]
pub struct Image {
    pub anchor: [u64; 8],
    head: [u64; 60],
    pub sqr_tb: [u64; 16],
    tail: [u64; 64],
}

pub static IMAGE: Image = Image {
    anchor: [0; 8],
    head: [0; 60],
    sqr_tb: SQR_TB,
    tail: [0; 64],
};

impl Image {
    /// Address of the reference symbol.
    pub fn anchor_addr(&'static self) -> usize {
        self.anchor.as_ptr() as usize
    }

    /// Locator for the table relative to the anchor.
    pub fn locator() -> TableLocator {
        TableLocator {
            anchor_offset: std::mem::offset_of!(Image, anchor),
            table_offset: std::mem::offset_of!(Image, sqr_tb),
            elem_count: SQR_TB.len(),
            expected_sum: SQR_TB_SUM,
        }
    }

    /// Base and length of the whole image.
    pub fn span(&'static self) -> (usize, usize) {
        (self as *const Self as usize, std::mem::size_of::<Self>())
    }
}

/// Square `a`, returning the low and high halves of the result.
pub fn sqr(a: u64) -> (u64, u64) {
    let mut res: u128 = 0;
    for i in 0..16 {
        let nibble = (a >> (4 * i)) & 0xf;
        res |= (SQR_TB[nibble as usize] as u128) << (8 * i);
    }
    (res as u64, (res >> 64) as u64)
}

/// Square `a`, performing each table lookup through `channel` on the
/// located `table`. The high nibbles are looked up first.
pub fn sqr_traced(channel: &mut impl Channel, table: &Table, a: u64)
    -> (u64, u64)
{
    for i in (0..16).rev() {
        let nibble = ((a >> (4 * i)) & 0xf) as usize;
        channel.touch(table.elem_addr(nibble));
    }
    sqr(a)
}
