// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ordered, non-overlapping address-tagged byte runs ("regions"), and the
//! fixed-endian integer packing helpers used everywhere a wire format needs
//! one.
//!
//! A [`RegionList`] is kept sorted by `start` with no two regions
//! overlapping and no zero-length regions; every public method preserves
//! that invariant. This plays the role the original tool gave to an
//! intrusive singly linked list (`struct region *next`); a sorted `Vec` is
//! the idiomatic host-side equivalent.

use std::fmt;

/// Byte order for a wire-format integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

pub fn pack_u16(value: u16, endian: Endian) -> [u8; 2] {
    match endian {
        Endian::Big => value.to_be_bytes(),
        Endian::Little => value.to_le_bytes(),
    }
}

pub fn pack_u32(value: u32, endian: Endian) -> [u8; 4] {
    match endian {
        Endian::Big => value.to_be_bytes(),
        Endian::Little => value.to_le_bytes(),
    }
}

/// Panics if `bytes` is shorter than 2 bytes.
pub fn unpack_u16(bytes: &[u8], endian: Endian) -> u16 {
    let b: [u8; 2] = bytes[..2].try_into().expect("2 bytes");
    match endian {
        Endian::Big => u16::from_be_bytes(b),
        Endian::Little => u16::from_le_bytes(b),
    }
}

/// Panics if `bytes` is shorter than 4 bytes.
pub fn unpack_u32(bytes: &[u8], endian: Endian) -> u32 {
    let b: [u8; 4] = bytes[..4].try_into().expect("4 bytes");
    match endian {
        Endian::Big => u32::from_be_bytes(b),
        Endian::Little => u32::from_le_bytes(b),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `[start, start+len)` intersects an existing region without abutting
    /// it from below.
    Overlap {
        start: u32,
        end: u32,
        existing_start: u32,
        existing_end: u32,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Overlap {
                start,
                end,
                existing_start,
                existing_end,
            } => write!(
                f,
                "overlapping regions detected! [0x{start:08X}:0x{end:08X}) clashes with [0x{existing_start:08X}:0x{existing_end:08X})"
            ),
        }
    }
}

impl std::error::Error for Error {}

/// A half-open address interval `[start, start + data.len())` with an owned
/// byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: u32,
    pub data: Vec<u8>,
}

impl Region {
    /// The exclusive end address of this region.
    pub fn end(&self) -> u32 {
        self.start + self.data.len() as u32
    }
}

/// An ordered, disjoint list of [`Region`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionList(Vec<Region>);

impl RegionList {
    pub fn new() -> Self {
        RegionList(Vec::new())
    }

    pub fn regions(&self) -> &[Region] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Total number of bytes held across all regions.
    pub fn total_bytes(&self) -> u64 {
        self.0.iter().map(|r| r.data.len() as u64).sum()
    }

    /// Lowest start address / highest end address across all regions, if any.
    pub fn span(&self) -> Option<(u32, u32)> {
        let first = self.0.first()?.start;
        let last = self.0.last()?.end();
        Some((first, last))
    }

    /// Splice `bytes` into the list at `start`, extending an abutting region
    /// or inserting a new one. Fails with [`Error::Overlap`] if the range
    /// intersects an existing region without abutting it from below.
    pub fn add_data(&mut self, mut start: u32, mut bytes: &[u8]) -> Result<(), Error> {
        let mut i = 0;
        while i < self.0.len() && !bytes.is_empty() {
            let region_start = self.0[i].start;
            let region_end = self.0[i].end();

            if region_end == start {
                let available = if i + 1 < self.0.len() {
                    self.0[i + 1].start - region_end
                } else {
                    bytes.len() as u32
                };
                let copylen = available.min(bytes.len() as u32) as usize;
                self.0[i].data.extend_from_slice(&bytes[..copylen]);
                bytes = &bytes[copylen..];
                start += copylen as u32;
            } else if region_end >= start && start >= region_start {
                return Err(Error::Overlap {
                    start,
                    end: start + bytes.len() as u32,
                    existing_start: region_start,
                    existing_end: region_end,
                });
            }
            i += 1;
        }

        if !bytes.is_empty() {
            let idx = self.0.partition_point(|r| r.start < start);
            self.0.insert(
                idx,
                Region {
                    start,
                    data: bytes.to_vec(),
                },
            );
        }

        Ok(())
    }

    /// Insert a zero-filled region of `len` bytes at `start`.
    pub fn add_empty(&mut self, start: u32, len: u32) -> Result<(), Error> {
        self.add_data(start, &vec![0u8; len as usize])
    }

    /// Copy `len` bytes starting at `start`, spanning contiguous regions.
    /// Returns `None` if any byte in range is not present.
    pub fn get_data(&self, start: u32, len: u32) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(len as usize);
        let mut cur = start;
        let mut remaining = len;

        for r in &self.0 {
            if remaining == 0 {
                break;
            }
            if r.start <= cur && cur < r.end() {
                let avail = r.end() - cur;
                let copylen = avail.min(remaining);
                let off = (cur - r.start) as usize;
                out.extend_from_slice(&r.data[off..off + copylen as usize]);
                cur += copylen;
                remaining -= copylen;
            }
        }

        if remaining == 0 {
            Some(out)
        } else {
            None
        }
    }

    /// Add `delta` to every region's start (and thus its end).
    pub fn shift(&mut self, delta: i64) {
        for r in &mut self.0 {
            r.start = (r.start as i64 + delta) as u32;
        }
    }

    /// True if the list has no gaps: `regions[i].end() == regions[i+1].start`
    /// for every adjacent pair, and there is at least one region.
    pub fn is_contiguous(&self) -> bool {
        if self.0.is_empty() {
            return false;
        }
        self.0.windows(2).all(|w| w[0].end() == w[1].start)
    }
}

/// Produce a new list containing, for each byte present in both `dst` and
/// `src` at the same address, that byte taken from `src`.
pub fn intersection(dst: &RegionList, src: &RegionList) -> RegionList {
    let mut out = RegionList::new();
    for s in &src.0 {
        let mut cur = s.start;
        while cur < s.end() {
            match dst.0.iter().find(|d| d.start <= cur && cur < d.end()) {
                Some(d) => {
                    let copylen = (d.end() - cur).min(s.end() - cur);
                    let off = (cur - s.start) as usize;
                    out.add_data(cur, &s.data[off..off + copylen as usize])
                        .expect("freshly built list cannot overlap");
                    cur += copylen;
                }
                None => break,
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        assert_eq!(pack_u16(0x1234, Endian::Big), [0x12, 0x34]);
        assert_eq!(pack_u16(0x1234, Endian::Little), [0x34, 0x12]);
        assert_eq!(unpack_u16(&[0x12, 0x34], Endian::Big), 0x1234);
        assert_eq!(unpack_u16(&[0x34, 0x12], Endian::Little), 0x1234);

        assert_eq!(pack_u32(0x11223344, Endian::Big), [0x11, 0x22, 0x33, 0x44]);
        assert_eq!(pack_u32(0x11223344, Endian::Little), [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(unpack_u32(&[0x11, 0x22, 0x33, 0x44], Endian::Big), 0x11223344);
        assert_eq!(unpack_u32(&[0x44, 0x33, 0x22, 0x11], Endian::Little), 0x11223344);
    }

    #[test]
    fn add_data_creates_region() {
        let mut list = RegionList::new();
        list.add_data(0x100, &[1, 2, 3]).unwrap();
        assert_eq!(list.regions().len(), 1);
        assert_eq!(list.regions()[0].start, 0x100);
        assert_eq!(list.regions()[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn add_data_extends_abutting_region() {
        let mut list = RegionList::new();
        list.add_data(0x100, &[1, 2, 3]).unwrap();
        list.add_data(0x103, &[4, 5]).unwrap();
        assert_eq!(list.regions().len(), 1);
        assert_eq!(list.regions()[0].data, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn add_data_fills_gap_then_overlaps() {
        let mut list = RegionList::new();
        list.add_data(0x100, &[1, 2]).unwrap();
        list.add_data(0x108, &[9, 9]).unwrap();
        // abuts the first region's end (0x102); the gap to the next
        // region's start (0x108) is 6 bytes, but we only have 4 to give.
        list.add_data(0x102, &[3, 4, 5, 6]).unwrap();
        assert_eq!(list.regions().len(), 2);
        assert_eq!(list.regions()[0].data, vec![1, 2, 3, 4, 5, 6]);

        // Now attempt to write exactly into the remaining gap plus one byte
        // of the second region: this must report an overlap.
        let mut list2 = RegionList::new();
        list2.add_data(0x100, &[1, 2]).unwrap();
        list2.add_data(0x108, &[9, 9]).unwrap();
        let err = list2.add_data(0x102, &[0; 8]).unwrap_err();
        assert!(matches!(err, Error::Overlap { .. }));
    }

    #[test]
    fn add_data_rejects_overlap() {
        let mut list = RegionList::new();
        list.add_data(0x100, &[1, 2, 3, 4]).unwrap();
        let err = list.add_data(0x101, &[9, 9]).unwrap_err();
        assert!(matches!(err, Error::Overlap { .. }));
    }

    #[test]
    fn add_empty_is_zero_filled() {
        let mut list = RegionList::new();
        list.add_empty(0x8000, 16).unwrap();
        assert_eq!(list.regions()[0].data, vec![0u8; 16]);
    }

    #[test]
    fn get_data_spans_regions() {
        let mut list = RegionList::new();
        list.add_data(0x100, &[1, 2, 3, 4]).unwrap();
        assert_eq!(list.get_data(0x101, 2).unwrap(), vec![2, 3]);
        assert_eq!(list.get_data(0x100, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn get_data_fails_on_gap() {
        let mut list = RegionList::new();
        list.add_data(0x100, &[1, 2]).unwrap();
        list.add_data(0x110, &[3, 4]).unwrap();
        assert!(list.get_data(0x100, 0x20).is_none());
    }

    #[test]
    fn shift_moves_every_region() {
        let mut list = RegionList::new();
        list.add_data(0x000, &[1, 2]).unwrap();
        list.add_data(0x100, &[3, 4]).unwrap();
        list.shift(0x8000);
        assert_eq!(list.regions()[0].start, 0x8000);
        assert_eq!(list.regions()[1].start, 0x8100);
    }

    #[test]
    fn intersection_takes_bytes_from_src() {
        let mut dst = RegionList::new();
        dst.add_data(0x100, &[0xAA; 8]).unwrap();

        let mut src = RegionList::new();
        src.add_data(0x102, &[1, 2, 3]).unwrap();
        src.add_data(0x200, &[9, 9]).unwrap(); // outside dst entirely

        let result = intersection(&dst, &src);
        assert_eq!(result.regions().len(), 1);
        assert_eq!(result.regions()[0].start, 0x102);
        assert_eq!(result.regions()[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn is_contiguous() {
        let mut list = RegionList::new();
        assert!(!list.is_contiguous());
        list.add_data(0x0, &[1, 2]).unwrap();
        assert!(list.is_contiguous());
        list.add_data(0x10, &[3, 4]).unwrap();
        assert!(!list.is_contiguous());
    }
}
