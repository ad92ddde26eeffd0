// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raw binary image codec, grounded in
//! `examples/original_source/src/binary.c`. A binary file carries no
//! address information of its own, so the reader always produces a
//! single region starting at address 0, and the writer refuses a
//! region list with any gap since a flat byte stream cannot represent
//! one.

use std::io::{Read, Write};

use region::RegionList;

use crate::Error;

pub fn read(r: &mut impl Read) -> Result<RegionList, Error> {
    let mut data = Vec::new();
    r.read_to_end(&mut data)?;

    let mut list = RegionList::new();
    if !data.is_empty() {
        list.add_data(0, &data)?;
    }
    Ok(list)
}

pub fn write(list: &RegionList, w: &mut impl Write) -> Result<(), Error> {
    if !list.is_contiguous() {
        return Err(Error::Gap);
    }
    if let Some(span) = list.span() {
        let data = list
            .get_data(span.0, span.1 - span.0)
            .ok_or(Error::Gap)?;
        w.write_all(&data)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_produces_single_region_at_zero() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4]);
        let list = read(&mut cursor).unwrap();
        assert_eq!(list.regions().len(), 1);
        assert_eq!(list.regions()[0].start, 0);
        assert_eq!(list.regions()[0].data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn empty_input_yields_empty_list() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let list = read(&mut cursor).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn write_round_trips_contiguous_list() {
        let mut list = RegionList::new();
        list.add_data(0, &[9u8, 8, 7]).unwrap();
        let mut out = Vec::new();
        write(&list, &mut out).unwrap();
        assert_eq!(out, vec![9, 8, 7]);
    }

    #[test]
    fn write_rejects_gap() {
        let mut list = RegionList::new();
        list.add_data(0, &[1, 2]).unwrap();
        list.add_data(16, &[3, 4]).unwrap();
        let err = write(&list, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Gap));
    }
}
