use std::fmt::{self, Debug, Formatter};

use crate::error::*;
use crate::object::{GenNr, ObjNr};

/// One cross-reference entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum XRef {
    /// Not currently used.
    Free { next_obj_nr: ObjNr, gen_nr: GenNr },
    /// In use: byte offset of the object, relative to the header.
    Raw { pos: usize, gen_nr: GenNr },
    /// In use and compressed inside an object stream.
    Stream { stream_id: ObjNr, index: usize },
    /// No entry seen anywhere in the chain.
    Invalid,
}

/// Runtime lookup table of all objects, merged over the whole `/Prev` chain.
pub struct XRefTable {
    entries: Vec<XRef>,
}

impl XRefTable {
    pub fn new(num_objects: usize) -> XRefTable {
        XRefTable { entries: vec![XRef::Invalid; num_objects] }
    }

    pub fn get(&self, id: ObjNr) -> Result<XRef> {
        match self.entries.get(id as usize) {
            Some(&entry) => Ok(entry),
            None => err!(PdfError::UnspecifiedXRefEntry { id }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The largest object number with any entry. Object 0 is always free.
    pub fn max_number(&self) -> ObjNr {
        self.entries.len().saturating_sub(1) as ObjNr
    }

    /// Whether any object lives inside an object stream. Files carrying
    /// such entries chain their updates with xref streams.
    pub fn has_stream_entries(&self) -> bool {
        self.entries.iter().any(|e| matches!(e, XRef::Stream { .. }))
    }

    /// Object numbers currently in use, ascending.
    pub fn in_use(&self) -> impl Iterator<Item = ObjNr> + '_ {
        self.entries.iter().enumerate().filter_map(|(n, e)| match e {
            XRef::Raw { .. } | XRef::Stream { .. } => Some(n as ObjNr),
            _ => None,
        })
    }

    /// Merge a section into the table. Sections are added newest first,
    /// so an already-filled slot wins over anything that follows it in
    /// the `/Prev` chain.
    pub fn add_entries_from(&mut self, section: XRefSection) {
        for (i, &entry) in section.entries.iter().enumerate() {
            let n = section.first_id as usize + i;
            if n >= self.entries.len() {
                self.entries.resize(n + 1, XRef::Invalid);
            }
            if let XRef::Invalid = self.entries[n] {
                self.entries[n] = entry;
            }
        }
    }
}

impl Debug for XRefTable {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            match *entry {
                XRef::Free { next_obj_nr, gen_nr } => {
                    writeln!(f, "{:4}: {:010} {:05} f", i, next_obj_nr, gen_nr)?
                }
                XRef::Raw { pos, gen_nr } => writeln!(f, "{:4}: {:010} {:05} n", i, pos, gen_nr)?,
                XRef::Stream { stream_id, index } => {
                    writeln!(f, "{:4}: in stream {}, index {}", i, stream_id, index)?
                }
                XRef::Invalid => writeln!(f, "{:4}: Invalid!", i)?,
            }
        }
        Ok(())
    }
}

/// A contiguous run of entries, as found in the file.
#[derive(Debug)]
pub struct XRefSection {
    pub first_id: u32,
    pub entries: Vec<XRef>,
}

impl XRefSection {
    pub fn new(first_id: u32) -> XRefSection {
        XRefSection { first_id, entries: Vec::new() }
    }
    pub fn add_free_entry(&mut self, next_obj_nr: ObjNr, gen_nr: GenNr) {
        self.entries.push(XRef::Free { next_obj_nr, gen_nr });
    }
    pub fn add_inuse_entry(&mut self, pos: usize, gen_nr: GenNr) {
        self.entries.push(XRef::Raw { pos, gen_nr });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_entry_wins() {
        let mut table = XRefTable::new(3);
        let mut newest = XRefSection::new(1);
        newest.add_inuse_entry(500, 0);
        table.add_entries_from(newest);

        let mut older = XRefSection::new(1);
        older.add_inuse_entry(100, 0);
        older.add_inuse_entry(200, 0);
        table.add_entries_from(older);

        assert_eq!(table.get(1).unwrap(), XRef::Raw { pos: 500, gen_nr: 0 });
        assert_eq!(table.get(2).unwrap(), XRef::Raw { pos: 200, gen_nr: 0 });
    }

    #[test]
    fn in_use_skips_free_and_invalid() {
        let mut table = XRefTable::new(4);
        let mut section = XRefSection::new(0);
        section.add_free_entry(0, 65535);
        section.add_inuse_entry(10, 0);
        table.add_entries_from(section);
        let nums: Vec<_> = table.in_use().collect();
        assert_eq!(nums, [1]);
    }
}
