use std::ops::{Deref, Range, RangeFrom, RangeFull, RangeTo};

use crate::error::*;
use crate::parser::Lexer;

/// Read-only random-access byte source for a PDF document.
///
/// Any `Deref<Target = [u8]>` (a `Vec<u8>`, a boxed slice, a memory map)
/// works. The appender requires absolute positioning; the blanket impl
/// provides it for free.
pub trait Backend: Sized {
    fn read<T: IndexRange>(&self, range: T) -> Result<&[u8]>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte offset of the `%PDF-` header, and the minor version it declares.
    ///
    /// Acrobat expects the header within the first 1KiB, so only that
    /// much is searched.
    fn locate_header(&self) -> Result<(usize, u8)> {
        const HEADER: &[u8] = b"%PDF-1.";
        let buf = self.read(..self.len().min(1024))?;
        let pos = buf
            .windows(HEADER.len())
            .position(|window| window == HEADER)
            .ok_or_else(|| PdfError::Other { msg: "file header is missing".into() })?;
        let minor = match buf.get(pos + HEADER.len()) {
            Some(&d @ b'0'..=b'9') => d - b'0',
            _ => bail!("malformed version in file header"),
        };
        Ok((pos, minor))
    }

    /// The value of the trailing `startxref`: the byte offset of the last
    /// cross-reference section, relative to the header.
    fn locate_xref_offset(&self) -> Result<usize> {
        let mut lexer = Lexer::new(self.read(..)?);
        lexer.set_pos_from_end(0);
        lexer.seek_substr_back(b"startxref")?;
        lexer.next_as::<usize>()
    }
}

impl<T> Backend for T
where
    T: Deref<Target = [u8]>,
{
    fn read<R: IndexRange>(&self, range: R) -> Result<&[u8]> {
        let r = range.to_range(self.len())?;
        Ok(&self[r])
    }
    fn len(&self) -> usize {
        (**self).len()
    }
}

/// Implemented by Rust's built-in range types, produced by range syntax
/// like `..`, `a..`, `..b` or `c..d`.
pub trait IndexRange {
    /// Start index (inclusive)
    fn start(&self) -> Option<usize>;
    /// End index (exclusive)
    fn end(&self) -> Option<usize>;

    fn to_range(&self, len: usize) -> Result<Range<usize>> {
        match (self.start(), self.end()) {
            (None, None) => Ok(0..len),
            (Some(start), None) if start <= len => Ok(start..len),
            (None, Some(end)) if end <= len => Ok(0..end),
            (Some(start), Some(end)) if start <= end && end <= len => Ok(start..end),
            _ => Err(PdfError::EOF),
        }
    }
}

impl IndexRange for RangeFull {
    fn start(&self) -> Option<usize> {
        None
    }
    fn end(&self) -> Option<usize> {
        None
    }
}
impl IndexRange for RangeFrom<usize> {
    fn start(&self) -> Option<usize> {
        Some(self.start)
    }
    fn end(&self) -> Option<usize> {
        None
    }
}
impl IndexRange for RangeTo<usize> {
    fn start(&self) -> Option<usize> {
        None
    }
    fn end(&self) -> Option<usize> {
        Some(self.end)
    }
}
impl IndexRange for Range<usize> {
    fn start(&self) -> Option<usize> {
        Some(self.start)
    }
    fn end(&self) -> Option<usize> {
        Some(self.end)
    }
}
