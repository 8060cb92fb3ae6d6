//! Serializing the trailing section: new indirect objects, the
//! cross-reference delta (classic table or xref stream) and the trailer.

use std::collections::HashMap;
use std::io::{self, Write};
use std::ops::Range;

use crate::enc;
use crate::error::*;
use crate::object::{Indirect, ObjNr, ObjRc, PlainRef};
use crate::primitive::{serialize_name, Dictionary, Primitive};

/// Write adapter that tracks the absolute output position.
pub struct CountingWriter<W: Write> {
    inner: W,
    pos: usize,
}

impl<W: Write> CountingWriter<W> {
    pub fn with_pos(inner: W, pos: usize) -> Self {
        CountingWriter { inner, pos }
    }
    pub fn pos(&self) -> usize {
        self.pos
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n;
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Object numbers assigned to the write set, in write-set order.
pub struct Numbers {
    by_handle: HashMap<*const Indirect, ObjNr>,
    // Objects of the editable reader that were mutated get re-emitted
    // under fresh numbers; references to their old number follow.
    by_source: HashMap<PlainRef, ObjNr>,
    first: ObjNr,
    next: ObjNr,
}

impl Numbers {
    pub fn assign(write_set: &[ObjRc], first: ObjNr) -> Numbers {
        let mut by_handle = HashMap::new();
        let mut by_source = HashMap::new();
        let mut next = first;
        for obj in write_set {
            by_handle.insert(std::rc::Rc::as_ptr(obj), next);
            if let Some(at) = obj.source() {
                by_source.insert(at, next);
            }
            next += 1;
        }
        Numbers { by_handle, by_source, first, next }
    }

    pub fn first(&self) -> ObjNr {
        self.first
    }
    /// Number for the next object outside the write set (the xref stream).
    pub fn past_end(&self) -> ObjNr {
        self.next
    }
    pub fn of_handle(&self, h: &ObjRc) -> Result<ObjNr> {
        self.by_handle
            .get(&std::rc::Rc::as_ptr(h))
            .copied()
            .ok_or_else(|| PdfError::Other { msg: "reference to an uncollected object".into() })
    }
    pub fn map_ref(&self, r: PlainRef) -> PlainRef {
        match self.by_source.get(&r) {
            Some(&id) => PlainRef { id, gen: 0 },
            None => r,
        }
    }
}

/// Byte spans a signature placeholder recorded during serialization,
/// absolute within the output.
#[derive(Debug, Clone)]
pub struct SigSpans {
    pub byte_range: Range<usize>,
    pub contents: Range<usize>,
}

pub struct Section<'a> {
    pub write_set: &'a [ObjRc],
    pub numbers: &'a Numbers,
    /// Signature value dictionaries, by identity, with their `Contents`
    /// reserve in bytes.
    pub placeholders: HashMap<*const Indirect, usize>,
    /// Trailer entries except `Size`, which is derived here. `Root` may be
    /// a handle.
    pub trailer: Dictionary,
    pub use_xref_stream: bool,
    pub needs_separator: bool,
    /// Position of the `%PDF` header in the file; xref offsets and
    /// `startxref` are relative to it.
    pub header_offset: usize,
}

pub struct SectionInfo {
    pub xref_pos: usize,
    pub sig_spans: HashMap<*const Indirect, SigSpans>,
}

pub fn write_section<W: Write>(section: &Section, out: &mut CountingWriter<W>) -> Result<SectionInfo> {
    if section.needs_separator {
        out.write_all(b"\n")?;
    }

    let mut offsets = Vec::with_capacity(section.write_set.len());
    let mut sig_spans = HashMap::new();

    for obj in section.write_set {
        let id = section.numbers.of_handle(obj)?;
        offsets.push((id, out.pos()));
        writeln!(out, "{} 0 obj", id)?;
        match section.placeholders.get(&std::rc::Rc::as_ptr(obj)) {
            Some(&reserve) => {
                let body = obj.body();
                let dict = body.as_dict()?;
                let spans = write_sig_placeholder(dict, reserve, section.numbers, out)?;
                sig_spans.insert(std::rc::Rc::as_ptr(obj), spans);
            }
            None => {
                let body = obj.body();
                write_value(&body, section.numbers, out, 0)?;
            }
        }
        out.write_all(b"\nendobj\n")?;
    }

    let xref_pos = out.pos();
    debug!("emitting xref at {} for {} objects", xref_pos, offsets.len());
    if section.use_xref_stream {
        write_xref_stream(section, &offsets, out)?;
    } else {
        write_xref_table(section, &offsets, out)?;
    }

    Ok(SectionInfo { xref_pos, sig_spans })
}

pub fn write_value<W: Write>(
    p: &Primitive,
    numbers: &Numbers,
    out: &mut W,
    level: usize,
) -> Result<()> {
    match p {
        Primitive::Null => write!(out, "null")?,
        Primitive::Integer(i) => write!(out, "{}", i)?,
        Primitive::Number(n) => write!(out, "{}", n)?,
        Primitive::Boolean(b) => write!(out, "{}", b)?,
        Primitive::String(s) => s.serialize(out)?,
        Primitive::Name(n) => serialize_name(n, out)?,
        Primitive::Array(arr) => {
            write!(out, "[")?;
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    write!(out, " ")?;
                }
                write_value(item, numbers, out, level + 1)?;
            }
            write!(out, "]")?;
        }
        Primitive::Dictionary(dict) => write_dict(dict, numbers, out, level)?,
        Primitive::Stream(stream) => {
            write_dict(&stream.info, numbers, out, level)?;
            out.write_all(b"\nstream\n")?;
            out.write_all(&stream.data)?;
            out.write_all(b"\nendstream")?;
        }
        Primitive::Reference(r) => {
            let r = numbers.map_ref(*r);
            write!(out, "{} {} R", r.id, r.gen)?;
        }
        Primitive::Handle(h) => write!(out, "{} 0 R", numbers.of_handle(h)?)?,
    }
    Ok(())
}

fn write_dict<W: Write>(
    dict: &Dictionary,
    numbers: &Numbers,
    out: &mut W,
    level: usize,
) -> Result<()> {
    writeln!(out, "<<")?;
    for (key, val) in dict {
        write!(out, "{:w$}", "", w = 2 * level + 2)?;
        serialize_name(key, out)?;
        write!(out, " ")?;
        write_value(val, numbers, out, level + 1)?;
        out.write_all(b"\n")?;
    }
    write!(out, "{:w$}>>", "", w = 2 * level)?;
    Ok(())
}

/// Serializes a signature value dictionary, recording where the
/// `ByteRange` and `Contents` values land. `Contents` is emitted as a hex
/// string of exactly `reserve` bytes, delimiters included in the span.
fn write_sig_placeholder<W: Write>(
    dict: &Dictionary,
    reserve: usize,
    numbers: &Numbers,
    out: &mut CountingWriter<W>,
) -> Result<SigSpans> {
    let mut byte_range = None;
    let mut contents = None;

    writeln!(out, "<<")?;
    for (key, val) in dict {
        write!(out, "  ")?;
        serialize_name(key, out)?;
        write!(out, " ")?;
        match key.as_str() {
            "ByteRange" => {
                let start = out.pos();
                write_value(val, numbers, out, 1)?;
                byte_range = Some(start..out.pos());
            }
            "Contents" => {
                let start = out.pos();
                out.write_all(b"<")?;
                for _ in 0..reserve {
                    out.write_all(b"00")?;
                }
                out.write_all(b">")?;
                contents = Some(start..out.pos());
            }
            _ => write_value(val, numbers, out, 1)?,
        }
        out.write_all(b"\n")?;
    }
    write!(out, ">>")?;

    Ok(SigSpans {
        byte_range: try_opt!(byte_range),
        contents: try_opt!(contents),
    })
}

/// Classic cross-reference table: the free head and one subsection for the
/// contiguous run of new objects, then `trailer`.
fn write_xref_table<W: Write>(
    section: &Section,
    offsets: &[(ObjNr, usize)],
    out: &mut CountingWriter<W>,
) -> Result<()> {
    let xref_pos = out.pos() - section.header_offset;
    writeln!(out, "xref")?;
    writeln!(out, "0 1")?;
    // Entries are exactly 20 bytes: offset(10) SP gen(5) SP type CRLF.
    write!(out, "0000000000 65535 f\r\n")?;
    if let Some(&(first, _)) = offsets.first() {
        writeln!(out, "{} {}", first, offsets.len())?;
        for &(_, pos) in offsets {
            write!(out, "{:010} {:05} n\r\n", pos - section.header_offset, 0)?;
        }
    }

    let mut trailer = Dictionary::new();
    trailer.insert("Size", Primitive::Integer(section.numbers.past_end() as i64));
    for (k, v) in &section.trailer {
        trailer.insert(k.clone(), v.clone());
    }

    writeln!(out, "trailer")?;
    write_value(&Primitive::Dictionary(trailer), section.numbers, out, 0)?;
    write!(out, "\nstartxref\n{}\n%%EOF\n", xref_pos)?;
    Ok(())
}

/// Cross-reference stream with `/W [1 4 2]`: entry type, 4-byte offset,
/// 2-byte generation. The stream object carries its own entry.
fn write_xref_stream<W: Write>(
    section: &Section,
    offsets: &[(ObjNr, usize)],
    out: &mut CountingWriter<W>,
) -> Result<()> {
    let xref_pos = out.pos() - section.header_offset;
    let stream_id = section.numbers.past_end();

    let mut data = Vec::with_capacity((offsets.len() + 2) * 7);
    // Object 0: free, next free 0, generation 65535.
    pack_entry(&mut data, 0, 0, 65535);
    for &(_, pos) in offsets {
        pack_entry(&mut data, 1, (pos - section.header_offset) as u64, 0);
    }
    pack_entry(&mut data, 1, xref_pos as u64, 0);
    let data = enc::flate_encode(&data);

    let mut info = Dictionary::new();
    info.insert("Type", Primitive::name("XRef"));
    info.insert("Size", Primitive::Integer(stream_id as i64 + 1));
    let first = offsets.first().map(|&(id, _)| id).unwrap_or(stream_id);
    info.insert(
        "Index",
        Primitive::Array(vec![
            Primitive::Integer(0),
            Primitive::Integer(1),
            Primitive::Integer(first as i64),
            Primitive::Integer((stream_id - first + 1) as i64),
        ]),
    );
    info.insert(
        "W",
        Primitive::Array(vec![
            Primitive::Integer(1),
            Primitive::Integer(4),
            Primitive::Integer(2),
        ]),
    );
    info.insert("Filter", Primitive::name("FlateDecode"));
    info.insert("Length", Primitive::Integer(data.len() as i64));
    for (k, v) in &section.trailer {
        info.insert(k.clone(), v.clone());
    }

    writeln!(out, "{} 0 obj", stream_id)?;
    write_dict(&info, section.numbers, out, 0)?;
    out.write_all(b"\nstream\n")?;
    out.write_all(&data)?;
    out.write_all(b"\nendstream\nendobj\n")?;
    write!(out, "startxref\n{}\n%%EOF\n", xref_pos)?;
    Ok(())
}

fn pack_entry(data: &mut Vec<u8>, ty: u8, field1: u64, field2: u16) {
    data.push(ty);
    data.extend_from_slice(&(field1 as u32).to_be_bytes());
    data.extend_from_slice(&field2.to_be_bytes());
}

/// Builds a stream object around `data`, Flate-compressed, with a correct
/// `/Length`.
pub fn make_flate_stream(data: &[u8]) -> Primitive {
    let encoded = enc::flate_encode(data);
    let mut info = Dictionary::new();
    info.insert("Length", Primitive::Integer(encoded.len() as i64));
    info.insert("Filter", Primitive::name("FlateDecode"));
    Primitive::Stream(crate::primitive::PdfStream { info, data: encoded })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::PdfString;

    fn no_numbers() -> Numbers {
        Numbers::assign(&[], 1)
    }

    #[test]
    fn value_serialization() {
        let mut dict = Dictionary::new();
        dict.insert("Type", Primitive::name("Page"));
        dict.insert("Rotate", Primitive::Integer(90));
        dict.insert("Contents", Primitive::Reference(PlainRef::new(4, 0)));
        let mut out = Vec::new();
        write_value(&Primitive::Dictionary(dict), &no_numbers(), &mut out, 0).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("/Type /Page"));
        assert!(text.contains("/Rotate 90"));
        assert!(text.contains("/Contents 4 0 R"));
    }

    #[test]
    fn handle_references_use_assigned_numbers() {
        let target = Indirect::fresh(Primitive::Null);
        let numbers = Numbers::assign(std::slice::from_ref(&target), 17);
        let mut out = Vec::new();
        write_value(&Primitive::Handle(target), &numbers, &mut out, 0).unwrap();
        assert_eq!(out, b"17 0 R");
    }

    #[test]
    fn renumbered_source_references_follow() {
        let mutated = Indirect::parsed(
            crate::object::ParserId::unique(),
            PlainRef::new(3, 0),
            Primitive::Null,
        );
        let numbers = Numbers::assign(std::slice::from_ref(&mutated), 10);
        let mut out = Vec::new();
        write_value(
            &Primitive::Reference(PlainRef::new(3, 0)),
            &numbers,
            &mut out,
            0,
        )
        .unwrap();
        assert_eq!(out, b"10 0 R");
    }

    #[test]
    fn placeholder_spans_cover_delimiters() {
        let mut dict = Dictionary::new();
        dict.insert("Type", Primitive::name("Sig"));
        dict.insert(
            "ByteRange",
            Primitive::Array(vec![
                Primitive::Integer(0xFFFFF),
                Primitive::Integer(0xFFFFF),
                Primitive::Integer(0xFFFFF),
                Primitive::Integer(0xFFFFF),
            ]),
        );
        dict.insert("Contents", Primitive::String(PdfString::new(vec![0; 16])));

        let mut buf = Vec::new();
        let mut out = CountingWriter::with_pos(&mut buf, 100);
        let spans = write_sig_placeholder(&dict, 16, &no_numbers(), &mut out).unwrap();
        let contents = &buf[spans.contents.start - 100..spans.contents.end - 100];
        assert_eq!(contents[0], b'<');
        assert_eq!(contents[contents.len() - 1], b'>');
        assert_eq!(contents.len(), 16 * 2 + 2);
        let br = &buf[spans.byte_range.start - 100..spans.byte_range.end - 100];
        assert_eq!(br[0], b'[');
        assert_eq!(br[br.len() - 1], b']');
    }
}
