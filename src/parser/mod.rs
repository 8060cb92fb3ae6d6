//! Parsing PDF objects, indirect objects and cross-reference sections.

mod lexer;
pub use self::lexer::{HexStringLexer, Lexer, StringLexer, Substr};

use crate::enc;
use crate::error::*;
use crate::object::{GenNr, ObjNr, PlainRef, Resolve};
use crate::primitive::{Dictionary, PdfStream, PdfString, Primitive};
use crate::xref::{XRef, XRefSection};

const MAX_DEPTH: usize = 20;

pub fn parse(data: &[u8], r: &impl Resolve) -> Result<Primitive> {
    parse_with_lexer(&mut Lexer::new(data), r)
}

pub fn parse_with_lexer(lexer: &mut Lexer, r: &impl Resolve) -> Result<Primitive> {
    parse_at_depth(lexer, r, MAX_DEPTH)
}

/// Dictionary entries after the opening `<<`, consuming the closing `>>`.
fn parse_dict_body(lexer: &mut Lexer, r: &impl Resolve, depth: usize) -> Result<Dictionary> {
    let mut entries = Dictionary::new();
    loop {
        let lexeme = lexer.next()?;
        match lexeme.as_slice() {
            b">>" => return Ok(entries),
            [b'/', ..] => {
                let value = parse_at_depth(lexer, r, depth)?;
                entries.insert(decode_name(&lexeme)?, value);
            }
            _ => err!(PdfError::UnexpectedLexeme {
                pos: lexer.get_pos(),
                lexeme: lexeme.to_string(),
                expected: "a /Name key or >>"
            }),
        }
    }
}

/// A stream follows its dictionary as `stream`, one EOL, `/Length` bytes
/// of payload, and `endstream`.
fn parse_stream_body(info: Dictionary, lexer: &mut Lexer, r: &impl Resolve) -> Result<PdfStream> {
    let length = stream_length(&info, r)?;
    lexer.next_stream()?;
    let payload = lexer.read_n(length);
    if payload.len() < length {
        err!(PdfError::EOF);
    }
    let data = payload.to_vec();
    lexer.next_expect("endstream")?;
    Ok(PdfStream { info, data })
}

fn stream_length(info: &Dictionary, r: &impl Resolve) -> Result<usize> {
    match *info.require("Stream", "Length")? {
        Primitive::Integer(n) if n >= 0 => Ok(n as usize),
        Primitive::Reference(target) => r.resolve(target)?.as_usize(),
        ref other => Err(PdfError::UnexpectedPrimitive {
            expected: "non-negative Integer or Reference",
            found: other.get_debug_name(),
        }),
    }
}

/// The text of a name lexeme, `#xx` escapes decoded, leading slash dropped.
fn decode_name(lexeme: &Substr) -> Result<String> {
    let bytes = &lexeme.as_slice()[1..];
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' {
            let hi = *bytes.get(i + 1).ok_or(PdfError::EOF)?;
            let lo = *bytes.get(i + 2).ok_or(PdfError::EOF)?;
            match (enc::decode_nibble(hi), enc::decode_nibble(lo)) {
                (Some(hi), Some(lo)) => decoded.push(hi << 4 | lo),
                _ => err!(PdfError::HexDecode { pos: i, bytes: [hi, lo] }),
            }
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    Ok(String::from_utf8(decoded)?)
}

fn parse_at_depth(lexer: &mut Lexer, r: &impl Resolve, max_depth: usize) -> Result<Primitive> {
    let first_lexeme = lexer.next()?;

    let obj = if first_lexeme.equals(b"<<") {
        if max_depth == 0 {
            return Err(PdfError::MaxDepth);
        }
        let entries = parse_dict_body(lexer, r, max_depth - 1)?;
        // a stream keyword here turns the dictionary into a stream object
        if lexer.peek()?.equals(b"stream") {
            Primitive::Stream(parse_stream_body(entries, lexer, r)?)
        } else {
            Primitive::Dictionary(entries)
        }
    } else if first_lexeme.is_integer() {
        // May be an integer or a reference.
        let pos_bk = lexer.get_pos();
        let second = lexer.peek()?;
        if second.is_integer() {
            lexer.next()?;
            let third = lexer.next()?;
            if third.equals(b"R") {
                Primitive::Reference(PlainRef {
                    id: first_lexeme.to::<ObjNr>()?,
                    gen: second.to::<GenNr>()?,
                })
            } else {
                // An array of numbers; not a reference after all.
                lexer.set_pos(pos_bk);
                Primitive::Integer(first_lexeme.to::<i64>()?)
            }
        } else {
            Primitive::Integer(first_lexeme.to::<i64>()?)
        }
    } else if first_lexeme.is_real_number() {
        Primitive::Number(first_lexeme.to::<f64>()?)
    } else if first_lexeme.starts_with(b"/") {
        Primitive::Name(decode_name(&first_lexeme)?)
    } else if first_lexeme.equals(b"[") {
        if max_depth == 0 {
            return Err(PdfError::MaxDepth);
        }
        let mut array = Vec::new();
        loop {
            if lexer.peek()?.equals(b"]") {
                break;
            }
            array.push(parse_at_depth(lexer, r, max_depth - 1)?);
        }
        lexer.next()?; // move past the closing delimiter
        Primitive::Array(array)
    } else if first_lexeme.equals(b"(") {
        let mut string = Vec::new();
        let bytes_traversed = {
            let mut string_lexer = StringLexer::new(lexer.get_remaining_slice());
            while let Some(b) = string_lexer.next_char()? {
                string.push(b);
            }
            string_lexer.get_offset()
        };
        lexer.offset_pos(bytes_traversed);
        Primitive::String(PdfString::new(string))
    } else if first_lexeme.equals(b"<") {
        let mut string = Vec::new();
        let bytes_traversed = {
            let mut hex_lexer = HexStringLexer::new(lexer.get_remaining_slice());
            while let Some(b) = hex_lexer.next_char()? {
                string.push(b);
            }
            hex_lexer.get_offset()
        };
        lexer.offset_pos(bytes_traversed);
        Primitive::String(PdfString::new(string))
    } else if first_lexeme.equals(b"true") {
        Primitive::Boolean(true)
    } else if first_lexeme.equals(b"false") {
        Primitive::Boolean(false)
    } else if first_lexeme.equals(b"null") {
        Primitive::Null
    } else {
        err!(PdfError::UnknownType {
            pos: lexer.get_pos(),
            first_lexeme: first_lexeme.to_string()
        });
    };

    Ok(obj)
}

/// Parses `N G obj <body> endobj` at the lexer's position.
pub fn parse_indirect_object(lexer: &mut Lexer, r: &impl Resolve) -> Result<(PlainRef, Primitive)> {
    let obj_nr = lexer.next_as::<ObjNr>()?;
    let gen_nr = lexer.next_as::<GenNr>()?;
    lexer.next_expect("obj")?;

    let obj = parse_with_lexer(lexer, r)?;

    lexer.next_expect("endobj")?;

    Ok((PlainRef { id: obj_nr, gen: gen_nr }, obj))
}

/// Like `parse_indirect_object` but insists on a stream body (xref streams).
pub fn parse_indirect_stream(lexer: &mut Lexer, r: &impl Resolve) -> Result<(PlainRef, PdfStream)> {
    let (id, obj) = parse_indirect_object(lexer, r)?;
    match obj {
        Primitive::Stream(s) => Ok((id, s)),
        p => err!(PdfError::UnexpectedPrimitive { expected: "Stream", found: p.get_debug_name() }),
    }
}

/// Reads xref sections and trailer at the lexer's position, choosing the
/// classic or stream representation by what is found there.
pub fn read_xref_and_trailer_at(
    lexer: &mut Lexer,
    r: &impl Resolve,
) -> Result<(Vec<XRefSection>, Dictionary)> {
    let next_word = lexer.next()?;
    if next_word.equals(b"xref") {
        parse_xref_table_and_trailer(lexer, r)
    } else {
        lexer.back()?;
        parse_xref_stream_and_trailer(lexer, r)
    }
}

/// Classic table: subsections of 20-byte entries, then `trailer <<...>>`.
pub fn parse_xref_table_and_trailer(
    lexer: &mut Lexer,
    r: &impl Resolve,
) -> Result<(Vec<XRefSection>, Dictionary)> {
    let mut sections = Vec::new();

    while !lexer.peek()?.equals(b"trailer") {
        let start_id = lexer.next_as::<u32>()?;
        let num_ids = lexer.next_as::<u32>()?;

        let mut section = XRefSection::new(start_id);
        for i in 0..num_ids {
            let w1 = lexer.next()?;
            if w1.equals(b"trailer") {
                bail!("xref table declares {} entries, but only {} follow.", num_ids, i);
            }
            let w2 = lexer.next()?;
            let w3 = lexer.next()?;
            if w3.equals(b"f") {
                section.add_free_entry(w1.to::<ObjNr>()?, w2.to::<GenNr>()?);
            } else if w3.equals(b"n") {
                section.add_inuse_entry(w1.to::<usize>()?, w2.to::<GenNr>()?);
            } else {
                err!(PdfError::UnexpectedLexeme {
                    pos: lexer.get_pos(),
                    lexeme: w3.to_string(),
                    expected: "f or n"
                });
            }
        }
        sections.push(section);
    }

    lexer.next_expect("trailer")?;
    let trailer = parse_with_lexer(lexer, r)?.into_dictionary()?;
    Ok((sections, trailer))
}

/// Xref stream: `/W`-packed binary entries; the stream dictionary doubles
/// as the trailer.
pub fn parse_xref_stream_and_trailer(
    lexer: &mut Lexer,
    r: &impl Resolve,
) -> Result<(Vec<XRefSection>, Dictionary)> {
    let (_, stream) = parse_indirect_stream(lexer, r)?;
    let trailer = stream.info.clone();
    let data = enc::decode_stream(&stream)?;

    let width: Vec<usize> = trailer
        .require("XRefStream", "W")?
        .as_array()?
        .iter()
        .map(|p| p.as_usize())
        .collect::<Result<_>>()?;
    let [w0, w1, w2]: [usize; 3] = width
        .as_slice()
        .try_into()
        .map_err(|_| PdfError::Other { msg: "invalid xref /W array".into() })?;

    let size = trailer.require("XRefStream", "Size")?.as_usize()?;
    let index: Vec<usize> = match trailer.get("Index") {
        Some(p) => p.as_array()?.iter().map(|p| p.as_usize()).collect::<Result<_>>()?,
        None => vec![0, size],
    };
    if index.len() % 2 != 0 {
        bail!("xref stream /Index has {} elements, expected an even number", index.len());
    }

    let mut data_left = &data[..];
    let mut sections = Vec::new();
    for chunk in index.chunks_exact(2) {
        let (first_id, num_entries) = (chunk[0], chunk[1]);
        let section =
            parse_xref_section_from_stream(first_id as u32, num_entries, [w0, w1, w2], &mut data_left)?;
        sections.push(section);
    }

    Ok((sections, trailer))
}

/// Takes `&mut &[u8]` so that it can consume data as it reads.
fn parse_xref_section_from_stream(
    first_id: u32,
    num_entries: usize,
    width: [usize; 3],
    data: &mut &[u8],
) -> Result<XRefSection> {
    let [w0, w1, w2] = width;
    if num_entries * (w0 + w1 + w2) > data.len() {
        bail!("not enough xref data");
    }
    let mut entries = Vec::with_capacity(num_entries);
    for _ in 0..num_entries {
        // A zero-width type field defaults to 1 (in use).
        let ty = if w0 == 0 { 1 } else { read_u64_from_stream(w0, data)? };
        let field1 = read_u64_from_stream(w1, data)?;
        let field2 = read_u64_from_stream(w2, data)?;

        let entry = match ty {
            0 => XRef::Free { next_obj_nr: field1 as ObjNr, gen_nr: field2 as GenNr },
            1 => XRef::Raw { pos: field1 as usize, gen_nr: field2 as GenNr },
            2 => XRef::Stream { stream_id: field1 as ObjNr, index: field2 as usize },
            _ => return Err(PdfError::XRefStreamType { found: ty }),
        };
        entries.push(entry);
    }
    Ok(XRefSection { first_id, entries })
}

fn read_u64_from_stream(width: usize, data: &mut &[u8]) -> Result<u64> {
    if width > std::mem::size_of::<u64>() {
        bail!("xref stream entry has invalid width {}", width);
    }
    let mut result = 0;
    for _ in 0..width {
        let c = data[0];
        *data = &data[1..];
        result = result << 8 | u64::from(c);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::NoResolve;

    #[test]
    fn dict_with_stream() {
        let data = b"<< /Length 5 /Filter /FlateDecode >>\nstream\nabcde\nendstream";
        let p = parse(data, &NoResolve).unwrap();
        let stream = p.into_stream().unwrap();
        assert_eq!(stream.data, b"abcde");
        assert_eq!(stream.info.get("Filter").unwrap().as_name().unwrap(), "FlateDecode");
    }

    #[test]
    fn reference_vs_integer_array() {
        let p = parse(b"[1 2 R 3 4 5]", &NoResolve).unwrap();
        let arr = p.into_array().unwrap();
        assert_eq!(arr.len(), 4);
        assert_eq!(arr[0].as_reference().unwrap(), PlainRef { id: 1, gen: 2 });
        assert_eq!(arr[1].as_integer().unwrap(), 3);
        assert_eq!(arr[3].as_integer().unwrap(), 5);
    }

    #[test]
    fn name_with_hash_escape() {
        let p = parse(b"/A#20B", &NoResolve).unwrap();
        assert_eq!(p.as_name().unwrap(), "A B");
    }

    #[test]
    fn indirect_object() {
        let data = b"7 0 obj\n<< /Type /Catalog /Pages 1 0 R >>\nendobj";
        let (id, obj) = parse_indirect_object(&mut Lexer::new(data), &NoResolve).unwrap();
        assert_eq!(id, PlainRef { id: 7, gen: 0 });
        assert_eq!(obj.as_dict().unwrap().get("Type").unwrap().as_name().unwrap(), "Catalog");
    }

    #[test]
    fn classic_xref_table() {
        let data = b"xref\n0 3\n0000000000 65535 f \n0000000015 00000 n \n0000000123 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R >>";
        let mut lexer = Lexer::new(data);
        let (sections, trailer) = read_xref_and_trailer_at(&mut lexer, &NoResolve).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].entries.len(), 3);
        assert_eq!(sections[0].entries[1], XRef::Raw { pos: 15, gen_nr: 0 });
        assert_eq!(trailer.get("Size").unwrap().as_integer().unwrap(), 3);
    }

    #[test]
    fn empty_array() {
        let p = parse(b"[]", &NoResolve).unwrap();
        assert!(p.into_array().unwrap().is_empty());
    }
}
