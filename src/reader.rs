//! Reading the structure of an existing document: header, xref chain,
//! trailer, page list, AcroForm. Every object a `Reader` hands out is
//! tagged with the reader's parser id, so two readers over the same bytes
//! can be told apart.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::backend::Backend;
use crate::error::*;
use crate::object::{Indirect, ObjNr, ObjRc, ParserId, PlainRef, Resolve};
use crate::parser::{parse, parse_indirect_object, read_xref_and_trailer_at, Lexer};
use crate::primitive::{Dictionary, Primitive};
use crate::xref::{XRef, XRefTable};
use crate::enc;

/// Upper bound on the number of objects, as a guard against broken files.
pub const MAX_ID: u32 = 1_000_000;

pub struct Reader<B: Backend> {
    backend: B,
    refs: XRefTable,
    trailer: Dictionary,
    // Position of the %PDF header in the file.
    start_offset: usize,
    // Value of the trailing startxref: offset of the newest xref section.
    startxref: usize,
    minor_version: u8,
    xref_is_stream: bool,
    id: ParserId,
    cache: RefCell<HashMap<ObjNr, ObjRc>>,
}

impl<B: Backend> Reader<B> {
    pub fn open(backend: B) -> Result<Self> {
        let (start_offset, minor_version) = backend.locate_header()?;
        let startxref = backend.locate_xref_offset()?;

        let (refs, trailer, xref_is_stream) =
            read_xref_chain(&backend, start_offset, startxref)?;

        if trailer.get("Encrypt").is_some() {
            err!(PdfError::Encrypted);
        }
        trailer.require("Trailer", "Root")?.as_reference()?;

        Ok(Reader {
            backend,
            refs,
            trailer,
            start_offset,
            startxref,
            minor_version,
            xref_is_stream,
            id: ParserId::unique(),
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn parser_id(&self) -> ParserId {
        self.id
    }
    pub fn backend(&self) -> &B {
        &self.backend
    }
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }
    pub fn xref_table(&self) -> &XRefTable {
        &self.refs
    }
    /// All in-use object numbers.
    pub fn object_nums(&self) -> impl Iterator<Item = ObjNr> + '_ {
        self.refs.in_use()
    }
    /// Byte offset of the previous `startxref` target; becomes `/Prev`.
    pub fn prev_startxref(&self) -> usize {
        self.startxref
    }
    pub fn largest_object_number(&self) -> ObjNr {
        self.refs.max_number()
    }
    pub fn minor_version(&self) -> u8 {
        self.minor_version
    }
    /// Position of the `%PDF` header in the byte source.
    pub fn header_offset(&self) -> usize {
        self.start_offset
    }
    /// Whether the newest xref section of the file is a cross-reference stream.
    pub fn uses_xref_stream(&self) -> bool {
        self.xref_is_stream
    }

    pub fn catalog_ref(&self) -> Result<PlainRef> {
        self.trailer.require("Trailer", "Root")?.as_reference()
    }

    pub fn catalog(&self) -> Result<Dictionary> {
        self.resolve(self.catalog_ref()?)?.into_dictionary()
    }

    /// The document's interactive form, if any: the raw `/AcroForm` value
    /// out of the catalog (a reference or an inline dictionary).
    pub fn acro_form(&self) -> Result<Option<Primitive>> {
        let mut catalog = self.catalog()?;
        Ok(catalog.remove("AcroForm"))
    }

    /// References of all page objects, in document order.
    pub fn pages(&self) -> Result<Vec<PlainRef>> {
        let catalog = self.catalog()?;
        let root = catalog.require("Catalog", "Pages")?.as_reference()?;
        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(root, &mut pages, &mut visited)?;
        Ok(pages)
    }

    fn collect_pages(
        &self,
        node_ref: PlainRef,
        pages: &mut Vec<PlainRef>,
        visited: &mut HashSet<ObjNr>,
    ) -> Result<()> {
        if !visited.insert(node_ref.id) {
            bail!("cycle in page tree at object {}", node_ref.id);
        }
        let node = self.resolve(node_ref)?.into_dictionary()?;
        match node.get("Type").map(|t| t.as_name()).transpose()? {
            Some("Pages") => {
                for kid in node.require("Pages", "Kids")?.as_array()? {
                    self.collect_pages(kid.as_reference()?, pages, visited)?;
                }
            }
            // Missing /Type on a leaf is tolerated; plenty of writers omit it.
            Some("Page") | None => pages.push(node_ref),
            Some(other) => bail!("unexpected /{} node in page tree", other),
        }
        Ok(())
    }

    fn read_raw_at(&self, pos: usize) -> Result<Primitive> {
        let mut lexer = Lexer::new(self.backend.read(self.start_offset + pos..)?);
        Ok(parse_indirect_object(&mut lexer, self)?.1)
    }

    /// An object compressed into an object stream: decode the container
    /// and parse the slice at `index`.
    fn read_from_object_stream(&self, stream_id: ObjNr, index: usize) -> Result<Primitive> {
        let container = self
            .resolve(PlainRef { id: stream_id, gen: 0 })?
            .into_stream()?;
        let n = container.info.require("ObjStm", "N")?.as_usize()?;
        let first = container.info.require("ObjStm", "First")?.as_usize()?;
        if index >= n {
            err!(PdfError::ObjStmOutOfBounds { index, max: n });
        }
        let data = enc::decode_stream(&container)?;

        // Header: N pairs of (object number, relative offset).
        let mut lexer = Lexer::new(&data);
        let mut offset = None;
        for i in 0..n {
            let _obj_nr = lexer.next_as::<ObjNr>()?;
            let off = lexer.next_as::<usize>()?;
            if i == index {
                offset = Some(off);
            }
        }
        let offset = first + try_opt!(offset);
        if offset > data.len() {
            err!(PdfError::EOF);
        }
        parse(&data[offset..], self)
    }
}

impl<B: Backend> Resolve for Reader<B> {
    fn resolve(&self, r: PlainRef) -> Result<Primitive> {
        if let Some(cached) = self.cache.borrow().get(&r.id) {
            return Ok(cached.body().clone());
        }
        match self.refs.get(r.id)? {
            XRef::Raw { pos, .. } => self.read_raw_at(pos),
            XRef::Stream { stream_id, index } => self.read_from_object_stream(stream_id, index),
            XRef::Free { .. } => err!(PdfError::FreeObject { obj_nr: r.id }),
            XRef::Invalid => err!(PdfError::NullRef { obj_nr: r.id }),
        }
    }

    fn resolve_handle(&self, r: PlainRef) -> Result<ObjRc> {
        if let Some(cached) = self.cache.borrow().get(&r.id) {
            return Ok(cached.clone());
        }
        let body = self.resolve(r)?;
        let handle = Indirect::parsed(self.id, r, body);
        self.cache.borrow_mut().insert(r.id, handle.clone());
        Ok(handle)
    }
}

fn read_xref_chain<B: Backend>(
    backend: &B,
    start_offset: usize,
    startxref: usize,
) -> Result<(XRefTable, Dictionary, bool)> {
    use crate::object::NoResolve;

    let pos = start_offset
        .checked_add(startxref)
        .filter(|&p| p < backend.len())
        .ok_or_else(|| PdfError::Other { msg: "startxref outside file bounds".into() })?;

    let mut lexer = Lexer::new(backend.read(pos..)?);
    let newest_is_stream = !lexer.peek()?.equals(b"xref");

    let (sections, trailer) = read_xref_and_trailer_at(&mut lexer, &NoResolve)?;

    let highest_id = trailer
        .require("XRefTable", "Size")?
        .as_u32()?;
    if highest_id > MAX_ID {
        bail!("too many objects");
    }

    let mut refs = XRefTable::new(highest_id as usize);
    for section in sections {
        refs.add_entries_from(section);
    }

    // Walk the /Prev chain, newest first; guarded against loops.
    let mut seen = vec![startxref];
    let mut prev = trailer.get("Prev").map(|p| p.as_usize()).transpose()?;
    while let Some(prev_offset) = prev {
        if seen.contains(&prev_offset) {
            bail!("xref offsets loop");
        }
        seen.push(prev_offset);
        trace!("following /Prev to {}", prev_offset);

        let pos = start_offset
            .checked_add(prev_offset)
            .filter(|&p| p < backend.len())
            .ok_or_else(|| PdfError::Other { msg: "/Prev outside file bounds".into() })?;
        let mut lexer = Lexer::new(backend.read(pos..)?);
        let (sections, prev_trailer) = read_xref_and_trailer_at(&mut lexer, &NoResolve)?;
        for section in sections {
            refs.add_entries_from(section);
        }
        prev = prev_trailer.get("Prev").map(|p| p.as_usize()).transpose()?;
    }

    debug!("xref chain read: {} xref sections, {} objects", seen.len(), refs.len());
    Ok((refs, trailer, newest_is_stream))
}
