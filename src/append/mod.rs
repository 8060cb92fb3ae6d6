//! Appending an incremental update to an existing document.
//!
//! The appender never rewrites the original bytes: it streams them through
//! untouched and emits changed pages, a fresh page tree root, a catalog
//! delta, signatures, a cross-reference delta and a trailer with `/Prev`
//! behind them.
//!
//! Construction opens a second reader over the same byte source, the
//! pristine twin. The twin is never mutated; change detection compares
//! object provenance against it, so anything still owned by the twin is
//! emitted by reference instead of by value.

mod collect;
mod merge;
mod writer;

pub use self::writer::{CountingWriter, Numbers};

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

use crate::backend::Backend;
use crate::error::*;
use crate::object::{Indirect, ObjRc, Origin, PlainRef, Resolve};
use crate::primitive::{Dictionary, PdfString, Primitive};
use crate::reader::Reader;
use crate::sign::{
    byte_range_values, format_byte_range, patch_contents, patch_span, Digest, SigFlags, Signature,
    SignatureField, BYTE_RANGE_PLACEHOLDER,
};

use self::collect::{ChangeDetector, Collector};
use self::writer::{write_section, Section, SigSpans};

/// Byte source cheap to share between the editable reader and its twin.
#[derive(Clone)]
pub struct SharedBytes(Rc<[u8]>);

impl From<Vec<u8>> for SharedBytes {
    fn from(data: Vec<u8>) -> SharedBytes {
        SharedBytes(data.into())
    }
}
impl std::ops::Deref for SharedBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

enum AcroFormState {
    /// As read from the twin; `None` when the document has no form.
    Untouched(Option<Primitive>),
    Updated(ObjRc),
}

pub struct Appender<B: Backend> {
    editable: Reader<B>,
    twin: Reader<B>,
    pages: Vec<ObjRc>,
    original_pages: Vec<PlainRef>,
    acro_form: AcroFormState,
    signatures: Vec<Signature>,
    minor_version: Option<u8>,
    written: bool,
}

impl<B: Backend> std::fmt::Debug for Appender<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appender").finish_non_exhaustive()
    }
}

impl Appender<SharedBytes> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_data(fs::read(path)?)
    }
    pub fn from_data(data: Vec<u8>) -> Result<Self> {
        Self::from_reader(Reader::open(SharedBytes::from(data))?)
    }
}

impl<B: Backend + Clone> Appender<B> {
    /// Opens the pristine twin over the same byte source and snapshots the
    /// page list and AcroForm from it.
    pub fn from_reader(editable: Reader<B>) -> Result<Self> {
        let twin = Reader::open(editable.backend().clone())?;
        let original_pages = twin.pages()?;
        let pages = original_pages
            .iter()
            .map(|&r| twin.resolve_handle(r))
            .collect::<Result<Vec<_>>>()?;
        let acro_form = AcroFormState::Untouched(twin.acro_form()?);
        Ok(Appender {
            editable,
            twin,
            pages,
            original_pages,
            acro_form,
            signatures: Vec::new(),
            minor_version: None,
            written: false,
        })
    }
}

impl<B: Backend> Appender<B> {
    /// The editable reader. Objects resolved through it and mutated are
    /// picked up by change detection when something emitted references them.
    pub fn reader(&self) -> &Reader<B> {
        &self.editable
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Overrides the minor version governing the xref format choice.
    /// Clamped to the supported 3..=7 range.
    pub fn set_minor_version(&mut self, version: u8) {
        self.minor_version = Some(version.clamp(3, 7));
    }

    fn check_page(&self, page_nr: usize) -> Result<usize> {
        if page_nr == 0 || page_nr > self.pages.len() {
            err!(PdfError::PageOutOfBounds { page_nr, max: self.pages.len() });
        }
        Ok(page_nr - 1)
    }

    /// Clone-on-write: a page still carrying a parser's provenance is
    /// deep-cloned and replaced in the vector before any mutation.
    fn page_for_edit(&mut self, idx: usize) -> Result<ObjRc> {
        let page = &self.pages[idx];
        if let Origin::Fresh = page.origin() {
            return Ok(page.clone());
        }
        let clone = Indirect::fresh(page.body().clone());
        self.pages[idx] = clone.clone();
        Ok(clone)
    }

    /// Appends a prepared page (see [`import_page`]). The page is cloned,
    /// so the same handle can be added more than once.
    pub fn add_page(&mut self, page: &ObjRc) -> Result<()> {
        page.body().as_dict()?;
        let clone = Indirect::fresh(page.body().clone());
        self.pages.push(clone);
        Ok(())
    }

    pub fn add_pages<'a>(&mut self, pages: impl IntoIterator<Item = &'a ObjRc>) -> Result<()> {
        for page in pages {
            self.add_page(page)?;
        }
        Ok(())
    }

    /// Removes the `page_nr`-th page (1-based). Later indices shift down.
    pub fn remove_page(&mut self, page_nr: usize) -> Result<()> {
        let idx = self.check_page(page_nr)?;
        self.pages.remove(idx);
        Ok(())
    }

    /// Replaces the `page_nr`-th page (1-based) with a clone of `page`.
    pub fn replace_page(&mut self, page_nr: usize, page: &ObjRc) -> Result<()> {
        let idx = self.check_page(page_nr)?;
        page.body().as_dict()?;
        self.pages[idx] = Indirect::fresh(page.body().clone());
        Ok(())
    }

    /// Draws `donor`'s content on top of the `page_nr`-th page: contents
    /// are concatenated (with colliding resource names renamed), annotations
    /// and resources merged, MediaBox expanded to the union.
    pub fn merge_page_with(&mut self, page_nr: usize, donor: &ObjRc) -> Result<()> {
        let idx = self.check_page(page_nr)?;
        let source = self.page_for_edit(idx)?;
        {
            // The merge needs the source's effective resources and boxes
            // in the page dictionary itself.
            let mut body = source.body_mut();
            flatten_inherited(body.as_dict_mut()?, &self.twin)?;
        }
        let donor_clone = Indirect::fresh(donor.body().clone());
        merge::merge_page_into(&source, &donor_clone, &self.editable)
    }

    /// Overwrites the document's interactive form.
    pub fn replace_acro_form(&mut self, form: Dictionary) {
        self.acro_form = AcroFormState::Updated(Indirect::fresh(Primitive::Dictionary(form)));
    }

    fn acro_form_for_edit(&mut self) -> Result<ObjRc> {
        if let AcroFormState::Updated(form) = &self.acro_form {
            return Ok(form.clone());
        }
        let dict = match &self.acro_form {
            AcroFormState::Untouched(Some(Primitive::Reference(r))) => {
                self.twin.resolve(*r)?.into_dictionary()?
            }
            AcroFormState::Untouched(Some(Primitive::Dictionary(d))) => d.clone(),
            AcroFormState::Untouched(Some(p)) => {
                err!(PdfError::UnexpectedPrimitive {
                    expected: "Dictionary or Reference",
                    found: p.get_debug_name()
                })
            }
            AcroFormState::Untouched(None) => Dictionary::new(),
            AcroFormState::Updated(_) => unreachable!(),
        };
        let handle = Indirect::fresh(Primitive::Dictionary(dict));
        self.acro_form = AcroFormState::Updated(handle.clone());
        Ok(handle)
    }

    /// Attaches `field` as a signature widget on the `page_nr`-th page and
    /// registers it in the AcroForm. The signature bytes are produced and
    /// patched in during [`write`](Self::write).
    pub fn sign(&mut self, page_nr: usize, field: SignatureField) -> Result<()> {
        let idx = self.check_page(page_nr)?;
        if self
            .signatures
            .iter()
            .any(|s| Rc::ptr_eq(&s.value, &field.signature.value))
        {
            err!(PdfError::HandlerConflict);
        }
        if field.signature.value.body().as_dict().is_err() {
            err!(PdfError::SignatureMissingValue);
        }

        field.signature.ensure_date();
        {
            let mut body = field.signature.value.body_mut();
            let dict = body.as_dict_mut()?;
            dict.insert(
                "ByteRange",
                Primitive::Array(vec![Primitive::Integer(BYTE_RANGE_PLACEHOLDER); 4]),
            );
            dict.insert(
                "Contents",
                Primitive::String(PdfString::new(vec![0; field.signature.reserve])),
            );
        }

        let page = self.page_for_edit(idx)?;

        let mut widget = Dictionary::new();
        widget.insert("Type", Primitive::name("Annot"));
        widget.insert("Subtype", Primitive::name("Widget"));
        widget.insert("FT", Primitive::name("Sig"));
        widget.insert(
            "Rect",
            Primitive::Array(field.rect.iter().map(|&v| Primitive::Number(v)).collect()),
        );
        widget.insert("T", Primitive::String(PdfString::from_str(&field.field_name)));
        // printed, position locked
        widget.insert("F", Primitive::Integer(132));
        widget.insert("V", Primitive::Handle(field.signature.value.clone()));
        widget.insert("P", Primitive::Handle(page.clone()));
        let widget = Indirect::fresh(Primitive::Dictionary(widget));

        {
            let mut body = page.body_mut();
            let dict = body.as_dict_mut()?;
            let mut annots = merge::owned_array(dict.get("Annots"), &self.twin)?;
            annots.push(Primitive::Handle(widget.clone()));
            dict.insert("Annots", Primitive::Array(annots));
        }

        let form = self.acro_form_for_edit()?;
        {
            let mut body = form.body_mut();
            let dict = body.as_dict_mut()?;
            let mut fields = merge::owned_array(dict.get("Fields"), &self.twin)?;
            fields.push(Primitive::Handle(widget.clone()));
            dict.insert("Fields", Primitive::Array(fields));

            let existing = dict
                .get("SigFlags")
                .and_then(|p| p.as_integer().ok())
                .unwrap_or(0);
            let flags = SigFlags::from_bits_truncate(existing as u32)
                | SigFlags::SIGNATURES_EXIST
                | SigFlags::APPEND_ONLY;
            dict.insert("SigFlags", Primitive::Integer(flags.bits() as i64));
        }

        info!("registered signature field '{}' on page {}", field.field_name, page_nr);
        self.signatures.push(field.signature);
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        if !self.signatures.is_empty() {
            return true;
        }
        if matches!(self.acro_form, AcroFormState::Updated(_)) {
            return true;
        }
        if self.pages.len() != self.original_pages.len() {
            return true;
        }
        self.pages.iter().zip(&self.original_pages).any(|(page, &orig)| {
            !matches!(page.origin(),
                Origin::Parsed { parser, at } if parser == self.twin.parser_id() && at == orig)
        })
    }

    /// Emits the incremental-update stream. Single-shot: a successful write
    /// moves the appender to a terminal state that rejects further writes.
    pub fn write<W: io::Write>(&mut self, mut sink: W) -> Result<()> {
        if self.written {
            err!(PdfError::WriteOnce);
        }

        let input = self.editable.backend().read(..)?;

        if !self.is_dirty() {
            debug!("no edits; output is byte-identical to the input");
            sink.write_all(input)?;
            self.written = true;
            return Ok(());
        }

        // Fresh page tree root; every page emitted by value gets its
        // Parent rewritten to it. Pages still owned by the twin go into
        // Kids by reference: their bytes live in the preserved prefix.
        let pages_root = Indirect::fresh(Primitive::Dictionary(Dictionary::new()));
        let mut kids = Vec::with_capacity(self.pages.len());
        for page in &self.pages {
            match page.origin() {
                Origin::Parsed { parser, at } if parser == self.twin.parser_id() => {
                    kids.push(Primitive::Reference(at));
                }
                _ => {
                    let mut body = page.body_mut();
                    let dict = body.as_dict_mut()?;
                    flatten_inherited(dict, &self.twin)?;
                    dict.insert("Parent", Primitive::Handle(pages_root.clone()));
                    kids.push(Primitive::Handle(page.clone()));
                }
            }
        }
        {
            let mut root = Dictionary::new();
            root.insert("Type", Primitive::name("Pages"));
            root.insert("Kids", Primitive::Array(kids));
            root.insert("Count", Primitive::Integer(self.pages.len() as i64));
            *pages_root.body_mut() = Primitive::Dictionary(root);
        }

        // Catalog delta: local keys first, everything else carried over
        // from the twin's catalog.
        let twin_catalog = self.twin.catalog()?;
        let mut cat = Dictionary::new();
        cat.insert("Type", Primitive::name("Catalog"));
        cat.insert("Pages", Primitive::Handle(pages_root.clone()));
        if let AcroFormState::Updated(form) = &self.acro_form {
            cat.insert("AcroForm", Primitive::Handle(form.clone()));
        }
        for (k, v) in &twin_catalog {
            if !cat.contains_key(k) {
                cat.insert(k.clone(), v.clone());
            }
        }
        let catalog = Indirect::fresh(Primitive::Dictionary(cat));

        let detector = ChangeDetector::new(
            &self.twin,
            self.twin.parser_id(),
            self.editable.parser_id(),
        );
        let mut collector = Collector::new(detector, &self.editable);
        for page in &self.pages {
            collector.collect(page)?;
        }
        collector.collect(&pages_root)?;
        collector.collect(&catalog)?;
        if let AcroFormState::Updated(form) = &self.acro_form {
            collector.collect(form)?;
        }
        for sig in &self.signatures {
            collector.collect(&sig.value)?;
        }
        let write_set = collector.into_write_set();

        if write_set.is_empty() {
            sink.write_all(input)?;
            self.written = true;
            return Ok(());
        }
        debug!("write set holds {} new objects", write_set.len());

        let max_input = self.editable.largest_object_number();
        let numbers = Numbers::assign(&write_set, max_input + 1);

        let mut trailer = Dictionary::new();
        trailer.insert("Root", Primitive::Handle(catalog.clone()));
        trailer.insert(
            "Prev",
            Primitive::Integer(self.editable.prev_startxref() as i64),
        );
        if let Some(info) = self.twin.trailer().get("Info") {
            trailer.insert("Info", info.clone());
        }
        if let Some(id) = updated_file_id(self.twin.trailer(), input.len(), write_set.len()) {
            trailer.insert("ID", id);
        }

        let mut effective_minor = self
            .minor_version
            .unwrap_or_else(|| self.editable.minor_version());
        if !self.signatures.is_empty() {
            effective_minor = effective_minor.max(3);
        }
        let use_xref_stream = effective_minor >= 5
            || self.editable.uses_xref_stream()
            || self.editable.xref_table().has_stream_entries();

        let placeholders: HashMap<*const Indirect, usize> = self
            .signatures
            .iter()
            .map(|s| (Rc::as_ptr(&s.value), s.reserve))
            .collect();

        let section = Section {
            write_set: &write_set,
            numbers: &numbers,
            placeholders,
            trailer,
            use_xref_stream,
            needs_separator: !input.ends_with(b"\n"),
            header_offset: self.editable.header_offset(),
        };

        // Copy the preserved prefix through, teeing every byte into each
        // signature's digest accumulator.
        let mut digests: Vec<Box<dyn Digest>> = Vec::with_capacity(self.signatures.len());
        for sig in &self.signatures {
            let dict = sig.value.body().as_dict()?.clone();
            digests.push(sig.handler.new_digest(&dict)?);
        }
        sink.write_all(input)?;
        for digest in &mut digests {
            digest.write_all(input)?;
        }
        let offset = input.len();
        trace!("copied {} preserved bytes", offset);

        if self.signatures.is_empty() {
            let mut out = CountingWriter::with_pos(&mut sink, offset);
            write_section(&section, &mut out)?;
            sink.flush()?;
            self.written = true;
            return Ok(());
        }

        // Mock write: the whole new section lands in memory so the
        // signature spans can be patched before anything reaches the sink.
        let mut buf: Vec<u8> = Vec::new();
        let info = {
            let mut out = CountingWriter::with_pos(&mut buf, offset);
            write_section(&section, &mut out)?
        };
        let total = offset + buf.len();

        let spans: Vec<SigSpans> = self
            .signatures
            .iter()
            .map(|s| {
                info.sig_spans
                    .get(&Rc::as_ptr(&s.value))
                    .cloned()
                    .ok_or_else(|| PdfError::Other { msg: "signature not serialized".into() })
            })
            .collect::<Result<_>>()?;

        // The ByteRange is the complement of every Contents span; the same
        // array goes into each signature dictionary.
        let mut contents_spans: Vec<_> = spans.iter().map(|s| s.contents.clone()).collect();
        contents_spans.sort_by_key(|r| r.start);
        let byte_range = format_byte_range(&byte_range_values(&contents_spans, total));
        for span in &spans {
            patch_span(&mut buf, rel(&span.byte_range, offset), &byte_range)?;
        }

        // Feed each digest the buffer segments outside the Contents spans.
        for digest in &mut digests {
            let mut prev = 0usize;
            for span in &contents_spans {
                digest.write_all(&buf[prev..span.start - offset])?;
                prev = span.end - offset;
            }
            digest.write_all(&buf[prev..])?;
        }

        // Produce and patch each signature; re-patch ByteRange in case the
        // first pass wrote stale data.
        for ((sig, digest), span) in self.signatures.iter().zip(digests).zip(&spans) {
            let dict = sig.value.body().as_dict()?.clone();
            let bytes = sig.handler.sign(&dict, digest)?;
            trace!("signature produced {} bytes of {} reserved", bytes.len(), sig.reserve);
            patch_contents(&mut buf, rel(&span.contents, offset), &bytes)?;
            patch_span(&mut buf, rel(&span.byte_range, offset), &byte_range)?;
        }

        sink.write_all(&buf)?;
        sink.flush()?;
        self.written = true;
        Ok(())
    }

    /// Scoped acquisition of the output file: closed on every exit path,
    /// deleted when the write fails.
    pub fn write_to_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let result = (|| -> Result<()> {
            let mut file = fs::File::create(path)?;
            self.write(&mut file)?;
            file.sync_all()?;
            Ok(())
        })();
        if result.is_err() {
            warn!("write failed; removing {:?}", path);
            let _ = fs::remove_file(path);
        }
        result
    }
}

#[inline]
fn rel(span: &std::ops::Range<usize>, offset: usize) -> std::ops::Range<usize> {
    span.start - offset..span.end - offset
}

/// Prepares the `page_nr`-th page (1-based) of another document for
/// insertion here: inherited attributes are flattened in, the parent link
/// is dropped, and the page's whole object graph is pulled into memory so
/// it no longer references the donor's file.
pub fn import_page<B: Backend>(source: &Reader<B>, page_nr: usize) -> Result<ObjRc> {
    let pages = source.pages()?;
    if page_nr == 0 || page_nr > pages.len() {
        err!(PdfError::PageOutOfBounds { page_nr, max: pages.len() });
    }
    let mut dict = source.resolve(pages[page_nr - 1])?.into_dictionary()?;
    flatten_inherited(&mut dict, source)?;
    dict.remove("Parent");

    let mut imported = HashMap::new();
    let body = import_value(&Primitive::Dictionary(dict), source, &mut imported)?;
    Ok(Indirect::fresh(body))
}

fn import_value(
    p: &Primitive,
    source: &impl Resolve,
    imported: &mut HashMap<PlainRef, ObjRc>,
) -> Result<Primitive> {
    Ok(match p {
        Primitive::Reference(r) => {
            if let Some(handle) = imported.get(r) {
                return Ok(Primitive::Handle(handle.clone()));
            }
            // Insert before recursing so reference cycles tie back here.
            let handle = Indirect::fresh(Primitive::Null);
            imported.insert(*r, handle.clone());
            let body = import_value(&source.resolve(*r)?, source, imported)?;
            *handle.body_mut() = body;
            Primitive::Handle(handle)
        }
        Primitive::Dictionary(dict) => {
            let mut out = Dictionary::new();
            for (k, v) in dict {
                out.insert(k.clone(), import_value(v, source, imported)?);
            }
            Primitive::Dictionary(out)
        }
        Primitive::Array(arr) => Primitive::Array(
            arr.iter()
                .map(|v| import_value(v, source, imported))
                .collect::<Result<_>>()?,
        ),
        Primitive::Stream(stream) => {
            let mut info = Dictionary::new();
            for (k, v) in &stream.info {
                info.insert(k.clone(), import_value(v, source, imported)?);
            }
            Primitive::Stream(crate::primitive::PdfStream { info, data: stream.data.clone() })
        }
        other => other.clone(),
    })
}

/// Walks the original parent chain, copying each inheritable attribute the
/// page does not already carry locally.
pub(crate) fn flatten_inherited(page: &mut Dictionary, resolve: &impl Resolve) -> Result<()> {
    const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];
    let mut missing: Vec<&str> = INHERITABLE
        .iter()
        .copied()
        .filter(|k| !page.contains_key(k))
        .collect();
    let mut parent = page.get("Parent").cloned();
    let mut depth = 0;
    while let Some(p) = parent {
        if missing.is_empty() {
            break;
        }
        let r = match p {
            Primitive::Reference(r) => r,
            // a synthesized parent carries no original chain
            _ => break,
        };
        let node = match resolve.resolve(r) {
            Ok(node) => node.into_dictionary()?,
            Err(_) => err!(PdfError::DanglingParent { obj_nr: r.id }),
        };
        missing.retain(|k| match node.get(k) {
            Some(v) => {
                page.insert(*k, v.clone());
                false
            }
            None => true,
        });
        parent = node.get("Parent").cloned();
        depth += 1;
        if depth > 64 {
            bail!("page tree too deep");
        }
    }
    Ok(())
}

fn updated_file_id(twin_trailer: &Dictionary, input_len: usize, new_objects: usize) -> Option<Primitive> {
    match twin_trailer.get("ID") {
        Some(Primitive::Array(arr)) if !arr.is_empty() => {
            let mut ctx = md5::Context::new();
            if let Ok(s) = arr[0].as_string() {
                ctx.consume(s.as_bytes());
            }
            ctx.consume(input_len.to_le_bytes());
            ctx.consume(new_objects.to_le_bytes());
            let digest = ctx.compute();
            Some(Primitive::Array(vec![
                arr[0].clone(),
                Primitive::String(PdfString::new(digest.0.to_vec())),
            ]))
        }
        _ => None,
    }
}
