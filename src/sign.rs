//! Detached digital signatures: the handler contract, signature field
//! construction, ByteRange computation, and the patch phase of the
//! two-pass write.
//!
//! The appender reserves a fixed-size hex `Contents` placeholder inside the
//! signature value dictionary and records, while serializing, where the
//! `ByteRange` and `Contents` values landed. After the mock write it patches
//! the real `ByteRange` in, feeds every output byte outside the `Contents`
//! spans to the handler's digest, and patches the produced signature back
//! into the reserved span. Domain cryptography (PKCS#7, RSA, X.509) stays
//! behind [`SignatureHandler`].

use std::any::Any;
use std::io::{self, Write};
use std::ops::Range;
use std::rc::Rc;

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::enc;
use crate::error::*;
use crate::object::{Indirect, ObjRc, Resolve};
use crate::primitive::{Dictionary, PdfString, Primitive};

bitflags! {
    /// AcroForm `/SigFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SigFlags: u32 {
        const SIGNATURES_EXIST = 1 << 0;
        const APPEND_ONLY = 1 << 1;
    }
}

/// Default space reserved for each signature's `Contents`, in bytes.
pub const DEFAULT_SIG_RESERVE: usize = 8192;

/// Each `ByteRange` placeholder integer: wide enough that the final
/// substitution cannot grow the field.
pub(crate) const BYTE_RANGE_PLACEHOLDER: i64 = 0xFFFFF;

/// Write-only accumulator for the bytes covered by a signature.
pub trait Digest: io::Write {
    /// Recovers the concrete accumulator inside a handler.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub field_name: Option<String>,
    pub is_verified: bool,
}

/// The capability set a signature scheme provides.
///
/// `sign` must produce at most as many bytes as were reserved for the
/// signature; the appender fails the write otherwise.
pub trait SignatureHandler {
    /// Predicate on the signature dictionary's (Filter, SubFilter).
    fn is_applicable(&self, sig: &Dictionary) -> bool;
    /// A fresh accumulator for one signature.
    fn new_digest(&self, sig: &Dictionary) -> Result<Box<dyn Digest>>;
    /// Finalize and produce the signature bytes.
    fn sign(&self, sig: &Dictionary, digest: Box<dyn Digest>) -> Result<Vec<u8>>;
    /// Verify a populated signature against the accumulated bytes.
    fn validate(&self, sig: &Dictionary, digest: Box<dyn Digest>) -> Result<ValidationResult>;
    /// `/Filter` for signature dictionaries this handler produces.
    fn filter_name(&self) -> &'static str {
        "Adobe.PPKLite"
    }
    /// `/SubFilter` for signature dictionaries this handler produces.
    fn sub_filter_name(&self) -> &'static str {
        "adbe.pkcs7.detached"
    }
}

/// A signature value dictionary under construction (`/Type /Sig`).
///
/// Cloning shares the underlying dictionary: registering the same
/// signature twice is a [`PdfError::HandlerConflict`].
#[derive(Clone)]
pub struct Signature {
    pub(crate) handler: Rc<dyn SignatureHandler>,
    pub(crate) value: ObjRc,
    pub(crate) reserve: usize,
}

impl Signature {
    pub fn new(handler: Rc<dyn SignatureHandler>) -> Signature {
        let mut dict = Dictionary::new();
        dict.insert("Type", Primitive::name("Sig"));
        dict.insert("Filter", Primitive::name(handler.filter_name()));
        dict.insert("SubFilter", Primitive::name(handler.sub_filter_name()));
        Signature {
            handler,
            value: Indirect::fresh(Primitive::Dictionary(dict)),
            reserve: DEFAULT_SIG_RESERVE,
        }
    }

    fn set(&self, key: &str, value: Primitive) {
        self.value
            .body_mut()
            .as_dict_mut()
            .expect("signature value is a dictionary")
            .insert(key, value);
    }

    pub fn name(self, name: &str) -> Signature {
        self.set("Name", Primitive::String(PdfString::from_str(name)));
        self
    }
    pub fn reason(self, reason: &str) -> Signature {
        self.set("Reason", Primitive::String(PdfString::from_str(reason)));
        self
    }
    pub fn location(self, location: &str) -> Signature {
        self.set("Location", Primitive::String(PdfString::from_str(location)));
        self
    }
    pub fn contact_info(self, contact: &str) -> Signature {
        self.set("ContactInfo", Primitive::String(PdfString::from_str(contact)));
        self
    }
    /// Signing time; defaults to now (UTC) when not set.
    pub fn date(self, date: DateTime<FixedOffset>) -> Signature {
        self.set("M", Primitive::String(PdfString::from_str(&pdf_date(date))));
        self
    }
    /// Bytes reserved for `Contents`.
    pub fn reserve(mut self, reserve: usize) -> Signature {
        self.reserve = reserve;
        self
    }

    pub(crate) fn ensure_date(&self) {
        let has_date = {
            let body = self.value.body();
            body.as_dict().map(|d| d.contains_key("M")).unwrap_or(false)
        };
        if !has_date {
            let now = Utc::now();
            self.set(
                "M",
                Primitive::String(PdfString::from_str(&pdf_date(
                    now.with_timezone(&now.offset().fix()),
                ))),
            );
        }
    }
}

/// A signature form field: widget annotation plus signature value.
#[derive(Clone)]
pub struct SignatureField {
    pub(crate) field_name: String,
    pub(crate) rect: [f64; 4],
    pub(crate) signature: Signature,
}

impl SignatureField {
    pub fn new(field_name: &str, signature: Signature) -> SignatureField {
        SignatureField {
            field_name: field_name.into(),
            rect: [0.0; 4],
            signature,
        }
    }
    /// Widget rectangle; invisible (empty) when not set.
    pub fn rect(mut self, rect: [f64; 4]) -> SignatureField {
        self.rect = rect;
        self
    }
}

/// `D:YYYYMMDDHHmmSS+HH'mm'`.
pub fn pdf_date(date: DateTime<FixedOffset>) -> String {
    let offset = date.offset().local_minus_utc();
    let (sign, offset) = if offset < 0 { ('-', -offset) } else { ('+', offset) };
    format!(
        "D:{}{}{:02}'{:02}'",
        date.format("%Y%m%d%H%M%S"),
        sign,
        offset / 3600,
        (offset % 3600) / 60,
    )
}

/// The `ByteRange` array covering everything outside the `Contents` spans.
/// `spans` are absolute, in ascending order; `total` is the output length.
pub(crate) fn byte_range_values(spans: &[Range<usize>], total: usize) -> Vec<i64> {
    let mut vals = Vec::with_capacity((spans.len() + 1) * 2);
    let mut prev_end = 0usize;
    for span in spans {
        vals.push(prev_end as i64);
        vals.push((span.start - prev_end) as i64);
        prev_end = span.end;
    }
    vals.push(prev_end as i64);
    vals.push((total - prev_end) as i64);
    vals
}

pub(crate) fn format_byte_range(vals: &[i64]) -> Vec<u8> {
    use itertools::Itertools;
    format!("[{}]", vals.iter().format(" ")).into_bytes()
}

/// Overwrite `span` of `buf` with `content`, space-padded to exactly fill
/// the reserved width.
pub(crate) fn patch_span(buf: &mut [u8], span: Range<usize>, content: &[u8]) -> Result<()> {
    let width = span.len();
    if content.len() > width {
        err!(PdfError::ContentsOverflow { len: content.len(), reserved: width });
    }
    let target = &mut buf[span];
    target[..content.len()].copy_from_slice(content);
    for b in &mut target[content.len()..] {
        *b = b' ';
    }
    Ok(())
}

/// Overwrite the hex digits between the delimiters of a reserved
/// `Contents` span with the signature bytes.
pub(crate) fn patch_contents(buf: &mut [u8], span: Range<usize>, sig_bytes: &[u8]) -> Result<()> {
    // span includes the '<' and '>' delimiters
    let reserved = (span.len() - 2) / 2;
    if sig_bytes.len() > reserved {
        err!(PdfError::ContentsOverflow { len: sig_bytes.len(), reserved });
    }
    let hex = enc::encode_hex(sig_bytes);
    let inner = span.start + 1..span.end - 1;
    patch_span(buf, inner, &hex)
}

/// Re-reads a written document and verifies every signature `handler` is
/// applicable to: the bytes named by each `ByteRange` are fed to a fresh
/// digest, and the handler checks them against `Contents`.
pub fn verify_signatures(
    data: &[u8],
    handler: &dyn SignatureHandler,
) -> Result<Vec<ValidationResult>> {
    use crate::reader::Reader;

    let reader = Reader::open(data.to_vec())?;
    let form = match reader.acro_form()? {
        Some(form) => resolved_dict(&form, &reader)?,
        None => return Ok(Vec::new()),
    };
    let fields = match form.get("Fields") {
        Some(Primitive::Array(arr)) => arr.clone(),
        Some(Primitive::Reference(r)) => reader.resolve(*r)?.into_array()?,
        _ => return Ok(Vec::new()),
    };

    let mut results = Vec::new();
    for field in &fields {
        let field_dict = resolved_dict(field, &reader)?;
        if field_dict.get("FT").and_then(|p| p.as_name().ok()) != Some("Sig") {
            continue;
        }
        let field_name = field_dict
            .get("T")
            .and_then(|p| p.as_string().ok())
            .and_then(|s| String::from_utf8(s.as_bytes().to_vec()).ok());
        let sig = match field_dict.get("V") {
            Some(v) => resolved_dict(v, &reader)?,
            None => continue,
        };
        if !handler.is_applicable(&sig) {
            results.push(ValidationResult { field_name, is_verified: false });
            continue;
        }

        let ranges = sig.require("Sig", "ByteRange")?.as_array()?.to_vec();
        if ranges.len() % 2 != 0 {
            bail!("ByteRange with {} elements", ranges.len());
        }
        let mut digest = handler.new_digest(&sig)?;
        for pair in ranges.chunks_exact(2) {
            let start = pair[0].as_usize()?;
            let len = pair[1].as_usize()?;
            let end = start
                .checked_add(len)
                .filter(|&e| e <= data.len())
                .ok_or_else(|| PdfError::Other { msg: "ByteRange outside the file".into() })?;
            digest.write_all(&data[start..end])?;
        }
        let mut result = handler.validate(&sig, digest)?;
        result.field_name = field_name;
        results.push(result);
    }
    Ok(results)
}

fn resolved_dict(p: &Primitive, reader: &impl crate::object::Resolve) -> Result<Dictionary> {
    match p {
        Primitive::Dictionary(d) => Ok(d.clone()),
        Primitive::Reference(r) => reader.resolve(*r)?.into_dictionary(),
        p => Err(PdfError::UnexpectedPrimitive {
            expected: "Dictionary",
            found: p.get_debug_name(),
        }),
    }
}
