use std::fmt;
use std::io;

use indexmap::map::{self, IndexMap};
use itertools::Itertools;

use crate::error::*;
use crate::object::{ObjRc, PlainRef};

macro_rules! unexpected_primitive {
    ($expected:ident, $found:expr) => {
        Err(PdfError::UnexpectedPrimitive {
            expected: stringify!($expected),
            found: $found,
        })
    };
}

#[derive(Clone, Debug)]
pub enum Primitive {
    Null,
    Integer(i64),
    Number(f64),
    Boolean(bool),
    String(PdfString),
    Stream(PdfStream),
    Dictionary(Dictionary),
    Array(Vec<Primitive>),
    /// Reference to an indirect object of the original file, resolved
    /// lazily through the owning reader.
    Reference(PlainRef),
    /// Link to an in-memory object that has no number until write time.
    Handle(ObjRc),
    Name(String),
}

/// Debug-oriented rendering. Output serialization lives in the section
/// writer; equality comparisons go through [`canon`].
impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Primitive::Dictionary(dict) => dict.fmt(f),
            Primitive::Array(items) => write!(f, "[{}]", items.iter().format(" ")),
            Primitive::Name(name) => write!(f, "/{}", name),
            Primitive::Reference(r) => write!(f, "{} {} R", r.id, r.gen),
            Primitive::Handle(_) => f.write_str("<unnumbered object>"),
            Primitive::String(s) => write!(f, "{:?}", s),
            Primitive::Stream(s) => write!(f, "<stream, {} bytes>", s.data.len()),
            Primitive::Null => f.write_str("null"),
            Primitive::Boolean(value) => value.fmt(f),
            Primitive::Integer(value) => value.fmt(f),
            Primitive::Number(value) => value.fmt(f),
        }
    }
}

impl PartialEq for Primitive {
    fn eq(&self, rhs: &Primitive) -> bool {
        use Primitive::*;
        match (self, rhs) {
            (Null, Null) => true,
            (Integer(a), Integer(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (String(a), String(b)) => a.data == b.data,
            (Stream(a), Stream(b)) => a.data == b.data && a.info == b.info,
            (Dictionary(a), Dictionary(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Reference(a), Reference(b)) => a == b,
            (Handle(a), Handle(b)) => std::rc::Rc::ptr_eq(a, b),
            (Name(a), Name(b)) => a == b,
            _ => false,
        }
    }
}

impl Primitive {
    pub fn name(name: impl Into<String>) -> Primitive {
        Primitive::Name(name.into())
    }

    /// For debugging / error messages: the name of the variant.
    pub fn get_debug_name(&self) -> &'static str {
        match *self {
            Primitive::Null => "Null",
            Primitive::Integer(..) => "Integer",
            Primitive::Number(..) => "Number",
            Primitive::Boolean(..) => "Boolean",
            Primitive::String(..) => "String",
            Primitive::Stream(..) => "Stream",
            Primitive::Dictionary(..) => "Dictionary",
            Primitive::Array(..) => "Array",
            Primitive::Reference(..) => "Reference",
            Primitive::Handle(..) => "Handle",
            Primitive::Name(..) => "Name",
        }
    }
    pub fn as_integer(&self) -> Result<i64> {
        match *self {
            Primitive::Integer(n) => Ok(n),
            ref p => unexpected_primitive!(Integer, p.get_debug_name()),
        }
    }
    pub fn as_u32(&self) -> Result<u32> {
        match *self {
            Primitive::Integer(n) if n >= 0 => Ok(n as u32),
            Primitive::Integer(_) => bail!("negative integer"),
            ref p => unexpected_primitive!(Integer, p.get_debug_name()),
        }
    }
    pub fn as_usize(&self) -> Result<usize> {
        match *self {
            Primitive::Integer(n) if n >= 0 => Ok(n as usize),
            Primitive::Integer(_) => bail!("negative integer"),
            ref p => unexpected_primitive!(Integer, p.get_debug_name()),
        }
    }
    pub fn as_number(&self) -> Result<f64> {
        match *self {
            Primitive::Integer(n) => Ok(n as f64),
            Primitive::Number(f) => Ok(f),
            ref p => unexpected_primitive!(Number, p.get_debug_name()),
        }
    }
    pub fn as_bool(&self) -> Result<bool> {
        match *self {
            Primitive::Boolean(b) => Ok(b),
            ref p => unexpected_primitive!(Boolean, p.get_debug_name()),
        }
    }
    pub fn as_name(&self) -> Result<&str> {
        match self {
            Primitive::Name(ref name) => Ok(name.as_str()),
            p => unexpected_primitive!(Name, p.get_debug_name()),
        }
    }
    pub fn as_string(&self) -> Result<&PdfString> {
        match self {
            Primitive::String(ref data) => Ok(data),
            p => unexpected_primitive!(String, p.get_debug_name()),
        }
    }
    pub fn as_array(&self) -> Result<&[Primitive]> {
        match self {
            Primitive::Array(ref v) => Ok(v),
            p => unexpected_primitive!(Array, p.get_debug_name()),
        }
    }
    pub fn as_array_mut(&mut self) -> Result<&mut Vec<Primitive>> {
        match self {
            Primitive::Array(ref mut v) => Ok(v),
            p => unexpected_primitive!(Array, p.get_debug_name()),
        }
    }
    pub fn as_dict(&self) -> Result<&Dictionary> {
        match self {
            Primitive::Dictionary(ref d) => Ok(d),
            Primitive::Stream(ref s) => Ok(&s.info),
            p => unexpected_primitive!(Dictionary, p.get_debug_name()),
        }
    }
    pub fn as_dict_mut(&mut self) -> Result<&mut Dictionary> {
        match self {
            Primitive::Dictionary(ref mut d) => Ok(d),
            Primitive::Stream(ref mut s) => Ok(&mut s.info),
            p => unexpected_primitive!(Dictionary, p.get_debug_name()),
        }
    }
    pub fn as_reference(&self) -> Result<PlainRef> {
        match *self {
            Primitive::Reference(r) => Ok(r),
            ref p => unexpected_primitive!(Reference, p.get_debug_name()),
        }
    }
    pub fn into_reference(self) -> Result<PlainRef> {
        match self {
            Primitive::Reference(id) => Ok(id),
            p => unexpected_primitive!(Reference, p.get_debug_name()),
        }
    }
    pub fn into_array(self) -> Result<Vec<Primitive>> {
        match self {
            Primitive::Array(v) => Ok(v),
            p => unexpected_primitive!(Array, p.get_debug_name()),
        }
    }
    pub fn into_dictionary(self) -> Result<Dictionary> {
        match self {
            Primitive::Dictionary(dict) => Ok(dict),
            Primitive::Stream(s) => Ok(s.info),
            p => unexpected_primitive!(Dictionary, p.get_debug_name()),
        }
    }
    pub fn into_name(self) -> Result<String> {
        match self {
            Primitive::Name(name) => Ok(name),
            p => unexpected_primitive!(Name, p.get_debug_name()),
        }
    }
    pub fn into_string(self) -> Result<PdfString> {
        match self {
            Primitive::String(data) => Ok(data),
            p => unexpected_primitive!(String, p.get_debug_name()),
        }
    }
    pub fn into_stream(self) -> Result<PdfStream> {
        match self {
            Primitive::Stream(s) => Ok(s),
            p => unexpected_primitive!(Stream, p.get_debug_name()),
        }
    }
}

/// Primitive Dictionary type. Key order is insertion order as parsed.
#[derive(Default, Clone, PartialEq)]
pub struct Dictionary {
    dict: IndexMap<String, Primitive>,
}
impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary { dict: IndexMap::new() }
    }
    pub fn len(&self) -> usize {
        self.dict.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, key: &str) -> Option<&Primitive> {
        self.dict.get(key)
    }
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Primitive> {
        self.dict.get_mut(key)
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.dict.contains_key(key)
    }
    pub fn insert(&mut self, key: impl Into<String>, val: impl Into<Primitive>) -> Option<Primitive> {
        self.dict.insert(key.into(), val.into())
    }
    /// Keeps key order stable (no swap-removal).
    pub fn remove(&mut self, key: &str) -> Option<Primitive> {
        self.dict.shift_remove(key)
    }
    pub fn iter(&self) -> map::Iter<String, Primitive> {
        self.dict.iter()
    }
    /// Like `get`, but returns `PdfError::MissingEntry` naming the calling type.
    pub fn require(&self, typ: &'static str, key: &str) -> Result<&Primitive> {
        self.get(key).ok_or(PdfError::MissingEntry {
            typ,
            field: key.into(),
        })
    }
}
impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{{")?;
        for (k, v) in self {
            writeln!(f, "{:>15}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}
impl fmt::Display for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<{}>",
            self.iter()
                .format_with(", ", |(k, v), f| f(&format_args!("{}={}", k, v)))
        )
    }
}
impl IntoIterator for Dictionary {
    type Item = (String, Primitive);
    type IntoIter = map::IntoIter<String, Primitive>;
    fn into_iter(self) -> Self::IntoIter {
        self.dict.into_iter()
    }
}
impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a String, &'a Primitive);
    type IntoIter = map::Iter<'a, String, Primitive>;
    fn into_iter(self) -> Self::IntoIter {
        self.dict.iter()
    }
}

/// Primitive Stream: a dictionary plus its raw (possibly encoded) payload.
#[derive(Clone, Debug)]
pub struct PdfStream {
    pub info: Dictionary,
    pub data: Vec<u8>,
}

/// Primitive String type.
#[derive(Clone, PartialEq)]
pub struct PdfString {
    pub data: Vec<u8>,
}
impl fmt::Debug for PdfString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"")?;
        for &b in &self.data {
            match b {
                b'"' => write!(f, "\\\"")?,
                b' '..=b'~' => write!(f, "{}", b as char)?,
                o @ 0..=7 => write!(f, "\\{}", o)?,
                x => write!(f, "\\x{:02x}", x)?,
            }
        }
        write!(f, "\"")
    }
}
impl PdfString {
    pub fn new(data: Vec<u8>) -> PdfString {
        PdfString { data }
    }
    pub fn from_str(s: &str) -> PdfString {
        PdfString { data: s.as_bytes().to_vec() }
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
    pub fn serialize(&self, out: &mut impl io::Write) -> Result<()> {
        if self.data.iter().any(|&b| b >= 0x80) {
            write!(out, "<")?;
            for &b in &self.data {
                write!(out, "{:02x}", b)?;
            }
            write!(out, ">")?;
        } else {
            write!(out, "(")?;
            for &b in &self.data {
                match b {
                    b'\\' | b'(' | b')' => write!(out, r"\")?,
                    _ => (),
                }
                out.write_all(&[b])?;
            }
            write!(out, ")")?;
        }
        Ok(())
    }
}
impl AsRef<[u8]> for PdfString {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

pub fn serialize_name(s: &str, out: &mut impl io::Write) -> Result<()> {
    write!(out, "/")?;
    for &b in s.as_bytes() {
        match b {
            b'\x00'..=b' ' | b'/' | b'%' | b'#' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{'
            | b'}' | b'\x7f'..=b'\xff' => write!(out, "#{:02x}", b)?,
            _ => out.write_all(&[b])?,
        }
    }
    Ok(())
}

/// Canonical byte form, used solely for content-equality comparisons and
/// never for final serialization. References keep their (number, generation);
/// handles compare by identity.
pub fn canon(p: &Primitive, out: &mut Vec<u8>) {
    use std::io::Write;
    match p {
        Primitive::Null => out.extend_from_slice(b"null"),
        Primitive::Integer(i) => { let _ = write!(out, "{}", i); }
        Primitive::Number(n) => { let _ = write!(out, "{}", n); }
        Primitive::Boolean(b) => { let _ = write!(out, "{}", b); }
        Primitive::String(s) => {
            out.push(b'<');
            for &b in &s.data {
                let _ = write!(out, "{:02x}", b);
            }
            out.push(b'>');
        }
        Primitive::Name(n) => {
            let _ = serialize_name(n, out);
        }
        Primitive::Array(arr) => {
            out.push(b'[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                canon(item, out);
            }
            out.push(b']');
        }
        Primitive::Dictionary(dict) => canon_dict(dict, out),
        Primitive::Stream(s) => {
            canon_dict(&s.info, out);
            out.extend_from_slice(b" stream ");
            out.extend_from_slice(&s.data);
        }
        Primitive::Reference(r) => { let _ = write!(out, "{} {} R", r.id, r.gen); }
        Primitive::Handle(h) => { let _ = write!(out, "&{:p}", std::rc::Rc::as_ptr(h)); }
    }
}
fn canon_dict(dict: &Dictionary, out: &mut Vec<u8>) {
    out.extend_from_slice(b"<<");
    for (k, v) in dict {
        let _ = serialize_name(k, out);
        out.push(b' ');
        canon(v, out);
    }
    out.extend_from_slice(b">>");
}

/// Content equality: equal canonical forms.
pub fn canon_eq(a: &Primitive, b: &Primitive) -> bool {
    let (mut ca, mut cb) = (Vec::new(), Vec::new());
    canon(a, &mut ca);
    canon(b, &mut cb);
    ca == cb
}

impl From<i64> for Primitive {
    fn from(x: i64) -> Primitive {
        Primitive::Integer(x)
    }
}
impl From<usize> for Primitive {
    fn from(x: usize) -> Primitive {
        Primitive::Integer(x as i64)
    }
}
impl From<f64> for Primitive {
    fn from(x: f64) -> Primitive {
        Primitive::Number(x)
    }
}
impl From<bool> for Primitive {
    fn from(x: bool) -> Primitive {
        Primitive::Boolean(x)
    }
}
impl From<PdfString> for Primitive {
    fn from(x: PdfString) -> Primitive {
        Primitive::String(x)
    }
}
impl From<PdfStream> for Primitive {
    fn from(x: PdfStream) -> Primitive {
        Primitive::Stream(x)
    }
}
impl From<Dictionary> for Primitive {
    fn from(x: Dictionary) -> Primitive {
        Primitive::Dictionary(x)
    }
}
impl From<Vec<Primitive>> for Primitive {
    fn from(x: Vec<Primitive>) -> Primitive {
        Primitive::Array(x)
    }
}
impl From<PlainRef> for Primitive {
    fn from(x: PlainRef) -> Primitive {
        Primitive::Reference(x)
    }
}
impl From<ObjRc> for Primitive {
    fn from(x: ObjRc) -> Primitive {
        Primitive::Handle(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_preserves_insertion_order() {
        let mut dict = Dictionary::new();
        dict.insert("Zebra", Primitive::Integer(1));
        dict.insert("Alpha", Primitive::Integer(2));
        dict.insert("Mid", Primitive::Integer(3));
        let keys: Vec<&str> = dict.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["Zebra", "Alpha", "Mid"]);
    }

    #[test]
    fn canon_detects_value_change() {
        let mut a = Dictionary::new();
        a.insert("Type", Primitive::name("Page"));
        a.insert("Rotate", Primitive::Integer(0));
        let mut b = a.clone();
        assert!(canon_eq(&Primitive::Dictionary(a.clone()), &Primitive::Dictionary(b.clone())));
        b.insert("Rotate", Primitive::Integer(90));
        assert!(!canon_eq(&Primitive::Dictionary(a), &Primitive::Dictionary(b)));
    }

    #[test]
    fn name_escaping() {
        let mut out = Vec::new();
        serialize_name("A B#1", &mut out).unwrap();
        assert_eq!(out, b"/A#20B#231");
    }
}
