use std::error::Error;
use std::io;

use crate::object::ObjNr;

#[derive(Debug, Snafu)]
pub enum PdfError {
    // Syntax / parsing
    #[snafu(display("Unexpected end of file"))]
    EOF,

    #[snafu(display("Error parsing from string: {}", source))]
    Parse { source: Box<dyn Error + Send + Sync> },

    #[snafu(display("Invalid UTF-8: {}", source))]
    Utf8 { source: Box<dyn Error + Send + Sync> },

    #[snafu(display("Unexpected token '{}' at {} - expected '{}'", lexeme, pos, expected))]
    UnexpectedLexeme { pos: usize, lexeme: String, expected: &'static str },

    #[snafu(display("Expecting an object, encountered {} at pos {}.", first_lexeme, pos))]
    UnknownType { pos: usize, first_lexeme: String },

    #[snafu(display("Maximum nesting depth exceeded"))]
    MaxDepth,

    #[snafu(display("Hex decode error. Position {}, bytes {:?}", pos, bytes))]
    HexDecode { pos: usize, bytes: [u8; 2] },

    #[snafu(display("Erroneous 'type' field in xref stream - expected 0, 1 or 2, found {}", found))]
    XRefStreamType { found: u64 },

    // Document structure
    #[snafu(display("Field /{} is missing in dictionary for type {}.", field, typ))]
    MissingEntry { typ: &'static str, field: String },

    #[snafu(display("Expected primitive {}, found primitive {} instead.", expected, found))]
    UnexpectedPrimitive { expected: &'static str, found: &'static str },

    #[snafu(display("Tried to dereference free object nr {}.", obj_nr))]
    FreeObject { obj_nr: ObjNr },

    #[snafu(display("Tried to dereference non-existing object nr {}.", obj_nr))]
    NullRef { obj_nr: ObjNr },

    #[snafu(display("Object stream index out of bounds ({}/{}).", index, max))]
    ObjStmOutOfBounds { index: usize, max: usize },

    #[snafu(display("Entry {} in xref table unspecified", id))]
    UnspecifiedXRefEntry { id: ObjNr },

    #[snafu(display("The document is encrypted. Appending to encrypted documents is not supported."))]
    Encrypted,

    // Appender operations
    #[snafu(display("Page index {} out of bounds (document has {} pages).", page_nr, max))]
    PageOutOfBounds { page_nr: usize, max: usize },

    #[snafu(display("Signature field has no value dictionary."))]
    SignatureMissingValue,

    #[snafu(display("write() called on an appender that has already written its update."))]
    WriteOnce,

    #[snafu(display("Patched value of {} bytes exceeds the {} bytes reserved for it.", len, reserved))]
    ContentsOverflow { len: usize, reserved: usize },

    #[snafu(display("A handler is already registered for this signature."))]
    HandlerConflict,

    #[snafu(display("Signature handler failed: {}", source))]
    Handler { source: Box<dyn Error + Send + Sync> },

    #[snafu(display("/Parent of object {} could not be resolved while flattening page attributes.", obj_nr))]
    DanglingParent { obj_nr: ObjNr },

    #[snafu(display("IO Error"))]
    Io { source: io::Error },

    #[snafu(display("{}", msg))]
    Other { msg: String },

    #[snafu(display("NoneError at {}:{}:{}", file, line, column))]
    NoneError { file: &'static str, line: u32, column: u32 },
}

pub type Result<T, E = PdfError> = std::result::Result<T, E>;

impl PdfError {
    pub fn is_eof(&self) -> bool {
        matches!(self, PdfError::EOF)
    }
}

impl From<io::Error> for PdfError {
    fn from(source: io::Error) -> PdfError {
        PdfError::Io { source }
    }
}
impl From<String> for PdfError {
    fn from(msg: String) -> PdfError {
        PdfError::Other { msg }
    }
}

macro_rules! err_from {
    ($($st:ty),* => $variant:ident) => (
        $(
            impl From<$st> for PdfError {
                fn from(e: $st) -> PdfError {
                    PdfError::$variant { source: e.into() }
                }
            }
        )*
    )
}
err_from!(std::str::Utf8Error, std::string::FromUtf8Error => Utf8);
err_from!(std::num::ParseIntError, std::num::ParseFloatError => Parse);

macro_rules! err {
    ($e: expr) => ({
        return Err($e);
    })
}
macro_rules! bail {
    ($($t:tt)*) => {
        err!($crate::PdfError::Other { msg: format!($($t)*) })
    }
}

#[macro_export]
macro_rules! try_opt {
    ($e:expr) => (
        match $e {
            Some(v) => v,
            None => return Err($crate::PdfError::NoneError {
                file: file!(),
                line: line!(),
                column: column!()
            })
        }
    )
}
