//! Incremental updates for existing PDF documents.
//!
//! The original byte stream is preserved verbatim; edits (added, removed,
//! replaced or merged pages, form changes, detached digital signatures)
//! are appended as a new body, cross-reference delta and trailer.
//!
//! ```no_run
//! use pdf_append::append::{import_page, Appender};
//! use pdf_append::reader::Reader;
//!
//! # fn main() -> pdf_append::error::Result<()> {
//! let mut appender = Appender::open("contract.pdf")?;
//! let donor = Reader::open(std::fs::read("stamp.pdf")?)?;
//! appender.merge_page_with(1, &import_page(&donor, 1)?)?;
//! appender.write_to_file("contract-stamped.pdf")?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate snafu;
#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;

#[macro_use]
pub mod error;
pub mod append;
pub mod backend;
pub mod enc;
pub mod object;
pub mod parser;
pub mod primitive;
pub mod reader;
pub mod sign;
pub mod xref;

pub use crate::append::{import_page, Appender, SharedBytes};
pub use crate::error::{PdfError, Result};
pub use crate::reader::Reader;
pub use crate::sign::{
    verify_signatures, Digest, SigFlags, Signature, SignatureField, SignatureHandler,
    ValidationResult,
};
