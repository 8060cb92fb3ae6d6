//! Object identity, provenance and lazy reference resolution.
//!
//! Indirect objects are reference-counted handles; handle equality
//! (`Rc::ptr_eq`) is object identity. Every handle carries an [`Origin`]
//! naming the parser instance that produced it, or [`Origin::Fresh`] for
//! objects built in memory. Two readers over the same bytes produce two
//! disjoint origins even though the content is identical; change detection
//! is built on that.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::*;
use crate::primitive::Primitive;

pub type ObjNr = u64;
pub type GenNr = u16;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PlainRef {
    pub id: ObjNr,
    pub gen: GenNr,
}

impl PlainRef {
    pub fn new(id: ObjNr, gen: GenNr) -> PlainRef {
        PlainRef { id, gen }
    }
}

/// Tag identifying one parser instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ParserId(u64);

impl ParserId {
    /// A tag no other parser instance in this process has.
    pub fn unique() -> ParserId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ParserId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Origin {
    /// Produced by the parser with the given tag, at (number, generation).
    Parsed { parser: ParserId, at: PlainRef },
    /// Built in memory; not backed by bytes of the original file.
    Fresh,
}

/// An indirect object: shared, provenance-tagged, interiorly mutable.
///
/// Parsed objects are cached by their reader, so resolving the same
/// reference twice through one reader yields the same handle.
#[derive(Debug)]
pub struct Indirect {
    origin: Origin,
    body: RefCell<Primitive>,
}

pub type ObjRc = Rc<Indirect>;

impl Indirect {
    pub fn parsed(parser: ParserId, at: PlainRef, body: Primitive) -> ObjRc {
        Rc::new(Indirect {
            origin: Origin::Parsed { parser, at },
            body: RefCell::new(body),
        })
    }
    pub fn fresh(body: Primitive) -> ObjRc {
        Rc::new(Indirect {
            origin: Origin::Fresh,
            body: RefCell::new(body),
        })
    }
    pub fn origin(&self) -> Origin {
        self.origin
    }
    /// The (number, generation) this object occupies in the original file.
    pub fn source(&self) -> Option<PlainRef> {
        match self.origin {
            Origin::Parsed { at, .. } => Some(at),
            Origin::Fresh => None,
        }
    }
    pub fn body(&self) -> Ref<Primitive> {
        self.body.borrow()
    }
    pub fn body_mut(&self) -> RefMut<Primitive> {
        self.body.borrow_mut()
    }
}

pub fn same_object(a: &ObjRc, b: &ObjRc) -> bool {
    Rc::ptr_eq(a, b)
}

/// Lazy resolution of indirect references, implemented by readers.
pub trait Resolve {
    /// A clone of the referenced object's body.
    fn resolve(&self, r: PlainRef) -> Result<Primitive>;
    /// The shared, provenance-tagged handle for the referenced object.
    fn resolve_handle(&self, r: PlainRef) -> Result<ObjRc>;
}

pub struct NoResolve;
impl Resolve for NoResolve {
    fn resolve(&self, r: PlainRef) -> Result<Primitive> {
        err!(PdfError::NullRef { obj_nr: r.id })
    }
    fn resolve_handle(&self, r: PlainRef) -> Result<ObjRc> {
        err!(PdfError::NullRef { obj_nr: r.id })
    }
}
