//! Deciding which objects must be emitted, and gathering them.

use std::collections::HashSet;
use std::rc::Rc;

use crate::error::*;
use crate::object::{Indirect, ObjRc, Origin, ParserId, Resolve};
use crate::primitive::{canon_eq, Primitive};

/// Decides whether an object is "new" (must be emitted) or "preserved"
/// (already lives in the original bytes). Pure; never mutates the graph.
pub struct ChangeDetector<'a, T: Resolve> {
    twin: &'a T,
    twin_id: ParserId,
    editable_id: ParserId,
}

impl<'a, T: Resolve> ChangeDetector<'a, T> {
    pub fn new(twin: &'a T, twin_id: ParserId, editable_id: ParserId) -> Self {
        ChangeDetector { twin, twin_id, editable_id }
    }

    pub fn is_new(&self, obj: &ObjRc) -> Result<bool> {
        match obj.origin() {
            // The twin is never mutated, so its objects are the original bytes.
            Origin::Parsed { parser, .. } if parser == self.twin_id => Ok(false),
            // The editable reader parsed the same bytes, but its objects may
            // have been mutated since: compare against the twin's copy.
            Origin::Parsed { parser, at } if parser == self.editable_id => {
                let pristine = self.twin.resolve(at)?;
                let body = obj.body();
                Ok(!canon_eq(&body, &pristine))
            }
            // Another document's object, or built in memory.
            Origin::Parsed { .. } | Origin::Fresh => Ok(true),
        }
    }
}

/// Depth-first traversal from seed objects, recording the write set in
/// first-visit order.
pub struct Collector<'a, T: Resolve, E: Resolve> {
    detector: ChangeDetector<'a, T>,
    editable: &'a E,
    visited: HashSet<*const Indirect>,
    write_set: Vec<ObjRc>,
}

impl<'a, T: Resolve, E: Resolve> Collector<'a, T, E> {
    pub fn new(detector: ChangeDetector<'a, T>, editable: &'a E) -> Self {
        Collector {
            detector,
            editable,
            visited: HashSet::new(),
            write_set: Vec::new(),
        }
    }

    pub fn collect(&mut self, obj: &ObjRc) -> Result<()> {
        if !self.visited.insert(Rc::as_ptr(obj)) {
            return Ok(());
        }
        if !self.detector.is_new(obj)? {
            // Preserved: its bytes already live in the original file.
            return Ok(());
        }
        self.write_set.push(obj.clone());
        // The clone releases the borrow before recursion re-enters the graph.
        let body = obj.body().clone();
        self.walk(&body)
    }

    fn walk(&mut self, p: &Primitive) -> Result<()> {
        match p {
            Primitive::Dictionary(dict) => {
                for (_, v) in dict {
                    self.walk(v)?;
                }
            }
            Primitive::Array(arr) => {
                for v in arr {
                    self.walk(v)?;
                }
            }
            // New streams recurse into their dictionary, never the raw bytes.
            Primitive::Stream(stream) => {
                for (_, v) in &stream.info {
                    self.walk(v)?;
                }
            }
            Primitive::Reference(r) => {
                let handle = self.editable.resolve_handle(*r)?;
                self.collect(&handle)?;
            }
            Primitive::Handle(h) => {
                self.collect(h)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn into_write_set(self) -> Vec<ObjRc> {
        self.write_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{NoResolve, PlainRef};
    use crate::primitive::Dictionary;

    struct FakeTwin {
        body: Primitive,
    }
    impl Resolve for FakeTwin {
        fn resolve(&self, _: PlainRef) -> Result<Primitive> {
            Ok(self.body.clone())
        }
        fn resolve_handle(&self, r: PlainRef) -> Result<ObjRc> {
            Ok(Indirect::parsed(ParserId::unique(), r, self.body.clone()))
        }
    }

    fn page_dict(rotate: i64) -> Primitive {
        let mut d = Dictionary::new();
        d.insert("Type", Primitive::name("Page"));
        d.insert("Rotate", Primitive::Integer(rotate));
        Primitive::Dictionary(d)
    }

    #[test]
    fn twin_objects_are_preserved() {
        let twin = FakeTwin { body: page_dict(0) };
        let twin_id = ParserId::unique();
        let editable_id = ParserId::unique();
        let detector = ChangeDetector::new(&twin, twin_id, editable_id);

        let obj = Indirect::parsed(twin_id, PlainRef::new(3, 0), page_dict(0));
        assert!(!detector.is_new(&obj).unwrap());
    }

    #[test]
    fn unmodified_editable_object_is_preserved() {
        let twin = FakeTwin { body: page_dict(0) };
        let editable_id = ParserId::unique();
        let detector = ChangeDetector::new(&twin, ParserId::unique(), editable_id);

        let obj = Indirect::parsed(editable_id, PlainRef::new(3, 0), page_dict(0));
        assert!(!detector.is_new(&obj).unwrap());
    }

    #[test]
    fn mutated_editable_object_is_new() {
        let twin = FakeTwin { body: page_dict(0) };
        let editable_id = ParserId::unique();
        let detector = ChangeDetector::new(&twin, ParserId::unique(), editable_id);

        let obj = Indirect::parsed(editable_id, PlainRef::new(3, 0), page_dict(90));
        assert!(detector.is_new(&obj).unwrap());
    }

    #[test]
    fn fresh_objects_are_new() {
        let twin = FakeTwin { body: page_dict(0) };
        let detector = ChangeDetector::new(&twin, ParserId::unique(), ParserId::unique());
        assert!(detector.is_new(&Indirect::fresh(page_dict(0))).unwrap());
    }

    #[test]
    fn collector_records_first_visit_order_once() {
        let twin = FakeTwin { body: page_dict(0) };
        let detector = ChangeDetector::new(&twin, ParserId::unique(), ParserId::unique());
        let mut collector = Collector::new(detector, &NoResolve);

        let inner = Indirect::fresh(page_dict(1));
        let mut outer_dict = Dictionary::new();
        outer_dict.insert("First", Primitive::Handle(inner.clone()));
        outer_dict.insert("Second", Primitive::Handle(inner.clone()));
        let outer = Indirect::fresh(Primitive::Dictionary(outer_dict));

        collector.collect(&outer).unwrap();
        collector.collect(&inner).unwrap();
        let set = collector.into_write_set();
        assert_eq!(set.len(), 2);
        assert!(Rc::ptr_eq(&set[0], &outer));
        assert!(Rc::ptr_eq(&set[1], &inner));
    }
}
