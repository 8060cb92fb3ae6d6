//! Merging one page's content onto another: resource-name collision
//! renaming, content-stream rewrite and concatenation, annotation and
//! resource merging, MediaBox union.

use std::collections::HashMap;

use crate::error::*;
use crate::object::{ObjRc, Resolve};
use crate::primitive::{Dictionary, Primitive};

use super::writer::make_flate_stream;

/// Resource dictionary categories whose names can collide.
pub(crate) const RESOURCE_CATEGORIES: [&str; 7] =
    ["Font", "ExtGState", "XObject", "Pattern", "Shading", "ProcSet", "Properties"];

/// Merge `donor` (an imported, self-contained page) onto `source` (a fresh
/// clone of a page of this document). `resolve` resolves the source side.
pub(crate) fn merge_page_into(
    source: &ObjRc,
    donor: &ObjRc,
    resolve: &impl Resolve,
) -> Result<()> {
    let donor_dict = donor.body().as_dict()?.clone();

    let mut source_body = source.body_mut();
    let source_dict = source_body.as_dict_mut()?;

    let mut source_res = owned_dict(source_dict.get("Resources"), resolve)?;
    let donor_res = owned_dict(donor_dict.get("Resources"), resolve)?;

    // Rename colliding resource names: smallest positive integer suffix
    // that collides with neither side.
    let mut renames: HashMap<String, String> = HashMap::new();
    for category in RESOURCE_CATEGORIES {
        let donor_cat = match donor_res.get(category) {
            Some(Primitive::Dictionary(d)) => d,
            _ => continue,
        };
        let source_cat = match source_res.get(category) {
            Some(Primitive::Dictionary(d)) => d,
            _ => continue,
        };
        for name in donor_cat.iter().map(|(k, _)| k) {
            if !source_cat.contains_key(name) {
                continue;
            }
            let mut suffix = 1u32;
            let fresh = loop {
                let candidate = format!("{}{}", name, suffix);
                if !source_cat.contains_key(&candidate) && !donor_cat.contains_key(&candidate) {
                    break candidate;
                }
                suffix += 1;
            };
            debug!("renaming merged resource /{} to /{}", name, fresh);
            renames.insert(name.clone(), fresh);
        }
    }

    // Concatenate content: source first, then the donor's with every
    // renamed name rewritten. The result is re-encoded with Flate and
    // installed as the single content stream.
    let source_content = content_bytes(source_dict.get("Contents"), resolve)?;
    let donor_content = rewrite_names(&content_bytes(donor_dict.get("Contents"), resolve)?, &renames);
    let mut combined = source_content;
    if !combined.is_empty() && !donor_content.is_empty() {
        combined.push(b'\n');
    }
    combined.extend_from_slice(&donor_content);
    let content_stream = crate::object::Indirect::fresh(make_flate_stream(&combined));
    source_dict.insert("Contents", Primitive::Handle(content_stream));

    // Annotations: donor's appended to source's.
    let donor_annots = owned_array(donor_dict.get("Annots"), resolve)?;
    if !donor_annots.is_empty() {
        let mut annots = owned_array(source_dict.get("Annots"), resolve)?;
        annots.extend(donor_annots);
        source_dict.insert("Annots", Primitive::Array(annots));
    }

    // Resources: merge per category, applying the rename map.
    for category in RESOURCE_CATEGORIES {
        let donor_cat = match donor_res.get(category) {
            Some(v) => v,
            None => continue,
        };
        if category == "ProcSet" {
            let mut merged = owned_array(source_res.get(category), resolve)?;
            for entry in owned_array(Some(donor_cat), resolve)? {
                if !merged.contains(&entry) {
                    merged.push(entry);
                }
            }
            source_res.insert(category, Primitive::Array(merged));
            continue;
        }
        let donor_cat = match donor_cat {
            Primitive::Dictionary(d) => d.clone(),
            other => owned_dict(Some(other), resolve)?,
        };
        let mut merged = owned_dict(source_res.get(category), resolve)?;
        for (name, value) in donor_cat {
            let name = renames.get(&name).cloned().unwrap_or(name);
            merged.insert(name, value);
        }
        source_res.insert(category, Primitive::Dictionary(merged));
    }
    source_dict.insert("Resources", Primitive::Dictionary(source_res));

    // MediaBox: union of both, when both are present.
    let source_box = source_dict.get("MediaBox").map(rect_from).transpose()?;
    let donor_box = donor_dict.get("MediaBox").map(rect_from).transpose()?;
    let merged_box = match (source_box, donor_box) {
        (Some(a), Some(b)) => Some(rect_union(a, b)),
        (a, b) => a.or(b),
    };
    if let Some(rect) = merged_box {
        source_dict.insert(
            "MediaBox",
            Primitive::Array(rect.iter().map(|&v| Primitive::Number(v)).collect()),
        );
    }

    Ok(())
}

/// A dictionary-valued entry, owned: inline dictionaries are cloned,
/// references and handles are resolved.
pub(crate) fn owned_dict(p: Option<&Primitive>, resolve: &impl Resolve) -> Result<Dictionary> {
    match p {
        None | Some(Primitive::Null) => Ok(Dictionary::new()),
        Some(Primitive::Dictionary(d)) => Ok(d.clone()),
        Some(Primitive::Reference(r)) => resolve.resolve(*r)?.into_dictionary(),
        Some(Primitive::Handle(h)) => h.body().clone().into_dictionary(),
        Some(p) => Err(PdfError::UnexpectedPrimitive {
            expected: "Dictionary",
            found: p.get_debug_name(),
        }),
    }
}

/// An array-valued entry, owned.
pub(crate) fn owned_array(p: Option<&Primitive>, resolve: &impl Resolve) -> Result<Vec<Primitive>> {
    match p {
        None | Some(Primitive::Null) => Ok(Vec::new()),
        Some(Primitive::Array(a)) => Ok(a.clone()),
        Some(Primitive::Reference(r)) => resolve.resolve(*r)?.into_array(),
        Some(Primitive::Handle(h)) => h.body().clone().into_array(),
        Some(p) => Err(PdfError::UnexpectedPrimitive {
            expected: "Array",
            found: p.get_debug_name(),
        }),
    }
}

/// Decoded bytes of a `/Contents` value: a stream, a reference to one, or
/// an array of either, concatenated.
pub(crate) fn content_bytes(p: Option<&Primitive>, resolve: &impl Resolve) -> Result<Vec<u8>> {
    match p {
        None | Some(Primitive::Null) => Ok(Vec::new()),
        Some(Primitive::Stream(s)) => crate::enc::decode_stream(s),
        Some(Primitive::Reference(r)) => {
            let stream = resolve.resolve(*r)?.into_stream()?;
            crate::enc::decode_stream(&stream)
        }
        Some(Primitive::Handle(h)) => {
            let stream = h.body().clone().into_stream()?;
            crate::enc::decode_stream(&stream)
        }
        Some(Primitive::Array(parts)) => {
            let mut out = Vec::new();
            for part in parts {
                let bytes = content_bytes(Some(part), resolve)?;
                if !out.is_empty() && !bytes.is_empty() {
                    out.push(b'\n');
                }
                out.extend_from_slice(&bytes);
            }
            Ok(out)
        }
        Some(p) => Err(PdfError::UnexpectedPrimitive {
            expected: "Stream or Array",
            found: p.get_debug_name(),
        }),
    }
}

#[inline]
fn is_regular(b: u8) -> bool {
    !matches!(b, 0 | 9 | 10 | 12 | 13 | 32 | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

/// Rewrite `/old` name tokens to `/new` in a content stream. Strings pass
/// through untouched; a name is replaced only when matched in full.
pub(crate) fn rewrite_names(data: &[u8], renames: &HashMap<String, String>) -> Vec<u8> {
    if renames.is_empty() {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'(' => {
                // literal string: copy through, honoring escapes and nesting
                let start = i;
                i += 1;
                let mut depth = 1u32;
                while i < data.len() && depth > 0 {
                    match data[i] {
                        b'\\' => i += 2,
                        b'(' => {
                            depth += 1;
                            i += 1;
                        }
                        b')' => {
                            depth -= 1;
                            i += 1;
                        }
                        _ => i += 1,
                    }
                }
                out.extend_from_slice(&data[start..i.min(data.len())]);
            }
            b'/' => {
                let start = i;
                i += 1;
                while i < data.len() && is_regular(data[i]) {
                    i += 1;
                }
                let name = &data[start + 1..i];
                match std::str::from_utf8(name).ok().and_then(|n| renames.get(n)) {
                    Some(new_name) => {
                        out.push(b'/');
                        out.extend_from_slice(new_name.as_bytes());
                    }
                    None => out.extend_from_slice(&data[start..i]),
                }
            }
            _ => {
                out.push(data[i]);
                i += 1;
            }
        }
    }
    out
}

fn rect_from(p: &Primitive) -> Result<[f64; 4]> {
    let arr = p.as_array()?;
    if arr.len() != 4 {
        bail!("rectangle with {} elements", arr.len());
    }
    let mut rect = [0.0; 4];
    for (slot, v) in rect.iter_mut().zip(arr) {
        *slot = v.as_number()?;
    }
    // normalize to (lower-left, upper-right)
    Ok([
        rect[0].min(rect[2]),
        rect[1].min(rect[3]),
        rect[0].max(rect[2]),
        rect[1].max(rect[3]),
    ])
}

fn rect_union(a: [f64; 4], b: [f64; 4]) -> [f64; 4] {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renames(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|&(a, b)| (a.into(), b.into())).collect()
    }

    #[test]
    fn rewrite_replaces_whole_tokens_only() {
        let map = renames(&[("F1", "F12")]);
        let out = rewrite_names(b"/F1 12 Tf /F11 9 Tf /F1Tj", &map);
        assert_eq!(out, b"/F12 12 Tf /F11 9 Tf /F1Tj");
    }

    #[test]
    fn rewrite_skips_strings() {
        let map = renames(&[("F1", "F2")]);
        let out = rewrite_names(b"(/F1 stays) Tj /F1 7 Tf", &map);
        assert_eq!(out, b"(/F1 stays) Tj /F2 7 Tf");
    }

    #[test]
    fn rect_union_normalizes() {
        let a = rect_from(&Primitive::Array(vec![
            Primitive::Integer(612),
            Primitive::Integer(0),
            Primitive::Integer(0),
            Primitive::Integer(792),
        ]))
        .unwrap();
        assert_eq!(a, [0.0, 0.0, 612.0, 792.0]);
        assert_eq!(rect_union(a, [0.0, 0.0, 200.0, 900.0]), [0.0, 0.0, 612.0, 900.0]);
    }
}
