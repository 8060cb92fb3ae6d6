mod common;

use pdf_append::append::{import_page, Appender};
use pdf_append::object::{PlainRef, Resolve};
use pdf_append::primitive::Primitive;
use pdf_append::reader::Reader;
use pdf_append::PdfError;

fn write_out(appender: &mut Appender<pdf_append::SharedBytes>) -> Vec<u8> {
    let mut out = Vec::new();
    appender.write(&mut out).unwrap();
    out
}

#[test]
fn noop_write_reproduces_input_exactly() {
    let input = common::one_page_pdf();
    let mut appender = Appender::from_data(input.clone()).unwrap();
    let out = write_out(&mut appender);
    assert_eq!(out, input);
}

#[test]
fn write_twice_is_rejected() {
    let input = common::one_page_pdf();
    let mut appender = Appender::from_data(input).unwrap();
    let mut out = Vec::new();
    appender.write(&mut out).unwrap();
    let err = appender.write(&mut Vec::new()).unwrap_err();
    assert!(matches!(err, PdfError::WriteOnce));
}

#[test]
fn pure_append_preserves_prefix_and_numbers_monotonically() {
    let input = common::one_page_pdf();
    let input_len = input.len();
    let prev_startxref = {
        let reader = Reader::open(input.clone()).unwrap();
        assert_eq!(reader.largest_object_number(), 5);
        reader.prev_startxref()
    };

    let donor = Reader::open(common::donor_pdf()).unwrap();
    let page = import_page(&donor, 1).unwrap();

    let mut appender = Appender::from_data(input.clone()).unwrap();
    appender.add_page(&page).unwrap();
    let out = write_out(&mut appender);

    assert!(out.len() > input_len);
    assert_eq!(&out[..input_len], &input[..]);

    // every emitted object number is greater than the input's largest
    let appended = String::from_utf8_lossy(&out[input_len..]);
    for obj_nr in 1..=5 {
        assert!(
            !appended.contains(&format!("\n{} 0 obj", obj_nr)),
            "object {} was re-emitted",
            obj_nr
        );
    }
    assert!(appended.contains("6 0 obj"));
    assert!(appended.contains(&format!("/Prev {}", prev_startxref)));

    let reread = Reader::open(out).unwrap();
    let pages = reread.pages().unwrap();
    assert_eq!(pages.len(), 2);
    // both pages hang off the synthesized page tree root
    let root = reread.catalog().unwrap().get("Pages").unwrap().as_reference().unwrap();
    assert!(root.id > 5);
    let second = reread.resolve(pages[1]).unwrap().into_dictionary().unwrap();
    assert_eq!(second.get("Parent").unwrap().as_reference().unwrap(), root);
}

#[test]
fn xref_delta_covers_every_new_object() {
    let input = common::one_page_pdf();
    let donor = Reader::open(common::donor_pdf()).unwrap();
    let page = import_page(&donor, 1).unwrap();

    let mut appender = Appender::from_data(input.clone()).unwrap();
    appender.add_page(&page).unwrap();
    let out = write_out(&mut appender);

    let reread = Reader::open(out.clone()).unwrap();
    let text = String::from_utf8_lossy(&out);
    for obj_nr in reread.object_nums() {
        if obj_nr <= 5 {
            continue;
        }
        let reader_says = reread.resolve(PlainRef::new(obj_nr, 0));
        assert!(reader_says.is_ok(), "object {} unreadable: {:?}", obj_nr, reader_says);
        // the xref offset points at the object header itself
        assert!(text.contains(&format!("{} 0 obj", obj_nr)));
    }
}

#[test]
fn removed_page_keeps_others_by_reference() {
    let input = common::three_page_pdf();
    let original = Reader::open(input.clone()).unwrap();
    let original_pages = original.pages().unwrap();
    assert_eq!(original_pages.len(), 3);

    let mut appender = Appender::from_data(input.clone()).unwrap();
    appender.remove_page(2).unwrap();
    let out = write_out(&mut appender);

    let reread = Reader::open(out.clone()).unwrap();
    let pages = reread.pages().unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0], original_pages[0]);
    assert_eq!(pages[1], original_pages[2]);

    // only the page tree root and the catalog are new: objects 10 and 11
    let appended = String::from_utf8_lossy(&out[input.len()..]);
    assert!(appended.contains("10 0 obj"));
    assert!(appended.contains("11 0 obj"));
    assert!(!appended.contains("12 0 obj"));
}

#[test]
fn remove_page_renumbers_following_indices() {
    let input = common::three_page_pdf();
    let original_pages = Reader::open(input.clone()).unwrap().pages().unwrap();

    let mut appender = Appender::from_data(input).unwrap();
    appender.remove_page(1).unwrap();
    appender.remove_page(1).unwrap();
    assert_eq!(appender.page_count(), 1);
    let out = write_out(&mut appender);

    let pages = Reader::open(out).unwrap().pages().unwrap();
    assert_eq!(pages, vec![original_pages[2]]);
}

#[test]
fn replace_page_emits_replacement_only() {
    let input = common::three_page_pdf();
    let original_pages = Reader::open(input.clone()).unwrap().pages().unwrap();

    let donor = Reader::open(common::donor_pdf()).unwrap();
    let replacement = import_page(&donor, 1).unwrap();

    let mut appender = Appender::from_data(input.clone()).unwrap();
    appender.replace_page(1, &replacement).unwrap();
    let out = write_out(&mut appender);

    let reread = Reader::open(out).unwrap();
    let pages = reread.pages().unwrap();
    assert_eq!(pages.len(), 3);
    assert!(pages[0].id > 9, "first page must be newly emitted");
    assert_eq!(pages[1], original_pages[1]);
    assert_eq!(pages[2], original_pages[2]);

    let replaced = reread.resolve(pages[0]).unwrap().into_dictionary().unwrap();
    let font = resolve_font_names(&reread, &replaced);
    assert_eq!(font, vec!["F1"]);
}

#[test]
fn page_edit_out_of_range_is_an_error_and_leaves_appender_usable() {
    let input = common::three_page_pdf();
    let donor = Reader::open(common::donor_pdf()).unwrap();
    let page = import_page(&donor, 1).unwrap();

    let mut appender = Appender::from_data(input.clone()).unwrap();
    for result in [
        appender.replace_page(4, &page),
        appender.remove_page(0),
        appender.merge_page_with(9, &page),
    ] {
        assert!(matches!(result.unwrap_err(), PdfError::PageOutOfBounds { .. }));
    }

    // still usable afterwards
    appender.remove_page(3).unwrap();
    let out = write_out(&mut appender);
    assert_eq!(Reader::open(out).unwrap().pages().unwrap().len(), 2);
}

#[test]
fn merged_page_renames_colliding_font() {
    let input = common::one_page_pdf();
    let donor = Reader::open(common::donor_pdf()).unwrap();
    let stamp = import_page(&donor, 1).unwrap();

    let mut appender = Appender::from_data(input.clone()).unwrap();
    appender.merge_page_with(1, &stamp).unwrap();
    let out = write_out(&mut appender);
    assert_eq!(&out[..input.len()], &input[..]);

    let reread = Reader::open(out).unwrap();
    let pages = reread.pages().unwrap();
    assert_eq!(pages.len(), 1);
    let page = reread.resolve(pages[0]).unwrap().into_dictionary().unwrap();

    let mut fonts = resolve_font_names(&reread, &page);
    fonts.sort();
    assert_eq!(fonts, vec!["F1", "F11"]);

    // source content first, then the donor's with /F1 rewritten
    let contents = page.get("Contents").unwrap().as_reference().unwrap();
    let stream = reread.resolve(contents).unwrap().into_stream().unwrap();
    let data = pdf_append::enc::decode_stream(&stream).unwrap();
    let text = String::from_utf8_lossy(&data);
    let source_at = text.find("(Hello)").expect("source content kept");
    let donor_at = text.find("(stamp)").expect("donor content appended");
    assert!(source_at < donor_at);
    assert!(text.contains("/F11 12 Tf"));
    assert!(text.contains("/F1 24 Tf"));

    // the MediaBox keeps covering both pages
    let media: Vec<f64> = page
        .get("MediaBox")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_number().unwrap())
        .collect();
    assert_eq!(media, vec![0.0, 0.0, 612.0, 792.0]);
}

#[test]
fn xref_stream_documents_chain_with_xref_streams() {
    let input = common::one_page_pdf_xref_stream();
    let donor = Reader::open(common::donor_pdf()).unwrap();
    let page = import_page(&donor, 1).unwrap();

    let mut appender = Appender::from_data(input.clone()).unwrap();
    appender.add_page(&page).unwrap();
    let out = write_out(&mut appender);

    let appended = String::from_utf8_lossy(&out[input.len()..]);
    assert!(appended.contains("/Type /XRef"));
    assert!(!appended.contains("\ntrailer"));

    let reread = Reader::open(out).unwrap();
    assert_eq!(reread.pages().unwrap().len(), 2);
}

#[test]
fn classic_documents_keep_the_classic_table() {
    let input = common::one_page_pdf();
    let donor = Reader::open(common::donor_pdf()).unwrap();
    let page = import_page(&donor, 1).unwrap();

    let mut appender = Appender::from_data(input.clone()).unwrap();
    appender.add_page(&page).unwrap();
    let out = write_out(&mut appender);

    let appended = String::from_utf8_lossy(&out[input.len()..]);
    assert!(appended.contains("xref\n0 1\n"));
    assert!(appended.contains("trailer"));
}

#[test]
fn trailer_id_is_regenerated() {
    let input = common::one_page_pdf();
    let donor = Reader::open(common::donor_pdf()).unwrap();
    let page = import_page(&donor, 1).unwrap();

    let mut appender = Appender::from_data(input.clone()).unwrap();
    appender.add_page(&page).unwrap();
    let out = write_out(&mut appender);

    let reread = Reader::open(out).unwrap();
    let id = reread.trailer().get("ID").unwrap().as_array().unwrap().to_vec();
    assert_eq!(id.len(), 2);
    assert_eq!(id[0].as_string().unwrap().as_bytes(), &[0xde, 0xad, 0xbe, 0xef][..]);
    assert_ne!(id[1].as_string().unwrap().as_bytes(), &[0xde, 0xad, 0xbe, 0xef][..]);
}

#[test]
fn encrypted_documents_are_refused() {
    let mut b = common::Builder::new("1.4");
    b.obj("<< /Type /Catalog /Pages 2 0 R >>");
    b.obj("<< /Type /Pages /Kids [] /Count 0 >>");
    b.obj("<< /Filter /Standard /V 1 >>");
    let mut data = b.finish(1);
    // splice an /Encrypt entry into the trailer
    let patched = String::from_utf8(data.clone())
        .unwrap()
        .replace("/Root 1 0 R", "/Root 1 0 R /Encrypt 3 0 R");
    data = patched.into_bytes();
    // the startxref value is unchanged because the trailer sits after the table

    let err = Appender::from_data(data).unwrap_err();
    assert!(matches!(err, PdfError::Encrypted));
}

fn resolve_font_names(reader: &Reader<Vec<u8>>, page: &pdf_append::primitive::Dictionary) -> Vec<String> {
    let resources = match page.get("Resources").unwrap() {
        Primitive::Dictionary(d) => d.clone(),
        Primitive::Reference(r) => reader.resolve(*r).unwrap().into_dictionary().unwrap(),
        p => panic!("unexpected resources: {:?}", p),
    };
    let font = match resources.get("Font") {
        Some(Primitive::Dictionary(d)) => d.clone(),
        Some(Primitive::Reference(r)) => reader.resolve(*r).unwrap().into_dictionary().unwrap(),
        other => panic!("unexpected font entry: {:?}", other),
    };
    font.iter().map(|(k, _)| k.clone()).collect()
}
