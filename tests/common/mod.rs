//! Minimal synthesized documents for exercising the appender end to end.

use std::io::Write;

/// Assembles a small PDF with sequentially numbered objects and a correct
/// cross-reference section.
pub struct Builder {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl Builder {
    pub fn new(version: &str) -> Builder {
        let mut buf = Vec::new();
        write!(buf, "%PDF-{}\n", version).unwrap();
        Builder { buf, offsets: Vec::new() }
    }

    /// Adds the next object; returns its number.
    pub fn obj(&mut self, body: &str) -> u64 {
        let id = self.offsets.len() as u64 + 1;
        self.offsets.push(self.buf.len());
        write!(self.buf, "{} 0 obj\n{}\nendobj\n", id, body).unwrap();
        id
    }

    /// Adds the next object as a stream; returns its number.
    pub fn stream(&mut self, extra_entries: &str, data: &[u8]) -> u64 {
        let id = self.offsets.len() as u64 + 1;
        self.offsets.push(self.buf.len());
        write!(self.buf, "{} 0 obj\n<< /Length {}{} >>\nstream\n", id, data.len(), extra_entries)
            .unwrap();
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
        id
    }

    /// Classic xref table, trailer, startxref.
    pub fn finish(self, root: u64) -> Vec<u8> {
        let mut buf = self.buf;
        let xref_pos = buf.len();
        let count = self.offsets.len() + 1;
        write!(buf, "xref\n0 {}\n", count).unwrap();
        write!(buf, "0000000000 65535 f\r\n").unwrap();
        for &pos in &self.offsets {
            write!(buf, "{:010} 00000 n\r\n", pos).unwrap();
        }
        write!(
            buf,
            "trailer\n<< /Size {} /Root {} 0 R /ID [<deadbeef> <deadbeef>] >>\nstartxref\n{}\n%%EOF\n",
            count, root, xref_pos
        )
        .unwrap();
        buf
    }

    /// Cross-reference stream (PDF 1.5 style), startxref.
    pub fn finish_xref_stream(mut self, root: u64) -> Vec<u8> {
        let stream_id = self.offsets.len() as u64 + 1;
        let count = self.offsets.len() + 2;

        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0xff, 0xff]);
        let offsets = self.offsets.clone();
        let xref_pos = self.buf.len();
        for &pos in &offsets {
            data.push(1);
            data.extend_from_slice(&(pos as u32).to_be_bytes());
            data.extend_from_slice(&[0, 0]);
        }
        data.push(1);
        data.extend_from_slice(&(xref_pos as u32).to_be_bytes());
        data.extend_from_slice(&[0, 0]);

        let dict = format!(
            "/Type /XRef /Size {} /W [1 4 2] /Index [0 {}] /Root {} 0 R",
            count, count, root
        );
        self.stream(&format!(" {}", dict), &data);
        let mut buf = self.buf;
        write!(buf, "startxref\n{}\n%%EOF\n", xref_pos).unwrap();
        buf
    }
}

/// One page, objects 1..=5: catalog, pages (with inherited MediaBox),
/// page, content stream, font.
pub fn one_page_pdf() -> Vec<u8> {
    let mut b = Builder::new("1.4");
    b.obj("<< /Type /Catalog /Pages 2 0 R >>");
    b.obj("<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>");
    b.obj("<< /Type /Page /Parent 2 0 R /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>");
    b.stream("", b"BT /F1 24 Tf 72 720 Td (Hello) Tj ET");
    b.obj("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");
    b.finish(1)
}

/// Three pages sharing one font through the page tree.
pub fn three_page_pdf() -> Vec<u8> {
    let mut b = Builder::new("1.4");
    b.obj("<< /Type /Catalog /Pages 2 0 R >>");
    b.obj("<< /Type /Pages /Kids [3 0 R 5 0 R 7 0 R] /Count 3 /MediaBox [0 0 612 792] /Resources << /Font << /F1 9 0 R >> >> >>");
    for n in 1..=3u32 {
        b.obj("<< /Type /Page /Parent 2 0 R /Contents @ 0 R >>"
            .replace('@', &(2 * n + 2).to_string())
            .as_str());
        b.stream("", format!("BT /F1 12 Tf 72 720 Td (page {}) Tj ET", n).as_bytes());
    }
    b.obj("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");
    b.finish(1)
}

/// A donor document whose page also names its font /F1.
pub fn donor_pdf() -> Vec<u8> {
    let mut b = Builder::new("1.4");
    b.obj("<< /Type /Catalog /Pages 2 0 R >>");
    b.obj("<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 400 400] >>");
    b.obj("<< /Type /Page /Parent 2 0 R /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>");
    b.stream("", b"BT /F1 12 Tf 10 10 Td (stamp) Tj ET");
    b.obj("<< /Type /Font /Subtype /Type1 /BaseFont /Times-Roman >>");
    b.finish(1)
}

/// One page, chained through an xref stream (PDF 1.5).
pub fn one_page_pdf_xref_stream() -> Vec<u8> {
    let mut b = Builder::new("1.5");
    b.obj("<< /Type /Catalog /Pages 2 0 R >>");
    b.obj("<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>");
    b.obj("<< /Type /Page /Parent 2 0 R /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>");
    b.stream("", b"BT /F1 24 Tf 72 720 Td (Hello) Tj ET");
    b.obj("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");
    b.finish_xref_stream(1)
}
