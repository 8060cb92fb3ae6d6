//! The one filter the appender touches: Flate, plus the hex helpers the
//! signing machinery needs. Image codecs are out of scope; preserved
//! streams pass through encoded.

use std::io::Read;

use crate::error::*;
use crate::primitive::{Dictionary, PdfStream, Primitive};

#[derive(Debug, Clone, Copy)]
pub struct FlateParams {
    pub predictor: u8,
    pub n_components: usize,
    pub columns: usize,
}

impl Default for FlateParams {
    fn default() -> FlateParams {
        FlateParams { predictor: 1, n_components: 1, columns: 1 }
    }
}

#[inline]
pub fn decode_nibble(c: u8) -> Option<u8> {
    match c {
        n @ b'0'..=b'9' => Some(n - b'0'),
        a @ b'a'..=b'f' => Some(a - b'a' + 0xa),
        a @ b'A'..=b'F' => Some(a - b'A' + 0xA),
        _ => None,
    }
}

#[inline]
fn encode_nibble(c: u8) -> u8 {
    match c {
        0..=9 => b'0' + c,
        10..=15 => b'a' - 10 + c,
        _ => unreachable!(),
    }
}

/// Decode hex data, ignoring whitespace, stopping at `>`.
pub fn decode_hex(data: &[u8]) -> Result<Vec<u8>> {
    use itertools::Itertools;
    let mut out = Vec::with_capacity(data.len() / 2);
    let pairs = data
        .iter()
        .cloned()
        .take_while(|&b| b != b'>')
        .filter(|&b| !matches!(b, 0 | 9 | 10 | 12 | 13 | 32))
        .tuples();
    for (i, (high, low)) in pairs.enumerate() {
        match (decode_nibble(high), decode_nibble(low)) {
            (Some(high), Some(low)) => out.push(high << 4 | low),
            _ => return Err(PdfError::HexDecode { pos: i * 2, bytes: [high, low] }),
        }
    }
    Ok(out)
}

pub fn encode_hex(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() * 2);
    for &b in data {
        buf.push(encode_nibble(b >> 4));
        buf.push(encode_nibble(b & 0xf));
    }
    buf
}

pub fn flate_decode(data: &[u8], params: &FlateParams) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    match libflate::zlib::Decoder::new(data) {
        Ok(mut decoder) => {
            decoder.read_to_end(&mut decoded)?;
        }
        Err(_) => {
            info!("invalid zlib header. trying raw deflate");
            decoded.clear();
            libflate::deflate::Decoder::new(data).read_to_end(&mut decoded)?;
        }
    }

    if params.predictor <= 1 {
        return Ok(decoded);
    }
    if params.predictor == 2 {
        bail!("TIFF predictor is not supported");
    }

    // PNG predictors: one filter-type byte per row.
    let stride = params.columns * params.n_components;
    let bpp = params.n_components;
    let rows = decoded.len() / (stride + 1);
    let mut out = vec![0; rows * stride];
    let null_row = vec![0; stride];

    let mut in_off = 0;
    let mut out_off = 0;
    while in_off + stride < decoded.len() {
        let ty = PredictorType::from_u8(decoded[in_off])?;
        in_off += 1;
        let row_in = &decoded[in_off..in_off + stride];
        let (prev_row, row_out) = if out_off == 0 {
            (&null_row[..], &mut out[..stride])
        } else {
            let (prev, curr) = out.split_at_mut(out_off);
            (&prev[out_off - stride..], &mut curr[..stride])
        };
        unfilter(ty, bpp, prev_row, row_in, row_out);
        in_off += stride;
        out_off += stride;
    }
    Ok(out)
}

pub fn flate_encode(data: &[u8]) -> Vec<u8> {
    deflate::deflate_bytes_zlib(data)
}

/// Decode a stream's payload. Unfiltered and Flate-filtered streams are the
/// only kinds the appender ever needs to look inside.
pub fn decode_stream(stream: &PdfStream) -> Result<Vec<u8>> {
    let filter = match stream.info.get("Filter") {
        None | Some(Primitive::Null) => return Ok(stream.data.clone()),
        Some(Primitive::Name(name)) => name.as_str(),
        Some(Primitive::Array(arr)) if arr.len() == 1 => arr[0].as_name()?,
        Some(Primitive::Array(_)) => bail!("filter chains are not supported"),
        Some(p) => {
            err!(PdfError::UnexpectedPrimitive { expected: "Name or Array", found: p.get_debug_name() })
        }
    };
    match filter {
        "FlateDecode" => flate_decode(&stream.data, &flate_params(&stream.info)?),
        other => bail!("unsupported stream filter /{}", other),
    }
}

fn flate_params(info: &Dictionary) -> Result<FlateParams> {
    let parms = match info.get("DecodeParms").or_else(|| info.get("DP")) {
        Some(Primitive::Dictionary(d)) => d,
        Some(Primitive::Array(arr)) if arr.len() == 1 => arr[0].as_dict()?,
        _ => return Ok(FlateParams::default()),
    };
    let mut params = FlateParams::default();
    if let Some(p) = parms.get("Predictor") {
        params.predictor = p.as_integer()? as u8;
    }
    if let Some(p) = parms.get("Colors") {
        params.n_components = p.as_usize()?;
    }
    if let Some(p) = parms.get("Columns") {
        params.columns = p.as_usize()?;
    }
    Ok(params)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PredictorType {
    NoFilter,
    Sub,
    Up,
    Avg,
    Paeth,
}

impl PredictorType {
    fn from_u8(n: u8) -> Result<PredictorType> {
        match n {
            0 => Ok(PredictorType::NoFilter),
            1 => Ok(PredictorType::Sub),
            2 => Ok(PredictorType::Up),
            3 => Ok(PredictorType::Avg),
            4 => Ok(PredictorType::Paeth),
            n => bail!("invalid PNG predictor type {}", n),
        }
    }
}

fn filter_paeth(a: u8, b: u8, c: u8) -> u8 {
    let (ia, ib, ic) = (a as i16, b as i16, c as i16);
    let p = ia + ib - ic;
    let (pa, pb, pc) = ((p - ia).abs(), (p - ib).abs(), (p - ic).abs());
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn unfilter(filter: PredictorType, bpp: usize, prev: &[u8], inp: &[u8], out: &mut [u8]) {
    use self::PredictorType::*;
    let len = inp.len();
    match filter {
        NoFilter => out[..len].copy_from_slice(inp),
        Sub => {
            out[..bpp].copy_from_slice(&inp[..bpp]);
            for i in bpp..len {
                out[i] = inp[i].wrapping_add(out[i - bpp]);
            }
        }
        Up => {
            for i in 0..len {
                out[i] = inp[i].wrapping_add(prev[i]);
            }
        }
        Avg => {
            for i in 0..bpp {
                out[i] = inp[i].wrapping_add(prev[i] / 2);
            }
            for i in bpp..len {
                out[i] = inp[i].wrapping_add(((out[i - bpp] as i16 + prev[i] as i16) / 2) as u8);
            }
        }
        Paeth => {
            for i in 0..bpp {
                out[i] = inp[i].wrapping_add(filter_paeth(0, prev[i], 0));
            }
            for i in bpp..len {
                out[i] = inp[i].wrapping_add(filter_paeth(out[i - bpp], prev[i], prev[i - bpp]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flate_round_trip() {
        let data = b"BT /F1 12 Tf 72 712 Td (Hello) Tj ET";
        let encoded = flate_encode(data);
        let decoded = flate_decode(&encoded, &FlateParams::default()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn hex_round_trip() {
        let data = [0u8, 0x7f, 0xff, 0x10];
        let hex = encode_hex(&data);
        assert_eq!(hex, b"007fff10");
        assert_eq!(decode_hex(&hex).unwrap(), data);
    }

    #[test]
    fn hex_ignores_whitespace_and_terminator() {
        assert_eq!(decode_hex(b"48 65\n6c6C 6f>6g").unwrap(), b"Hello");
    }
}
