//! Synthetic image fixtures shared by the integration tests.
//!
//! The builders produce small but structurally valid JPEG and PNG files so
//! tests can state exactly which bytes belong to which segment.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::Write;

// =============================================================================
// TIFF / Exif
// =============================================================================

/// One IFD entry; `data` is the encoded value (little-endian).
#[derive(Debug, Clone)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    pub data: Vec<u8>,
}

pub fn short(tag: u16, value: u16) -> IfdEntry {
    IfdEntry {
        tag,
        field_type: 3,
        count: 1,
        data: value.to_le_bytes().to_vec(),
    }
}

pub fn long(tag: u16, value: u32) -> IfdEntry {
    IfdEntry {
        tag,
        field_type: 4,
        count: 1,
        data: value.to_le_bytes().to_vec(),
    }
}

pub fn ascii(tag: u16, value: &str) -> IfdEntry {
    let mut data = value.as_bytes().to_vec();
    data.push(0);
    IfdEntry {
        tag,
        field_type: 2,
        count: data.len() as u32,
        data,
    }
}

pub fn rational(tag: u16, numerator: u32, denominator: u32) -> IfdEntry {
    let mut data = numerator.to_le_bytes().to_vec();
    data.extend_from_slice(&denominator.to_le_bytes());
    IfdEntry {
        tag,
        field_type: 5,
        count: 1,
        data,
    }
}

pub fn undefined(tag: u16, value: &[u8]) -> IfdEntry {
    IfdEntry {
        tag,
        field_type: 7,
        count: value.len() as u32,
        data: value.to_vec(),
    }
}

/// Entry with an arbitrary field type and raw 4-byte value field.
pub fn raw(tag: u16, field_type: u16, value: [u8; 4]) -> IfdEntry {
    IfdEntry {
        tag,
        field_type,
        count: 1,
        data: value.to_vec(),
    }
}

fn padded(len: usize) -> usize {
    len + (len & 1)
}

fn ifd_size(entries: &[IfdEntry]) -> usize {
    2 + 12 * entries.len()
        + 4
        + entries
            .iter()
            .filter(|e| e.data.len() > 4)
            .map(|e| padded(e.data.len()))
            .sum::<usize>()
}

fn write_ifd(out: &mut Vec<u8>, entries: &[IfdEntry], next: u32) {
    let start = out.len();
    let mut cursor = start + 2 + 12 * entries.len() + 4;
    let mut overflow = Vec::new();

    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.tag.to_le_bytes());
        out.extend_from_slice(&entry.field_type.to_le_bytes());
        out.extend_from_slice(&entry.count.to_le_bytes());
        if entry.data.len() <= 4 {
            let mut inline = entry.data.clone();
            inline.resize(4, 0);
            out.extend_from_slice(&inline);
        } else {
            out.extend_from_slice(&(cursor as u32).to_le_bytes());
            overflow.extend_from_slice(&entry.data);
            if entry.data.len() % 2 == 1 {
                overflow.push(0);
            }
            cursor += padded(entry.data.len());
        }
    }
    out.extend_from_slice(&next.to_le_bytes());
    out.extend_from_slice(&overflow);
}

/// Little-endian TIFF block with IFD0 and, if non-empty, an Exif IFD.
pub fn tiff(ifd0: &[IfdEntry], exif_ifd: &[IfdEntry]) -> Vec<u8> {
    let mut out = b"II\x2A\x00\x08\x00\x00\x00".to_vec();
    let mut ifd0 = ifd0.to_vec();
    if !exif_ifd.is_empty() {
        ifd0.push(long(0x8769, 0));
        let exif_offset = 8 + ifd_size(&ifd0);
        if let Some(pointer) = ifd0.last_mut() {
            pointer.data = (exif_offset as u32).to_le_bytes().to_vec();
        }
    }
    write_ifd(&mut out, &ifd0, 0);
    if !exif_ifd.is_empty() {
        write_ifd(&mut out, exif_ifd, 0);
    }
    out
}

// =============================================================================
// JPEG
// =============================================================================

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Entropy-coded bytes with a stuffed `FF 00` and a restart marker.
pub const SCAN_DATA: [u8; 9] = [0x12, 0x34, 0xFF, 0x00, 0x56, 0xFF, 0xD0, 0x78, 0x9A];

/// `FF marker LL LL payload`.
pub fn jpeg_segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn jfif_app0() -> Vec<u8> {
    jpeg_segment(0xE0, b"JFIF\0\x01\x01\x00\x00\x01\x00\x01\x00\x00")
}

pub fn exif_app1(tiff: &[u8]) -> Vec<u8> {
    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(tiff);
    jpeg_segment(0xE1, &payload)
}

pub fn xmp_app1(packet: &str) -> Vec<u8> {
    let mut payload = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
    payload.extend_from_slice(packet.as_bytes());
    jpeg_segment(0xE1, &payload)
}

pub fn icc_app2(profile: &[u8]) -> Vec<u8> {
    let mut payload = b"ICC_PROFILE\0\x01\x01".to_vec();
    payload.extend_from_slice(profile);
    jpeg_segment(0xE2, &payload)
}

pub fn comment(text: &str) -> Vec<u8> {
    jpeg_segment(0xFE, text.as_bytes())
}

/// A 128-byte ICC header for an sRGB display profile.
pub fn icc_profile_header() -> Vec<u8> {
    let mut header = vec![0u8; 128];
    header[..4].copy_from_slice(&3144u32.to_be_bytes());
    header[4..8].copy_from_slice(b"lcms");
    header[8] = 2;
    header[9] = 0x10;
    header[12..16].copy_from_slice(b"mntr");
    header[16..20].copy_from_slice(b"RGB ");
    header[20..24].copy_from_slice(b"XYZ ");
    header
}

/// Tables, frame header, one scan and `EOI`: everything a decoder needs.
pub fn jpeg_image_data() -> Vec<u8> {
    let mut out = Vec::new();
    let mut dqt = vec![0u8];
    dqt.extend_from_slice(&[1u8; 64]);
    out.extend(jpeg_segment(0xDB, &dqt));
    out.extend(jpeg_segment(
        0xC0,
        &[8, 0, 16, 0, 16, 1, 1, 0x11, 0],
    ));
    let mut dht = vec![0u8, 1];
    dht.extend_from_slice(&[0u8; 15]);
    dht.push(0);
    out.extend(jpeg_segment(0xC4, &dht));
    out.extend(jpeg_segment(0xDA, &[1, 1, 0x00, 0, 63, 0]));
    out.extend_from_slice(&SCAN_DATA);
    out.extend_from_slice(&EOI);
    out
}

/// `SOI`, JFIF `APP0`, the given segments, then the image data.
pub fn jpeg_with(segments: &[Vec<u8>]) -> Vec<u8> {
    let mut out = SOI.to_vec();
    out.extend(jfif_app0());
    for segment in segments {
        out.extend_from_slice(segment);
    }
    out.extend(jpeg_image_data());
    out
}

/// JPEG whose only metadata is an Exif block with `Orientation = 1`.
pub fn jpeg_with_orientation() -> Vec<u8> {
    jpeg_with(&[exif_app1(&tiff(&[short(0x0112, 1)], &[]))])
}

// =============================================================================
// PNG
// =============================================================================

pub const PNG_SIGNATURE: [u8; 8] = *b"\x89PNG\r\n\x1a\n";

pub fn png_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut crc = flate2::Crc::new();
    crc.update(kind);
    crc.update(data);
    out.extend_from_slice(&crc.sum().to_be_bytes());
    out
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn ihdr() -> Vec<u8> {
    // 1x1, 8-bit greyscale
    png_chunk(b"IHDR", &[0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0])
}

pub fn idat() -> Vec<u8> {
    png_chunk(b"IDAT", &zlib(&[0, 0x80]))
}

pub fn iend() -> Vec<u8> {
    png_chunk(b"IEND", &[])
}

pub fn text_chunk(keyword: &str, text: &str) -> Vec<u8> {
    let mut data = keyword.as_bytes().to_vec();
    data.push(0);
    data.extend_from_slice(text.as_bytes());
    png_chunk(b"tEXt", &data)
}

pub fn ztxt_chunk(keyword: &str, text: &str) -> Vec<u8> {
    let mut data = keyword.as_bytes().to_vec();
    data.extend_from_slice(&[0, 0]);
    data.extend(zlib(text.as_bytes()));
    png_chunk(b"zTXt", &data)
}

pub fn itxt_chunk(keyword: &str, text: &str, compressed: bool) -> Vec<u8> {
    let mut data = keyword.as_bytes().to_vec();
    data.push(0);
    data.extend_from_slice(&[compressed as u8, 0]);
    data.extend_from_slice(b"en\0");
    data.extend_from_slice(b"\0");
    if compressed {
        data.extend(zlib(text.as_bytes()));
    } else {
        data.extend_from_slice(text.as_bytes());
    }
    png_chunk(b"iTXt", &data)
}

pub fn time_chunk(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Vec<u8> {
    let mut data = year.to_be_bytes().to_vec();
    data.extend_from_slice(&[month, day, hour, minute, second]);
    png_chunk(b"tIME", &data)
}

pub fn exif_chunk(tiff: &[u8]) -> Vec<u8> {
    png_chunk(b"eXIf", tiff)
}

/// Signature, `IHDR`, the given chunks, `IDAT`, `IEND`.
pub fn png_with(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = PNG_SIGNATURE.to_vec();
    out.extend(ihdr());
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out.extend(idat());
    out.extend(iend());
    out
}

/// Returns true if `needle` occurs anywhere in `haystack`.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
