// crates/exifguard-core/src/testutil.rs

//! Byte-level builders for test fixtures.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::tags::{self, Directory};
use crate::tiff::Endian;

#[derive(Debug, Clone)]
struct RawEntry {
    tag: u16,
    kind: u16,
    count: u32,
    data: Vec<u8>,
}

/// Lays out a TIFF block: header, IFD0, EXIF IFD, GPS IFD, then a data area.
pub(crate) struct TiffBuilder {
    endian: Endian,
    primary: Vec<RawEntry>,
    exif: Vec<RawEntry>,
    gps: Vec<RawEntry>,
}

impl TiffBuilder {
    pub(crate) fn new(endian: Endian) -> Self {
        Self {
            endian,
            primary: Vec::new(),
            exif: Vec::new(),
            gps: Vec::new(),
        }
    }

    fn u16_bytes(&self, v: u16) -> Vec<u8> {
        let mut buf = vec![0; 2];
        match self.endian {
            Endian::Little => LittleEndian::write_u16(&mut buf, v),
            Endian::Big => BigEndian::write_u16(&mut buf, v),
        }
        buf
    }

    fn u32_bytes(&self, v: u32) -> Vec<u8> {
        let mut buf = vec![0; 4];
        match self.endian {
            Endian::Little => LittleEndian::write_u32(&mut buf, v),
            Endian::Big => BigEndian::write_u32(&mut buf, v),
        }
        buf
    }

    /// Adds an entry with pre-encoded data. Data of up to 4 bytes goes inline.
    pub(crate) fn raw(mut self, dir: Directory, tag: u16, kind: u16, count: u32, data: Vec<u8>) -> Self {
        let entry = RawEntry {
            tag,
            kind,
            count,
            data,
        };
        match dir {
            Directory::Primary => self.primary.push(entry),
            Directory::Exif => self.exif.push(entry),
            Directory::Gps => self.gps.push(entry),
        }
        self
    }

    pub(crate) fn ascii(self, dir: Directory, tag: u16, text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        let count = data.len() as u32;
        self.raw(dir, tag, 2, count, data)
    }

    pub(crate) fn byte(self, dir: Directory, tag: u16, value: u8) -> Self {
        self.raw(dir, tag, 1, 1, vec![value])
    }

    pub(crate) fn short(self, dir: Directory, tag: u16, value: u16) -> Self {
        let data = self.u16_bytes(value);
        self.raw(dir, tag, 3, 1, data)
    }

    pub(crate) fn rationals(self, dir: Directory, tag: u16, values: &[(u32, u32)]) -> Self {
        let data: Vec<u8> = values
            .iter()
            .flat_map(|&(n, d)| [self.u32_bytes(n), self.u32_bytes(d)].concat())
            .collect();
        self.raw(dir, tag, 5, values.len() as u32, data)
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let ifd_size = |n: usize| 2 + 12 * n + 4;
        let mut primary = self.primary.clone();
        let pointer = |tag| RawEntry {
            tag,
            kind: 4,
            count: 1,
            data: vec![0; 4],
        };
        if !self.exif.is_empty() {
            primary.push(pointer(tags::EXIF_IFD_POINTER));
        }
        if !self.gps.is_empty() {
            primary.push(pointer(tags::GPS_IFD_POINTER));
        }

        let primary_at = 8;
        let exif_at = primary_at + ifd_size(primary.len());
        let gps_at = exif_at + if self.exif.is_empty() { 0 } else { ifd_size(self.exif.len()) };
        let data_at = gps_at + if self.gps.is_empty() { 0 } else { ifd_size(self.gps.len()) };

        for entry in primary.iter_mut() {
            if entry.tag == tags::EXIF_IFD_POINTER {
                entry.data = self.u32_bytes(exif_at as u32);
            } else if entry.tag == tags::GPS_IFD_POINTER {
                entry.data = self.u32_bytes(gps_at as u32);
            }
        }

        let mut out = match self.endian {
            Endian::Little => b"II".to_vec(),
            Endian::Big => b"MM".to_vec(),
        };
        out.extend(self.u16_bytes(42));
        out.extend(self.u32_bytes(primary_at as u32));

        let mut data_area = Vec::new();
        let mut dirs = vec![&primary];
        if !self.exif.is_empty() {
            dirs.push(&self.exif);
        }
        if !self.gps.is_empty() {
            dirs.push(&self.gps);
        }
        for entries in dirs {
            out.extend(self.u16_bytes(entries.len() as u16));
            for e in entries {
                out.extend(self.u16_bytes(e.tag));
                out.extend(self.u16_bytes(e.kind));
                out.extend(self.u32_bytes(e.count));
                if e.data.len() <= 4 {
                    let mut inline = e.data.clone();
                    inline.resize(4, 0);
                    out.extend(inline);
                } else {
                    out.extend(self.u32_bytes((data_at + data_area.len()) as u32));
                    data_area.extend(&e.data);
                    if data_area.len() % 2 == 1 {
                        data_area.push(0);
                    }
                }
            }
            out.extend(self.u32_bytes(0));
        }
        debug_assert_eq!(out.len(), data_at);
        out.extend(data_area);
        out
    }
}

/// Canon EOS R5 shot in San Francisco: 37°46'30"N 122°25'9"W.
pub(crate) fn scenario_tiff(endian: Endian) -> Vec<u8> {
    TiffBuilder::new(endian)
        .ascii(Directory::Primary, tags::MAKE, "Canon")
        .ascii(Directory::Primary, tags::MODEL, "EOS R5")
        .short(Directory::Primary, tags::ORIENTATION, 1)
        .ascii(Directory::Primary, tags::DATE_TIME, "2024:05:02 09:00:00")
        .short(Directory::Exif, tags::ISO_SPEED, 400)
        .rationals(Directory::Exif, tags::F_NUMBER, &[(28, 10)])
        .ascii(Directory::Exif, tags::DATE_TIME_ORIGINAL, "2024:05:01 11:04:59")
        .ascii(Directory::Gps, tags::GPS_LATITUDE_REF, "N")
        .rationals(Directory::Gps, tags::GPS_LATITUDE, &[(37, 1), (46, 1), (30, 1)])
        .ascii(Directory::Gps, tags::GPS_LONGITUDE_REF, "W")
        .rationals(Directory::Gps, tags::GPS_LONGITUDE, &[(122, 1), (25, 1), (9, 1)])
        .byte(Directory::Gps, tags::GPS_ALTITUDE_REF, 0)
        .rationals(Directory::Gps, tags::GPS_ALTITUDE, &[(16, 1)])
        .rationals(Directory::Gps, tags::GPS_TIME_STAMP, &[(18, 1), (4, 1), (59, 1)])
        .ascii(Directory::Gps, tags::GPS_DATE_STAMP, "2024:05:01")
        .build()
}

/// Prefixes a TIFF block with the Exif signature, as found in APP1.
pub(crate) fn with_signature(tiff: &[u8]) -> Vec<u8> {
    [b"Exif\0\0".as_slice(), tiff].concat()
}

/// A marker segment with a length field.
pub(crate) fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend(((payload.len() + 2) as u16).to_be_bytes());
    out.extend(payload);
    out
}

pub(crate) fn exif_app1(tiff: &[u8]) -> Vec<u8> {
    segment(0xE1, &with_signature(tiff))
}

/// A baseline 1x1 JPEG with `extra` inserted after APP0.
///
/// The scan data holds a stuffed `FF00` and an RST marker that must never
/// be interpreted by the walker.
pub(crate) fn jpeg_with(extra: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    out.extend(segment(0xE0, b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0"));
    for seg in extra {
        out.extend(seg);
    }
    let mut dqt = vec![0u8];
    dqt.extend([1u8; 64]);
    out.extend(segment(0xDB, &dqt));
    out.extend(segment(0xC0, &[8, 0, 1, 0, 1, 1, 1, 0x11, 0]));
    let mut dht = vec![0u8, 1];
    dht.extend([0u8; 15]);
    dht.push(0);
    out.extend(segment(0xC4, &dht));
    out.extend(segment(0xDA, &[1, 1, 0, 0, 63, 0]));
    out.extend([0x12, 0x34, 0xFF, 0x00, 0x56, 0xFF, 0xD0, 0x78, 0xFF, 0xE1, 0x9A]);
    out.extend([0xFF, 0xD9]);
    out
}

pub(crate) fn plain_jpeg() -> Vec<u8> {
    jpeg_with(&[])
}
