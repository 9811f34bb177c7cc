// crates/exifguard-core/src/tiff.rs

//! Decoder for the TIFF structure embedded in an Exif APP1 payload.
//!
//! Offsets inside the block are relative to the TIFF header that follows
//! the `Exif\0\0` signature. Every read is bounds-checked against the block,
//! so a hostile offset can only ever cost one entry.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, warn};
use serde::Serialize;

use crate::error::{GuardError, Result};
use crate::jpeg::EXIF_SIGNATURE;
use crate::tags::{self, Directory};

const ENTRY_SIZE: usize = 12;
const TIFF_MAGIC: u16 = 42;

/// Byte order declared by the TIFF header (`II` or `MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u16(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(buf),
            Endian::Big => BigEndian::read_u16(buf),
        }
    }

    fn u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    fn i16(self, buf: &[u8]) -> i16 {
        self.u16(buf) as i16
    }

    fn i32(self, buf: &[u8]) -> i32 {
        self.u32(buf) as i32
    }

    fn f32(self, buf: &[u8]) -> f32 {
        match self {
            Endian::Little => LittleEndian::read_f32(buf),
            Endian::Big => BigEndian::read_f32(buf),
        }
    }

    fn f64(self, buf: &[u8]) -> f64 {
        match self {
            Endian::Little => LittleEndian::read_f64(buf),
            Endian::Big => BigEndian::read_f64(buf),
        }
    }
}

/// The twelve TIFF field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryType {
    Byte,
    Ascii,
    Short,
    Long,
    Rational,
    SByte,
    Undefined,
    SShort,
    SLong,
    SRational,
    Float,
    Double,
}

impl EntryType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Self::Byte,
            2 => Self::Ascii,
            3 => Self::Short,
            4 => Self::Long,
            5 => Self::Rational,
            6 => Self::SByte,
            7 => Self::Undefined,
            8 => Self::SShort,
            9 => Self::SLong,
            10 => Self::SRational,
            11 => Self::Float,
            12 => Self::Double,
            _ => return None,
        })
    }

    /// Size in bytes of one value of this type.
    pub fn size(self) -> usize {
        match self {
            Self::Byte | Self::Ascii | Self::SByte | Self::Undefined => 1,
            Self::Short | Self::SShort => 2,
            Self::Long | Self::SLong | Self::Float => 4,
            Self::Rational | Self::SRational | Self::Double => 8,
        }
    }
}

/// A numerator/denominator pair, signed or unsigned depending on the field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rational {
    pub numerator: i64,
    pub denominator: i64,
}

/// Result of dividing a [`Rational`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RationalValue {
    Number(f64),
    /// The denominator was zero.
    NotANumber,
}

impl Rational {
    pub fn new(numerator: i64, denominator: i64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn value(self) -> RationalValue {
        if self.denominator == 0 {
            RationalValue::NotANumber
        } else {
            RationalValue::Number(self.numerator as f64 / self.denominator as f64)
        }
    }

    pub fn to_f64(self) -> Option<f64> {
        match self.value() {
            RationalValue::Number(n) => Some(n),
            RationalValue::NotANumber => None,
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum TagValue {
    Byte(Vec<u8>),
    /// NUL padding already trimmed.
    Ascii(String),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Rational(Vec<Rational>),
    SByte(Vec<i8>),
    Undefined(Vec<u8>),
    SShort(Vec<i16>),
    SLong(Vec<i32>),
    SRational(Vec<Rational>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl TagValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// First value of an unsigned integer field.
    pub fn first_uint(&self) -> Option<u32> {
        match self {
            TagValue::Byte(v) => v.first().map(|&b| b as u32),
            TagValue::Short(v) => v.first().map(|&s| s as u32),
            TagValue::Long(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn rationals(&self) -> Option<&[Rational]> {
        match self {
            TagValue::Rational(v) | TagValue::SRational(v) => Some(v),
            _ => None,
        }
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{v}")?;
    }
    Ok(())
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Ascii(s) => f.write_str(s),
            TagValue::Byte(v) => join(f, v),
            TagValue::Short(v) => join(f, v),
            TagValue::Long(v) => join(f, v),
            TagValue::Rational(v) | TagValue::SRational(v) => join(f, v),
            TagValue::SByte(v) => join(f, v),
            TagValue::SShort(v) => join(f, v),
            TagValue::SLong(v) => join(f, v),
            TagValue::Float(v) => join(f, v),
            TagValue::Double(v) => join(f, v),
            TagValue::Undefined(v) if v.len() > 16 => write!(f, "({} bytes)", v.len()),
            TagValue::Undefined(v) => {
                for b in v {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfdEntry {
    pub tag: u16,
    pub kind: EntryType,
    pub count: u32,
    pub value: TagValue,
}

/// An Image File Directory: its decodable entries plus the next-IFD link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub next_ifd: u32,
}

impl Ifd {
    pub fn get(&self, tag: u16) -> Option<&TagValue> {
        self.entries.iter().find(|e| e.tag == tag).map(|e| &e.value)
    }

    fn pointer(&self, tag: u16) -> Option<u32> {
        self.get(tag).and_then(TagValue::first_uint)
    }
}

/// Everything decoded from one Exif block.
#[derive(Debug, Clone, PartialEq)]
pub struct ExifData {
    pub endian: Endian,
    pub primary: Option<Ifd>,
    pub exif: Option<Ifd>,
    pub gps: Option<Ifd>,
    /// Entries dropped because their data could not be read.
    pub skipped: Vec<GuardError>,
}

impl ExifData {
    pub fn directory(&self, dir: Directory) -> Option<&Ifd> {
        match dir {
            Directory::Primary => self.primary.as_ref(),
            Directory::Exif => self.exif.as_ref(),
            Directory::Gps => self.gps.as_ref(),
        }
    }
}

/// Decodes an APP1 payload that starts with the Exif signature.
pub fn decode(payload: &[u8]) -> Result<ExifData> {
    let tiff = payload
        .strip_prefix(EXIF_SIGNATURE.as_slice())
        .ok_or_else(|| GuardError::InvalidMetadataBlock("missing Exif signature".into()))?;
    if tiff.len() < 8 {
        return Err(GuardError::InvalidMetadataBlock(format!(
            "TIFF header needs 8 bytes, block has {}",
            tiff.len()
        )));
    }
    let endian = match &tiff[..2] {
        b"II" => Endian::Little,
        b"MM" => Endian::Big,
        other => {
            return Err(GuardError::InvalidMetadataBlock(format!(
                "unknown byte order mark {other:02X?}"
            )));
        }
    };
    let magic = endian.u16(&tiff[2..4]);
    if magic != TIFF_MAGIC {
        return Err(GuardError::InvalidMetadataBlock(format!(
            "TIFF magic is {magic}, expected {TIFF_MAGIC}"
        )));
    }

    let mut reader = IfdReader {
        tiff,
        endian,
        skipped: Vec::new(),
    };
    let primary = reader.read_ifd(endian.u32(&tiff[4..8]), Directory::Primary);
    let (mut exif, mut gps) = (None, None);
    if let Some(ifd) = &primary {
        if ifd.next_ifd != 0 {
            debug!("ignoring IFD chain link to offset {}", ifd.next_ifd);
        }
        if let Some(offset) = ifd.pointer(tags::EXIF_IFD_POINTER) {
            exif = reader.read_ifd(offset, Directory::Exif);
        }
        if let Some(offset) = ifd.pointer(tags::GPS_IFD_POINTER) {
            gps = reader.read_ifd(offset, Directory::Gps);
        }
    }

    Ok(ExifData {
        endian,
        primary,
        exif,
        gps,
        skipped: reader.skipped,
    })
}

struct IfdReader<'a> {
    tiff: &'a [u8],
    endian: Endian,
    skipped: Vec<GuardError>,
}

impl IfdReader<'_> {
    fn read_ifd(&mut self, offset: u32, dir: Directory) -> Option<Ifd> {
        let len = self.tiff.len();
        let start = offset as usize;
        if start.checked_add(2).is_none_or(|end| end > len) {
            warn!("{dir} IFD offset {start} lies outside the {len}-byte block");
            return None;
        }
        let declared = self.endian.u16(&self.tiff[start..start + 2]) as usize;
        let entries_at = start + 2;
        let fitting = (len - entries_at) / ENTRY_SIZE;
        if declared > fitting {
            warn!("{dir} IFD declares {declared} entries, only {fitting} fit in the block");
        }

        let mut ifd = Ifd::default();
        for i in 0..declared.min(fitting) {
            let at = entries_at + i * ENTRY_SIZE;
            match self.read_entry(&self.tiff[at..at + ENTRY_SIZE]) {
                Ok(entry) => ifd.entries.push(entry),
                Err(err) => {
                    warn!("{dir} IFD: {err}");
                    self.skipped.push(err);
                }
            }
        }

        let link_at = entries_at + declared * ENTRY_SIZE;
        if link_at + 4 <= len {
            ifd.next_ifd = self.endian.u32(&self.tiff[link_at..link_at + 4]);
        }
        debug!("{dir} IFD at {start}: {} entries", ifd.entries.len());
        Some(ifd)
    }

    fn read_entry(&self, record: &[u8]) -> Result<IfdEntry> {
        let e = self.endian;
        let tag = e.u16(&record[0..2]);
        let raw_type = e.u16(&record[2..4]);
        let count = e.u32(&record[4..8]);
        let field = &record[8..12];

        let kind = EntryType::from_u16(raw_type)
            .ok_or_else(|| GuardError::skipped(tag, format!("unknown field type {raw_type}")))?;
        let size = (count as usize)
            .checked_mul(kind.size())
            .ok_or_else(|| GuardError::skipped(tag, format!("count {count} overflows")))?;

        let data = if size <= 4 {
            &field[..size]
        } else {
            let offset = e.u32(field) as usize;
            let len = self.tiff.len();
            match offset.checked_add(size) {
                Some(end) if end <= len => &self.tiff[offset..end],
                _ => {
                    return Err(GuardError::skipped(
                        tag,
                        format!("{size} bytes at offset {offset} exceed the {len}-byte block"),
                    ));
                }
            }
        };

        Ok(IfdEntry {
            tag,
            kind,
            count,
            value: decode_value(e, kind, data),
        })
    }
}

fn decode_value(e: Endian, kind: EntryType, data: &[u8]) -> TagValue {
    let chunks = |n: usize| data.chunks_exact(n);
    match kind {
        EntryType::Byte => TagValue::Byte(data.to_vec()),
        EntryType::Undefined => TagValue::Undefined(data.to_vec()),
        EntryType::SByte => TagValue::SByte(data.iter().map(|&b| b as i8).collect()),
        EntryType::Ascii => {
            let text = String::from_utf8_lossy(data);
            TagValue::Ascii(text.trim_end_matches('\0').to_string())
        }
        EntryType::Short => TagValue::Short(chunks(2).map(|c| e.u16(c)).collect()),
        EntryType::SShort => TagValue::SShort(chunks(2).map(|c| e.i16(c)).collect()),
        EntryType::Long => TagValue::Long(chunks(4).map(|c| e.u32(c)).collect()),
        EntryType::SLong => TagValue::SLong(chunks(4).map(|c| e.i32(c)).collect()),
        EntryType::Float => TagValue::Float(chunks(4).map(|c| e.f32(c)).collect()),
        EntryType::Double => TagValue::Double(chunks(8).map(|c| e.f64(c)).collect()),
        EntryType::Rational => TagValue::Rational(
            chunks(8)
                .map(|c| Rational::new(e.u32(&c[..4]) as i64, e.u32(&c[4..]) as i64))
                .collect(),
        ),
        EntryType::SRational => TagValue::SRational(
            chunks(8)
                .map(|c| Rational::new(e.i32(&c[..4]) as i64, e.i32(&c[4..]) as i64))
                .collect(),
        ),
    }
}
