// crates/exifguard-core/src/jpeg.rs

use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::error::{GuardError, Result};
use crate::redact::strip_exif_segments;
use crate::report::TagReport;
use crate::{RawImage, ScrubResult, Scrubber, tiff};

pub const SOI: u16 = 0xFFD8;
pub const EOI: u16 = 0xFFD9;
pub const SOS: u16 = 0xFFDA;
pub const APP1: u16 = 0xFFE1;

/// Signature that opens the payload of an Exif APP1 segment.
pub const EXIF_SIGNATURE: &[u8; 6] = b"Exif\0\0";

/// One marker-delimited unit of the JPEG byte stream.
///
/// Segments never copy their payload; `payload` is a range into the buffer
/// the walker was created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub marker: u16,
    /// Offset of the marker's `0xFF` byte.
    pub offset: usize,
    /// Value of the length field (which counts itself), 0 for standalone markers.
    pub length: u16,
    pub payload: Range<usize>,
}

impl Segment {
    /// One past the last byte of this segment.
    pub fn end(&self) -> usize {
        if self.length == 0 {
            self.offset + 2
        } else {
            self.offset + 2 + self.length as usize
        }
    }

    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.payload.clone()]
    }

    /// True for APP1 segments whose payload starts with `Exif\0\0`.
    pub fn is_exif(&self, data: &[u8]) -> bool {
        self.marker == APP1 && self.payload(data).starts_with(EXIF_SIGNATURE)
    }
}

/// Markers that carry no length field.
fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD9)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    Start,
    Markers,
    Finished { trailing_start: usize },
    Failed,
}

/// Lazy iterator over the segments of a JPEG buffer.
///
/// Walking stops after Start-Of-Scan (everything behind it is entropy-coded
/// data) or End-Of-Image. Any structural violation is yielded once as
/// [`GuardError::MalformedContainer`] and ends the iteration. The walker is
/// `Clone`, so a walk can be restarted from any point.
#[derive(Debug, Clone)]
pub struct SegmentWalker<'a> {
    data: &'a [u8],
    pos: usize,
    state: WalkState,
}

impl<'a> SegmentWalker<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            state: WalkState::Start,
        }
    }

    /// The verbatim tail behind SOS (or EOI), once the walk has finished.
    pub fn trailing(&self) -> Option<Range<usize>> {
        match self.state {
            WalkState::Finished { trailing_start } => Some(trailing_start..self.data.len()),
            _ => None,
        }
    }

    fn fail(&mut self, offset: usize, reason: impl Into<String>) -> Option<Result<Segment>> {
        self.state = WalkState::Failed;
        Some(Err(GuardError::malformed(offset, reason)))
    }

    fn next_marker(&mut self) -> Option<Result<Segment>> {
        let data = self.data;
        if self.pos >= data.len() {
            return self.fail(self.pos, "end of data before SOS or EOI");
        }
        if data[self.pos] != 0xFF {
            let found = data[self.pos];
            return self.fail(self.pos, format!("expected marker, found 0x{found:02X}"));
        }

        // Any number of 0xFF fill bytes may precede the marker code.
        let mut code_at = self.pos + 1;
        while code_at < data.len() && data[code_at] == 0xFF {
            code_at += 1;
        }
        if code_at >= data.len() {
            return self.fail(self.pos, "marker truncated by end of data");
        }
        let code = data[code_at];
        let offset = code_at - 1;
        let marker = 0xFF00 | code as u16;
        if code == 0x00 {
            return self.fail(offset, "stuffed 0xFF00 outside scan data");
        }

        if is_standalone(code) {
            let end = code_at + 1;
            self.pos = end;
            if marker == EOI {
                self.state = WalkState::Finished {
                    trailing_start: end,
                };
            }
            debug!("segment 0x{marker:04X} at {offset} (standalone)");
            return Some(Ok(Segment {
                marker,
                offset,
                length: 0,
                payload: end..end,
            }));
        }

        if code_at + 3 > data.len() {
            return self.fail(offset, format!("length of 0x{marker:04X} truncated"));
        }
        let length = BigEndian::read_u16(&data[code_at + 1..code_at + 3]);
        if length < 2 {
            return self.fail(offset, format!("length {length} of 0x{marker:04X} is below 2"));
        }
        let end = code_at + 1 + length as usize;
        if end > data.len() {
            return self.fail(
                offset,
                format!(
                    "0x{marker:04X} declares {length} bytes but only {} remain",
                    data.len() - code_at - 1
                ),
            );
        }

        self.pos = end;
        if marker == SOS {
            self.state = WalkState::Finished {
                trailing_start: end,
            };
        }
        debug!("segment 0x{marker:04X} at {offset}, length {length}");
        Some(Ok(Segment {
            marker,
            offset,
            length,
            payload: code_at + 3..end,
        }))
    }
}

impl Iterator for SegmentWalker<'_> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            WalkState::Start => {
                if self.data.len() < 2 || BigEndian::read_u16(&self.data[..2]) != SOI {
                    return self.fail(0, "missing SOI marker");
                }
                self.pos = 2;
                self.state = WalkState::Markers;
                Some(Ok(Segment {
                    marker: SOI,
                    offset: 0,
                    length: 0,
                    payload: 2..2,
                }))
            }
            WalkState::Markers => self.next_marker(),
            WalkState::Finished { .. } | WalkState::Failed => None,
        }
    }
}

/// A fully walked JPEG: its segments in file order plus the opaque tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegLayout {
    pub segments: Vec<Segment>,
    pub trailing: Range<usize>,
}

impl JpegLayout {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut walker = SegmentWalker::new(data);
        let mut segments = Vec::new();
        for segment in walker.by_ref() {
            segments.push(segment?);
        }
        let trailing = walker
            .trailing()
            .ok_or_else(|| GuardError::malformed(data.len(), "walk ended without SOS or EOI"))?;
        Ok(Self { segments, trailing })
    }

    /// Every APP1 segment carrying the Exif signature, in file order.
    pub fn exif_segments<'a>(&'a self, data: &'a [u8]) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.is_exif(data))
    }

    /// Payload of the first Exif APP1 segment, signature included.
    pub fn metadata_block<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        self.exif_segments(data).next().map(|s| s.payload(data))
    }
}

/// A Scrubber implementation for JPEG files.
///
/// The segment list is walked once in `new` and shared by both the read
/// path (`view_metadata`) and the write path (`scrub`).
#[derive(Debug, Clone)]
pub struct JpegScrubber {
    image: RawImage,
    layout: JpegLayout,
}

impl JpegScrubber {
    pub fn layout(&self) -> &JpegLayout {
        &self.layout
    }
}

impl Scrubber for JpegScrubber {
    fn new(image: RawImage) -> Result<Self> {
        let layout = JpegLayout::parse(image.bytes())?;
        Ok(Self { image, layout })
    }

    fn view_metadata(&self) -> Result<TagReport> {
        match self.layout.metadata_block(self.image.bytes()) {
            Some(block) => Ok(TagReport::build(&tiff::decode(block)?)),
            None => Ok(TagReport::empty()),
        }
    }

    fn scrub(&self) -> Result<ScrubResult> {
        strip_exif_segments(self.image.bytes(), &self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{exif_app1, jpeg_with, plain_jpeg, segment, scenario_tiff};
    use crate::tiff::Endian;

    fn markers(data: &[u8]) -> Vec<u16> {
        SegmentWalker::new(data)
            .map(|s| s.unwrap().marker)
            .collect()
    }

    #[test]
    fn walks_plain_jpeg_up_to_sos() {
        let data = plain_jpeg();
        assert_eq!(
            markers(&data),
            vec![SOI, 0xFFE0, 0xFFDB, 0xFFC0, 0xFFC4, SOS]
        );

        let layout = JpegLayout::parse(&data).unwrap();
        let sos = layout.segments.last().unwrap();
        assert_eq!(layout.trailing, sos.end()..data.len());
        // Scan data ends with EOI but is never parsed.
        assert_eq!(&data[layout.trailing.clone()][layout.trailing.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn offsets_are_strictly_increasing_and_disjoint() {
        let data = jpeg_with(&[exif_app1(&scenario_tiff(Endian::Big))]);
        let layout = JpegLayout::parse(&data).unwrap();
        for pair in layout.segments.windows(2) {
            assert!(pair[0].offset < pair[1].offset);
            assert!(pair[0].end() <= pair[1].offset);
        }
    }

    #[test]
    fn missing_soi_is_malformed() {
        let err = JpegLayout::parse(&[0x89, b'P', b'N', b'G']).unwrap_err();
        assert!(matches!(err, GuardError::MalformedContainer { offset: 0, .. }));
        assert!(JpegLayout::parse(&[]).is_err());
    }

    #[test]
    fn truncated_length_at_every_position_is_malformed() {
        let data = jpeg_with(&[exif_app1(&scenario_tiff(Endian::Little))]);
        let layout = JpegLayout::parse(&data).unwrap();
        for seg in layout.segments.iter().filter(|s| s.length > 0) {
            // Cut the buffer inside this segment's payload.
            let cut = &data[..seg.end() - 1];
            let err = JpegLayout::parse(cut).unwrap_err();
            assert!(
                matches!(err, GuardError::MalformedContainer { .. }),
                "cut inside 0x{:04X} gave {err:?}",
                seg.marker
            );
        }
    }

    #[test]
    fn oversized_length_field_is_malformed() {
        let mut data = plain_jpeg();
        // APP0 length field sits right after SOI + marker.
        data[4] = 0xFF;
        data[5] = 0xF0;
        let err = JpegLayout::parse(&data).unwrap_err();
        assert!(matches!(err, GuardError::MalformedContainer { offset: 2, .. }));
    }

    #[test]
    fn end_of_data_before_sos_is_malformed() {
        let mut data = vec![0xFF, 0xD8];
        data.extend(segment(0xE0, b"JFIF\0"));
        let err = JpegLayout::parse(&data).unwrap_err();
        assert!(matches!(err, GuardError::MalformedContainer { .. }));
    }

    #[test]
    fn eoi_without_scan_finishes_the_walk() {
        let mut data = vec![0xFF, 0xD8];
        data.extend(segment(0xDB, &[0u8; 65]));
        data.extend([0xFF, 0xD9, 0xAA]);
        let layout = JpegLayout::parse(&data).unwrap();
        assert_eq!(layout.segments.last().unwrap().marker, EOI);
        assert_eq!(&data[layout.trailing.clone()], &[0xAA]);
    }

    #[test]
    fn fill_bytes_before_marker_are_skipped() {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xFF];
        data.extend(segment(0xE0, b"JFIF\0"));
        data.extend(segment(0xDA, &[0u8; 6]));
        let layout = JpegLayout::parse(&data).unwrap();
        assert_eq!(layout.segments[1].marker, 0xFFE0);
        assert_eq!(layout.segments[1].offset, 4);
    }

    #[test]
    fn walker_can_be_restarted_from_a_clone() {
        let data = plain_jpeg();
        let mut walker = SegmentWalker::new(&data);
        walker.next();
        let resume = walker.clone();
        let rest: Vec<_> = walker.map(|s| s.unwrap()).collect();
        let again: Vec<_> = resume.map(|s| s.unwrap()).collect();
        assert_eq!(rest, again);
    }

    #[test]
    fn only_first_exif_block_is_the_metadata_block() {
        let first = exif_app1(&scenario_tiff(Endian::Big));
        let second = exif_app1(&scenario_tiff(Endian::Little));
        let data = jpeg_with(&[first.clone(), second]);
        let layout = JpegLayout::parse(&data).unwrap();
        assert_eq!(layout.exif_segments(&data).count(), 2);
        assert_eq!(layout.metadata_block(&data).unwrap(), &first[4..]);
    }

    #[test]
    fn view_metadata_on_jpeg_without_exif_returns_empty() {
        let scrubber = JpegScrubber::new(RawImage::new(plain_jpeg(), "image/jpeg")).unwrap();
        let report = scrubber.view_metadata().unwrap();
        assert!(report.is_empty(), "found: {report:?}");
    }
}
