// crates/exifguard-core/src/lib.rs

//! Reads and removes the Exif block (camera identity, GPS position,
//! timestamps) of JPEG images without touching the compressed pixel data.
//!
//! The core never touches the filesystem or network: callers hand in owned
//! bytes plus a declared content type and get back a [`TagReport`] and, on
//! request, a cleaned byte buffer.

pub mod batch;
pub mod error;
pub mod gps;
pub mod jpeg;
pub mod redact;
pub mod report;
pub mod tags;
pub mod tiff;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

pub use batch::{Batch, BatchConfig, BatchOutput, ProcessingRecord, ProcessingState, RecordId};
pub use error::{GuardError, Result};
pub use gps::GpsPoint;
pub use jpeg::JpegScrubber;
pub use redact::redact;
pub use report::{ReportEntry, TagReport};

const JPEG_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/pjpeg"];

/// Immutable image bytes plus the content type the caller declared.
///
/// Cloning is cheap; the buffer is shared, never mutated.
#[derive(Debug, Clone)]
pub struct RawImage {
    bytes: Arc<[u8]>,
    content_type: String,
}

impl RawImage {
    pub fn new(bytes: impl Into<Arc<[u8]>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// True when the declared type allows JPEG and the buffer starts with SOI.
    ///
    /// An empty or `application/octet-stream` declaration defers to the bytes.
    pub fn is_jpeg(&self) -> bool {
        let declared = self.content_type.trim();
        let declared_ok = declared.is_empty()
            || declared.eq_ignore_ascii_case("application/octet-stream")
            || JPEG_CONTENT_TYPES
                .iter()
                .any(|t| declared.eq_ignore_ascii_case(t));
        declared_ok && self.bytes.starts_with(&[0xFF, 0xD8])
    }
}

/// The result of a successful scrub operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubResult {
    /// The bytes of the new, cleaned file.
    pub cleaned_file_bytes: Vec<u8>,
    /// How many Exif segments were cut out.
    pub segments_removed: usize,
    pub bytes_removed: usize,
}

/// The central trait of our library.
/// Any container we handle must implement this trait.
pub trait Scrubber {
    /// Creates a new Scrubber instance from an image.
    /// This will also parse the container to ensure it's valid.
    fn new(image: RawImage) -> Result<Self>
    where
        Self: Sized;

    /// Decodes the embedded metadata into a report.
    fn view_metadata(&self) -> Result<TagReport>;

    /// Removes all identifiable metadata.
    fn scrub(&self) -> Result<ScrubResult>;
}

/// Scrubber for containers we do not parse. They are reported as clean and
/// returned unchanged.
#[derive(Debug, Clone)]
pub struct PassThroughScrubber {
    image: RawImage,
}

impl Scrubber for PassThroughScrubber {
    fn new(image: RawImage) -> Result<Self> {
        Ok(Self { image })
    }

    fn view_metadata(&self) -> Result<TagReport> {
        Ok(TagReport::empty())
    }

    fn scrub(&self) -> Result<ScrubResult> {
        let mut cleaned = Vec::new();
        cleaned
            .try_reserve_exact(self.image.bytes().len())
            .map_err(|e| GuardError::RedactionIoFailure(e.to_string()))?;
        cleaned.extend_from_slice(self.image.bytes());
        Ok(ScrubResult {
            cleaned_file_bytes: cleaned,
            segments_removed: 0,
            bytes_removed: 0,
        })
    }
}

/// Detects the container and returns the appropriate scrubber.
/// This is the main entry point for consumers of the library.
pub fn scrubber_for(image: RawImage) -> Result<Box<dyn Scrubber + Send>> {
    if image.is_jpeg() {
        return Ok(Box::new(JpegScrubber::new(image)?));
    }
    log::debug!(
        "{} is not a JPEG, passing through",
        match image.content_type() {
            "" => "untyped input",
            other => other,
        }
    );
    Ok(Box::new(PassThroughScrubber::new(image)?))
}

/// Runs the read path: walk segments, decode the first Exif block, build the report.
pub fn extract(image: &RawImage) -> Result<TagReport> {
    scrubber_for(image.clone())?.view_metadata()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{exif_app1, jpeg_with, plain_jpeg, scenario_tiff, segment};
    use crate::tiff::Endian;

    #[test]
    fn content_type_decides_jpeg_handling() {
        let bytes = plain_jpeg();
        assert!(RawImage::new(bytes.clone(), "image/jpeg").is_jpeg());
        assert!(RawImage::new(bytes.clone(), "IMAGE/JPG").is_jpeg());
        assert!(RawImage::new(bytes.clone(), "").is_jpeg());
        assert!(RawImage::new(bytes.clone(), "application/octet-stream").is_jpeg());
        assert!(!RawImage::new(bytes, "image/png").is_jpeg());
        assert!(!RawImage::new(vec![0x89, b'P'], "image/jpeg").is_jpeg());
    }

    #[test]
    fn scenario_canon_with_gps() {
        let image = RawImage::new(
            jpeg_with(&[exif_app1(&scenario_tiff(Endian::Big))]),
            "image/jpeg",
        );
        let report = extract(&image).unwrap();
        assert_eq!(report.make(), Some("Canon"));
        assert_eq!(report.model(), Some("EOS R5"));
        assert!(report.has_gps());
        let p = report.location().unwrap();
        assert!((p.latitude - 37.775).abs() < 1e-3);
        assert!((p.longitude - -122.419).abs() < 1e-3);
    }

    #[test]
    fn scenario_redacted_image_has_no_metadata() {
        let original = jpeg_with(&[exif_app1(&scenario_tiff(Endian::Big))]);
        let cleaned = redact(&RawImage::new(original.clone(), "image/jpeg"))
            .unwrap()
            .cleaned_file_bytes;

        let report = extract(&RawImage::new(cleaned.clone(), "image/jpeg")).unwrap();
        assert!(!report.has_gps());
        assert_eq!(report.make(), None);
        assert_eq!(report.model(), None);

        // Non-metadata segments and scan data survive byte for byte.
        let before = jpeg::JpegLayout::parse(&original).unwrap();
        let after = jpeg::JpegLayout::parse(&cleaned).unwrap();
        let kept: Vec<&[u8]> = before
            .segments
            .iter()
            .filter(|s| !s.is_exif(&original))
            .map(|s| &original[s.offset..s.end()])
            .collect();
        let now: Vec<&[u8]> = after
            .segments
            .iter()
            .map(|s| &cleaned[s.offset..s.end()])
            .collect();
        assert_eq!(kept, now);
        assert_eq!(&original[before.trailing], &cleaned[after.trailing]);
    }

    #[test]
    fn scenario_empty_app1_yields_empty_report() {
        let image = RawImage::new(jpeg_with(&[segment(0xE1, b"")]), "image/jpeg");
        let scrubber = JpegScrubber::new(image).unwrap();
        let report = scrubber.view_metadata().unwrap();
        assert!(report.is_empty());
        assert!(!report.has_gps());
        assert_eq!(report.make(), None);
    }

    #[test]
    fn corrupt_exif_header_is_invalid_metadata_block() {
        let mut app1 = exif_app1(&scenario_tiff(Endian::Big));
        // "MM" sits right after marker, length and signature.
        app1[10] = b'Q';
        let image = RawImage::new(jpeg_with(&[app1]), "image/jpeg");
        assert!(matches!(
            extract(&image),
            Err(GuardError::InvalidMetadataBlock(_))
        ));
    }

    #[test]
    fn non_jpeg_extracts_to_empty_report() {
        let image = RawImage::new(b"\x89PNG\r\n\x1a\n".to_vec(), "image/png");
        assert!(extract(&image).unwrap().is_empty());
    }
}
