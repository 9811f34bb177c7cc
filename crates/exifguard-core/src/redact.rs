// crates/exifguard-core/src/redact.rs

use log::debug;

use crate::error::{GuardError, Result};
use crate::jpeg::{JpegLayout, Segment};
use crate::{RawImage, ScrubResult, Scrubber, scrubber_for};

/// Returns a copy of the image without its Exif APP1 segments.
///
/// Non-JPEG input comes back unchanged.
pub fn redact(image: &RawImage) -> Result<ScrubResult> {
    scrubber_for(image.clone())?.scrub()
}

/// Copies `data` while cutting out every Exif APP1 segment listed in `layout`.
///
/// All other bytes, including fill bytes, non-Exif APP1 segments and the
/// entropy-coded scan data, are copied verbatim and in order.
pub(crate) fn strip_exif_segments(data: &[u8], layout: &JpegLayout) -> Result<ScrubResult> {
    let removed: Vec<&Segment> = layout.exif_segments(data).collect();
    let removed_len: usize = removed.iter().map(|s| s.end() - s.offset).sum();

    let mut cleaned = Vec::new();
    cleaned
        .try_reserve_exact(data.len() - removed_len)
        .map_err(|e| GuardError::RedactionIoFailure(e.to_string()))?;

    let mut cursor = 0;
    for segment in &removed {
        debug!(
            "dropping Exif APP1 at {} ({} bytes)",
            segment.offset,
            segment.end() - segment.offset
        );
        cleaned.extend_from_slice(&data[cursor..segment.offset]);
        cursor = segment.end();
    }
    cleaned.extend_from_slice(&data[cursor..]);

    Ok(ScrubResult {
        cleaned_file_bytes: cleaned,
        segments_removed: removed.len(),
        bytes_removed: removed_len,
    })
}
