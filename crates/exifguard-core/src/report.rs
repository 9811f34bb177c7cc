// crates/exifguard-core/src/report.rs

use std::borrow::Cow;

use serde::Serialize;

use crate::gps::{self, GpsPoint};
use crate::tags::{self, Directory};
use crate::tiff::{ExifData, Ifd, TagValue};

/// One decoded entry as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub directory: Directory,
    pub tag: u16,
    pub name: Option<&'static str>,
    pub value: TagValue,
}

impl ReportEntry {
    /// The tag's name, or its id as `0xABCD` when it has none.
    pub fn label(&self) -> Cow<'static, str> {
        match self.name {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(format!("0x{:04X}", self.tag)),
        }
    }
}

/// The metadata summary handed to the UI for one image.
///
/// Built once from decoded IFDs and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReport {
    has_gps: bool,
    #[serde(flatten)]
    location: Option<GpsPoint>,
    altitude: Option<f64>,
    gps_timestamp: Option<String>,
    make: Option<String>,
    model: Option<String>,
    date_time: Option<String>,
    f_number: Option<f64>,
    iso: Option<u32>,
    entries: Vec<ReportEntry>,
}

fn text(ifd: Option<&Ifd>, tag: u16) -> Option<String> {
    let value = ifd?.get(tag)?.as_str()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl TagReport {
    /// Report for an image that carries no Exif block.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn build(exif: &ExifData) -> Self {
        let primary = exif.primary.as_ref();
        let sub = exif.exif.as_ref();

        let entries = [Directory::Primary, Directory::Exif, Directory::Gps]
            .into_iter()
            .filter_map(|dir| exif.directory(dir).map(|ifd| (dir, ifd)))
            .flat_map(|(dir, ifd)| {
                ifd.entries
                    .iter()
                    .filter(|e| !tags::is_pointer(e.tag))
                    .map(move |e| ReportEntry {
                        directory: dir,
                        tag: e.tag,
                        name: tags::name(dir, e.tag),
                        value: e.value.clone(),
                    })
            })
            .collect();

        let location = exif.gps.as_ref().and_then(gps::resolve);

        Self {
            has_gps: location.is_some(),
            location,
            altitude: exif.gps.as_ref().and_then(gps::altitude),
            gps_timestamp: exif.gps.as_ref().and_then(gps::timestamp),
            make: text(primary, tags::MAKE),
            model: text(primary, tags::MODEL),
            date_time: text(sub, tags::DATE_TIME_ORIGINAL)
                .or_else(|| text(primary, tags::DATE_TIME_ORIGINAL))
                .or_else(|| text(primary, tags::DATE_TIME)),
            f_number: sub
                .and_then(|ifd| ifd.get(tags::F_NUMBER))
                .and_then(TagValue::rationals)
                .and_then(|r| r.first())
                .and_then(|r| r.to_f64()),
            iso: sub
                .and_then(|ifd| ifd.get(tags::ISO_SPEED))
                .and_then(TagValue::first_uint),
            entries,
        }
    }

    pub fn has_gps(&self) -> bool {
        self.has_gps
    }

    pub fn location(&self) -> Option<GpsPoint> {
        self.location
    }

    pub fn altitude(&self) -> Option<f64> {
        self.altitude
    }

    pub fn gps_timestamp(&self) -> Option<&str> {
        self.gps_timestamp.as_deref()
    }

    pub fn make(&self) -> Option<&str> {
        self.make.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// DateTimeOriginal when present, otherwise DateTime.
    pub fn date_time(&self) -> Option<&str> {
        self.date_time.as_deref()
    }

    pub fn f_number(&self) -> Option<f64> {
        self.f_number
    }

    pub fn iso(&self) -> Option<u32> {
        self.iso
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Looks an entry up by name, or by `0xABCD` for unnamed tags.
    pub fn get(&self, label: &str) -> Option<&TagValue> {
        self.entries
            .iter()
            .find(|e| e.label() == label)
            .map(|e| &e.value)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && !self.has_gps
    }
}
