// crates/exifguard-core/src/tags.rs

//! Tag ids and display names for the three directories we decode.

use std::fmt;

use serde::Serialize;

// Primary IFD
pub const IMAGE_DESCRIPTION: u16 = 0x010E;
pub const MAKE: u16 = 0x010F;
pub const MODEL: u16 = 0x0110;
pub const ORIENTATION: u16 = 0x0112;
pub const DATE_TIME: u16 = 0x0132;
pub const EXIF_IFD_POINTER: u16 = 0x8769;
pub const GPS_IFD_POINTER: u16 = 0x8825;

// EXIF sub-IFD
pub const F_NUMBER: u16 = 0x829D;
pub const ISO_SPEED: u16 = 0x8827;
pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
pub const INTEROP_IFD_POINTER: u16 = 0xA005;

// GPS sub-IFD
pub const GPS_LATITUDE_REF: u16 = 0x0001;
pub const GPS_LATITUDE: u16 = 0x0002;
pub const GPS_LONGITUDE_REF: u16 = 0x0003;
pub const GPS_LONGITUDE: u16 = 0x0004;
pub const GPS_ALTITUDE_REF: u16 = 0x0005;
pub const GPS_ALTITUDE: u16 = 0x0006;
pub const GPS_TIME_STAMP: u16 = 0x0007;
pub const GPS_DATE_STAMP: u16 = 0x001D;

/// Which IFD an entry was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Directory {
    Primary,
    Exif,
    Gps,
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Directory::Primary => "IFD0",
            Directory::Exif => "EXIF",
            Directory::Gps => "GPS",
        })
    }
}

/// True for tags that only locate another IFD.
pub fn is_pointer(tag: u16) -> bool {
    matches!(tag, EXIF_IFD_POINTER | GPS_IFD_POINTER | INTEROP_IFD_POINTER)
}

/// Human-readable name of a well-known tag.
pub fn name(dir: Directory, tag: u16) -> Option<&'static str> {
    match dir {
        Directory::Gps => gps_name(tag),
        Directory::Primary | Directory::Exif => image_name(tag),
    }
}

fn gps_name(tag: u16) -> Option<&'static str> {
    Some(match tag {
        0x0000 => "GPSVersionID",
        GPS_LATITUDE_REF => "GPSLatitudeRef",
        GPS_LATITUDE => "GPSLatitude",
        GPS_LONGITUDE_REF => "GPSLongitudeRef",
        GPS_LONGITUDE => "GPSLongitude",
        GPS_ALTITUDE_REF => "GPSAltitudeRef",
        GPS_ALTITUDE => "GPSAltitude",
        GPS_TIME_STAMP => "GPSTimeStamp",
        0x0008 => "GPSSatellites",
        0x0009 => "GPSStatus",
        0x000A => "GPSMeasureMode",
        0x000B => "GPSDOP",
        0x000C => "GPSSpeedRef",
        0x000D => "GPSSpeed",
        0x000E => "GPSTrackRef",
        0x000F => "GPSTrack",
        0x0010 => "GPSImgDirectionRef",
        0x0011 => "GPSImgDirection",
        0x0012 => "GPSMapDatum",
        0x001B => "GPSProcessingMethod",
        GPS_DATE_STAMP => "GPSDateStamp",
        0x001F => "GPSHPositioningError",
        _ => return None,
    })
}

fn image_name(tag: u16) -> Option<&'static str> {
    Some(match tag {
        IMAGE_DESCRIPTION => "ImageDescription",
        MAKE => "Make",
        MODEL => "Model",
        ORIENTATION => "Orientation",
        0x011A => "XResolution",
        0x011B => "YResolution",
        0x0128 => "ResolutionUnit",
        0x0131 => "Software",
        DATE_TIME => "DateTime",
        0x013B => "Artist",
        0x0213 => "YCbCrPositioning",
        0x8298 => "Copyright",
        0x829A => "ExposureTime",
        F_NUMBER => "FNumber",
        0x8822 => "ExposureProgram",
        ISO_SPEED => "ISOSpeedRatings",
        0x9000 => "ExifVersion",
        DATE_TIME_ORIGINAL => "DateTimeOriginal",
        0x9004 => "DateTimeDigitized",
        0x9010 => "OffsetTime",
        0x9011 => "OffsetTimeOriginal",
        0x9201 => "ShutterSpeedValue",
        0x9202 => "ApertureValue",
        0x9204 => "ExposureBiasValue",
        0x9207 => "MeteringMode",
        0x9209 => "Flash",
        0x920A => "FocalLength",
        0x927C => "MakerNote",
        0x9286 => "UserComment",
        0x9290 => "SubSecTime",
        0x9291 => "SubSecTimeOriginal",
        0xA001 => "ColorSpace",
        0xA002 => "PixelXDimension",
        0xA003 => "PixelYDimension",
        0xA402 => "ExposureMode",
        0xA403 => "WhiteBalance",
        0xA405 => "FocalLengthIn35mmFilm",
        0xA406 => "SceneCaptureType",
        0xA420 => "ImageUniqueID",
        0xA430 => "CameraOwnerName",
        0xA431 => "BodySerialNumber",
        0xA433 => "LensMake",
        0xA434 => "LensModel",
        0xA435 => "LensSerialNumber",
        _ => return None,
    })
}
