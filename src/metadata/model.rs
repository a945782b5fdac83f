//! Container-independent metadata model.
//!
//! A metadata segment decodes into a [`MetadataMap`]: an insertion-ordered
//! mapping from tag name to [`MetadataValue`]. The map keeps the first
//! occurrence of a tag; later duplicates are reported to the caller as
//! warnings and dropped.

use crate::container::Segment;
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Encoding of a metadata segment's payload.
///
/// Assigned by the container codec from the segment's marker or chunk type
/// and identifier; it selects the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    /// TIFF-structured Exif block (`APP1 Exif\0\0`, PNG `eXIf`).
    Exif,
    /// XMP packet (`APP1`).
    Xmp,
    /// Extended XMP continuation (`APP1`).
    XmpExtension,
    /// ICC profile chunk (`APP2 ICC_PROFILE`).
    Icc,
    /// zlib-compressed ICC profile (PNG `iCCP`).
    CompressedIcc,
    /// Photoshop image resources including IPTC (`APP13`).
    Photoshop,
    /// Multi-picture format index (`APP2 MPF`).
    Mpf,
    /// JFIF extension thumbnail (`APP0 JFXX`).
    Jfxx,
    /// JPEG comment (`COM`).
    Comment,
    /// PNG `tEXt`.
    Text,
    /// PNG `zTXt`.
    CompressedText,
    /// PNG `iTXt`.
    InternationalText,
    /// PNG `tIME`.
    Time,
    /// Unrecognized application segment `APPn`.
    Application(u8),
    /// Bytes following the end-of-image marker or chunk.
    Trailer,
}

impl MetadataKind {
    /// Name used for opaque entries and in logs.
    pub fn name(&self) -> String {
        match self {
            Self::Exif => "Exif".to_string(),
            Self::Xmp => "XMP".to_string(),
            Self::XmpExtension => "XMPExtension".to_string(),
            Self::Icc | Self::CompressedIcc => "ICCProfile".to_string(),
            Self::Photoshop => "Photoshop".to_string(),
            Self::Mpf => "MPF".to_string(),
            Self::Jfxx => "JFXX".to_string(),
            Self::Comment => "Comment".to_string(),
            Self::Text => "tEXt".to_string(),
            Self::CompressedText => "zTXt".to_string(),
            Self::InternationalText => "iTXt".to_string(),
            Self::Time => "tIME".to_string(),
            Self::Application(n) => format!("APP{}", n),
            Self::Trailer => "Trailer".to_string(),
        }
    }
}

/// Typed value of a metadata tag.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// Any signed or unsigned integer field.
    Integer(i64),
    /// Signed or unsigned rational.
    Rational { numerator: i64, denominator: i64 },
    /// Floating point field.
    Float(f64),
    /// Decoded text.
    Text(String),
    /// Opaque bytes: undefined fields, unknown types, undecodable strings.
    Bytes(Vec<u8>),
    /// Multi-valued field.
    List(Vec<MetadataValue>),
    /// Nested directory.
    Directory(MetadataMap),
}

impl MetadataValue {
    /// Returns the integer value, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the nested directory, if this is one.
    pub fn as_directory(&self) -> Option<&MetadataMap> {
        match self {
            Self::Directory(map) => Some(map),
            _ => None,
        }
    }

    /// Returns true for opaque byte values.
    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Bytes(_))
    }
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Integer(v) => serializer.serialize_i64(*v),
            Self::Rational {
                numerator,
                denominator,
            } => {
                if *denominator == 0 {
                    serializer.serialize_none()
                } else {
                    serializer.serialize_f64(*numerator as f64 / *denominator as f64)
                }
            }
            Self::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Self::Float(_) => serializer.serialize_none(),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Bytes(bytes) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "bytes")?;
                map.serialize_entry("hex", &hex::encode(bytes))?;
                map.end()
            }
            Self::List(values) => values.serialize(serializer),
            Self::Directory(map) => map.serialize(serializer),
        }
    }
}

/// Insertion-ordered tag mapping where the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataMap {
    entries: IndexMap<String, MetadataValue>,
}

impl MetadataMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a tag.
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    /// Iterates tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Tag names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Inserts a tag unless it already exists.
    ///
    /// Returns false, leaving the map unchanged, for a duplicate.
    pub fn insert_first(&mut self, key: impl Into<String>, value: MetadataValue) -> bool {
        match self.entries.entry(key.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Appends every tag of `other` that is not already present.
    ///
    /// Returns the names of the dropped duplicates.
    pub fn merge_first(&mut self, other: MetadataMap) -> Vec<String> {
        let mut duplicates = Vec::new();
        for (key, value) in other.entries {
            if self.entries.contains_key(&key) {
                duplicates.push(key);
            } else {
                self.entries.insert(key, value);
            }
        }
        duplicates
    }

    /// Serializes the map as a JSON document.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Serialize for MetadataMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl FromIterator<(String, MetadataValue)> for MetadataMap {
    fn from_iter<I: IntoIterator<Item = (String, MetadataValue)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert_first(key, value);
        }
        map
    }
}

/// A container segment holding metadata, with its payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataSegment {
    /// Position of the segment within the container.
    pub segment: Segment,
    /// Encoding of the payload.
    pub kind: MetadataKind,
}

/// Result of extracting one metadata segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Decoded tags in source order.
    pub entries: MetadataMap,
    /// Non-fatal anomalies: duplicates, undecodable strings, unknown types.
    pub warnings: Vec<String>,
}
