//! Wire values for remote calls.
//!
//! Scalar values travel as plain text so that `curl` against an object
//! server stays readable. Compound values (byte blobs and lists) travel as
//! a JSON archive prefixed with a short magic line, which keeps them
//! distinguishable from a string that merely looks numeric.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Prefix of a text archive payload.
pub const TEXT_ARCHIVE_MAGIC: &[u8] = b"#OGA1\n";
/// Prefix of a binary archive payload. Recognized so that the decoder can
/// reject it cleanly rather than misread it as text.
pub const BINARY_ARCHIVE_MAGIC: &[u8] = b"\x7fOGA1";

/// A dynamically typed call argument, return value, or property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Variant {
    Int(i64),
    Double(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Variant>),
}

/// Type tag of a [`Variant`], used in declarations and overload matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Int,
    Double,
    Bool,
    String,
    Bytes,
    List,
}

impl VariantKind {
    /// Declaration name as it appears in discovery listings.
    pub fn type_name(&self) -> &'static str {
        match self {
            VariantKind::Int => "int",
            VariantKind::Double => "double",
            VariantKind::Bool => "bool",
            VariantKind::String => "string",
            VariantKind::Bytes => "bytes",
            VariantKind::List => "list",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(VariantKind::Int),
            "double" => Some(VariantKind::Double),
            "bool" => Some(VariantKind::Bool),
            "string" => Some(VariantKind::String),
            "bytes" => Some(VariantKind::Bytes),
            "list" => Some(VariantKind::List),
            _ => None,
        }
    }
}

impl std::fmt::Display for VariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Variant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Int(_) => VariantKind::Int,
            Variant::Double(_) => VariantKind::Double,
            Variant::Bool(_) => VariantKind::Bool,
            Variant::String(_) => VariantKind::String,
            Variant::Bytes(_) => VariantKind::Bytes,
            Variant::List(_) => VariantKind::List,
        }
    }

    /// Score how well a value of kind `actual` satisfies a declared
    /// parameter kind. Exact matches beat numeric coercions; anything else
    /// does not match.
    pub fn match_score(actual: VariantKind, declared: VariantKind) -> Option<u32> {
        if actual == declared {
            return Some(2);
        }
        match (actual, declared) {
            (VariantKind::Int, VariantKind::Double)
            | (VariantKind::Double, VariantKind::Int) => Some(1),
            _ => None,
        }
    }

    /// Coerce this value to the declared kind, where [`match_score`]
    /// permits it.
    ///
    /// [`match_score`]: Variant::match_score
    pub fn coerce(self, declared: VariantKind) -> Option<Variant> {
        if self.kind() == declared {
            return Some(self);
        }
        match (self, declared) {
            (Variant::Int(i), VariantKind::Double) => Some(Variant::Double(i as f64)),
            (Variant::Double(d), VariantKind::Int) => Some(Variant::Int(d as i64)),
            _ => None,
        }
    }

    /// Encode for the wire.
    ///
    /// Scalars become bare text. Strings travel wrapped in one pair of
    /// double quotes so that `"7"` stays a string, falling back to an
    /// archive when the content itself would be ambiguous. Bytes and lists
    /// always travel as an archive.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Variant::Int(i) => i.to_string().into_bytes(),
            // {:?} keeps a fractional point on round doubles, so "1.0"
            // decodes back as a double rather than an int.
            Variant::Double(d) => format!("{d:?}").into_bytes(),
            Variant::Bool(b) => if *b { b"true".to_vec() } else { b"false".to_vec() },
            Variant::String(s) => {
                if s.contains('"') || s.chars().any(|c| c.is_control()) {
                    self.encode_archive()
                } else {
                    format!("\"{s}\"").into_bytes()
                }
            }
            Variant::Bytes(_) | Variant::List(_) => self.encode_archive(),
        }
    }

    fn encode_archive(&self) -> Vec<u8> {
        let mut out = TEXT_ARCHIVE_MAGIC.to_vec();
        // Serialization of this enum shape cannot fail.
        match serde_json::to_vec(self) {
            Ok(body) => out.extend_from_slice(&body),
            Err(err) => warn!(error = %err, "variant archive encode failed"),
        }
        out
    }

    /// Decode a wire payload.
    ///
    /// Precedence: archive magic, then full integer, full float, boolean
    /// literal, and finally string (stripping one surrounding quote pair
    /// when present). A corrupt archive degrades to an empty string rather
    /// than failing the call.
    pub fn decode(data: &[u8]) -> Variant {
        if data.starts_with(TEXT_ARCHIVE_MAGIC) {
            return match serde_json::from_slice(&data[TEXT_ARCHIVE_MAGIC.len()..]) {
                Ok(v) => v,
                Err(err) => {
                    warn!(error = %err, "corrupt variant archive, substituting empty string");
                    Variant::String(String::new())
                }
            };
        }
        if data.starts_with(BINARY_ARCHIVE_MAGIC) {
            warn!("binary variant archive not supported, substituting empty string");
            return Variant::String(String::new());
        }
        let text = String::from_utf8_lossy(data);
        let trimmed = text.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Variant::Int(i);
        }
        if let Ok(d) = trimmed.parse::<f64>() {
            return Variant::Double(d);
        }
        match trimmed {
            "true" => return Variant::Bool(true),
            "false" => return Variant::Bool(false),
            _ => {}
        }
        let unquoted = if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
            &trimmed[1..trimmed.len() - 1]
        } else {
            trimmed
        };
        Variant::String(unquoted.to_string())
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

impl From<Vec<u8>> for Variant {
    fn from(v: Vec<u8>) -> Self {
        Variant::Bytes(v)
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(v: Vec<Variant>) -> Self {
        Variant::List(v)
    }
}
