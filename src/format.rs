//! Defines the textual layout of persistream streams.
//!
//! # Layout
//! A stream is a header followed by any number of top-level entries
//! (objects, primitives, containers, flush tokens) in the order they were written.
//!
//! `PST\n1\n [entry] [entry] ...`
//!
//! ## Object Anatomy
//! `{ <class> <part 0> | <part 1> | ... | <part N> }`
//!
//! where `<class>` is either `#<index>\n` (already seen in this stream) or
//! `%<name>\n<version>\n<base count>\n<base class>...` and every part holds the
//! fields introduced by one inheritance level, least derived first.
//!
//! ## Field Anatomy
//! A primitive is its canonical text followed by `\n`. Any byte of the text that
//! collides with a marker is prefixed by `\`.

/// Starts a new object.
pub const BEGIN_OBJECT: u8 = b'{';
/// Ends an object.
pub const END_OBJECT: u8 = b'}';
/// Separates the parts of an object.
pub const NEXT_PART: u8 = b'|';
/// Terminates a primitive field.
pub const FIELD_SEP: u8 = b'\n';
/// Escapes the following byte.
pub const ESCAPE: u8 = b'\\';
/// Boolean `true`.
pub const TRUE: u8 = b'!';
/// Boolean `false`.
pub const FALSE: u8 = b'?';
/// Null object reference.
pub const NULL: u8 = b'~';
/// Reference to an already written object; followed by an index field.
pub const BACK_REF: u8 = b'@';
/// Reference to an already written class; followed by an index field.
pub const CLASS_REF: u8 = b'#';
/// Inline class definition.
pub const NEW_CLASS: u8 = b'%';
/// Table truncation issued by `OutputStream::flush`; followed by two count fields.
pub const FLUSH: u8 = b'*';

/// Every byte with a structural meaning. Payload bytes in this set are escaped.
pub const MARKERS: [u8; 12] = [
    BEGIN_OBJECT,
    END_OBJECT,
    NEXT_PART,
    FIELD_SEP,
    ESCAPE,
    TRUE,
    FALSE,
    NULL,
    BACK_REF,
    CLASS_REF,
    NEW_CLASS,
    FLUSH,
];

/// Magic field identifying the format.
pub const MAGIC: &str = "PST";

/// The format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Returns true if `byte` must be escaped inside a field.
#[inline]
pub fn is_marker(byte: u8) -> bool {
    MARKERS.contains(&byte)
}

/// Appends `text` to `out`, escaping every marker byte.
///
/// Markers are all ASCII, so escaping byte-wise never splits a UTF-8 sequence.
pub fn escape_into(text: &str, out: &mut Vec<u8>) {
    out.reserve(text.len() + 1);
    for &byte in text.as_bytes() {
        if is_marker(byte) {
            out.push(ESCAPE);
        }
        out.push(byte);
    }
}

/// The stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format version of the stream.
    pub version: u32,
}

impl Header {
    /// The header written by this crate.
    pub fn current() -> Self {
        Self {
            version: FORMAT_VERSION,
        }
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{MAGIC}\n{}\n", self.version).into_bytes()
    }

    /// Checks a decoded magic/version pair.
    pub fn validate(magic: &str, version: &str) -> std::result::Result<Self, String> {
        if magic != MAGIC {
            return Err(format!("invalid magic '{magic}', expected '{MAGIC}'"));
        }
        let version: u32 = version
            .parse()
            .map_err(|_| format!("invalid format version '{version}'"))?;
        if version == 0 || version > FORMAT_VERSION {
            return Err(format!("unsupported format version: {version}"));
        }
        Ok(Self { version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_only_markers() {
        let mut out = Vec::new();
        escape_into("a{b}|c\\d\ne!?", &mut out);
        assert_eq!(out, b"a\\{b\\}\\|c\\\\d\\\ne\\!\\?".to_vec());
    }

    #[test]
    fn multibyte_text_is_untouched() {
        let mut out = Vec::new();
        escape_into("μ→τ", &mut out);
        assert_eq!(out, "μ→τ".as_bytes());
    }

    #[test]
    fn header_validation() {
        assert_eq!(Header::validate("PST", "1"), Ok(Header::current()));
        assert!(Header::validate("PAR4", "1").is_err());
        assert!(Header::validate("PST", "2").is_err());
        assert!(Header::validate("PST", "x").is_err());
        assert_eq!(Header::current().to_bytes(), b"PST\n1\n".to_vec());
    }
}
