//! The stream token vocabulary.

use std::fmt;

use crate::format;

/// One lexical unit of a stream.
///
/// Tokens are context free: every structural token starts with a distinct
/// marker byte, and field text never starts with an unescaped marker other
/// than the field separator itself (an empty field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `{`
    BeginObject,
    /// `}`
    EndObject,
    /// `|`
    NextPart,
    /// `!`
    True,
    /// `?`
    False,
    /// `~`
    Null,
    /// `@<index>`
    BackRef(u32),
    /// `#<index>`
    ClassRef(u32),
    /// `%`, followed by name, version and base count fields.
    NewClass,
    /// `*`, followed by the retained object and class counts.
    Flush,
    /// Unescaped field text.
    Field(String),
}

impl Token {
    /// Returns the leading marker byte, or `None` for fields.
    pub fn marker(&self) -> Option<u8> {
        match self {
            Self::BeginObject => Some(format::BEGIN_OBJECT),
            Self::EndObject => Some(format::END_OBJECT),
            Self::NextPart => Some(format::NEXT_PART),
            Self::True => Some(format::TRUE),
            Self::False => Some(format::FALSE),
            Self::Null => Some(format::NULL),
            Self::BackRef(_) => Some(format::BACK_REF),
            Self::ClassRef(_) => Some(format::CLASS_REF),
            Self::NewClass => Some(format::NEW_CLASS),
            Self::Flush => Some(format::FLUSH),
            Self::Field(_) => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeginObject => f.write_str("begin-object"),
            Self::EndObject => f.write_str("end-object"),
            Self::NextPart => f.write_str("next-part"),
            Self::True => f.write_str("true"),
            Self::False => f.write_str("false"),
            Self::Null => f.write_str("null"),
            Self::BackRef(i) => write!(f, "back-reference @{i}"),
            Self::ClassRef(i) => write!(f, "class-reference #{i}"),
            Self::NewClass => f.write_str("class definition"),
            Self::Flush => f.write_str("flush"),
            Self::Field(text) => write!(f, "field {text:?}"),
        }
    }
}
