//! Canonical text encoding of scalars.
//!
//! Every scalar travels as one field: its canonical text, escaped by the
//! token writer, terminated by the field separator. Numbers use the standard
//! `Display`/`FromStr` forms, which never contain a marker byte and are
//! round-trip exact for floats. Booleans are not fields at all; they are the
//! single-byte `!`/`?` markers written by
//! [`OutputStream::write_bool`](crate::OutputStream::write_bool).

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// A scalar with a canonical single-field text form.
pub trait Primitive: Sized {
    /// Human readable type name used in parse errors.
    const KIND: &'static str;

    /// Returns the canonical text (unescaped).
    fn encode(&self) -> Cow<'_, str>;

    /// Parses canonical text produced by [`Primitive::encode`].
    fn decode(text: &str) -> Result<Self, String>;
}

macro_rules! impl_primitive_numeric {
    ($($t:ty),* $(,)?) => {
        $(
            impl Primitive for $t {
                const KIND: &'static str = stringify!($t);

                fn encode(&self) -> Cow<'_, str> {
                    Cow::Owned(self.to_string())
                }

                fn decode(text: &str) -> Result<Self, String> {
                    <$t as FromStr>::from_str(text)
                        .map_err(|e| format!("invalid {} '{}': {}", Self::KIND, text, e))
                }
            }
        )*
    };
}

impl_primitive_numeric!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64
);

impl Primitive for String {
    const KIND: &'static str = "string";

    fn encode(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }

    fn decode(text: &str) -> Result<Self, String> {
        Ok(text.to_owned())
    }
}

impl Primitive for char {
    const KIND: &'static str = "char";

    fn encode(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn decode(text: &str) -> Result<Self, String> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(format!("invalid char '{text}': expected exactly one character")),
        }
    }
}

/// A complex number with `f64` components.
///
/// Encoded as `(re,im)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Complex {
    /// Real part.
    pub re: f64,
    /// Imaginary part.
    pub im: f64,
}

impl Complex {
    /// Builds a complex number from its components.
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

impl fmt::Display for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.re, self.im)
    }
}

impl Primitive for Complex {
    const KIND: &'static str = "complex";

    fn encode(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn decode(text: &str) -> Result<Self, String> {
        let inner = text
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .ok_or_else(|| format!("invalid complex '{text}': missing parentheses"))?;
        let (re, im) = inner
            .split_once(',')
            .ok_or_else(|| format!("invalid complex '{text}': missing ','"))?;
        let re = re
            .trim()
            .parse()
            .map_err(|e| format!("invalid complex real part '{re}': {e}"))?;
        let im = im
            .trim()
            .parse()
            .map_err(|e| format!("invalid complex imaginary part '{im}': {e}"))?;
        Ok(Self { re, im })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_use_decimal_text() {
        assert_eq!((-42i32).encode(), "-42");
        assert_eq!(u64::MAX.encode(), "18446744073709551615");
        assert_eq!(i128::decode("-170141183460469231731687303715884105728"), Ok(i128::MIN));
        assert!(u8::decode("256").is_err());
        assert!(i32::decode("").is_err());
    }

    #[test]
    fn floats_are_exact() {
        for v in [0.1f64, -1.5e-300, f64::MAX, f64::MIN_POSITIVE, 1.0 / 3.0] {
            assert_eq!(f64::decode(&v.encode()), Ok(v));
        }
        assert!(f64::decode(&f64::NAN.encode()).is_ok_and(f64::is_nan));
        assert_eq!(f32::decode(&f32::INFINITY.encode()), Ok(f32::INFINITY));
    }

    #[test]
    fn numeric_text_contains_no_markers() {
        let samples = [
            (-1.25e-7f64).encode().into_owned(),
            f64::NEG_INFINITY.encode().into_owned(),
            i64::MIN.encode().into_owned(),
            Complex::new(-0.5, 2e10).encode().into_owned(),
        ];
        for text in samples {
            assert!(!text.bytes().any(crate::format::is_marker), "{text}");
        }
    }

    #[test]
    fn chars_need_exactly_one_scalar() {
        assert_eq!(char::decode("é"), Ok('é'));
        assert!(char::decode("ab").is_err());
        assert!(char::decode("").is_err());
    }

    #[test]
    fn complex_text_form() {
        let c = Complex::new(1.5, -2.0);
        assert_eq!(c.encode(), "(1.5,-2)");
        assert_eq!(Complex::decode("(1.5,-2)"), Ok(c));
        assert!(Complex::decode("1.5,-2").is_err());
        assert!(Complex::decode("(1.5;-2)").is_err());
        assert!(Complex::decode("(x,1)").is_err());
    }
}
