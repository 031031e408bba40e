//! Low-level token I/O.
//!
//! [`TokenSink`] buffers encoded tokens in front of an arbitrary byte sink and
//! tracks how many bytes were produced. [`TokenSource`] is the lexer: it pulls
//! bytes from a `BufRead`, undoes escaping and hands out [`Token`]s together
//! with the byte offset they were found at.

use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::error::{PersistError, Result};
use crate::format;
use crate::token::Token;

/// A buffered writer for tokens.
pub struct TokenSink<'a> {
    writer: Box<dyn Write + 'a>,
    buffer: Vec<u8>,
    written: u64,
}

impl<'a> TokenSink<'a> {
    /// Wraps a byte sink.
    pub fn new<W: Write + 'a>(writer: W) -> Self {
        Self {
            writer: Box::new(writer),
            buffer: Vec::with_capacity(DEFAULT_BUFFER_SIZE),
            written: 0,
        }
    }

    /// Appends raw bytes (no escaping).
    pub fn raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);
        self.written += bytes.len() as u64;
        if self.buffer.len() >= DEFAULT_BUFFER_SIZE {
            self.spill()?;
        }
        Ok(())
    }

    /// Appends a single marker byte.
    pub fn marker(&mut self, marker: u8) -> Result<()> {
        self.raw(&[marker])
    }

    /// Appends an escaped field followed by the field separator.
    pub fn field(&mut self, text: &str) -> Result<()> {
        let before = self.buffer.len();
        format::escape_into(text, &mut self.buffer);
        self.buffer.push(format::FIELD_SEP);
        self.written += (self.buffer.len() - before) as u64;
        if self.buffer.len() >= DEFAULT_BUFFER_SIZE {
            self.spill()?;
        }
        Ok(())
    }

    /// Appends one token.
    pub fn token(&mut self, token: &Token) -> Result<()> {
        match token {
            Token::Field(text) => self.field(text),
            Token::BackRef(index) | Token::ClassRef(index) => {
                let marker = token.marker().unwrap_or(format::BACK_REF);
                self.marker(marker)?;
                self.field(&index.to_string())
            }
            other => match other.marker() {
                Some(marker) => self.marker(marker),
                None => Err(PersistError::Internal(format!("token {other} has no marker"))),
            },
        }
    }

    /// Pushes buffered bytes to the sink and flushes it.
    pub fn flush(&mut self) -> Result<()> {
        self.spill()?;
        self.writer
            .flush()
            .map_err(|e| PersistError::SinkFailure(Arc::new(e)))
    }

    /// Total number of bytes handed to this sink, including the buffered tail.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Drops buffered bytes produced after the byte count `mark`. Bytes
    /// already handed to the sink stay there; if part of the tail was
    /// spilled, the whole buffer goes.
    pub fn discard_since(&mut self, mark: u64) {
        let spilled = self.written - self.buffer.len() as u64;
        let keep = usize::try_from(mark.saturating_sub(spilled)).unwrap_or(usize::MAX);
        self.buffer.truncate(keep);
        self.written = spilled + self.buffer.len() as u64;
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let result = self.writer.write_all(&self.buffer);
        self.buffer.clear();
        result.map_err(|e| PersistError::SinkFailure(Arc::new(e)))
    }
}

impl Drop for TokenSink<'_> {
    fn drop(&mut self) {
        // Errors here have no caller to go to; `flush` is the checked path.
        let _ = self.spill();
    }
}

impl std::fmt::Debug for TokenSink<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSink")
            .field("buffered", &self.buffer.len())
            .field("written", &self.written)
            .finish()
    }
}

/// The lexer.
pub struct TokenSource<'a> {
    reader: Box<dyn BufRead + 'a>,
    offset: u64,
    scratch: Vec<u8>,
}

impl<'a> TokenSource<'a> {
    /// Wraps a byte source.
    pub fn new<R: BufRead + 'a>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            offset: 0,
            scratch: Vec::new(),
        }
    }

    /// Byte offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Builds a read failure at the current offset.
    pub fn failure(&self, reason: impl Into<String>) -> PersistError {
        PersistError::read_failure(self.offset, reason)
    }

    /// Returns the next byte without consuming it.
    pub fn peek_byte(&mut self) -> Result<Option<u8>> {
        let offset = self.offset;
        let buf = self
            .reader
            .fill_buf()
            .map_err(|e| PersistError::read_failure(offset, format!("source error: {e}")))?;
        Ok(buf.first().copied())
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.reader.consume(1);
            self.offset += 1;
        }
        Ok(byte)
    }

    /// Returns true once the source is exhausted.
    pub fn at_end(&mut self) -> Result<bool> {
        Ok(self.peek_byte()?.is_none())
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        let Some(byte) = self.peek_byte()? else {
            return Err(self.failure("unexpected end of stream"));
        };
        let token = match byte {
            format::BEGIN_OBJECT => Token::BeginObject,
            format::END_OBJECT => Token::EndObject,
            format::NEXT_PART => Token::NextPart,
            format::TRUE => Token::True,
            format::FALSE => Token::False,
            format::NULL => Token::Null,
            format::NEW_CLASS => Token::NewClass,
            format::FLUSH => Token::Flush,
            format::BACK_REF => {
                self.next_byte()?;
                return Ok(Token::BackRef(self.read_index()?));
            }
            format::CLASS_REF => {
                self.next_byte()?;
                return Ok(Token::ClassRef(self.read_index()?));
            }
            _ => return Ok(Token::Field(self.read_field()?)),
        };
        self.next_byte()?;
        Ok(token)
    }

    /// Reads one field, undoing escapes.
    ///
    /// Fails if the next token is structural, if the field contains an
    /// unescaped marker, or if it is not valid UTF-8.
    pub fn read_field(&mut self) -> Result<String> {
        let start = self.offset;
        self.scratch.clear();
        loop {
            let Some(byte) = self.next_byte()? else {
                return Err(self.failure("unexpected end of stream inside a field"));
            };
            match byte {
                format::FIELD_SEP => break,
                format::ESCAPE => match self.next_byte()? {
                    Some(escaped) => self.scratch.push(escaped),
                    None => return Err(self.failure("dangling escape at end of stream")),
                },
                other if format::is_marker(other) => {
                    return Err(PersistError::read_failure(
                        self.offset - 1,
                        format!("unexpected marker '{}' in field", other as char),
                    ));
                }
                other => self.scratch.push(other),
            }
        }
        String::from_utf8(std::mem::take(&mut self.scratch))
            .map_err(|_| PersistError::read_failure(start, "field is not valid UTF-8"))
    }

    /// Reads a field holding a table index.
    pub fn read_index(&mut self) -> Result<u32> {
        let start = self.offset;
        let text = self.read_field()?;
        text.parse()
            .map_err(|_| PersistError::read_failure(start, format!("invalid index '{text}'")))
    }
}

impl std::fmt::Debug for TokenSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(bytes: &[u8]) -> Vec<Token> {
        let mut source = TokenSource::new(bytes);
        let mut tokens = Vec::new();
        while !source.at_end().expect("peek") {
            tokens.push(source.next_token().expect("token"));
        }
        tokens
    }

    #[test]
    fn sink_and_source_agree() {
        let tokens = vec![
            Token::BeginObject,
            Token::NewClass,
            Token::Field("my::Class{1}".into()),
            Token::Field(String::new()),
            Token::NextPart,
            Token::BackRef(12),
            Token::Null,
            Token::True,
            Token::False,
            Token::ClassRef(0),
            Token::EndObject,
        ];
        let mut bytes = Vec::new();
        {
            let mut sink = TokenSink::new(&mut bytes);
            for t in &tokens {
                sink.token(t).expect("write");
            }
            sink.flush().expect("flush");
            assert_eq!(sink.bytes_written(), bytes_len_hint(&tokens));
        }
        assert_eq!(lex(&bytes), tokens);
    }

    #[test]
    fn discarded_tail_never_reaches_the_sink() {
        let mut bytes = Vec::new();
        {
            let mut sink = TokenSink::new(&mut bytes);
            sink.field("kept").expect("write");
            let mark = sink.bytes_written();
            sink.marker(format::BEGIN_OBJECT).expect("write");
            sink.field("partial").expect("write");
            sink.discard_since(mark);
            assert_eq!(sink.bytes_written(), mark);
        }
        assert_eq!(bytes, b"kept\n".to_vec());
    }

    fn bytes_len_hint(tokens: &[Token]) -> u64 {
        let mut bytes = Vec::new();
        let mut sink = TokenSink::new(&mut bytes);
        for t in tokens {
            sink.token(t).expect("write");
        }
        sink.bytes_written()
    }

    #[test]
    fn unescaped_marker_inside_field_is_rejected() {
        let mut source = TokenSource::new(&b"abc|def\n"[..]);
        let err = source.read_field().expect_err("must fail");
        assert!(matches!(err, PersistError::ReadFailure { offset: 3, .. }));
    }

    #[test]
    fn truncated_field_is_rejected() {
        let mut source = TokenSource::new(&b"12"[..]);
        assert!(source.next_token().is_err());
        let mut source = TokenSource::new(&b"12\\"[..]);
        assert!(source.next_token().is_err());
    }

    #[test]
    fn invalid_index_is_rejected() {
        let mut source = TokenSource::new(&b"@x\n"[..]);
        assert!(matches!(
            source.next_token(),
            Err(PersistError::ReadFailure { .. })
        ));
    }

    #[test]
    fn sink_spills_large_output() {
        let mut bytes = Vec::new();
        {
            let mut sink = TokenSink::new(&mut bytes);
            let long = "x".repeat(DEFAULT_BUFFER_SIZE * 2);
            sink.field(&long).expect("write");
            sink.flush().expect("flush");
        }
        assert_eq!(bytes.len(), DEFAULT_BUFFER_SIZE * 2 + 1);
    }
}
