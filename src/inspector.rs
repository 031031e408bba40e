//! Tools for inspecting the structure of persistream streams.
//! Useful for debugging class usage, sharing and flush behaviour without
//! the classes themselves being available.

use std::io::BufRead;
use std::path::Path;

use serde::Serialize;

use crate::constants::{MAX_DEPTH, STACK_RED_ZONE, STACK_SEGMENT};
use crate::error::{PersistError, Result};
use crate::format::{self, Header};
use crate::io::TokenSource;
use crate::token::Token;
use crate::transport;

/// A structural report of a stream.
#[derive(Debug, Default, Serialize)]
pub struct StreamReport {
    /// Format version from the header.
    pub format_version: u32,
    /// Total stream size (decompressed).
    pub total_bytes: u64,
    /// Top-level entries, flush tokens excluded.
    pub top_level_entries: u64,
    /// Objects written in full.
    pub objects: u64,
    /// Back-references.
    pub back_references: u64,
    /// Null references.
    pub null_references: u64,
    /// Scalar fields (counts of containers included).
    pub fields: u64,
    /// Boolean markers.
    pub booleans: u64,
    /// Flush tokens.
    pub flushes: u64,
    /// Deepest object nesting.
    pub max_depth: u32,
    /// Every class definition, in stream order.
    pub classes: Vec<ClassInfo>,
}

/// One class definition found in a stream.
#[derive(Debug, Serialize)]
pub struct ClassInfo {
    /// Canonical class name.
    pub name: String,
    /// Version recorded by the writer.
    pub version: u32,
    /// Direct base names.
    pub bases: Vec<String>,
    /// Objects written in full under this definition.
    pub instances: u64,
}

/// The persistream inspector tool.
#[derive(Debug)]
pub struct StreamInspector;

impl StreamInspector {
    /// Analyzes a stream file (plain or LZ4) and returns a structural report.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<StreamReport> {
        Self::inspect_reader(transport::open(path)?)
    }

    /// Analyzes an in-memory stream.
    pub fn inspect_bytes(bytes: &[u8]) -> Result<StreamReport> {
        Self::inspect_reader(bytes)
    }

    /// Analyzes a stream from any buffered source.
    pub fn inspect_reader<R: BufRead>(reader: R) -> Result<StreamReport> {
        let mut walker = Walker {
            source: TokenSource::new(reader),
            report: StreamReport::default(),
            session: Vec::new(),
        };
        let magic = walker.source.read_field()?;
        let version = walker.source.read_field()?;
        walker.report.format_version = Header::validate(&magic, &version)
            .map_err(|reason| PersistError::read_failure(0, reason))?
            .version;

        while !walker.source.at_end()? {
            if walker.source.peek_byte()? == Some(format::FLUSH) {
                walker.flush()?;
            } else {
                walker.value(0)?;
                walker.report.top_level_entries += 1;
            }
        }
        walker.report.total_bytes = walker.source.offset();
        Ok(walker.report)
    }
}

struct Walker<'a> {
    source: TokenSource<'a>,
    report: StreamReport,
    /// Stream class index to position in `report.classes`.
    session: Vec<usize>,
}

impl Walker<'_> {
    fn count(&mut self) -> Result<usize> {
        let offset = self.source.offset();
        let text = self.source.read_field()?;
        text.parse()
            .map_err(|_| PersistError::read_failure(offset, format!("invalid count '{text}'")))
    }

    fn flush(&mut self) -> Result<()> {
        self.source.next_token()?;
        let _objects = self.count()?;
        let classes = self.count()?;
        self.session.truncate(classes);
        self.report.flushes += 1;
        Ok(())
    }

    fn value(&mut self, depth: u32) -> Result<()> {
        let offset = self.source.offset();
        match self.source.next_token()? {
            Token::BeginObject => {
                if depth as usize >= MAX_DEPTH {
                    return Err(PersistError::read_failure(
                        offset,
                        format!("objects nested deeper than {MAX_DEPTH} levels"),
                    ));
                }
                stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || self.object(depth + 1))
            }
            Token::Null => {
                self.report.null_references += 1;
                Ok(())
            }
            Token::BackRef(_) => {
                self.report.back_references += 1;
                Ok(())
            }
            Token::True | Token::False => {
                self.report.booleans += 1;
                Ok(())
            }
            Token::Field(_) => {
                self.report.fields += 1;
                Ok(())
            }
            other => Err(PersistError::read_failure(
                offset,
                format!("unexpected {other}"),
            )),
        }
    }

    fn object(&mut self, depth: u32) -> Result<()> {
        self.report.max_depth = self.report.max_depth.max(depth);
        self.report.objects += 1;
        let class = self.class(0)?;
        if let Some(info) = self.report.classes.get_mut(class) {
            info.instances += 1;
        }
        loop {
            match self.source.peek_byte()? {
                Some(format::NEXT_PART) => {
                    self.source.next_token()?;
                }
                Some(format::END_OBJECT) => {
                    self.source.next_token()?;
                    return Ok(());
                }
                Some(_) => self.value(depth)?,
                None => return Err(self.source.failure("unexpected end of stream inside an object")),
            }
        }
    }

    fn class(&mut self, nesting: usize) -> Result<usize> {
        let offset = self.source.offset();
        if nesting >= MAX_DEPTH {
            return Err(PersistError::read_failure(
                offset,
                format!("class definitions nested deeper than {MAX_DEPTH} levels"),
            ));
        }
        match self.source.next_token()? {
            Token::ClassRef(index) => self
                .session
                .get(index as usize)
                .copied()
                .ok_or_else(|| PersistError::MissingClass(format!("#{index}"))),
            Token::NewClass => {
                let name = self.source.read_field()?;
                let version_offset = self.source.offset();
                let version = self.source.read_field()?;
                let version = version.parse().map_err(|_| {
                    PersistError::read_failure(version_offset, format!("invalid class version '{version}'"))
                })?;
                let base_count = self.count()?;
                let position = self.report.classes.len();
                self.report.classes.push(ClassInfo {
                    name,
                    version,
                    bases: Vec::with_capacity(base_count.min(16)),
                    instances: 0,
                });
                self.session.push(position);
                for _ in 0..base_count {
                    let base = stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || {
                        self.class(nesting + 1)
                    })?;
                    let base_name = self
                        .report
                        .classes
                        .get(base)
                        .map(|b| b.name.clone())
                        .unwrap_or_default();
                    if let Some(info) = self.report.classes.get_mut(position) {
                        info.bases.push(base_name);
                    }
                }
                Ok(position)
            }
            other => Err(PersistError::read_failure(
                offset,
                format!("expected a class, found {other}"),
            )),
        }
    }
}

impl std::fmt::Display for StreamReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== PERSISTREAM INSPECTOR REPORT ===")?;
        writeln!(f, "Format Version: {}", self.format_version)?;
        writeln!(f, "Total Bytes:    {}", self.total_bytes)?;
        writeln!(
            f,
            "Entries: {} | Objects: {} | Back-refs: {} | Nulls: {} | Fields: {} | Bools: {} | Flushes: {} | Depth: {}",
            self.top_level_entries,
            self.objects,
            self.back_references,
            self.null_references,
            self.fields,
            self.booleans,
            self.flushes,
            self.max_depth
        )?;
        writeln!(f, "\n[CLASSES]")?;
        for (i, class) in self.classes.iter().enumerate() {
            let connector = if i + 1 == self.classes.len() {
                "└── "
            } else {
                "├── "
            };
            let bases = if class.bases.is_empty() {
                String::new()
            } else {
                format!(" : {}", class.bases.join(", "))
            };
            writeln!(
                f,
                "{}{} v{}{} | Instances: {}",
                connector, class.name, class.version, bases, class.instances
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_structure_without_a_registry() {
        let stream = b"PST\n1\n{%a::B\n2\n1\n%a::A\n1\n0\n5\n|x\n{#0\n|@0\n}}@0\n~*0\n0\n{%a::A\n1\n0\n!}";
        let report = StreamInspector::inspect_bytes(stream).expect("inspect");
        assert_eq!(report.top_level_entries, 4);
        assert_eq!(report.objects, 3);
        assert_eq!(report.back_references, 2);
        assert_eq!(report.null_references, 1);
        assert_eq!(report.fields, 2);
        assert_eq!(report.booleans, 1);
        assert_eq!(report.flushes, 1);
        assert_eq!(report.max_depth, 2);
        assert_eq!(report.total_bytes, stream.len() as u64);

        let names: Vec<&str> = report.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a::B", "a::A", "a::A"]);
        assert_eq!(report.classes[0].bases, ["a::A"]);
        assert_eq!(report.classes[0].instances, 2);
        assert_eq!(report.classes[2].instances, 1);

        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["classes"][0]["version"], 2);
        assert!(report.to_string().contains("a::B v2 : a::A | Instances: 2"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(StreamInspector::inspect_bytes(b"XYZ\n1\n").is_err());
        assert!(StreamInspector::inspect_bytes(b"PST\n1\n{#3\n}").is_err());
        assert!(StreamInspector::inspect_bytes(b"PST\n1\n{%a\n1\n0\n").is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let levels = MAX_DEPTH + 1;
        let mut objects = b"PST\n1\n{%a\n1\n0\n".to_vec();
        for _ in 1..levels {
            objects.extend_from_slice(b"{#0\n");
        }
        objects.extend(std::iter::repeat_n(b'}', levels));
        assert!(matches!(
            StreamInspector::inspect_bytes(&objects),
            Err(PersistError::ReadFailure { .. })
        ));

        let mut classes = b"PST\n1\n{".to_vec();
        for _ in 0..levels {
            classes.extend_from_slice(b"%a\n1\n1\n");
        }
        assert!(matches!(
            StreamInspector::inspect_bytes(&classes),
            Err(PersistError::ReadFailure { .. })
        ));

        let mut shallow = b"PST\n1\n{%a\n1\n0\n".to_vec();
        for _ in 1..100 {
            shallow.extend_from_slice(b"{#0\n");
        }
        shallow.extend(std::iter::repeat_n(b'}', 100));
        let report = StreamInspector::inspect_bytes(&shallow).expect("inspect");
        assert_eq!(report.max_depth, 100);
        assert_eq!(report.objects, 100);
    }
}
