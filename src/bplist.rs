use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    breakpoint::{BreakPoint, MAX_PRIORITY},
    error::Error,
};

/// Receives the breakpoints enumerated by [`Memory`](crate::Memory) and
/// [`IoPorts`](crate::IoPorts).
pub trait BreakPointSink {
    fn add_memory_breakpoint(&mut self, address: u16, read: bool, write: bool, priority: u8);

    fn add_segment_breakpoint(
        &mut self,
        segment: u8,
        offset: u16,
        read: bool,
        write: bool,
        priority: u8,
    );

    fn add_io_breakpoint(&mut self, port: u8, read: bool, write: bool, priority: u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakPointTarget {
    /// CPU address, whatever segment is paged in.
    Memory { address: u16 },
    /// Offset within one physical segment.
    Segment { segment: u8, offset: u16 },
    Io { port: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakPointEntry {
    pub target: BreakPointTarget,
    pub breakpoint: BreakPoint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakPointList {
    entries: Vec<BreakPointEntry>,
}

impl BreakPointList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BreakPointEntry> {
        self.entries.iter()
    }

    pub fn push(&mut self, entry: BreakPointEntry) {
        self.entries.push(entry);
    }

    fn add(&mut self, target: BreakPointTarget, read: bool, write: bool, priority: u8) {
        self.entries.push(BreakPointEntry {
            target,
            breakpoint: BreakPoint::new(read, write, priority as i32),
        });
    }
}

impl BreakPointSink for BreakPointList {
    fn add_memory_breakpoint(&mut self, address: u16, read: bool, write: bool, priority: u8) {
        self.add(BreakPointTarget::Memory { address }, read, write, priority);
    }

    fn add_segment_breakpoint(
        &mut self,
        segment: u8,
        offset: u16,
        read: bool,
        write: bool,
        priority: u8,
    ) {
        let offset = offset & 0x3FFF;
        self.add(
            BreakPointTarget::Segment { segment, offset },
            read,
            write,
            priority,
        );
    }

    fn add_io_breakpoint(&mut self, port: u8, read: bool, write: bool, priority: u8) {
        self.add(BreakPointTarget::Io { port }, read, write, priority);
    }
}

impl<'a> IntoIterator for &'a BreakPointList {
    type Item = &'a BreakPointEntry;
    type IntoIter = std::slice::Iter<'a, BreakPointEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<BreakPointEntry> for BreakPointList {
    fn from_iter<I: IntoIterator<Item = BreakPointEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// One entry per line:
//
//   mem 1234 rw p2
//   seg FE:0123 r p0
//   io A8 w p3
impl fmt::Display for BreakPointEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            BreakPointTarget::Memory { address } => write!(f, "mem {:04X}", address)?,
            BreakPointTarget::Segment { segment, offset } => {
                write!(f, "seg {:02X}:{:04X}", segment, offset)?
            }
            BreakPointTarget::Io { port } => write!(f, "io {:02X}", port)?,
        }

        let flags = match (self.breakpoint.read, self.breakpoint.write) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "-",
        };
        write!(f, " {} p{}", flags, self.breakpoint.priority)
    }
}

impl fmt::Display for BreakPointList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

impl FromStr for BreakPointEntry {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidBreakPoint(line.trim().to_string());

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let &[kind, location, flags, priority] = tokens.as_slice() else {
            return Err(invalid());
        };

        let target = match kind {
            "mem" => BreakPointTarget::Memory {
                address: u16::from_str_radix(location, 16).map_err(|_| invalid())?,
            },
            "seg" => {
                let (segment, offset) = location.split_once(':').ok_or_else(invalid)?;
                let segment = u8::from_str_radix(segment, 16).map_err(|_| invalid())?;
                let offset = u16::from_str_radix(offset, 16).map_err(|_| invalid())?;
                if offset > 0x3FFF {
                    return Err(invalid());
                }
                BreakPointTarget::Segment { segment, offset }
            }
            "io" => BreakPointTarget::Io {
                port: u8::from_str_radix(location, 16).map_err(|_| invalid())?,
            },
            _ => return Err(invalid()),
        };

        let (read, write) = match flags {
            "r" => (true, false),
            "w" => (false, true),
            "rw" | "wr" => (true, true),
            _ => return Err(invalid()),
        };

        let priority = priority
            .strip_prefix('p')
            .and_then(|p| p.parse::<u8>().ok())
            .filter(|p| *p <= MAX_PRIORITY)
            .ok_or_else(invalid)?;

        Ok(Self {
            target,
            breakpoint: BreakPoint::new(read, write, priority as i32),
        })
    }
}

impl FromStr for BreakPointList {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::parse::<BreakPointEntry>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let mut list = BreakPointList::new();
        list.add_memory_breakpoint(0x1234, true, true, 2);
        list.add_segment_breakpoint(0xFE, 0x0123, true, false, 0);
        list.add_io_breakpoint(0xA8, false, true, 3);

        assert_eq!(
            list.to_string(),
            "mem 1234 rw p2\nseg FE:0123 r p0\nio A8 w p3\n"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for line in [
            "mem 1234 rw",
            "mem 12345 r p0",
            "seg FE:4000 r p0",
            "seg FE r p0",
            "io A8 x p1",
            "io A8 r p4",
            "disk 00 r p0",
        ] {
            assert!(
                matches!(
                    line.parse::<BreakPointEntry>(),
                    Err(Error::InvalidBreakPoint(_))
                ),
                "accepted {:?}",
                line
            );
        }
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let list: BreakPointList = "\n  mem 0038 r p1\n\n io FE w p0 \n".parse().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(
            list.iter().next().map(|e| e.target),
            Some(BreakPointTarget::Memory { address: 0x0038 })
        );
    }
}
