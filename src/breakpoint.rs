use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{try_alloc, Error, Result};

pub const MAX_PRIORITY: u8 = 3;

/// Threshold value above any real priority, no breakpoint fires.
pub const THRESHOLD_DISABLED: u8 = 4;

const READ_FLAG: u8 = 0x01;
const WRITE_FLAG: u8 = 0x02;
const FLAG_BITS: u8 = 0x03;
const PRIORITY_BITS: u8 = 0x0C;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBreakPoint")]
pub struct BreakPoint {
    pub read: bool,
    pub write: bool,
    pub priority: u8,
}

#[derive(Deserialize)]
struct RawBreakPoint {
    read: bool,
    write: bool,
    priority: u8,
}

impl TryFrom<RawBreakPoint> for BreakPoint {
    type Error = Error;

    fn try_from(raw: RawBreakPoint) -> Result<Self> {
        if !(raw.read || raw.write) || raw.priority > MAX_PRIORITY {
            return Err(Error::InvalidBreakPoint(format!(
                "read={} write={} priority={}",
                raw.read, raw.write, raw.priority
            )));
        }

        Ok(Self {
            read: raw.read,
            write: raw.write,
            priority: raw.priority,
        })
    }
}

impl BreakPoint {
    pub fn new(read: bool, write: bool, priority: i32) -> Self {
        Self {
            read,
            write,
            priority: priority.clamp(0, MAX_PRIORITY as i32) as u8,
        }
    }

    /// A breakpoint with neither flag set is a request to clear.
    pub fn is_active(&self) -> bool {
        self.read || self.write
    }

    /// Union of the read/write coverage, highest of the two priorities.
    pub fn merge(self, other: BreakPoint) -> BreakPoint {
        Self::decode(merge_bits(self.encode(), other.encode())).unwrap_or(other)
    }

    /// Packs into the table byte: flags in bits 0-1, priority in bits 2-3.
    pub(crate) fn encode(&self) -> u8 {
        let mut bits = (self.priority.min(MAX_PRIORITY)) << 2;
        if self.read {
            bits |= READ_FLAG;
        }
        if self.write {
            bits |= WRITE_FLAG;
        }
        bits
    }

    pub(crate) fn decode(bits: u8) -> Option<Self> {
        if bits == 0 {
            return None;
        }

        Some(Self {
            read: bits & READ_FLAG != 0,
            write: bits & WRITE_FLAG != 0,
            priority: (bits & PRIORITY_BITS) >> 2,
        })
    }
}

fn merge_bits(old: u8, requested: u8) -> u8 {
    (old & PRIORITY_BITS).max(requested & PRIORITY_BITS) | ((old | requested) & FLAG_BITS)
}

/// Minimum priority a breakpoint needs to fire, kept pre-shifted so the hot
/// path compares it against the raw table byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityThreshold(u8);

impl PriorityThreshold {
    pub fn new(n: i32) -> Self {
        Self((n.clamp(0, THRESHOLD_DISABLED as i32) as u8) << 2)
    }

    pub fn get(self) -> i32 {
        (self.0 >> 2) as i32
    }

    #[inline]
    fn admits(self, bits: u8, is_write: bool) -> bool {
        let flag = if is_write { WRITE_FLAG } else { READ_FLAG };
        bits >= self.0 && bits & flag != 0
    }
}

/// Debugger hook invoked when an access hits an armed breakpoint. The
/// default implementation ignores every hit.
pub trait BreakPointHook {
    fn break_point(&mut self, is_write: bool, addr: u16, value: u8) {
        let _ = (is_write, addr, value);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoBreakPointHook;

impl BreakPointHook for NoBreakPointHook {}

/// A byte-per-address breakpoint map that only holds memory while at least
/// one entry is set. `len` must be a power of two; indices wrap.
#[derive(Clone)]
pub struct BreakPointTable {
    entries: Option<Box<[u8]>>,
    mask: usize,
    count: usize,
}

impl BreakPointTable {
    pub const fn new(len: usize) -> Self {
        assert!(len.is_power_of_two());
        Self {
            entries: None,
            mask: len - 1,
            count: 0,
        }
    }

    /// Number of addresses covered, allocated or not.
    pub fn size(&self) -> usize {
        self.mask + 1
    }

    pub fn is_allocated(&self) -> bool {
        self.entries.is_some()
    }

    /// Number of addresses with a breakpoint.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, index: usize) -> Option<BreakPoint> {
        self.entries
            .as_deref()
            .and_then(|entries| BreakPoint::decode(entries[index & self.mask]))
    }

    /// Sets or merges `bp` at `index`, or clears the entry when `bp` has
    /// neither flag.
    pub fn set(&mut self, index: usize, bp: BreakPoint) -> Result<()> {
        if !bp.is_active() {
            self.clear(index);
            return Ok(());
        }

        let len = self.size();
        let entries = match self.entries.as_mut() {
            Some(entries) => entries,
            None => {
                debug!("Allocating breakpoint table of {} entries", len);
                self.entries.insert(try_alloc(len, 0)?)
            }
        };

        let slot = &mut entries[index & self.mask];
        if *slot == 0 {
            self.count += 1;
        }
        *slot = merge_bits(*slot, bp.encode());

        Ok(())
    }

    pub fn clear(&mut self, index: usize) {
        let Some(entries) = &mut self.entries else {
            return;
        };

        let slot = &mut entries[index & self.mask];
        if *slot == 0 {
            return;
        }
        *slot = 0;
        self.count -= 1;

        if self.count == 0 {
            debug!("Releasing breakpoint table of {} entries", self.size());
            self.entries = None;
        }
    }

    pub fn clear_all(&mut self) {
        if self.entries.take().is_some() {
            debug!(
                "Cleared {} breakpoints, releasing table of {} entries",
                self.count,
                self.size()
            );
        }
        self.count = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, BreakPoint)> + '_ {
        self.entries
            .iter()
            .flat_map(|entries| entries.iter().enumerate())
            .filter_map(|(index, &bits)| BreakPoint::decode(bits).map(|bp| (index, bp)))
    }

    /// Whether an access of the given kind at `index` fires under `threshold`.
    #[inline]
    pub fn triggers(&self, index: usize, threshold: PriorityThreshold, is_write: bool) -> bool {
        match &self.entries {
            Some(entries) => threshold.admits(entries[index & self.mask], is_write),
            None => false,
        }
    }
}

impl fmt::Debug for BreakPointTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakPointTable")
            .field("size", &self.size())
            .field("count", &self.count)
            .field("allocated", &self.is_allocated())
            .finish()
    }
}
