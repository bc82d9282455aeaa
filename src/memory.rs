use derivative::Derivative;
use tracing::{debug, trace};

use crate::{
    bplist::{BreakPointList, BreakPointSink, BreakPointTarget},
    breakpoint::{BreakPoint, BreakPointHook, BreakPointTable, NoBreakPointHook, PriorityThreshold},
    error::{try_alloc, try_alloc_with, Result},
    utils::hexdump,
};

pub const SEGMENT_SIZE: usize = 0x4000;
pub const SEGMENT_COUNT: usize = 256;
pub const PAGE_COUNT: usize = 4;

const OFFSET_MASK: u16 = 0x3FFF;

#[derive(Debug)]
struct Segment {
    data: Option<Box<[u8]>>,
    rom: bool,
    breakpoints: BreakPointTable,
}

impl Segment {
    fn new() -> Self {
        Self {
            data: None,
            rom: true,
            breakpoints: BreakPointTable::new(SEGMENT_SIZE),
        }
    }
}

/// Banked memory: 256 physical 16K segments, four of which are visible to
/// the CPU through the page table.
///
/// Breakpoints can be placed either on a CPU address (whatever segment is
/// paged in) or on an offset within one segment. Both tables only hold
/// memory while they contain at least one entry.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Memory {
    #[derivative(Debug = "ignore")]
    segments: Vec<Segment>,
    pages: [u8; PAGE_COUNT],
    breakpoints: BreakPointTable,
    have_breakpoints: bool,
    threshold: PriorityThreshold,
    #[derivative(Debug = "ignore")]
    hook: Box<dyn BreakPointHook>,
}

impl Memory {
    pub fn new() -> Result<Self> {
        Ok(Self {
            segments: try_alloc_with(SEGMENT_COUNT, |_| Segment::new())?,
            pages: [0; PAGE_COUNT],
            breakpoints: BreakPointTable::new(0x10000),
            have_breakpoints: false,
            threshold: PriorityThreshold::default(),
            hook: Box::new(NoBreakPointHook),
        })
    }

    pub fn set_breakpoint_hook(&mut self, hook: Box<dyn BreakPointHook>) {
        self.hook = hook;
    }

    pub fn take_breakpoint_hook(&mut self) -> Box<dyn BreakPointHook> {
        std::mem::replace(&mut self.hook, Box::new(NoBreakPointHook))
    }

    /// Copies `data` into `segment` and the segments following it, wrapping
    /// after segment 0xFF. The tail of the last touched segment is filled
    /// with 0xFF. Loading an empty ROM image deletes the segment.
    pub fn load_segment(&mut self, segment: u8, is_rom: bool, data: &[u8]) -> Result<()> {
        if is_rom && data.is_empty() {
            self.delete_segment(segment);
            return Ok(());
        }

        let count = data.len().div_ceil(SEGMENT_SIZE).max(1);

        // Allocate everything up front so a failure leaves memory untouched.
        let mut fresh = Vec::new();
        for n in 0..count.min(SEGMENT_COUNT) {
            let index = segment.wrapping_add(n as u8);
            if self.segments[index as usize].data.is_none() {
                fresh.push((index, try_alloc(SEGMENT_SIZE, 0xFF)?));
            }
        }
        for (index, buf) in fresh {
            self.segments[index as usize].data = Some(buf);
        }

        for n in 0..count {
            let index = segment.wrapping_add(n as u8);
            let start = (n * SEGMENT_SIZE).min(data.len());
            let end = (start + SEGMENT_SIZE).min(data.len());
            let chunk = &data[start..end];

            let slot = &mut self.segments[index as usize];
            slot.rom = is_rom;
            if let Some(buf) = slot.data.as_deref_mut() {
                buf[..chunk.len()].copy_from_slice(chunk);
                buf[chunk.len()..].fill(0xFF);
            }
        }

        debug!(
            "Loaded {} bytes into {} segment(s) from {:02X} ({})",
            data.len(),
            count,
            segment,
            if is_rom { "ROM" } else { "RAM" }
        );

        Ok(())
    }

    pub fn delete_segment(&mut self, segment: u8) {
        let slot = &mut self.segments[segment as usize];
        if slot.data.take().is_some() {
            debug!("Deleted segment {:02X}", segment);
        }
        slot.rom = true;
    }

    pub fn delete_all_segments(&mut self) {
        for segment in 0..=0xFF {
            self.delete_segment(segment);
        }
    }

    pub fn is_segment_rom(&self, segment: u8) -> bool {
        self.segments[segment as usize].rom
    }

    pub fn segment_data(&self, segment: u8) -> Option<&[u8]> {
        self.segments[segment as usize].data.as_deref()
    }

    pub fn segment_dump(&self, segment: u8) -> Option<String> {
        self.segment_data(segment)
            .map(|data| hexdump(data, (segment as u32) << 14))
    }

    pub fn set_page(&mut self, page: u8, segment: u8) {
        self.pages[(page & 3) as usize] = segment;
    }

    pub fn get_page(&self, page: u8) -> u8 {
        self.pages[(page & 3) as usize]
    }

    /// CPU read through the page table. Unmapped segments read as 0xFF.
    #[inline]
    pub fn read(&mut self, addr: u16) -> u8 {
        let segment = self.pages[(addr >> 14) as usize];
        let value = match &self.segments[segment as usize].data {
            Some(data) => data[(addr & OFFSET_MASK) as usize],
            None => 0xFF,
        };

        if self.have_breakpoints {
            self.check_breakpoint(false, segment, addr, value);
        }

        value
    }

    /// CPU write through the page table. The breakpoint hook sees the value
    /// before it is stored; ROM and unmapped segments drop the write.
    #[inline]
    pub fn write(&mut self, addr: u16, value: u8) {
        let segment = self.pages[(addr >> 14) as usize];

        if self.have_breakpoints {
            self.check_breakpoint(true, segment, addr, value);
        }

        let slot = &mut self.segments[segment as usize];
        if !slot.rom {
            if let Some(data) = slot.data.as_deref_mut() {
                data[(addr & OFFSET_MASK) as usize] = value;
                return;
            }
        }

        trace!(
            "Dropped write to {} segment {:02X} - ${:04X} = ${:02X}",
            if slot.data.is_some() { "ROM" } else { "unmapped" },
            segment,
            addr,
            value
        );
    }

    fn check_breakpoint(&mut self, is_write: bool, segment: u8, addr: u16, value: u8) {
        let hit = self.segments[segment as usize].breakpoints.triggers(
            (addr & OFFSET_MASK) as usize,
            self.threshold,
            is_write,
        ) || self
            .breakpoints
            .triggers(addr as usize, self.threshold, is_write);

        if hit {
            trace!(
                "[MEM] Breakpoint {} ${:04X} (segment {:02X}) = ${:02X}",
                if is_write { "WR" } else { "RD" },
                addr,
                segment,
                value
            );
            self.hook.break_point(is_write, addr, value);
        }
    }

    /// Reads physical memory, bits 14-21 of `addr` select the segment.
    /// Bypasses breakpoints.
    pub fn read_raw(&self, addr: u32) -> u8 {
        let segment = ((addr >> 14) & 0xFF) as usize;
        match &self.segments[segment].data {
            Some(data) => data[(addr & OFFSET_MASK as u32) as usize],
            None => 0xFF,
        }
    }

    /// Writes physical memory regardless of the ROM flag. Bypasses
    /// breakpoints; writes to absent segments are ignored.
    pub fn write_raw(&mut self, addr: u32, value: u8) {
        let segment = ((addr >> 14) & 0xFF) as usize;
        if let Some(data) = self.segments[segment].data.as_deref_mut() {
            data[(addr & OFFSET_MASK as u32) as usize] = value;
        }
    }

    /// Sets, merges or (with `read` and `write` both false) clears a
    /// breakpoint at an offset within `segment`.
    pub fn set_segment_breakpoint(
        &mut self,
        segment: u8,
        addr: u16,
        priority: i32,
        read: bool,
        write: bool,
    ) -> Result<()> {
        let bp = BreakPoint::new(read, write, priority);
        self.segments[segment as usize]
            .breakpoints
            .set((addr & OFFSET_MASK) as usize, bp)?;
        if bp.is_active() {
            self.have_breakpoints = true;
        }
        Ok(())
    }

    /// Sets, merges or clears a breakpoint on a CPU address.
    pub fn set_breakpoint(&mut self, addr: u16, priority: i32, read: bool, write: bool) -> Result<()> {
        let bp = BreakPoint::new(read, write, priority);
        self.breakpoints.set(addr as usize, bp)?;
        if bp.is_active() {
            self.have_breakpoints = true;
        }
        Ok(())
    }

    /// Merges every memory entry of `list`; I/O entries are skipped.
    pub fn set_breakpoints(&mut self, list: &BreakPointList) -> Result<()> {
        for entry in list {
            let bp = entry.breakpoint;
            match entry.target {
                BreakPointTarget::Memory { address } => {
                    self.set_breakpoint(address, bp.priority as i32, bp.read, bp.write)?
                }
                BreakPointTarget::Segment { segment, offset } => self.set_segment_breakpoint(
                    segment,
                    offset,
                    bp.priority as i32,
                    bp.read,
                    bp.write,
                )?,
                BreakPointTarget::Io { .. } => {}
            }
        }
        Ok(())
    }

    pub fn clear_segment_breakpoints(&mut self, segment: u8) {
        self.segments[segment as usize].breakpoints.clear_all();
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear_all();
    }

    pub fn clear_all_breakpoints(&mut self) {
        self.clear_breakpoints();
        for segment in 0..=0xFF {
            self.clear_segment_breakpoints(segment);
        }
        self.have_breakpoints = false;
    }

    /// Whether the CPU address table is currently allocated.
    pub fn has_breakpoints(&self) -> bool {
        self.breakpoints.is_allocated()
    }

    pub fn segment_has_breakpoints(&self, segment: u8) -> bool {
        self.segments[segment as usize].breakpoints.is_allocated()
    }

    pub fn set_breakpoint_priority_threshold(&mut self, n: i32) {
        self.threshold = PriorityThreshold::new(n);
    }

    pub fn get_breakpoint_priority_threshold(&self) -> i32 {
        self.threshold.get()
    }

    /// Emits the CPU address breakpoints first, then the per-segment ones in
    /// segment order.
    pub fn append_breakpoints<S: BreakPointSink>(&self, sink: &mut S) {
        for (addr, bp) in self.breakpoints.iter() {
            sink.add_memory_breakpoint(addr as u16, bp.read, bp.write, bp.priority);
        }

        for (segment, slot) in self.segments.iter().enumerate() {
            for (offset, bp) in slot.breakpoints.iter() {
                sink.add_segment_breakpoint(
                    segment as u8,
                    offset as u16,
                    bp.read,
                    bp.write,
                    bp.priority,
                );
            }
        }
    }

    pub fn breakpoint_list(&self) -> BreakPointList {
        let mut list = BreakPointList::new();
        self.append_breakpoints(&mut list);
        list
    }
}

/// Assembles a [`Memory`] with its initial segments, page mapping and
/// debugger hook.
#[derive(Default)]
pub struct MemoryBuilder {
    segments: Vec<(u8, bool, Vec<u8>)>,
    pages: [u8; PAGE_COUNT],
    threshold: i32,
    hook: Option<Box<dyn BreakPointHook>>,
}

impl MemoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rom_segment(&mut self, segment: u8, data: &[u8]) -> &mut Self {
        self.segments.push((segment, true, data.to_vec()));
        self
    }

    pub fn ram_segment(&mut self, segment: u8) -> &mut Self {
        self.segments.push((segment, false, Vec::new()));
        self
    }

    pub fn page(&mut self, page: u8, segment: u8) -> &mut Self {
        self.pages[(page & 3) as usize] = segment;
        self
    }

    pub fn priority_threshold(&mut self, n: i32) -> &mut Self {
        self.threshold = n;
        self
    }

    pub fn hook(&mut self, hook: Box<dyn BreakPointHook>) -> &mut Self {
        self.hook = Some(hook);
        self
    }

    pub fn build(&mut self) -> Result<Memory> {
        let mut memory = Memory::new()?;

        for (segment, is_rom, data) in &self.segments {
            memory.load_segment(*segment, *is_rom, data)?;
        }
        for (page, segment) in self.pages.iter().enumerate() {
            memory.set_page(page as u8, *segment);
        }
        memory.set_breakpoint_priority_threshold(self.threshold);
        if let Some(hook) = self.hook.take() {
            memory.set_breakpoint_hook(hook);
        }

        tracing::info!(
            "Initialized memory with {} segment(s), pages {:02X?}",
            self.segments.len(),
            memory.pages
        );

        Ok(memory)
    }
}
