use std::{cell::RefCell, rc::Rc};

use derivative::Derivative;
use tracing::trace;

use crate::{
    bplist::{BreakPointList, BreakPointSink, BreakPointTarget},
    breakpoint::{BreakPoint, BreakPointHook, BreakPointTable, NoBreakPointHook, PriorityThreshold},
    error::{try_alloc, try_alloc_with, Result},
};

pub const PORT_COUNT: usize = 256;

/// Called with the device relative address, returns the byte read.
pub type ReadHandler = Rc<dyn Fn(u16) -> u8>;

/// Called with the device relative address and the byte written.
pub type WriteHandler = Rc<dyn Fn(u16, u8)>;

/// A hardware block answering on one or more I/O ports.
pub trait PortDevice {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);
}

#[derive(Clone)]
struct ReadCallback {
    func: ReadHandler,
    addr: u16,
}

#[derive(Clone)]
struct WriteCallback {
    func: WriteHandler,
    addr: u16,
}

/// The 256 entry I/O port space. Only the low byte of a port address is
/// decoded; the full address is still reported to the breakpoint hook.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct IoPorts {
    port_values: Box<[u8]>,
    #[derivative(Debug = "ignore")]
    read_callbacks: Vec<ReadCallback>,
    #[derivative(Debug = "ignore")]
    write_callbacks: Vec<WriteCallback>,
    breakpoints: BreakPointTable,
    threshold: PriorityThreshold,
    #[derivative(Debug = "ignore")]
    hook: Box<dyn BreakPointHook>,
}

impl IoPorts {
    /// Every port starts out reading 0xFF and ignoring writes.
    pub fn new() -> Result<Self> {
        let unmapped_read: ReadHandler = Rc::new(|_| 0xFF);
        let unmapped_write: WriteHandler = Rc::new(|_, _| {});

        Ok(Self {
            port_values: try_alloc(PORT_COUNT, 0xFF)?,
            read_callbacks: try_alloc_with(PORT_COUNT, |port| ReadCallback {
                func: unmapped_read.clone(),
                addr: port as u16,
            })?,
            write_callbacks: try_alloc_with(PORT_COUNT, |port| WriteCallback {
                func: unmapped_write.clone(),
                addr: port as u16,
            })?,
            breakpoints: BreakPointTable::new(PORT_COUNT),
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

    /// Runs the device first so the hook sees the value actually read.
    #[inline]
    pub fn read(&mut self, addr: u16) -> u8 {
        let offs = (addr & 0xFF) as usize;
        let cb = &self.read_callbacks[offs];
        let value = (cb.func)(cb.addr);

        if self.breakpoints.triggers(offs, self.threshold, false) {
            trace!("[IO] Breakpoint RD ${:04X} = ${:02X}", addr, value);
            self.hook.break_point(false, addr, value);
        }

        value
    }

    /// Reports the pending value to the hook before the port latches it and
    /// the device sees it.
    #[inline]
    pub fn write(&mut self, addr: u16, value: u8) {
        let offs = (addr & 0xFF) as usize;

        if self.breakpoints.triggers(offs, self.threshold, true) {
            trace!("[IO] Breakpoint WR ${:04X} = ${:02X}", addr, value);
            self.hook.break_point(true, addr, value);
        }

        self.port_values[offs] = value;
        let cb = &self.write_callbacks[offs];
        (cb.func)(cb.addr, value);
    }

    /// Last value written to `port`.
    pub fn port_value(&self, port: u16) -> u8 {
        self.port_values[(port & 0xFF) as usize]
    }

    /// Installs `func` on the ports `first..=last`, wrapping past 0xFF. Each
    /// port is handed `base` plus its distance from `first`.
    pub fn set_read_callback(
        &mut self,
        first: u16,
        last: u16,
        func: impl Fn(u16) -> u8 + 'static,
        base: u16,
    ) {
        let func: ReadHandler = Rc::new(func);
        for_each_port(first, last, base, |port, addr| {
            self.read_callbacks[port] = ReadCallback {
                func: func.clone(),
                addr,
            };
        });
        trace!(
            "[IO] Read callback on ports {:02X}-{:02X} base {:04X}",
            first & 0xFF,
            last & 0xFF,
            base
        );
    }

    /// Write side of [`IoPorts::set_read_callback`].
    pub fn set_write_callback(
        &mut self,
        first: u16,
        last: u16,
        func: impl Fn(u16, u8) + 'static,
        base: u16,
    ) {
        let func: WriteHandler = Rc::new(func);
        for_each_port(first, last, base, |port, addr| {
            self.write_callbacks[port] = WriteCallback {
                func: func.clone(),
                addr,
            };
        });
        trace!(
            "[IO] Write callback on ports {:02X}-{:02X} base {:04X}",
            first & 0xFF,
            last & 0xFF,
            base
        );
    }

    /// Routes reads and writes on `first..=last` to `device`.
    pub fn map_device<D: PortDevice + 'static>(
        &mut self,
        first: u16,
        last: u16,
        base: u16,
        device: Rc<RefCell<D>>,
    ) {
        let reader = device.clone();
        self.set_read_callback(first, last, move |addr| reader.borrow_mut().read(addr), base);
        self.set_write_callback(
            first,
            last,
            move |addr, value| device.borrow_mut().write(addr, value),
            base,
        );
    }

    pub fn set_breakpoint(&mut self, addr: u16, priority: i32, read: bool, write: bool) -> Result<()> {
        self.breakpoints
            .set((addr & 0xFF) as usize, BreakPoint::new(read, write, priority))
    }

    /// Merges every I/O entry of `list`; memory entries are skipped.
    pub fn set_breakpoints(&mut self, list: &BreakPointList) -> Result<()> {
        for entry in list {
            if let BreakPointTarget::Io { port } = entry.target {
                let bp = entry.breakpoint;
                self.set_breakpoint(port as u16, bp.priority as i32, bp.read, bp.write)?;
            }
        }
        Ok(())
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear_all();
    }

    pub fn set_breakpoint_priority_threshold(&mut self, n: i32) {
        self.threshold = PriorityThreshold::new(n);
    }

    pub fn get_breakpoint_priority_threshold(&self) -> i32 {
        self.threshold.get()
    }

    pub fn append_breakpoints<S: BreakPointSink>(&self, sink: &mut S) {
        for (port, bp) in self.breakpoints.iter() {
            sink.add_io_breakpoint(port as u8, bp.read, bp.write, bp.priority);
        }
    }

    pub fn breakpoint_list(&self) -> BreakPointList {
        let mut list = BreakPointList::new();
        self.append_breakpoints(&mut list);
        list
    }
}

fn for_each_port(first: u16, last: u16, base: u16, mut f: impl FnMut(usize, u16)) {
    let last = (last & 0xFF) as u8;
    let mut port = (first & 0xFF) as u8;
    let mut addr = base;
    loop {
        f(port as usize, addr);
        if port == last {
            break;
        }
        port = port.wrapping_add(1);
        addr = addr.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_ports() {
        let mut io = IoPorts::new().unwrap();
        assert_eq!(io.read(0x12), 0xFF);
        io.write(0x34, 0x56);
        assert_eq!(io.port_value(0x34), 0x56);
        assert_eq!(io.port_value(0x1234), 0x56);
    }

    #[test]
    fn test_for_each_port_wraps() {
        let mut seen = Vec::new();
        for_each_port(0xFE, 0x01, 0x10, |port, addr| seen.push((port, addr)));
        assert_eq!(seen, vec![(0xFE, 0x10), (0xFF, 0x11), (0x00, 0x12), (0x01, 0x13)]);
    }

    #[test]
    fn test_single_port_range() {
        let mut seen = Vec::new();
        for_each_port(0x1A8, 0xA8, 0, |port, addr| seen.push((port, addr)));
        assert_eq!(seen, vec![(0xA8, 0)]);
    }
}
