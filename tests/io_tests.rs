use std::{cell::RefCell, rc::Rc};

use ep128mem::{BreakPoint, BreakPointHook, BreakPointTarget, IoPorts, PortDevice};
use tracing_subscriber::fmt;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

type Log = Rc<RefCell<Vec<String>>>;

struct LogHook(Log);

impl BreakPointHook for LogHook {
    fn break_point(&mut self, is_write: bool, addr: u16, value: u8) {
        self.0.borrow_mut().push(format!(
            "bp {} {:04X} {:02X}",
            if is_write { "wr" } else { "rd" },
            addr,
            value
        ));
    }
}

fn logged_ports() -> (IoPorts, Log) {
    let log = Log::default();
    let mut io = IoPorts::new().unwrap();
    io.set_breakpoint_hook(Box::new(LogHook(log.clone())));
    (io, log)
}

/// Minimal 8255 style latch: port A selects, port B reads back the
/// selected row.
#[derive(Default)]
struct Latch {
    selected: u8,
    rows: [u8; 4],
}

impl PortDevice for Latch {
    fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0 => self.selected,
            1 => self.rows[(self.selected & 3) as usize],
            _ => 0xFF,
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        match addr {
            0 => self.selected = value,
            1 => self.rows[(self.selected & 3) as usize] = value,
            _ => {}
        }
    }
}

#[test]
fn test_write_breakpoint_runs_before_device() {
    let (mut io, log) = logged_ports();
    let device_log = log.clone();
    io.set_write_callback(
        0xB0,
        0xB0,
        move |addr, value| {
            device_log
                .borrow_mut()
                .push(format!("dev {:04X} {:02X}", addr, value))
        },
        0x0000,
    );
    io.set_breakpoint(0xB0, 0, false, true).unwrap();

    io.write(0x12B0, 0x5A);

    assert_eq!(*log.borrow(), vec!["bp wr 12B0 5A", "dev 0000 5A"]);
    assert_eq!(io.port_value(0xB0), 0x5A);
}

#[test]
fn test_read_breakpoint_sees_device_value() {
    let (mut io, log) = logged_ports();
    let counter = Rc::new(RefCell::new(0u8));
    let device_counter = counter.clone();
    io.set_read_callback(
        0x80,
        0x80,
        move |_| {
            let mut counter = device_counter.borrow_mut();
            *counter += 1;
            *counter
        },
        0,
    );
    io.set_breakpoint(0x80, 0, true, false).unwrap();

    assert_eq!(io.read(0x80), 1);
    assert_eq!(io.read(0x80), 2);

    assert_eq!(*log.borrow(), vec!["bp rd 0080 01", "bp rd 0080 02"]);
}

#[test]
fn test_callback_range_wraps_with_base_address() {
    let mut io = IoPorts::new().unwrap();
    io.set_read_callback(0xFE, 0x01, |addr| addr as u8, 0x40);

    assert_eq!(io.read(0xFE), 0x40);
    assert_eq!(io.read(0xFF), 0x41);
    assert_eq!(io.read(0x00), 0x42);
    assert_eq!(io.read(0x01), 0x43);
    assert_eq!(io.read(0x02), 0xFF);
    assert_eq!(io.read(0xFD), 0xFF);
}

#[test]
fn test_high_address_byte_is_ignored() {
    let mut io = IoPorts::new().unwrap();
    io.set_read_callback(0x3FA8, 0x3FA8, |_| 0x12, 0);

    assert_eq!(io.read(0x00A8), 0x12);
    assert_eq!(io.read(0xFFA8), 0x12);
}

#[test]
fn test_mapped_device_shares_state_across_ports() {
    let mut io = IoPorts::new().unwrap();
    let latch = Rc::new(RefCell::new(Latch::default()));
    io.map_device(0xA8, 0xA9, 0, latch.clone());

    io.write(0xA8, 2);
    io.write(0xA9, 0x77);
    io.write(0xA8, 0);

    assert_eq!(io.read(0xA9), 0x00);
    io.write(0xA8, 2);
    assert_eq!(io.read(0xA9), 0x77);
    assert_eq!(latch.borrow().rows[2], 0x77);
}

#[test]
fn test_threshold_gating() {
    let (mut io, log) = logged_ports();
    io.set_breakpoint(0x10, 2, true, true).unwrap();

    io.set_breakpoint_priority_threshold(3);
    io.read(0x10);
    io.write(0x10, 0);
    assert!(log.borrow().is_empty());

    io.set_breakpoint_priority_threshold(2);
    assert_eq!(io.get_breakpoint_priority_threshold(), 2);
    io.write(0x10, 0x01);
    assert_eq!(*log.borrow(), vec!["bp wr 0010 01"]);

    io.set_breakpoint_priority_threshold(-3);
    assert_eq!(io.get_breakpoint_priority_threshold(), 0);
}

#[test]
fn test_breakpoint_merge_and_list() {
    let mut io = IoPorts::new().unwrap();
    io.set_breakpoint(0x1FE, 2, true, false).unwrap();
    io.set_breakpoint(0xFE, 1, false, true).unwrap();
    io.set_breakpoint(0x01, 7, true, false).unwrap();

    let entries: Vec<_> = io
        .breakpoint_list()
        .iter()
        .map(|e| (e.target, e.breakpoint))
        .collect();
    assert_eq!(
        entries,
        vec![
            (BreakPointTarget::Io { port: 0x01 }, BreakPoint::new(true, false, 3)),
            (BreakPointTarget::Io { port: 0xFE }, BreakPoint::new(true, true, 2)),
        ]
    );
}

#[test]
fn test_clear_breakpoints() {
    let (mut io, log) = logged_ports();
    io.set_breakpoint(0x20, 0, true, false).unwrap();
    io.set_breakpoint(0x21, 0, true, false).unwrap();

    io.set_breakpoint(0x20, 0, false, false).unwrap();
    io.read(0x20);
    assert!(log.borrow().is_empty());
    assert_eq!(io.breakpoint_list().len(), 1);

    io.clear_breakpoints();
    io.read(0x21);
    assert!(log.borrow().is_empty());
    assert!(io.breakpoint_list().is_empty());
}
