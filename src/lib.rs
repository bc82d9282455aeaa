pub mod bplist;
pub mod breakpoint;
pub mod error;
pub mod io;
pub mod memory;
pub mod utils;

pub use bplist::{BreakPointEntry, BreakPointList, BreakPointSink, BreakPointTarget};
pub use breakpoint::{BreakPoint, BreakPointHook, BreakPointTable, NoBreakPointHook, PriorityThreshold};
pub use error::{Error, Result};
pub use io::{IoPorts, PortDevice, ReadHandler, WriteHandler};
pub use memory::{Memory, MemoryBuilder, PAGE_COUNT, SEGMENT_COUNT, SEGMENT_SIZE};
pub use utils::hexdump;
