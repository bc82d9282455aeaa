use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("invalid breakpoint: {0}")]
    InvalidBreakPoint(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Allocates a boxed buffer of `len` bytes set to `fill`, reporting
/// allocation failure instead of aborting.
pub(crate) fn try_alloc(len: usize, fill: u8) -> Result<Box<[u8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory { bytes: len })?;
    buf.resize(len, fill);
    Ok(buf.into_boxed_slice())
}

/// Same as [`try_alloc`] for tables of arbitrary elements.
pub(crate) fn try_alloc_with<T>(len: usize, f: impl FnMut(usize) -> T) -> Result<Vec<T>> {
    let mut table = Vec::new();
    table
        .try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory {
            bytes: len * std::mem::size_of::<T>(),
        })?;
    table.extend((0..len).map(f));
    Ok(table)
}
