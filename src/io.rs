//! # Random-Access Read Abstraction
//!
//! File-backed readers fetch every field (header word, block base, one
//! packed field) with an individual positioned read instead of loading the
//! blob into memory. This trait is that seam: anything offering stateless
//! positioned reads can back a [`Reader`](crate::reader::Reader).
//!
//! ## Error Handling
//!
//! A read that cannot fill the destination buffer completely is an error,
//! never a silent zero-fill; a compressed column has no valid short reads.

use std::fs::File;

use eyre::{ensure, Result, WrapErr};

/// Stateless positioned reads over a persisted compressed column.
pub trait RandomRead: Send + Sync {
    /// Fill `buf` from `offset`. Errors on any short read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

#[cfg(unix)]
impl RandomRead for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        FileExt::read_exact_at(self, buf, offset)
            .wrap_err_with(|| format!("short read of {} bytes at offset {}", buf.len(), offset))
    }
}

#[cfg(windows)]
impl RandomRead for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::os::windows::fs::FileExt;
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = FileExt::seek_read(self, &mut buf[filled..], offset + filled as u64)
                .wrap_err_with(|| format!("read failed at offset {}", offset))?;
            ensure!(n > 0, "short read of {} bytes at offset {}", buf.len(), offset);
            filled += n;
        }
        Ok(())
    }
}

/// In-memory backing, mainly for tests and for columns already resident in
/// a caller-owned buffer.
impl RandomRead for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let offset = offset as usize;
        let end = offset.checked_add(buf.len());
        ensure!(
            end.is_some_and(|end| end <= self.len()),
            "read of {} bytes at offset {} past end of {}-byte buffer",
            buf.len(),
            offset,
            self.len()
        );
        buf.copy_from_slice(&self[offset..offset + buf.len()]);
        Ok(())
    }
}
