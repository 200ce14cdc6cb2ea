//! Byte source and sink contracts for table data.
//!
//! A [`DataSource`] yields big-endian primitives and byte runs from a
//! cursor. Random-access sources additionally honor [`DataSource::seek`];
//! sequential sources (network or compressed streams) support forward
//! reads and [`DataSource::skip`] only, and report `seek` as an
//! unsupported operation rather than an I/O failure. [`DataSink`] is the
//! write-side mirror.
//!
//! [`SliceSource`] and [`VecSink`] cover in-memory data in both `std` and
//! `no_std` builds; the stream adapters over `std::io` are `std`-only.

use alloc::vec::Vec;

use crate::endian::{
    read_f32_be, read_f64_be, read_i16_be, read_i32_be, read_i64_be, read_u16_be, write_f32_be,
    write_f64_be, write_i16_be, write_i32_be, write_i64_be, write_u16_be,
};
use crate::error::{Error, Result};

/// Reads big-endian primitives and byte runs at a cursor.
pub trait DataSource {
    /// Fill `buf` completely from the cursor, advancing it.
    ///
    /// Running out of data is [`Error::EndOfStream`], distinct from an I/O
    /// failure.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Advance the cursor by `n` bytes without surfacing them.
    fn skip(&mut self, n: u64) -> Result<()>;

    /// The current cursor offset from the start of the source.
    fn position(&self) -> u64;

    /// Whether [`seek`](DataSource::seek) is available.
    fn is_random_access(&self) -> bool {
        false
    }

    /// Move the cursor to an absolute offset.
    ///
    /// Sequential sources report [`Error::UnsupportedOperation`]; random
    /// sources report [`Error::EndOfStream`] for an offset past the end.
    fn seek(&mut self, _offset: u64) -> Result<()> {
        Err(Error::UnsupportedOperation("seek on a sequential source"))
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(b[0])
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_i16(&mut self) -> Result<i16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(read_i16_be(&b))
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(read_u16_be(&b))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(read_i32_be(&b))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(read_i64_be(&b))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(read_f32_be(&b))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(read_f64_be(&b))
    }
}

/// Writes big-endian primitives and byte runs at an advancing cursor.
pub trait DataSink {
    /// Append all of `buf`.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()>;

    /// Total bytes written so far.
    fn position(&self) -> u64;

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write_bytes(&[val])
    }

    fn write_i8(&mut self, val: i8) -> Result<()> {
        self.write_bytes(&[val as u8])
    }

    fn write_i16(&mut self, val: i16) -> Result<()> {
        let mut b = [0u8; 2];
        write_i16_be(&mut b, val);
        self.write_bytes(&b)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        let mut b = [0u8; 2];
        write_u16_be(&mut b, val);
        self.write_bytes(&b)
    }

    fn write_i32(&mut self, val: i32) -> Result<()> {
        let mut b = [0u8; 4];
        write_i32_be(&mut b, val);
        self.write_bytes(&b)
    }

    fn write_i64(&mut self, val: i64) -> Result<()> {
        let mut b = [0u8; 8];
        write_i64_be(&mut b, val);
        self.write_bytes(&b)
    }

    fn write_f32(&mut self, val: f32) -> Result<()> {
        let mut b = [0u8; 4];
        write_f32_be(&mut b, val);
        self.write_bytes(&b)
    }

    fn write_f64(&mut self, val: f64) -> Result<()> {
        let mut b = [0u8; 8];
        write_f64_be(&mut b, val);
        self.write_bytes(&b)
    }
}

// ── In-memory source ──

/// Random-access [`DataSource`] over a byte slice.
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceSource { data, pos: 0 }
    }

    /// Remaining bytes past the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl DataSource for SliceSource<'_> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() > self.remaining() {
            return Err(Error::EndOfStream);
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        if n > self.remaining() as u64 {
            return Err(Error::EndOfStream);
        }
        self.pos += n as usize;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn is_random_access(&self) -> bool {
        true
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.data.len() as u64 {
            return Err(Error::EndOfStream);
        }
        self.pos = offset as usize;
        Ok(())
    }
}

// ── In-memory sink ──

/// Growable in-memory [`DataSink`].
#[derive(Debug, Default)]
pub struct VecSink {
    buf: Vec<u8>,
}

impl VecSink {
    pub fn new() -> Self {
        VecSink { buf: Vec::new() }
    }

    /// Borrow the bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the sink, returning the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl DataSink for VecSink {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.buf.len() as u64
    }
}

// ── Stream adapters (std) ──

/// Sequential [`DataSource`] over any [`std::io::Read`].
///
/// The fallback for non-seekable inputs: forward reads and `skip` only.
/// Heap-indirected columns cannot be decoded through it and degrade as the
/// decode layer documents.
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
    pos: u64,
}

#[cfg(feature = "std")]
impl<R: std::io::Read> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        StreamSource { inner, pos: 0 }
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(feature = "std")]
impl<R: std::io::Read> DataSource for StreamSource<R> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        use std::io::Read as _;
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        use std::io::Read as _;
        let copied = std::io::copy(&mut (&mut self.inner).take(n), &mut std::io::sink())?;
        self.pos += copied;
        if copied < n {
            return Err(Error::EndOfStream);
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

/// Forward-only [`DataSink`] over any [`std::io::Write`].
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct StreamSink<W> {
    inner: W,
    pos: u64,
}

#[cfg(feature = "std")]
impl<W: std::io::Write> StreamSink<W> {
    pub fn new(inner: W) -> Self {
        StreamSink { inner, pos: 0 }
    }

    /// Flush and unwrap the underlying writer.
    pub fn into_inner(mut self) -> std::io::Result<W> {
        use std::io::Write as _;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(feature = "std")]
impl<W: std::io::Write> DataSink for StreamSink<W> {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        use std::io::Write as _;
        self.inner.write_all(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

// ── Tests ──
