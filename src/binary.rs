//! Little-endian binary I/O helpers.
//!
//! These are extension traits over [`Read`] and [`Write`], so the same calls work on a
//! forward-only stream, an in-memory `Vec<u8>` record buffer, or a seekable `File`.
//!
//! The cache log only needs bytes, `u32` and `u64`. The `u16` and varint calls round out
//! the helper set for other record formats built on the same traits.
//!
//! Unsigned 64-bit values are limited to 63 bits: the top bit is reserved and reading or
//! writing a value that uses it fails with [`Error::ValueOutOfRange`].

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

const U63_MAX: u64 = 0x7FFF_FFFF_FFFF_FFFF;

pub trait ReadBinaryExt: Read {
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        let value = u64::from_le_bytes(buf);
        if value > U63_MAX {
            return Err(Error::ValueOutOfRange(value));
        }
        Ok(value)
    }

    /// Reads exactly `len` bytes. A short stream is an [`io::ErrorKind::UnexpectedEof`].
    fn read_raw_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a variable-length integer (7 bits per byte, low group first, high bit set on
    /// every byte except the last).
    ///
    /// Returns `Ok(None)` when the stream is already at end-of-file. Running out of input
    /// part way through a varint is an error.
    fn read_varint(&mut self) -> Result<Option<u64>> {
        let mut acc: u64 = 0;
        let mut shift = 0u32;
        let mut buf = [0u8; 1];
        loop {
            if self.read(&mut buf)? == 0 {
                if shift == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated varint").into());
            }
            if shift > 56 {
                return Err(Error::ValueOutOfRange(acc));
            }
            let byte = buf[0];
            acc |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        if acc > U63_MAX {
            return Err(Error::ValueOutOfRange(acc));
        }
        Ok(Some(acc))
    }
}

impl<R: Read + ?Sized> ReadBinaryExt for R {}

pub trait WriteBinaryExt: Write {
    fn write_byte(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])?;
        Ok(())
    }

    fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_u64_le(&mut self, value: u64) -> Result<()> {
        if value > U63_MAX {
            return Err(Error::ValueOutOfRange(value));
        }
        self.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn write_raw_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(())
    }

    fn write_varint(&mut self, value: u64) -> Result<()> {
        if value > U63_MAX {
            return Err(Error::ValueOutOfRange(value));
        }
        let mut v = value;
        while v >= 0x80 {
            self.write_byte((v & 0x7F) as u8 | 0x80)?;
            v >>= 7;
        }
        self.write_byte(v as u8)
    }
}

impl<W: Write + ?Sized> WriteBinaryExt for W {}
