//! Bounds-checked view over raw image bytes.
//!
//! Every read from a module header, symbol array or string table goes
//! through [`ByteView`], so a truncated or corrupt image yields a
//! [`ViewError`] instead of a read past the end of the mapping.

use std::ffi::CStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("read of {len} bytes at offset {offset:#x} exceeds view of {size:#x} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("unterminated string at offset {0:#x}")]
    UnterminatedString(usize),
}

/// Byte order of the image being parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    bytes: &'a [u8],
    endian: Endian,
}

impl<'a> ByteView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            endian: Endian::Little,
        }
    }

    pub fn with_endian(bytes: &'a [u8], endian: Endian) -> Self {
        Self { bytes, endian }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn bytes_at(&self, offset: usize, len: usize) -> Result<&'a [u8], ViewError> {
        let end = offset.checked_add(len).ok_or(ViewError::OutOfBounds {
            offset,
            len,
            size: self.bytes.len(),
        })?;
        self.bytes.get(offset..end).ok_or(ViewError::OutOfBounds {
            offset,
            len,
            size: self.bytes.len(),
        })
    }

    /// Narrow the view to `len` bytes starting at `offset`.
    pub fn subview(&self, offset: usize, len: usize) -> Result<ByteView<'a>, ViewError> {
        Ok(ByteView {
            bytes: self.bytes_at(offset, len)?,
            endian: self.endian,
        })
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8, ViewError> {
        Ok(self.bytes_at(offset, 1)?[0])
    }

    pub fn u16_at(&self, offset: usize) -> Result<u16, ViewError> {
        let raw: [u8; 2] = self.array_at(offset)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32, ViewError> {
        let raw: [u8; 4] = self.array_at(offset)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    pub fn u64_at(&self, offset: usize) -> Result<u64, ViewError> {
        let raw: [u8; 8] = self.array_at(offset)?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }

    /// Read a pointer-sized word: 8 bytes for 64-bit images, 4 bytes otherwise.
    pub fn word_at(&self, offset: usize, is_64: bool) -> Result<u64, ViewError> {
        if is_64 {
            self.u64_at(offset)
        } else {
            self.u32_at(offset).map(u64::from)
        }
    }

    /// Read a NUL-terminated string starting at `offset`.
    pub fn cstr_at(&self, offset: usize) -> Result<&'a CStr, ViewError> {
        let tail = self.bytes.get(offset..).ok_or(ViewError::OutOfBounds {
            offset,
            len: 1,
            size: self.bytes.len(),
        })?;
        let nul = memchr::memchr(0, tail).ok_or(ViewError::UnterminatedString(offset))?;
        CStr::from_bytes_with_nul(&tail[..=nul]).map_err(|_| ViewError::UnterminatedString(offset))
    }

    fn array_at<const N: usize>(&self, offset: usize) -> Result<[u8; N], ViewError> {
        let slice = self.bytes_at(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_little_and_big_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let le = ByteView::new(&bytes);
        assert_eq!(le.u16_at(0).unwrap(), 0x0201);
        assert_eq!(le.u32_at(0).unwrap(), 0x0403_0201);
        assert_eq!(le.u64_at(0).unwrap(), 0x0807_0605_0403_0201);

        let be = ByteView::with_endian(&bytes, Endian::Big);
        assert_eq!(be.u32_at(4).unwrap(), 0x0506_0708);
    }

    #[test]
    fn test_read_past_end_is_an_error() {
        let bytes = [0u8; 6];
        let view = ByteView::new(&bytes);
        assert_eq!(
            view.u32_at(4),
            Err(ViewError::OutOfBounds {
                offset: 4,
                len: 4,
                size: 6
            })
        );
        assert!(view.u8_at(6).is_err());
        assert!(view.bytes_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_cstr_requires_terminator() {
        let bytes = b"\0alpha\0beta";
        let view = ByteView::new(bytes);
        assert_eq!(view.cstr_at(1).unwrap().to_bytes(), b"alpha");
        assert_eq!(view.cstr_at(0).unwrap().to_bytes(), b"");
        assert_eq!(view.cstr_at(7), Err(ViewError::UnterminatedString(7)));
    }

    #[test]
    fn test_subview_is_relative() {
        let bytes = [0xAA, 0xBB, 0x10, 0x00, 0x00, 0x00];
        let view = ByteView::new(&bytes).subview(2, 4).unwrap();
        assert_eq!(view.len(), 4);
        assert_eq!(view.u32_at(0).unwrap(), 0x10);
        assert!(view.u8_at(4).is_err());
    }
}
