//! Backing storage for the bytes a [`SymbolIndex`](super::SymbolIndex) parses.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use super::layout::LayoutError;
use super::macho;
use super::view::ByteView;
use crate::error::Result;

/// Bytes of a module image, either owned, file-mapped, or borrowed from the
/// loader's own mapping of the module.
pub enum ImageSource {
    /// Read-only map of the module's backing file (ELF `.symtab` lives here).
    Mapped(Mmap),
    /// Heap copy; used for fixtures and images read eagerly.
    Owned(Vec<u8>),
    /// Image as mapped by the platform loader. Stored as an address so the
    /// index stays `Send`; validity is guaranteed by [`ImageSource::from_memory`].
    Memory { addr: usize, len: usize },
}

impl ImageSource {
    /// Map a module file read-only.
    pub fn map_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and the module file is not expected
        // to be truncated while the host process has it loaded.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(ImageSource::Mapped(mmap))
    }

    /// Borrow `len` bytes of loaded image memory starting at `addr`.
    ///
    /// # Safety
    ///
    /// `addr..addr + len` must stay mapped and readable for the lifetime of the
    /// returned value, which in practice means the owning module must not be
    /// unloaded before the index built from it is dropped.
    pub unsafe fn from_memory(addr: usize, len: usize) -> Self {
        ImageSource::Memory { addr, len }
    }

    /// Borrow a Mach-O image mapped at `base`, sized from its own load commands.
    ///
    /// # Safety
    ///
    /// `base` must be the load address of a Mach-O image that stays loaded for
    /// the lifetime of the returned value.
    pub unsafe fn mapped_macho(base: usize) -> std::result::Result<Self, LayoutError> {
        // mach_header_64 is the larger of the two headers
        let header = unsafe { std::slice::from_raw_parts(base as *const u8, 32) };
        let commands_len = macho::header_and_commands_size(&ByteView::new(header))?;

        let commands = unsafe { std::slice::from_raw_parts(base as *const u8, commands_len) };
        let span = macho::mapped_span(&ByteView::new(commands))?;
        Ok(unsafe { Self::from_memory(base, span.max(commands_len)) })
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            ImageSource::Mapped(mmap) => &mmap[..],
            ImageSource::Owned(bytes) => bytes.as_slice(),
            // SAFETY: upheld by the constructors' contracts
            ImageSource::Memory { addr, len } => unsafe {
                std::slice::from_raw_parts(*addr as *const u8, *len)
            },
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Owned(bytes)
    }
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::Mapped(mmap) => write!(f, "Mapped({} bytes)", mmap.len()),
            ImageSource::Owned(bytes) => write!(f, "Owned({} bytes)", bytes.len()),
            ImageSource::Memory { addr, len } => write!(f, "Memory({addr:#x}, {len} bytes)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::symbols::fixture::{ElfFixture, MachOFixture};
    use std::io::Write;

    #[test]
    fn test_map_file_exposes_file_bytes() {
        let image = ElfFixture::new().symbol("alpha", 0x10).build64();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&image).unwrap();
        file.flush().unwrap();

        let source = ImageSource::map_file(file.path()).unwrap();
        assert_eq!(source.bytes(), image.as_slice());
        assert!(matches!(source, ImageSource::Mapped(_)));
    }

    #[test]
    fn test_map_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageSource::map_file(&dir.path().join("missing.so")).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_mapped_macho_covers_whole_image() {
        let image = MachOFixture::new().symbol("_alpha", 0x100).build64();
        let source = unsafe { ImageSource::mapped_macho(image.as_ptr() as usize) }.unwrap();
        assert_eq!(source.len(), image.len());
        assert_eq!(source.bytes(), image.as_slice());
    }
}
