//! Object-format independent description of a raw symbol table.

use super::view::{ByteView, Endian, ViewError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Elf32,
    Elf64,
    MachO32,
    MachO64,
}

impl ObjectFormat {
    /// Size of one raw symbol table entry
    pub fn entry_size(self) -> usize {
        match self {
            ObjectFormat::Elf32 => 16,
            ObjectFormat::Elf64 => 24,
            ObjectFormat::MachO32 => 12,
            ObjectFormat::MachO64 => 16,
        }
    }

    /// Mach-O prefixes every C-level name with `_`; `dlsym` hides it.
    pub fn strips_leading_underscore(self) -> bool {
        matches!(self, ObjectFormat::MachO32 | ObjectFormat::MachO64)
    }

    /// Decode the entry at `offset` within the symbol array view.
    pub fn decode(self, view: &ByteView<'_>, offset: usize) -> Result<RawSymbol, ViewError> {
        match self {
            ObjectFormat::Elf32 => Ok(RawSymbol {
                name_offset: view.u32_at(offset)?,
                value: u64::from(view.u32_at(offset + 4)?),
                defined: view.u16_at(offset + 14)? != SHN_UNDEF,
            }),
            ObjectFormat::Elf64 => Ok(RawSymbol {
                name_offset: view.u32_at(offset)?,
                value: view.u64_at(offset + 8)?,
                defined: view.u16_at(offset + 6)? != SHN_UNDEF,
            }),
            ObjectFormat::MachO32 => Ok(RawSymbol {
                name_offset: view.u32_at(offset)?,
                value: u64::from(view.u32_at(offset + 8)?),
                defined: view.u8_at(offset + 5)? != NO_SECT,
            }),
            ObjectFormat::MachO64 => Ok(RawSymbol {
                name_offset: view.u32_at(offset)?,
                value: view.u64_at(offset + 8)?,
                defined: view.u8_at(offset + 5)? != NO_SECT,
            }),
        }
    }
}

const SHN_UNDEF: u16 = 0;
const NO_SECT: u8 = 0;

/// One decoded symbol table entry, before name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSymbol {
    pub name_offset: u32,
    pub value: u64,
    /// False for undefined / no-section entries
    pub defined: bool,
}

/// Where the symbol and string tables live inside an image view,
/// and how raw symbol values map to run-time addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableLayout {
    pub format: ObjectFormat,
    pub endian: Endian,
    pub symbols_offset: usize,
    pub symbol_count: usize,
    pub strings_offset: usize,
    pub strings_size: usize,
    /// Link-time address of the first loaded segment; subtracted from every
    /// symbol value before the module base is added.
    pub value_bias: u64,
}

impl SymbolTableLayout {
    pub fn symbols_size(&self) -> usize {
        self.symbol_count * self.format.entry_size()
    }

    /// Translate a raw symbol value into an address inside a module loaded at `base`.
    pub fn address(&self, base: usize, value: u64) -> usize {
        base.wrapping_add(value.wrapping_sub(self.value_bias) as usize)
    }
}

/// How the image bytes handed to the parser relate to the module on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Bytes of the backing file; table offsets are file offsets.
    File,
    /// Bytes of the image as mapped by the loader, starting at the module base.
    Mapped,
}

/// Locate the raw symbol/string tables of an ELF or Mach-O image.
pub fn locate_symbol_table(
    view: &ByteView<'_>,
    kind: ImageKind,
) -> Result<SymbolTableLayout, LayoutError> {
    let magic = view.bytes_at(0, 4).map_err(LayoutError::View)?;
    if magic == super::elf::ELF_MAGIC {
        return super::elf::locate(view);
    }
    if super::macho::is_macho(magic) {
        return super::macho::locate(view, kind);
    }
    Err(LayoutError::UnknownFormat)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("unrecognized object file format")]
    UnknownFormat,

    #[error("unsupported image: {0}")]
    Unsupported(&'static str),

    #[error("no symbol table ({0})")]
    MissingTable(&'static str),

    #[error(transparent)]
    View(#[from] ViewError),
}
