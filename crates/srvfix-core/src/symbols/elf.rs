//! ELF section-header walk for `.symtab` (or `.dynsym`) and its string table.
//!
//! The full symbol table is not part of any loadable segment, so the
//! parser runs over the module's backing file and the lowest `PT_LOAD`
//! address is recorded as the value bias.

use tracing::debug;

use super::layout::{LayoutError, ObjectFormat, SymbolTableLayout};
use super::view::{ByteView, Endian};

pub const ELF_MAGIC: &[u8] = b"\x7fELF";

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

const SHT_SYMTAB: u32 = 2;
const SHT_DYNSYM: u32 = 11;
const PT_LOAD: u32 = 1;

/// Field offsets that differ between ELFCLASS32 and ELFCLASS64
struct ClassLayout {
    is_64: bool,
    e_phoff: usize,
    e_shoff: usize,
    e_phentsize: usize,
    e_phnum: usize,
    e_shentsize: usize,
    e_shnum: usize,
    sh_offset: usize,
    sh_size: usize,
    sh_link: usize,
    sh_entsize: usize,
    p_vaddr: usize,
}

const CLASS32: ClassLayout = ClassLayout {
    is_64: false,
    e_phoff: 28,
    e_shoff: 32,
    e_phentsize: 42,
    e_phnum: 44,
    e_shentsize: 46,
    e_shnum: 48,
    sh_offset: 16,
    sh_size: 20,
    sh_link: 24,
    sh_entsize: 36,
    p_vaddr: 8,
};

const CLASS64: ClassLayout = ClassLayout {
    is_64: true,
    e_phoff: 32,
    e_shoff: 40,
    e_phentsize: 54,
    e_phnum: 56,
    e_shentsize: 58,
    e_shnum: 60,
    sh_offset: 24,
    sh_size: 32,
    sh_link: 40,
    sh_entsize: 56,
    p_vaddr: 16,
};

pub fn locate(image: &ByteView<'_>) -> Result<SymbolTableLayout, LayoutError> {
    let (class, format) = match image.u8_at(4)? {
        ELFCLASS32 => (&CLASS32, ObjectFormat::Elf32),
        ELFCLASS64 => (&CLASS64, ObjectFormat::Elf64),
        _ => return Err(LayoutError::Unsupported("unknown ELF class")),
    };
    let endian = match image.u8_at(5)? {
        ELFDATA2LSB => Endian::Little,
        ELFDATA2MSB => Endian::Big,
        _ => return Err(LayoutError::Unsupported("unknown ELF data encoding")),
    };
    let view = ByteView::with_endian(image.as_bytes(), endian);

    let shoff = view.word_at(class.e_shoff, class.is_64)? as usize;
    let shentsize = view.u16_at(class.e_shentsize)? as usize;
    let shnum = view.u16_at(class.e_shnum)? as usize;
    if shoff == 0 || shnum == 0 {
        return Err(LayoutError::MissingTable("no section headers"));
    }

    let section = |index: usize| {
        index
            .checked_mul(shentsize)
            .and_then(|o| shoff.checked_add(o))
            .ok_or(LayoutError::Unsupported("section table overflow"))
    };

    // Full .symtab wins; a stripped image still exports through .dynsym
    let mut symtab = None;
    let mut dynsym = None;
    for index in 0..shnum {
        let header = section(index)?;
        match view.u32_at(field(header, 4)?)? {
            SHT_SYMTAB => {
                symtab = Some(header);
                break;
            }
            SHT_DYNSYM if dynsym.is_none() => dynsym = Some(header),
            _ => {}
        }
    }
    let symtab = match (symtab, dynsym) {
        (Some(header), _) => header,
        (None, Some(header)) => {
            debug!("ELF image has no .symtab, falling back to .dynsym");
            header
        }
        (None, None) => return Err(LayoutError::MissingTable("no .symtab or .dynsym section")),
    };

    let symbols_offset = view.word_at(field(symtab, class.sh_offset)?, class.is_64)? as usize;
    let symbols_size = view.word_at(field(symtab, class.sh_size)?, class.is_64)? as usize;
    let entsize = view.word_at(field(symtab, class.sh_entsize)?, class.is_64)? as usize;
    if entsize != format.entry_size() {
        return Err(LayoutError::Unsupported("unexpected symbol entry size"));
    }

    let link = view.u32_at(field(symtab, class.sh_link)?)? as usize;
    if link == 0 || link >= shnum {
        return Err(LayoutError::MissingTable("symbol table has no linked string table"));
    }
    let strtab = section(link)?;
    let strings_offset = view.word_at(field(strtab, class.sh_offset)?, class.is_64)? as usize;
    let strings_size = view.word_at(field(strtab, class.sh_size)?, class.is_64)? as usize;

    // Both tables must lie inside the image before any scan starts
    view.bytes_at(symbols_offset, symbols_size)?;
    view.bytes_at(strings_offset, strings_size)?;

    let value_bias = lowest_load_address(&view, class)?;
    let layout = SymbolTableLayout {
        format,
        endian,
        symbols_offset,
        symbol_count: symbols_size / entsize,
        strings_offset,
        strings_size,
        value_bias,
    };
    debug!(
        "ELF symbol table: {} entries at {:#x}, strings at {:#x} ({} bytes), bias {:#x}",
        layout.symbol_count, symbols_offset, strings_offset, strings_size, value_bias
    );
    Ok(layout)
}

/// Offset of a header field, rejecting headers placed near the end of the address space.
fn field(header: usize, offset: usize) -> Result<usize, LayoutError> {
    header
        .checked_add(offset)
        .ok_or(LayoutError::Unsupported("header offset overflow"))
}

fn lowest_load_address(view: &ByteView<'_>, class: &ClassLayout) -> Result<u64, LayoutError> {
    let phoff = view.word_at(class.e_phoff, class.is_64)? as usize;
    let phentsize = view.u16_at(class.e_phentsize)? as usize;
    let phnum = view.u16_at(class.e_phnum)? as usize;

    let mut lowest: Option<u64> = None;
    for index in 0..phnum {
        let header = index
            .checked_mul(phentsize)
            .and_then(|o| phoff.checked_add(o))
            .ok_or(LayoutError::Unsupported("program header table overflow"))?;
        if view.u32_at(header)? != PT_LOAD {
            continue;
        }
        let vaddr = view.word_at(field(header, class.p_vaddr)?, class.is_64)?;
        lowest = Some(lowest.map_or(vaddr, |current| current.min(vaddr)));
    }
    Ok(lowest.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::fixture::ElfFixture;
    use crate::symbols::layout::{ImageKind, locate_symbol_table};

    #[test]
    fn test_locates_symtab_in_elf64() {
        let image = ElfFixture::new()
            .symbol("alpha", 0x1000)
            .symbol("beta", 0x2000)
            .build64();
        let layout = locate_symbol_table(&ByteView::new(&image), ImageKind::File).unwrap();

        assert_eq!(layout.format, ObjectFormat::Elf64);
        // null entry + two symbols
        assert_eq!(layout.symbol_count, 3);
        assert_eq!(layout.value_bias, 0);
    }

    #[test]
    fn test_locates_symtab_in_elf32() {
        let image = ElfFixture::new().symbol("alpha", 0x1000).build32();
        let layout = locate_symbol_table(&ByteView::new(&image), ImageKind::File).unwrap();

        assert_eq!(layout.format, ObjectFormat::Elf32);
        assert_eq!(layout.symbol_count, 2);
    }

    #[test]
    fn test_load_bias_comes_from_lowest_segment() {
        let image = ElfFixture::new()
            .load_segment(0x40_0000)
            .load_segment(0x20_0000)
            .symbol("main", 0x20_1234)
            .build64();
        let layout = locate_symbol_table(&ByteView::new(&image), ImageKind::File).unwrap();

        assert_eq!(layout.value_bias, 0x20_0000);
        assert_eq!(layout.address(0x7f00_0000_0000, 0x20_1234), 0x7f00_0000_1234);
    }

    #[test]
    fn test_stripped_image_has_no_table() {
        let image = ElfFixture::new().symbol("alpha", 0x1000).stripped().build64();
        let err = locate_symbol_table(&ByteView::new(&image), ImageKind::File).unwrap_err();
        assert!(matches!(err, LayoutError::MissingTable(_)));
    }

    #[test]
    fn test_stripped_image_falls_back_to_dynsym() {
        let image = ElfFixture::new()
            .symbol("exported", 0x1000)
            .exports_only()
            .build64();
        let layout = locate_symbol_table(&ByteView::new(&image), ImageKind::File).unwrap();
        assert_eq!(layout.symbol_count, 2);

        let view = ByteView::new(&image);
        let raw = layout
            .format
            .decode(&view, layout.symbols_offset + layout.format.entry_size())
            .unwrap();
        assert!(raw.defined);
        assert_eq!(raw.value, 0x1000);
    }

    #[test]
    fn test_stripped_elf32_falls_back_to_dynsym() {
        let image = ElfFixture::new().symbol("exported", 0x1000).exports_only().build32();
        let layout = locate_symbol_table(&ByteView::new(&image), ImageKind::File).unwrap();
        assert_eq!(layout.format, ObjectFormat::Elf32);
        assert_eq!(layout.symbol_count, 2);
    }

    #[test]
    fn test_section_offset_near_address_space_end_is_rejected() {
        let mut image = ElfFixture::new().symbol("alpha", 0x1000).build64();
        image[40..48].copy_from_slice(&(u64::MAX - 1).to_le_bytes());
        let err = locate_symbol_table(&ByteView::new(&image), ImageKind::File).unwrap_err();
        assert_eq!(err, LayoutError::Unsupported("header offset overflow"));
    }

    #[test]
    fn test_program_header_offset_out_of_range_is_rejected() {
        let mut image = ElfFixture::new().symbol("alpha", 0x1000).build64();
        image[32..40].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(locate_symbol_table(&ByteView::new(&image), ImageKind::File).is_err());
    }

    #[test]
    fn test_truncated_image_is_rejected() {
        let image = ElfFixture::new().symbol("alpha", 0x1000).build64();
        let truncated = &image[..image.len() - 40];
        assert!(locate_symbol_table(&ByteView::new(truncated), ImageKind::File).is_err());
    }
}
