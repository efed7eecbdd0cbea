//! Mach-O load-command walk for `LC_SYMTAB` and `__LINKEDIT`.
//!
//! Unlike ELF, the link-edit segment is mapped by dyld, so the tables can be
//! read straight from the loaded image once the segment's file offset is
//! translated into its in-memory position.

use tracing::debug;

use super::layout::{ImageKind, LayoutError, ObjectFormat, SymbolTableLayout};
use super::view::{ByteView, Endian};

const MH_MAGIC: [u8; 4] = [0xce, 0xfa, 0xed, 0xfe];
const MH_MAGIC_64: [u8; 4] = [0xcf, 0xfa, 0xed, 0xfe];
const MH_CIGAM: [u8; 4] = [0xfe, 0xed, 0xfa, 0xce];
const MH_CIGAM_64: [u8; 4] = [0xfe, 0xed, 0xfa, 0xcf];

const LC_SEGMENT: u32 = 0x1;
const LC_SYMTAB: u32 = 0x2;
const LC_SEGMENT_64: u32 = 0x19;

pub fn is_macho(magic: &[u8]) -> bool {
    [MH_MAGIC, MH_MAGIC_64, MH_CIGAM, MH_CIGAM_64]
        .iter()
        .any(|m| m.as_slice() == magic)
}

#[derive(Debug, Clone, Copy, Default)]
struct Segment {
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
}

#[derive(Debug, Clone, Copy)]
struct SymtabCommand {
    symoff: u32,
    nsyms: u32,
    stroff: u32,
    strsize: u32,
}

struct LoadCommands {
    format: ObjectFormat,
    endian: Endian,
    text: Option<Segment>,
    linkedit: Option<Segment>,
    symtab: Option<SymtabCommand>,
    /// End of the highest mapped segment relative to `__TEXT`
    span: u64,
}

fn header(view: &ByteView<'_>) -> Result<(ObjectFormat, Endian, usize), LayoutError> {
    let magic = view.bytes_at(0, 4)?;
    let (format, endian) = if magic == MH_MAGIC {
        (ObjectFormat::MachO32, Endian::Little)
    } else if magic == MH_MAGIC_64 {
        (ObjectFormat::MachO64, Endian::Little)
    } else if magic == MH_CIGAM {
        (ObjectFormat::MachO32, Endian::Big)
    } else if magic == MH_CIGAM_64 {
        (ObjectFormat::MachO64, Endian::Big)
    } else {
        return Err(LayoutError::UnknownFormat);
    };
    let header_size = if format == ObjectFormat::MachO64 { 32 } else { 28 };
    Ok((format, endian, header_size))
}

/// Size of the Mach-O header plus all load commands.
///
/// Lets a caller that only has a base address size a first, small view
/// before computing the full image span.
pub fn header_and_commands_size(view: &ByteView<'_>) -> Result<usize, LayoutError> {
    let (_, endian, header_size) = header(view)?;
    let view = ByteView::with_endian(view.as_bytes(), endian);
    Ok(header_size + view.u32_at(20)? as usize)
}

/// Number of bytes, from the image base, covered by the mapped segments.
pub fn mapped_span(view: &ByteView<'_>) -> Result<usize, LayoutError> {
    Ok(walk(view)?.span as usize)
}

fn walk(image: &ByteView<'_>) -> Result<LoadCommands, LayoutError> {
    let (format, endian, header_size) = header(image)?;
    let view = ByteView::with_endian(image.as_bytes(), endian);
    let is_64 = format == ObjectFormat::MachO64;

    let ncmds = view.u32_at(16)?;
    let mut commands = LoadCommands {
        format,
        endian,
        text: None,
        linkedit: None,
        symtab: None,
        span: 0,
    };
    let mut segments = Vec::new();

    let mut cursor = header_size;
    for _ in 0..ncmds {
        let cmd = view.u32_at(cursor)?;
        let cmdsize = view.u32_at(cursor + 4)? as usize;
        if cmdsize < 8 {
            return Err(LayoutError::Unsupported("malformed load command size"));
        }

        match cmd {
            LC_SEGMENT | LC_SEGMENT_64 if (cmd == LC_SEGMENT_64) == is_64 => {
                let raw_name = view.bytes_at(cursor + 8, 16)?;
                let name_len = memchr::memchr(0, raw_name).unwrap_or(raw_name.len());
                let segment = if is_64 {
                    Segment {
                        vmaddr: view.u64_at(cursor + 24)?,
                        vmsize: view.u64_at(cursor + 32)?,
                        fileoff: view.u64_at(cursor + 40)?,
                    }
                } else {
                    Segment {
                        vmaddr: u64::from(view.u32_at(cursor + 24)?),
                        vmsize: u64::from(view.u32_at(cursor + 28)?),
                        fileoff: u64::from(view.u32_at(cursor + 32)?),
                    }
                };
                match &raw_name[..name_len] {
                    b"__PAGEZERO" => {}
                    b"__TEXT" => {
                        commands.text = Some(segment);
                        segments.push(segment);
                    }
                    b"__LINKEDIT" => {
                        commands.linkedit = Some(segment);
                        segments.push(segment);
                    }
                    _ => segments.push(segment),
                }
            }
            LC_SYMTAB => {
                commands.symtab = Some(SymtabCommand {
                    symoff: view.u32_at(cursor + 8)?,
                    nsyms: view.u32_at(cursor + 12)?,
                    stroff: view.u32_at(cursor + 16)?,
                    strsize: view.u32_at(cursor + 20)?,
                });
            }
            _ => {}
        }
        cursor = cursor
            .checked_add(cmdsize)
            .ok_or(LayoutError::Unsupported("load commands overflow"))?;
    }

    let text_vmaddr = commands.text.map_or(0, |s| s.vmaddr);
    for segment in &segments {
        let end = segment
            .vmaddr
            .checked_add(segment.vmsize)
            .ok_or(LayoutError::Unsupported("segment end overflows"))?;
        commands.span = commands.span.max(end.saturating_sub(text_vmaddr));
    }
    Ok(commands)
}

pub fn locate(image: &ByteView<'_>, kind: ImageKind) -> Result<SymbolTableLayout, LayoutError> {
    let commands = walk(image)?;
    let symtab = commands
        .symtab
        .ok_or(LayoutError::MissingTable("no LC_SYMTAB load command"))?;
    if symtab.symoff == 0 || symtab.stroff == 0 {
        return Err(LayoutError::MissingTable("LC_SYMTAB has no table offsets"));
    }
    let text_vmaddr = commands.text.map_or(0, |s| s.vmaddr);

    let (symbols_offset, strings_offset) = match kind {
        ImageKind::File => (symtab.symoff as usize, symtab.stroff as usize),
        ImageKind::Mapped => {
            let linkedit = commands
                .linkedit
                .ok_or(LayoutError::MissingTable("no __LINKEDIT segment"))?;
            let linkedit_start = linkedit
                .vmaddr
                .checked_sub(text_vmaddr)
                .ok_or(LayoutError::Unsupported("__LINKEDIT below __TEXT"))?;
            let translate = |off: u32| {
                linkedit_start
                    .checked_add(u64::from(off))
                    .ok_or(LayoutError::Unsupported("__LINKEDIT offset overflows"))?
                    .checked_sub(linkedit.fileoff)
                    .map(|v| v as usize)
                    .ok_or(LayoutError::Unsupported("table offset precedes __LINKEDIT"))
            };
            (translate(symtab.symoff)?, translate(symtab.stroff)?)
        }
    };

    let layout = SymbolTableLayout {
        format: commands.format,
        endian: commands.endian,
        symbols_offset,
        symbol_count: symtab.nsyms as usize,
        strings_offset,
        strings_size: symtab.strsize as usize,
        value_bias: text_vmaddr,
    };
    image.bytes_at(layout.symbols_offset, layout.symbols_size())?;
    image.bytes_at(layout.strings_offset, layout.strings_size)?;

    debug!(
        "Mach-O symbol table: {} entries at {:#x}, strings at {:#x} ({} bytes)",
        layout.symbol_count, layout.symbols_offset, layout.strings_offset, layout.strings_size
    );
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::fixture::MachOFixture;
    use crate::symbols::layout::locate_symbol_table;

    #[test]
    fn test_locates_tables_through_linkedit() {
        let image = MachOFixture::new()
            .symbol("_alpha", 0x1000)
            .symbol("_beta", 0x2000)
            .build64();
        let view = ByteView::new(&image);
        let layout = locate_symbol_table(&view, ImageKind::Mapped).unwrap();

        assert_eq!(layout.format, ObjectFormat::MachO64);
        assert_eq!(layout.symbol_count, 2);
        assert!(layout.format.strips_leading_underscore());
    }

    #[test]
    fn test_locates_tables_in_32_bit_image() {
        let image = MachOFixture::new().symbol("_alpha", 0x1000).build32();
        let layout = locate_symbol_table(&ByteView::new(&image), ImageKind::Mapped).unwrap();
        assert_eq!(layout.format, ObjectFormat::MachO32);
        assert_eq!(layout.symbol_count, 1);
    }

    #[test]
    fn test_missing_linkedit_is_reported() {
        let image = MachOFixture::new()
            .symbol("_alpha", 0x1000)
            .without_linkedit()
            .build64();
        let err = locate_symbol_table(&ByteView::new(&image), ImageKind::Mapped).unwrap_err();
        assert_eq!(err, LayoutError::MissingTable("no __LINKEDIT segment"));
    }

    #[test]
    fn test_segment_end_overflow_is_rejected() {
        let mut image = MachOFixture::new().symbol("_alpha", 0x1000).build64();
        // __TEXT is the first load command; vmaddr at +24, vmsize at +32
        image[32 + 24..32 + 32].copy_from_slice(&u64::MAX.to_le_bytes());
        image[32 + 32..32 + 40].copy_from_slice(&16u64.to_le_bytes());

        let view = ByteView::new(&image);
        let err = locate_symbol_table(&view, ImageKind::Mapped).unwrap_err();
        assert_eq!(err, LayoutError::Unsupported("segment end overflows"));
        assert!(mapped_span(&view).is_err());
    }

    #[test]
    fn test_linkedit_near_address_space_end_is_rejected() {
        let mut image = MachOFixture::new().symbol("_alpha", 0x1000).build64();
        // __LINKEDIT follows the 72-byte __TEXT command
        let linkedit = 32 + 72;
        image[linkedit + 24..linkedit + 32].copy_from_slice(&(u64::MAX - 8).to_le_bytes());
        image[linkedit + 32..linkedit + 40].copy_from_slice(&0u64.to_le_bytes());

        let err = locate_symbol_table(&ByteView::new(&image), ImageKind::Mapped).unwrap_err();
        assert_eq!(err, LayoutError::Unsupported("__LINKEDIT offset overflows"));
    }

    #[test]
    fn test_span_and_header_size() {
        let image = MachOFixture::new().symbol("_alpha", 0x1000).build64();
        let view = ByteView::new(&image);
        assert!(header_and_commands_size(&view).unwrap() > 32);
        assert_eq!(mapped_span(&view).unwrap(), image.len());
    }
}
