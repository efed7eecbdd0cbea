//! Hidden symbol lookup.
//!
//! The dynamic loader only answers for exported names. Everything else a
//! module defines is still listed in its native symbol table, which this
//! module parses directly:
//!
//! - ELF: `.symtab` / `.strtab` from the module's backing file
//! - Mach-O: `LC_SYMTAB` tables inside the mapped `__LINKEDIT` segment

mod elf;
#[cfg(test)]
pub(crate) mod fixture;
mod image;
mod index;
mod layout;
mod macho;
mod resolver;
mod view;

pub use image::ImageSource;
#[cfg(feature = "debug-tools")]
pub use index::{SymbolDump, SymbolEntry};
pub use index::{IndexStats, SymbolIndex};
pub use layout::{ImageKind, LayoutError, ObjectFormat, SymbolTableLayout, locate_symbol_table};
pub use resolver::{BatchResolution, HiddenSymbolResolver, ResolvedSymbol, SymbolRequest};
pub use view::{ByteView, Endian, ViewError};
