//! Incremental, cached lookup over a module's raw symbol table.
//!
//! The table is never sorted or hashed up front. Each miss resumes a linear
//! scan from where the previous one stopped and interns every defined symbol
//! it passes, so a full table walk happens at most once per module no matter
//! how many names are requested.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, trace};

use super::image::ImageSource;
use super::layout::{ImageKind, SymbolTableLayout, locate_symbol_table};
use super::view::ByteView;
use crate::error::{Error, Result};

/// Hidden-symbol index for one loaded module.
#[derive(Debug)]
pub struct SymbolIndex {
    module: String,
    image: ImageSource,
    layout: SymbolTableLayout,
    base: usize,
    /// Next raw entry to examine; never decreases.
    cursor: usize,
    cache: HashMap<String, usize>,
}

/// Scan progress, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub symbol_count: usize,
    pub cursor: usize,
    pub cached: usize,
}

impl SymbolIndex {
    /// Parse the image header and locate the symbol and string tables.
    ///
    /// `base` is the address the module is loaded at; `kind` says whether
    /// `image` holds the backing file or the loaded image.
    pub fn build(module: &str, image: ImageSource, kind: ImageKind, base: usize) -> Result<Self> {
        let layout = locate_symbol_table(&ByteView::new(image.bytes()), kind).map_err(|e| {
            Error::SymbolTableUnavailable {
                module: module.to_string(),
                reason: e.to_string(),
            }
        })?;
        debug!(
            "Indexed {} ({:?}): {} raw symbols, base 0x{:X}",
            module, layout.format, layout.symbol_count, base
        );

        Ok(Self {
            module: module.to_string(),
            image,
            layout,
            base,
            cursor: 0,
            cache: HashMap::new(),
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn layout(&self) -> &SymbolTableLayout {
        &self.layout
    }

    /// Look up `name`, scanning forward from the cursor on a cache miss.
    ///
    /// Returns `None` only once the whole table has been walked.
    pub fn find(&mut self, name: &str) -> Option<usize> {
        if let Some(&address) = self.cache.get(name) {
            return Some(address);
        }
        if self.cursor >= self.layout.symbol_count {
            return None;
        }
        self.advance(Some(name))
    }

    /// Intern every remaining entry.
    pub fn scan_to_end(&mut self) {
        self.advance(None);
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.layout.symbol_count
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            symbol_count: self.layout.symbol_count,
            cursor: self.cursor,
            cached: self.cache.len(),
        }
    }

    /// Resume the scan; stops early when `wanted` is interned.
    fn advance(&mut self, wanted: Option<&str>) -> Option<usize> {
        let Self {
            image,
            layout,
            base,
            cursor,
            cache,
            ..
        } = self;

        let view = ByteView::with_endian(image.bytes(), layout.endian);
        // Both ranges were bounds-checked when the layout was located
        let symbols = view
            .subview(layout.symbols_offset, layout.symbols_size())
            .ok()?;
        let strings = view
            .subview(layout.strings_offset, layout.strings_size)
            .ok()?;
        let entry_size = layout.format.entry_size();
        let strip = layout.format.strips_leading_underscore();

        while *cursor < layout.symbol_count {
            let index = *cursor;
            *cursor += 1;

            let raw = match layout.format.decode(&symbols, index * entry_size) {
                Ok(raw) => raw,
                Err(e) => {
                    trace!("Skipping symbol #{}: {}", index, e);
                    continue;
                }
            };
            if !raw.defined {
                continue;
            }
            let name = match strings.cstr_at(raw.name_offset as usize) {
                Ok(name) => name,
                Err(e) => {
                    trace!("Skipping symbol #{}: {}", index, e);
                    continue;
                }
            };
            let Ok(mut name) = name.to_str() else {
                trace!("Skipping symbol #{}: name is not UTF-8", index);
                continue;
            };
            if strip {
                name = name.strip_prefix('_').unwrap_or(name);
            }
            if name.is_empty() {
                continue;
            }

            let address = layout.address(*base, raw.value);
            // First definition of a name wins
            let interned = *cache.entry(name.to_string()).or_insert(address);
            if wanted == Some(name) {
                return Some(interned);
            }
        }

        trace!(
            "Symbol scan reached end of table ({} cached)",
            cache.len()
        );
        None
    }
}

#[cfg(feature = "debug-tools")]
pub use dump::{SymbolDump, SymbolEntry};

#[cfg(feature = "debug-tools")]
mod dump {
    use std::fs;
    use std::path::Path;

    use serde::Serialize;

    use super::{IndexStats, SymbolIndex};
    use crate::error::Result;

    /// Full symbol listing of one module for diagnostic purposes
    #[derive(Debug, Clone, Serialize)]
    pub struct SymbolDump {
        pub module: String,
        pub format: String,
        pub base_address: String,
        pub stats: IndexStats,
        pub symbols: Vec<SymbolEntry>,
    }

    /// One interned symbol; address in hex string format
    #[derive(Debug, Clone, Serialize)]
    pub struct SymbolEntry {
        pub name: String,
        pub address: String,
    }

    impl SymbolDump {
        /// Drain the index and snapshot every interned symbol, sorted by address
        pub fn from_index(index: &mut SymbolIndex) -> Self {
            index.scan_to_end();

            let mut symbols: Vec<(&String, &usize)> = index.cache.iter().collect();
            symbols.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));

            Self {
                module: index.module.clone(),
                format: format!("{:?}", index.layout.format),
                base_address: format!("0x{:X}", index.base),
                stats: index.stats(),
                symbols: symbols
                    .into_iter()
                    .map(|(name, address)| SymbolEntry {
                        name: name.clone(),
                        address: format!("0x{:X}", address),
                    })
                    .collect(),
            }
        }

        /// Save dump to JSON file
        pub fn save(&self, path: &Path) -> Result<()> {
            let json = serde_json::to_string_pretty(self)?;
            fs::write(path, json)?;
            Ok(())
        }
    }
}
