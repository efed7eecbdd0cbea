//! Single and batch resolution of hidden symbols for one module.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::index::{IndexStats, SymbolIndex};
use crate::error::{Error, Result};
use crate::module::Module;

/// One name to resolve as part of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRequest<'a> {
    pub name: &'a str,
    /// Tried when `name` is absent, e.g. after an engine branch renamed a function
    pub alternate: Option<&'a str>,
    /// Absence is not counted as a failure of the batch
    pub optional: bool,
}

impl<'a> SymbolRequest<'a> {
    pub const fn new(name: &'a str) -> Self {
        Self {
            name,
            alternate: None,
            optional: false,
        }
    }

    pub const fn with_alternate(mut self, alternate: &'a str) -> Self {
        self.alternate = Some(alternate);
        self
    }

    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Outcome for one [`SymbolRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSymbol {
    pub requested: String,
    /// The alternate name when it was substituted, otherwise `requested`
    pub resolved_name: String,
    pub address: Option<usize>,
    pub optional: bool,
}

impl ResolvedSymbol {
    pub fn is_resolved(&self) -> bool {
        self.address.is_some()
    }

    pub fn is_substituted(&self) -> bool {
        self.address.is_some() && self.resolved_name != self.requested
    }
}

/// Per-entry results of [`HiddenSymbolResolver::resolve_batch`], in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResolution {
    pub module: String,
    pub entries: Vec<ResolvedSymbol>,
}

impl BatchResolution {
    /// Number of required entries left unresolved
    pub fn unresolved_count(&self) -> usize {
        self.missing().len()
    }

    /// Requested names of required entries left unresolved
    pub fn missing(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| !e.optional && !e.is_resolved())
            .map(|e| e.requested.as_str())
            .collect()
    }

    /// Every unresolved entry, optional ones included
    pub fn unresolved(&self) -> impl Iterator<Item = &ResolvedSymbol> {
        self.entries.iter().filter(|e| !e.is_resolved())
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved_count() == 0
    }

    pub fn entry(&self, requested: &str) -> Option<&ResolvedSymbol> {
        self.entries.iter().find(|e| e.requested == requested)
    }

    pub fn address_of(&self, requested: &str) -> Option<usize> {
        self.entry(requested).and_then(|e| e.address)
    }

    pub fn is_substituted(&self, requested: &str) -> bool {
        self.entry(requested).is_some_and(ResolvedSymbol::is_substituted)
    }

    /// Consolidated error listing every missing required name
    pub fn to_error(&self) -> Option<Error> {
        let missing = self.missing();
        if missing.is_empty() {
            return None;
        }
        Some(Error::SymbolsUnresolved {
            module: self.module.clone(),
            missing: missing.into_iter().map(str::to_string).collect(),
        })
    }

    /// Diagnostic text for the missing names, empty when complete
    pub fn diagnostic(&self) -> String {
        self.to_error().map(|e| e.to_string()).unwrap_or_default()
    }

    pub fn ensure_complete(self) -> Result<Self> {
        match self.to_error() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Hidden-symbol lookup for one module, with a public export fallback.
///
/// Owns the [`Module`] so the image the index reads from cannot be unloaded
/// underneath it. `index` is declared first and therefore dropped first.
#[derive(Debug)]
pub struct HiddenSymbolResolver {
    name: String,
    index: SymbolIndex,
    module: Option<Module>,
    exports: HashMap<String, usize>,
    overridden: bool,
}

impl HiddenSymbolResolver {
    /// Build the symbol index of an opened module.
    pub fn open(module: Module) -> Result<Self> {
        let (image, kind) = module.image()?;
        let index = SymbolIndex::build(module.name(), image, kind, module.base())?;
        Ok(Self {
            name: module.name().to_string(),
            overridden: module.is_overridden(),
            index,
            module: Some(module),
            exports: HashMap::new(),
        })
    }

    /// Resolver over an index without a backing [`Module`].
    pub fn from_index(index: SymbolIndex, overridden: bool) -> Self {
        Self {
            name: index.module().to_string(),
            index,
            module: None,
            exports: HashMap::new(),
            overridden,
        }
    }

    /// Register a public symbol address known by other means.
    pub fn with_export(mut self, name: &str, address: usize) -> Self {
        self.exports.insert(name.to_string(), address);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> Option<&Module> {
        self.module.as_ref()
    }

    /// Whether the module was loaded from a game or engine override path
    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub fn index_mut(&mut self) -> &mut SymbolIndex {
        &mut self.index
    }

    pub fn resolve(&mut self, name: &str) -> Option<usize> {
        let address = self.index.find(name);
        match address {
            Some(addr) => debug!("{}: {} => 0x{:X}", self.name, name, addr),
            None => debug!("{}: {} not found", self.name, name),
        }
        address
    }

    /// Public (dynamic-export) lookup.
    pub fn resolve_export(&self, name: &str) -> Option<usize> {
        if let Some(&address) = self.exports.get(name) {
            return Some(address);
        }
        self.module.as_ref().and_then(|m| m.lookup_export(name))
    }

    /// Resolve each request independently, falling back to its alternate name.
    pub fn resolve_batch(&mut self, requests: &[SymbolRequest<'_>]) -> BatchResolution {
        let mut entries = Vec::with_capacity(requests.len());
        for request in requests {
            let mut resolved_name = request.name;
            let mut address = self.resolve(request.name);

            if address.is_none()
                && let Some(alternate) = request.alternate
                && let Some(found) = self.resolve(alternate)
            {
                debug!(
                    "{}: substituted {} for {}",
                    self.name, alternate, request.name
                );
                resolved_name = alternate;
                address = Some(found);
            }

            if address.is_none() && request.optional {
                warn!("{}: optional symbol {} not found", self.name, request.name);
            }

            entries.push(ResolvedSymbol {
                requested: request.name.to_string(),
                resolved_name: resolved_name.to_string(),
                address,
                optional: request.optional,
            });
        }

        BatchResolution {
            module: self.name.clone(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::fixture::ElfFixture;
    use crate::symbols::layout::ImageKind;

    fn resolver(fixture: ElfFixture) -> HiddenSymbolResolver {
        let index =
            SymbolIndex::build("dedicated", fixture.build64().into(), ImageKind::File, 0).unwrap();
        HiddenSymbolResolver::from_index(index, false)
    }

    #[test]
    fn test_batch_reports_exactly_the_missing_names() {
        let mut r = resolver(
            ElfFixture::new()
                .symbol("one", 0x10)
                .symbol("three", 0x30)
                .symbol("five", 0x50),
        );
        let requests = ["one", "two", "three", "four", "five"].map(SymbolRequest::new);
        let batch = r.resolve_batch(&requests);

        assert_eq!(batch.entries.len(), 5);
        assert_eq!(batch.unresolved_count(), 2);
        let mut missing = batch.missing();
        missing.sort_unstable();
        assert_eq!(missing, vec!["four", "two"]);
        assert_eq!(batch.address_of("three"), Some(0x30));
        assert!(!batch.is_complete());
    }

    #[test]
    fn test_alternate_name_is_reported_as_resolved() {
        let mut r = resolver(ElfFixture::new().symbol("Sys_LoadModuleFlags", 0x40));
        let batch = r.resolve_batch(&[
            SymbolRequest::new("Sys_LoadModule").with_alternate("Sys_LoadModuleFlags")
        ]);

        assert!(batch.is_complete());
        let entry = &batch.entries[0];
        assert_eq!(entry.requested, "Sys_LoadModule");
        assert_eq!(entry.resolved_name, "Sys_LoadModuleFlags");
        assert_eq!(entry.address, Some(0x40));
        assert!(batch.is_substituted("Sys_LoadModule"));
    }

    #[test]
    fn test_primary_name_preferred_over_alternate() {
        let mut r = resolver(
            ElfFixture::new()
                .symbol("alt", 0x20)
                .symbol("primary", 0x10),
        );
        let batch = r.resolve_batch(&[SymbolRequest::new("primary").with_alternate("alt")]);
        assert_eq!(batch.entries[0].resolved_name, "primary");
        assert!(!batch.is_substituted("primary"));
    }

    #[test]
    fn test_optional_entries_do_not_fail_batch() {
        let mut r = resolver(ElfFixture::new().symbol("required", 0x10));
        let batch = r.resolve_batch(&[
            SymbolRequest::new("required"),
            SymbolRequest::new("gui_only").optional(),
        ]);

        assert!(batch.is_complete());
        assert_eq!(batch.unresolved().count(), 1);
        assert_eq!(batch.diagnostic(), "");
    }

    #[test]
    fn test_diagnostic_names_module_and_symbols() {
        let mut r = resolver(ElfFixture::new().symbol("present", 0x10));
        let batch = r.resolve_batch(&[
            SymbolRequest::new("present"),
            SymbolRequest::new("absent_a"),
            SymbolRequest::new("absent_b"),
        ]);
        assert_eq!(
            batch.diagnostic(),
            "Failed to locate the following symbols for dedicated library:\nabsent_a\nabsent_b\n"
        );
        assert!(matches!(
            batch.ensure_complete(),
            Err(Error::SymbolsUnresolved { .. })
        ));
    }

    #[test]
    fn test_export_fallback_without_module() {
        let r = resolver(ElfFixture::new()).with_export("Plat_DebugString", 0x1234);
        assert_eq!(r.resolve_export("Plat_DebugString"), Some(0x1234));
        assert_eq!(r.resolve_export("CreateInterface"), None);
    }
}
