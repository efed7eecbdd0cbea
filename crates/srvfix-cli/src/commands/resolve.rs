//! Resolve command implementation.

use anyhow::Result;
use srvfix_core::{HiddenSymbolResolver, ModuleLoader, SrvfixConfig, SymbolRequest};

/// Load `module` and look up `symbols` in its symbol table
pub fn run(config: &SrvfixConfig, module: &str, symbols: &[String]) -> Result<()> {
    let loader = ModuleLoader::from_config(config);
    let loaded = loader.load(module)?;
    println!(
        "Loaded {} from {} (base: 0x{:X})",
        module,
        loaded.image_path().display(),
        loaded.base()
    );

    let mut resolver = HiddenSymbolResolver::open(loaded)?;
    let requests: Vec<SymbolRequest<'_>> = symbols.iter().map(|s| SymbolRequest::new(s)).collect();
    let batch = resolver.resolve_batch(&requests);

    println!();
    for entry in &batch.entries {
        match entry.address {
            Some(address) => println!("  0x{:016X}  {}", address, entry.resolved_name),
            None => match resolver.resolve_export(&entry.requested) {
                Some(address) => println!("  0x{:016X}  {} (export)", address, entry.requested),
                None => println!("  {:>18}  {}", "-", entry.requested),
            },
        }
    }

    let stats = resolver.stats();
    println!();
    println!(
        "Scanned {} of {} entries, {} cached",
        stats.cursor, stats.symbol_count, stats.cached
    );

    let diagnostic = batch.diagnostic();
    if !diagnostic.is_empty() {
        eprint!("{}", diagnostic);
    }

    Ok(())
}
