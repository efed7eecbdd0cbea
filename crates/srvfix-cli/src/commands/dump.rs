//! Dump command implementation.

use std::path::Path;

use anyhow::Result;
use srvfix_core::{HiddenSymbolResolver, ModuleLoader, SrvfixConfig, SymbolDump};

/// Run the dump command
pub fn run(config: &SrvfixConfig, module: &str, output: Option<&Path>) -> Result<()> {
    let loader = ModuleLoader::from_config(config);
    let mut resolver = HiddenSymbolResolver::open(loader.load(module)?)?;
    let dump = SymbolDump::from_index(resolver.index_mut());

    if let Some(output_path) = output {
        dump.save(output_path)?;
        println!(
            "Dumped {} symbols of {} to: {}",
            dump.symbols.len(),
            dump.module,
            output_path.display()
        );
    } else {
        println!("{}", serde_json::to_string_pretty(&dump)?);
    }

    Ok(())
}
