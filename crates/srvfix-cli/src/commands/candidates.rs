//! Candidates command implementation.

use anyhow::Result;
use srvfix_core::{ModuleLoader, SrvfixConfig};

/// Print every path the loader tries for `name`
pub fn run(config: &SrvfixConfig, name: &str) -> Result<()> {
    let loader = ModuleLoader::from_config(config);
    let candidates = loader.candidates(name);

    println!("Candidates for {} ({} total):", name, candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        let marker = if candidate.path.exists() { "*" } else { " " };
        println!(
            "  {}[{:>2}] {} ({})",
            marker, i, candidate, candidate.convention
        );
    }

    Ok(())
}
