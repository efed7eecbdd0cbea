//! Run command implementation.

use anyhow::{Result, bail};
use srvfix_core::{EngineVariant, SrvfixConfig, game_name_from_args};
use tracing::{info, warn};

/// Entry point exported by `dedicated`
pub const DEDICATED_MAIN: &str = "DedicatedMain";

/// Install the fixups, hand control to the server and return its exit code
pub fn run(mut config: SrvfixConfig, server_args: Vec<String>) -> Result<i32> {
    let game = config
        .game
        .clone()
        .or_else(|| game_name_from_args(&server_args))
        .filter(|game| !game.is_empty());
    let Some(game) = game else {
        bail!("Could not detect game name. Did you forget to add the -game option?");
    };
    config.game = Some(game.clone());

    let engine = config.engine.unwrap_or_else(|| {
        warn!("No engine branch given, assuming {}", EngineVariant::Source2013);
        EngineVariant::Source2013
    });
    config.engine = Some(engine);

    info!("Starting {} server ({})", game, engine);
    native::run(&config, &game, engine, server_args)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod native {
    use std::ffi::{CString, c_char, c_int};
    use std::sync::Arc;

    use anyhow::{Context, Result, anyhow};
    use srvfix_core::fixup::DEDICATED;
    use srvfix_core::{
        AppBundle, EngineVariant, InlineBackend, ModuleLoader, NativeCalls, NativeOrchestrator,
        SrvfixConfig,
    };
    use tracing::info;

    use super::DEDICATED_MAIN;
    use crate::listener::ConsoleListener;

    type DedicatedMainFn = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;

    pub fn run(
        config: &SrvfixConfig,
        game: &str,
        engine: EngineVariant,
        server_args: Vec<String>,
    ) -> Result<i32> {
        let loader = ModuleLoader::from_config(config);
        let mut orchestrator = NativeOrchestrator::new(
            loader.clone(),
            InlineBackend,
            NativeCalls,
            config,
            Arc::new(ConsoleListener::default()),
        );
        if let Some(bundle) = AppBundle::current() {
            info!("Running from app bundle under {}", bundle.root.display());
            orchestrator = orchestrator.with_app_bundle(bundle);
        }
        orchestrator.initialize(Some(game), engine)?;

        // Second handle to the module the orchestrator already loaded
        let dedicated = loader.load(DEDICATED)?;
        let entry = dedicated
            .lookup_export(DEDICATED_MAIN)
            .ok_or_else(|| anyhow!("Failed to locate symbol: {}", DEDICATED_MAIN))?;

        let program = std::env::args().next().unwrap_or_else(|| "srvfix".to_string());
        let args = std::iter::once(program)
            .chain(server_args)
            .map(CString::new)
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Server argument contains a NUL byte")?;
        let mut argv: Vec<*mut c_char> = args.iter().map(|a| a.as_ptr() as *mut c_char).collect();
        argv.push(std::ptr::null_mut());

        // SAFETY: entry is DedicatedMain's export; argv is NUL-terminated and
        // its strings outlive the call.
        let code = unsafe {
            let main = std::mem::transmute::<usize, DedicatedMainFn>(entry);
            main((argv.len() - 1) as c_int, argv.as_mut_ptr())
        };
        info!("Server exited with code {}", code);

        orchestrator.shutdown()?;
        drop(dedicated);
        Ok(code)
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
mod native {
    use anyhow::{Result, bail};
    use srvfix_core::{EngineVariant, SrvfixConfig};

    pub fn run(
        _config: &SrvfixConfig,
        _game: &str,
        _engine: EngineVariant,
        _server_args: Vec<String>,
    ) -> Result<i32> {
        bail!("Code redirection is only supported on x86 and x86_64")
    }
}
