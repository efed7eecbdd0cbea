use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use srvfix_core::{DEFAULT_CONFIG_FILE, EngineVariant, SrvfixConfig, UiMode};
use tracing_subscriber::EnvFilter;

mod commands;
mod listener;

#[derive(Parser)]
#[command(name = "srvfix")]
#[command(about = "Run Source dedicated servers headless")]
#[command(version)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "SRVFIX_CONFIG")]
    config: PathBuf,

    /// `tracing` filter directive, overrides the configured one
    #[arg(long, env = "SRVFIX_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the paths tried for a module, in order
    Candidates {
        /// Logical module name, e.g. `engine`
        name: String,
        #[command(flatten)]
        loader: LoaderArgs,
    },
    /// Look up symbols in a module's symbol table
    Resolve {
        module: String,
        /// Symbol names, resolved in the order given
        #[arg(required = true)]
        symbols: Vec<String>,
        #[command(flatten)]
        loader: LoaderArgs,
    },
    /// Dump a module's full symbol table as JSON
    Dump {
        module: String,
        /// Output file (prints to stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        loader: LoaderArgs,
    },
    /// Install the fixups and start the dedicated server
    Run {
        /// Redirect console, spew and frame entry points to this front end
        #[arg(long)]
        gui: bool,
        #[command(flatten)]
        loader: LoaderArgs,
        /// Arguments passed through to the server, e.g. `-game cstrike`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        server_args: Vec<String>,
    },
}

/// Module search options shared by every subcommand
#[derive(Args)]
struct LoaderArgs {
    /// Game directory, enables `game/<game>/` overrides
    #[arg(long)]
    game: Option<String>,

    /// Engine branch (s2013, l4d, l4d2, nd, csgo, ins)
    #[arg(long)]
    engine: Option<EngineVariant>,

    /// Directory holding the `game/` and `engine/` override trees
    #[arg(long)]
    override_root: Option<PathBuf>,

    /// Extra directory searched for stock modules (repeatable)
    #[arg(long = "search-path")]
    search_paths: Vec<PathBuf>,
}

impl LoaderArgs {
    fn apply(self, mut config: SrvfixConfig) -> SrvfixConfig {
        if self.game.is_some() {
            config.game = self.game;
        }
        if self.engine.is_some() {
            config.engine = self.engine;
        }
        if let Some(root) = self.override_root {
            config.override_root = root;
        }
        config.search_paths.extend(self.search_paths);
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SrvfixConfig::load(&cli.config)?;
    let filter = cli.log_level.as_deref().unwrap_or(&config.log_filter);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(filter.parse()?))
        .init();

    match cli.command {
        Command::Candidates { name, loader } => commands::candidates::run(&loader.apply(config), &name),
        Command::Resolve {
            module,
            symbols,
            loader,
        } => commands::resolve::run(&loader.apply(config), &module, &symbols),
        Command::Dump {
            module,
            output,
            loader,
        } => commands::dump::run(&loader.apply(config), &module, output.as_deref()),
        Command::Run {
            gui,
            loader,
            server_args,
        } => {
            let mut config = loader.apply(config);
            if gui {
                config.ui_mode = UiMode::Gui;
            }
            let code = commands::run::run(config, server_args)?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}
