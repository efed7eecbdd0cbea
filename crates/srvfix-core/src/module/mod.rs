//! Opening game and engine modules by logical name.

mod dl;
mod naming;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub use dl::{Library, LoadedImage, image_containing, loaded_images};
pub use naming::{Candidate, LIB_EXT, NamingConvention, STOCK_CONVENTIONS, SearchContext, candidates};

use crate::config::SrvfixConfig;
use crate::engine::EngineVariant;
use crate::error::{Error, Result};
use crate::symbols::{ImageKind, ImageSource};

/// Public factory every Source module exports; used to find the image base.
pub const FACTORY_EXPORT: &str = "CreateInterface";

/// One shared library opened through [`ModuleLoader`].
///
/// Holds a live handle, so a `Module` always refers to a loaded image.
/// The handle is closed when the value is dropped.
#[derive(Debug)]
pub struct Module {
    name: String,
    path: PathBuf,
    image_path: PathBuf,
    base: usize,
    convention: NamingConvention,
    library: Library,
}

impl Module {
    /// `Ok(None)` when the platform loader refuses the candidate.
    fn open(name: &str, candidate: &Candidate) -> Result<Option<Self>> {
        let library = match Library::open(&candidate.path) {
            Ok(library) => library,
            Err(reason) => {
                debug!("{}: {}", candidate, reason);
                return Ok(None);
            }
        };

        // dladdr on the public factory is cheap; walking every loaded image
        // is the fallback for modules without one.
        let image = library
            .symbol(FACTORY_EXPORT)
            .and_then(image_containing)
            .or_else(|| dl::image_for_handle(&library));
        Self::from_library(name, candidate, library, image).map(Some)
    }

    /// A library the loader accepted but whose image cannot be located is
    /// incompatible, not missing.
    fn from_library(
        name: &str,
        candidate: &Candidate,
        library: Library,
        image: Option<LoadedImage>,
    ) -> Result<Self> {
        let image = image.ok_or_else(|| Error::ModuleIncompatible {
            name: name.to_string(),
            path: candidate.path.clone(),
            reason: "loaded but its image base is unknown".to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            path: candidate.path.clone(),
            image_path: image.path,
            base: image.base,
            convention: candidate.convention,
            library,
        })
    }

    /// Logical name, e.g. `dedicated`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The candidate path that opened
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File the loader actually mapped
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn convention(&self) -> NamingConvention {
        self.convention
    }

    /// Loaded from a game or engine override path
    pub fn is_overridden(&self) -> bool {
        self.convention.is_override()
    }

    pub fn lookup_export(&self, name: &str) -> Option<usize> {
        self.library.symbol(name)
    }

    /// Bytes holding this module's full symbol table.
    ///
    /// Mach-O keeps the tables in the mapped `__LINKEDIT` segment; ELF only
    /// has them in the backing file.
    #[cfg(target_vendor = "apple")]
    pub(crate) fn image(&self) -> Result<(ImageSource, ImageKind)> {
        // SAFETY: self keeps the image loaded, and the index built from
        // this source is owned alongside it.
        let source = unsafe { ImageSource::mapped_macho(self.base) }
            .map_err(|e| self.unavailable(e.to_string()))?;
        Ok((source, ImageKind::Mapped))
    }

    #[cfg(not(target_vendor = "apple"))]
    pub(crate) fn image(&self) -> Result<(ImageSource, ImageKind)> {
        let source = ImageSource::map_file(&self.image_path)
            .map_err(|e| self.unavailable(format!("{}: {}", self.image_path.display(), e)))?;
        Ok((source, ImageKind::File))
    }

    fn unavailable(&self, reason: String) -> Error {
        Error::SymbolTableUnavailable {
            module: self.name.clone(),
            reason,
        }
    }
}

/// Opens modules using override paths, search directories and the
/// platform's stock naming conventions.
#[derive(Debug, Clone, Default)]
pub struct ModuleLoader {
    game: Option<String>,
    engine: Option<EngineVariant>,
    override_root: PathBuf,
    search_paths: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self {
            override_root: PathBuf::from("."),
            ..Self::default()
        }
    }

    pub fn from_config(config: &SrvfixConfig) -> Self {
        Self {
            game: config.game.clone(),
            engine: config.engine,
            override_root: config.override_root.clone(),
            search_paths: config.search_paths.clone(),
        }
    }

    pub fn with_game(mut self, game: impl Into<String>) -> Self {
        self.game = Some(game.into());
        self
    }

    pub fn with_engine(mut self, engine: EngineVariant) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_override_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.override_root = root.into();
        self
    }

    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    pub fn game(&self) -> Option<&str> {
        self.game.as_deref()
    }

    pub fn engine(&self) -> Option<EngineVariant> {
        self.engine
    }

    /// Every path [`load`](Self::load) tries for `name`, in order.
    pub fn candidates(&self, name: &str) -> Vec<Candidate> {
        candidates(
            name,
            &SearchContext {
                game: self.game.as_deref(),
                engine: self.engine,
                override_root: &self.override_root,
                search_paths: &self.search_paths,
            },
        )
    }

    /// Open `name` with the first candidate the platform loader accepts.
    pub fn load(&self, name: &str) -> Result<Module> {
        let candidates = self.candidates(name);
        for candidate in &candidates {
            if let Some(module) = Module::open(name, candidate)? {
                info!(
                    "Loaded {} from {} ({}, base 0x{:X})",
                    name,
                    module.image_path.display(),
                    module.convention,
                    module.base
                );
                return Ok(module);
            }
        }

        Err(Error::ModuleNotFound {
            name: name.to_string(),
            tried: candidates.iter().map(ToString::to_string).collect(),
        })
    }

    /// Release `module` and open its logical name again.
    pub fn reload(&self, module: Module) -> Result<Module> {
        let name = module.name.clone();
        drop(module);
        self.load(&name)
    }
}
