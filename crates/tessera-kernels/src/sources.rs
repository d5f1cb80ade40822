//! Kernel source providers.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tessera_runtime::{Result, RuntimeError, SourceProvider};

/// Program names understood by the providers.
pub mod programs {
    pub const VECTOR_ADD: &str = "vector_add";
    pub const MATRIX_MUL: &str = "matrix_mul";
    pub const TRANSPOSE: &str = "transpose";
    pub const FIR: &str = "fir";

    pub const ALL: [&str; 4] = [VECTOR_ADD, MATRIX_MUL, TRANSPOSE, FIR];
}

/// Entry point names within the programs.
pub mod entry_points {
    pub const VECTOR_ADD: &str = "vector_add";
    pub const MATRIX_MUL_NAIVE: &str = "matrix_mul_naive";
    pub const MATRIX_MUL_TILED: &str = "matrix_mul_tiled";
    pub const TRANSPOSE: &str = "matrix_transpose";
    pub const FIR: &str = "fir";
}

/// Workgroup width of the 1-D kernels (`vector_add`, `fir`).
pub const TILE_1D: u32 = 256;

/// Workgroup shape of the 2-D kernels (`matrix_mul_*`, `matrix_transpose`).
pub const TILE_2D: [u32; 2] = [16, 16];

/// Get the embedded WGSL source for a program by name.
pub fn embedded_source(name: &str) -> Option<&'static str> {
    match name {
        programs::VECTOR_ADD => Some(include_str!("../shaders/vector_add.wgsl")),
        programs::MATRIX_MUL => Some(include_str!("../shaders/matrix_mul.wgsl")),
        programs::TRANSPOSE => Some(include_str!("../shaders/transpose.wgsl")),
        programs::FIR => Some(include_str!("../shaders/fir.wgsl")),
        _ => None,
    }
}

/// Serves the kernels compiled into this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedSources;

impl SourceProvider for EmbeddedSources {
    fn kernel_source(&self, name: &str) -> Result<Cow<'_, str>> {
        embedded_source(name).map(Cow::Borrowed).ok_or_else(|| {
            RuntimeError::SourceUnavailable(format!(
                "no embedded kernel program '{name}' (available: {})",
                programs::ALL.join(", ")
            ))
        })
    }
}

/// Reads `<root>/<name>.wgsl` on every request.
#[derive(Debug, Clone)]
pub struct DirectorySources {
    root: PathBuf,
}

impl DirectorySources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.wgsl"))
    }
}

impl SourceProvider for DirectorySources {
    fn kernel_source(&self, name: &str) -> Result<Cow<'_, str>> {
        let path = self.path_of(name);
        tracing::debug!(path = %path.display(), "Loading kernel source");
        std::fs::read_to_string(&path)
            .map(Cow::Owned)
            .map_err(|e| RuntimeError::SourceUnavailable(format!("{}: {e}", path.display())))
    }
}
