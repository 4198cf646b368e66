//! Shader module loading

use std::path::PathBuf;

use crate::render::{RenderError, RenderResult};

/// Supplies compiled SPIR-V blobs by name
pub trait ShaderSource {
    /// Load the SPIR-V bytes of the shader `name` (for example `"mesh.vert"`)
    fn load(&self, name: &str) -> RenderResult<Vec<u8>>;
}

/// Reads `<directory>/<name>.spv` from disk
#[derive(Debug, Clone)]
pub struct FileShaderSource {
    directory: PathBuf,
}

impl FileShaderSource {
    /// Create a source rooted at `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    /// Full path for a shader name
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.spv"))
    }
}

impl ShaderSource for FileShaderSource {
    fn load(&self, name: &str) -> RenderResult<Vec<u8>> {
        let path = self.path_for(name);
        log::debug!("Loading shader {}", path.display());

        std::fs::read(&path).map_err(|e| RenderError::ShaderLoad {
            name: name.to_string(),
            reason: format!("{}: {e}", path.display()),
        })
    }
}
