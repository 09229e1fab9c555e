//! Script and stylesheet build contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MinifyError {
    #[error("cannot build '.{0}' files")]
    Unsupported(String),

    #[error("build failed: {0}")]
    Failed(String),
}

/// Turns `.js`/`.css` sources into served bytes for the given browser targets.
pub trait Minifier: Send + Sync {
    fn build(&self, content: &[u8], extension: &str, targets: &[String]) -> Result<Vec<u8>, MinifyError>;
}

/// Serves sources unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Minifier for Passthrough {
    fn build(&self, content: &[u8], _extension: &str, _targets: &[String]) -> Result<Vec<u8>, MinifyError> {
        Ok(content.to_vec())
    }
}
