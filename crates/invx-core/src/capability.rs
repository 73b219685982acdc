//! Discovery of external binaries the pipeline delegates to.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::InvxError;
use crate::models::config::CapabilityPaths;

/// An external capability backed by a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Tesseract OCR command-line tool.
    Tesseract,
    /// Poppler's `pdftoppm` page renderer.
    Pdftoppm,
}

impl Capability {
    /// Executable name, without platform suffix.
    pub fn binary_name(&self) -> &'static str {
        match self {
            Capability::Tesseract => "tesseract",
            Capability::Pdftoppm => "pdftoppm",
        }
    }

    /// Install instructions shown when the capability is missing.
    pub fn remediation(&self) -> &'static str {
        match self {
            Capability::Tesseract => {
                "Install Tesseract OCR:\n  \
                 macOS:   brew install tesseract\n  \
                 Linux:   sudo apt-get install tesseract-ocr\n  \
                 Windows: https://github.com/UB-Mannheim/tesseract/wiki\n\
                 or set capabilities.tesseract in the config file."
            }
            Capability::Pdftoppm => {
                "Install Poppler (provides pdftoppm):\n  \
                 macOS:   brew install poppler\n  \
                 Linux:   sudo apt-get install poppler-utils\n  \
                 Windows: https://github.com/oschwartz10612/poppler-windows/releases\n\
                 or set capabilities.pdftoppm in the config file, \
                 or set pdf.rasterizer to \"embedded\"."
            }
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// Outcome of resolving a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityStatus {
    /// Usable, with the binary to invoke.
    Available(PathBuf),
    /// Missing.
    Unavailable { reason: String },
}

impl CapabilityStatus {
    /// Path of the binary, or a [`InvxError::ConversionDependency`] naming the fix.
    pub fn require(self, capability: Capability) -> Result<PathBuf, InvxError> {
        match self {
            CapabilityStatus::Available(path) => Ok(path),
            CapabilityStatus::Unavailable { reason } => Err(InvxError::ConversionDependency {
                capability: capability.to_string(),
                reason,
                remediation: capability.remediation().to_string(),
            }),
        }
    }
}

/// Locates external capabilities.
pub trait CapabilityResolver: Send + Sync {
    fn resolve(&self, capability: Capability) -> CapabilityStatus;
}

/// Resolves binaries from configured paths, then from `PATH`.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver {
    paths: CapabilityPaths,
}

impl SystemResolver {
    pub fn new(paths: CapabilityPaths) -> Self {
        Self { paths }
    }

    fn configured(&self, capability: Capability) -> Option<&Path> {
        match capability {
            Capability::Tesseract => self.paths.tesseract.as_deref(),
            Capability::Pdftoppm => self.paths.pdftoppm.as_deref(),
        }
    }
}

impl CapabilityResolver for SystemResolver {
    fn resolve(&self, capability: Capability) -> CapabilityStatus {
        let name = capability.binary_name();

        if let Some(configured) = self.configured(capability) {
            let candidate = if configured.is_dir() {
                executable_in(configured, name)
            } else if configured.is_file() {
                Some(configured.to_path_buf())
            } else {
                None
            };
            return match candidate {
                Some(path) => {
                    debug!("Using configured {} at {}", name, path.display());
                    CapabilityStatus::Available(path)
                }
                None => CapabilityStatus::Unavailable {
                    reason: format!("configured path {} does not contain {}", configured.display(), name),
                },
            };
        }

        let found = std::env::var_os("PATH").and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| executable_in(&dir, name))
        });

        match found {
            Some(path) => {
                debug!("Found {} at {}", name, path.display());
                CapabilityStatus::Available(path)
            }
            None => CapabilityStatus::Unavailable {
                reason: format!("{} not found on PATH", name),
            },
        }
    }
}

fn executable_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let candidates = if cfg!(windows) {
        vec![dir.join(format!("{}.exe", name)), dir.join(name)]
    } else {
        vec![dir.join(name)]
    };
    candidates.into_iter().find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let binary = if cfg!(windows) { "tesseract.exe" } else { "tesseract" };
        std::fs::write(dir.path().join(binary), b"").unwrap();

        let resolver = SystemResolver::new(CapabilityPaths {
            tesseract: Some(dir.path().to_path_buf()),
            pdftoppm: None,
        });

        assert_eq!(
            resolver.resolve(Capability::Tesseract),
            CapabilityStatus::Available(dir.path().join(binary))
        );
    }

    #[test]
    fn test_configured_path_missing() {
        let resolver = SystemResolver::new(CapabilityPaths {
            tesseract: None,
            pdftoppm: Some(PathBuf::from("/definitely/not/here/pdftoppm")),
        });

        let status = resolver.resolve(Capability::Pdftoppm);
        assert!(matches!(status, CapabilityStatus::Unavailable { .. }));

        let err = status.require(Capability::Pdftoppm).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConversionDependency);
        assert!(err.to_string().contains("poppler-utils"));
    }
}
