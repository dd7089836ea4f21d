//! Resolving a `wasmUrl` to module bytes.

use crate::error::HostError;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// Where a module is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    File(PathBuf),
    Http(Url),
}

impl ModuleSource {
    /// Interprets `location` as a `file://` or `http(s)://` URL, falling
    /// back to a filesystem path resolved against `base_dir`.
    pub fn resolve(location: &str, base_dir: Option<&Path>) -> Result<Self, HostError> {
        if let Ok(url) = Url::parse(location) {
            match url.scheme() {
                "file" => {
                    let path = url.to_file_path().map_err(|()| HostError::Fetch {
                        location: location.to_string(),
                        source: io::Error::new(io::ErrorKind::InvalidInput, "not a local file URL"),
                    })?;
                    return Ok(ModuleSource::File(path));
                }
                "http" | "https" => return Ok(ModuleSource::Http(url)),
                // Anything else, including Windows drive letters, is a path.
                _ => {}
            }
        }

        let path = Path::new(location);
        let path = match base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        };
        Ok(ModuleSource::File(path))
    }

    pub fn fetch(&self) -> Result<Vec<u8>, HostError> {
        match self {
            ModuleSource::File(path) => {
                debug!(path = %path.display(), "reading module");
                std::fs::read(path).map_err(|source| HostError::Fetch {
                    location: path.display().to_string(),
                    source,
                })
            }
            ModuleSource::Http(url) => fetch_http(url),
        }
    }
}

/// Loads the module bytes behind `location`.
pub fn fetch_module(location: &str, base_dir: Option<&Path>) -> Result<Vec<u8>, HostError> {
    ModuleSource::resolve(location, base_dir)?.fetch()
}

#[cfg(feature = "http")]
fn fetch_http(url: &Url) -> Result<Vec<u8>, HostError> {
    use std::io::Read;

    debug!(%url, "downloading module");
    let fetch_error = |source: io::Error| HostError::Fetch {
        location: url.to_string(),
        source,
    };
    let response = ureq::get(url.as_str())
        .call()
        .map_err(|err| fetch_error(io::Error::other(err.to_string())))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(fetch_error)?;
    Ok(bytes)
}

#[cfg(not(feature = "http"))]
fn fetch_http(url: &Url) -> Result<Vec<u8>, HostError> {
    Err(HostError::Fetch {
        location: url.to_string(),
        source: io::Error::new(
            io::ErrorKind::Unsupported,
            "built without the `http` feature",
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_relative_path_against_base_dir() {
        let source = ModuleSource::resolve("isar.wasm", Some(Path::new("/srv/modules"))).unwrap();
        assert_eq!(
            source,
            ModuleSource::File(PathBuf::from("/srv/modules/isar.wasm"))
        );

        let source = ModuleSource::resolve("/abs/isar.wasm", Some(Path::new("/srv"))).unwrap();
        assert_eq!(source, ModuleSource::File(PathBuf::from("/abs/isar.wasm")));

        let source = ModuleSource::resolve("isar.wasm", None).unwrap();
        assert_eq!(source, ModuleSource::File(PathBuf::from("isar.wasm")));
    }

    #[test]
    fn test_resolve_urls() {
        let source = ModuleSource::resolve("https://example.com/isar.wasm", None).unwrap();
        assert!(matches!(source, ModuleSource::Http(url) if url.host_str() == Some("example.com")));

        #[cfg(unix)]
        {
            let source = ModuleSource::resolve("file:///tmp/isar.wasm", None).unwrap();
            assert_eq!(source, ModuleSource::File(PathBuf::from("/tmp/isar.wasm")));
        }
    }

    #[test]
    fn test_fetch_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.wasm"), b"\0asm").unwrap();

        let bytes = fetch_module("m.wasm", Some(dir.path())).unwrap();
        assert_eq!(bytes, b"\0asm");

        let err = fetch_module("missing.wasm", Some(dir.path())).unwrap_err();
        assert!(matches!(err, HostError::Fetch { .. }));
        assert!(err.to_string().contains("missing.wasm"));
    }
}
