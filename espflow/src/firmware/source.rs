//! Firmware sources: local files and HTTP downloads.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::firmware::{FirmwareImage, MAX_IMAGE_SIZE};

/// Timeout applied to firmware downloads.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a firmware image is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSource {
    /// A local file, read fully into memory.
    File(PathBuf),
    /// A resource fetched over HTTP(S).
    Url(String),
}

impl FirmwareSource {
    /// Interpret a user-supplied location: `http://`/`https://` → URL,
    /// anything else → file path.
    pub fn from_arg(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(location.to_string())
        } else {
            Self::File(PathBuf::from(location))
        }
    }

    /// Whether this source needs the network.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Url(_))
    }

    /// Load the image for flashing at `offset`.
    ///
    /// Every failure (missing file, non-2xx status, network error, empty or
    /// oversized body) is reported as [`Error::FirmwareLoad`].
    pub fn load(&self, offset: u32) -> Result<FirmwareImage> {
        match self {
            Self::File(path) => load_file(path, offset),
            Self::Url(url) => load_url(url, offset),
        }
    }
}

impl fmt::Display for FirmwareSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

fn load_file(path: &Path, offset: u32) -> Result<FirmwareImage> {
    debug!("Reading firmware file {}", path.display());
    let bytes = std::fs::read(path)
        .map_err(|e| Error::FirmwareLoad(format!("cannot read {}: {e}", path.display())))?;
    FirmwareImage::new(bytes, offset, path.display().to_string())
}

fn load_url(url: &str, offset: u32) -> Result<FirmwareImage> {
    info!("Downloading firmware from {url}");

    let response = ureq::get(url)
        .timeout(HTTP_TIMEOUT)
        .call()
        .map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                Error::FirmwareLoad(format!("HTTP {code} while fetching {url}"))
            },
            ureq::Error::Transport(t) => {
                Error::FirmwareLoad(format!("network error while fetching {url}: {t}"))
            },
        })?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_IMAGE_SIZE as u64 + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::FirmwareLoad(format!("failed to read body of {url}: {e}")))?;

    debug!("Downloaded {} bytes from {url}", bytes.len());
    FirmwareImage::new(bytes, offset, url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve exactly one canned HTTP response on a random local port.
    fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(&response);
            }
        });
        format!("http://{addr}/firmware.bin")
    }

    #[test]
    fn test_from_arg() {
        assert_eq!(
            FirmwareSource::from_arg("https://example.com/fw.bin"),
            FirmwareSource::Url("https://example.com/fw.bin".to_string())
        );
        assert_eq!(
            FirmwareSource::from_arg("HTTP://example.com/fw.bin"),
            FirmwareSource::Url("HTTP://example.com/fw.bin".to_string())
        );
        assert_eq!(
            FirmwareSource::from_arg("build/app.bin"),
            FirmwareSource::File(PathBuf::from("build/app.bin"))
        );
        assert!(FirmwareSource::from_arg("http://x/y").is_remote());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.bin");
        std::fs::write(&path, [0xE9u8, 1, 2, 3]).unwrap();

        let image = FirmwareSource::File(path.clone()).load(0x10000).unwrap();
        assert_eq!(image.len(), 4);
        assert_eq!(image.offset(), 0x10000);
        assert_eq!(image.origin(), path.display().to_string());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FirmwareSource::File(dir.path().join("missing.bin"))
            .load(0)
            .unwrap_err();
        assert!(matches!(err, Error::FirmwareLoad(msg) if msg.contains("missing.bin")));
    }

    #[test]
    fn test_load_url_ok() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nabcd".to_vec(),
        );
        let image = FirmwareSource::Url(url.clone()).load(0).unwrap();
        assert_eq!(image.bytes(), b"abcd");
        assert_eq!(image.origin(), url);
    }

    #[test]
    fn test_load_url_not_found() {
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        );
        let err = FirmwareSource::Url(url).load(0).unwrap_err();
        assert!(matches!(err, Error::FirmwareLoad(msg) if msg.contains("404")));
    }

    #[test]
    fn test_load_url_connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = FirmwareSource::Url(format!("http://127.0.0.1:{port}/fw.bin"))
            .load(0)
            .unwrap_err();
        assert!(matches!(err, Error::FirmwareLoad(msg) if msg.contains("network error")));
    }
}
