//! Where each session's Chromium comes from.
//!
//! Resolution order: `--chrome-path`/`CHROME_PATH`, then the managed copy
//! under `~/.manifest-sniffer/chrome`, then whatever chromiumoxide detects on
//! the system. A download into the managed directory is the last resort.

use crate::types::{Result, SnifferError};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// File names a Chromium build may ship its executable under.
const EXECUTABLE_NAMES: &[&str] = &[
    "chrome",
    "chromium",
    "Chromium",
    "Google Chrome",
    "chrome.exe",
    "chromium.exe",
    "headless_shell",
];

/// The Chromium a session is started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChromeSource {
    /// Given on the command line or via `CHROME_PATH`.
    Explicit(PathBuf),
    /// Found in the managed directory from an earlier `setup` or download.
    Managed(PathBuf),
    /// Left to chromiumoxide's detection of an installed Chrome.
    System,
    /// Fetched during this launch because nothing else worked.
    Downloaded(PathBuf),
}

impl ChromeSource {
    /// Executable to hand to the browser config. `None` means auto-detect.
    pub fn executable(&self) -> Option<&Path> {
        match self {
            ChromeSource::Explicit(p) | ChromeSource::Managed(p) | ChromeSource::Downloaded(p) => {
                Some(p)
            }
            ChromeSource::System => None,
        }
    }

    /// Only a system lookup is worth retrying with a download.
    pub fn can_fall_back(&self) -> bool {
        matches!(self, ChromeSource::System)
    }
}

impl fmt::Display for ChromeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChromeSource::Explicit(p) => write!(f, "configured Chrome at {}", p.display()),
            ChromeSource::Managed(p) => write!(f, "managed Chromium at {}", p.display()),
            ChromeSource::System => f.write_str("system Chrome"),
            ChromeSource::Downloaded(p) => write!(f, "freshly downloaded Chromium at {}", p.display()),
        }
    }
}

/// `~/.manifest-sniffer/chrome/`
pub fn managed_chrome_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".manifest-sniffer").join("chrome"))
        .ok_or_else(|| SnifferError::Config("Could not determine home directory".to_string()))
}

/// Pick the Chromium for the next session, without downloading anything.
pub fn locate_chrome(explicit: Option<&Path>) -> ChromeSource {
    let managed = managed_chrome_dir().ok();
    locate_chrome_in(explicit, managed.as_deref())
}

fn locate_chrome_in(explicit: Option<&Path>, managed_dir: Option<&Path>) -> ChromeSource {
    if let Some(path) = explicit {
        return ChromeSource::Explicit(path.to_path_buf());
    }
    managed_dir
        .and_then(find_executable)
        .map(ChromeSource::Managed)
        .unwrap_or(ChromeSource::System)
}

/// Fetch Chromium into the managed directory and return its executable.
/// An existing managed copy is reused unless `force` is set.
pub async fn download_chrome(force: bool) -> Result<PathBuf> {
    let dir = managed_chrome_dir()?;

    match find_executable(&dir) {
        Some(exe) if !force => {
            info!("Chromium already installed at {:?}", exe);
            return Ok(exe);
        }
        _ if force && dir.exists() => {
            info!("Removing managed Chromium at {:?}", dir);
            tokio::fs::remove_dir_all(&dir).await?;
        }
        _ => {}
    }
    tokio::fs::create_dir_all(&dir).await?;

    info!("Downloading Chromium to {:?}", dir);
    let options = BrowserFetcherOptions::builder()
        .with_path(&dir)
        .build()
        .map_err(|e| SnifferError::Config(format!("Invalid Chromium download options: {}", e)))?;

    let installed = BrowserFetcher::new(options)
        .fetch()
        .await
        .map_err(|e| SnifferError::Launch(format!("Chromium download failed: {}", e)))?;

    info!("Chromium ready at {:?}", installed.executable_path);
    Ok(installed.executable_path)
}

/// Depth-first search of a fetcher layout (`<platform>-<rev>/chrome-linux/chrome`
/// and friends) for the first Chromium executable.
fn find_executable(root: &Path) -> Option<PathBuf> {
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for path in entries.flatten().map(|entry| entry.path()) {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

            if name == "Chromium.app" {
                let bundled = path.join("Contents/MacOS/Chromium");
                if bundled.is_file() {
                    return Some(bundled);
                }
            } else if EXECUTABLE_NAMES.contains(&name) && path.is_file() {
                return Some(path);
            }

            if path.is_dir() {
                pending.push(path);
            }
        }
    }
    None
}
