//! Auto-discovery and interactive selection of firmware images.
//!
//! When the user omits the firmware argument from the `flash` command, this
//! module searches the current directory tree for `.bin` files and presents
//! an interactive selection if multiple candidates are found.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use espflow::FirmwareSource;
use rust_i18n::t;

use crate::{CliError, use_fancy_output};

/// Maximum directory depth when searching for firmware files.
const MAX_SEARCH_DEPTH: usize = 5;

/// Directories to skip during search. ESP-IDF keeps the second-stage
/// bootloader and partition table images in their own build subdirectories.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    ".svn",
    ".hg",
    "CMakeFiles",
    "bootloader",
    "partition_table",
    "esp-idf",
];

/// Helper images that are never the application.
const SKIP_FILES: &[&str] = &["ota_data_initial.bin", "partition-table.bin", "bootloader.bin"];

/// Priority directory prefixes (earlier = higher priority).
const PRIORITY_DIRS: &[&str] = &["build", "firmware", "output", "out", "bin", "release"];

/// A discovered firmware file candidate.
#[derive(Debug, Clone)]
pub struct FirmwareCandidate {
    /// Full path to the firmware file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Priority score (lower = better).
    pub priority: u32,
}

impl FirmwareCandidate {
    /// Format file size in a human-readable way.
    pub fn human_size(&self) -> String {
        human_size(self.size)
    }

    /// Format the display label for interactive selection.
    pub fn display_label(&self, base: &Path) -> String {
        format!("{} ({})", self.relative(base), self.human_size())
    }

    fn relative(&self, base: &Path) -> String {
        self.path
            .strip_prefix(base)
            .unwrap_or(&self.path)
            .display()
            .to_string()
    }
}

/// Format a byte count as B / KB / MB.
pub fn human_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    #[allow(clippy::cast_precision_loss)]
    if size >= MB {
        format!("{:.1} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.1} KB", size as f64 / KB as f64)
    } else {
        format!("{size} B")
    }
}

/// Search for `.bin` files under `base_dir` up to `MAX_SEARCH_DEPTH`.
pub fn find_firmware_files(base_dir: &Path) -> Vec<FirmwareCandidate> {
    let mut candidates = Vec::new();
    walk_dir(base_dir, base_dir, 0, &mut candidates);

    // Lower priority first, then newest, then shallowest.
    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| match (&b.modified, &a.modified) {
                (Some(bm), Some(am)) => bm.cmp(am),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| {
                a.path
                    .components()
                    .count()
                    .cmp(&b.path.components().count())
            })
    });

    candidates
}

fn walk_dir(base: &Path, dir: &Path, depth: usize, out: &mut Vec<FirmwareCandidate>) {
    if depth > MAX_SEARCH_DEPTH {
        return;
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if path.is_dir() {
            if name_str.starts_with('.') || SKIP_DIRS.contains(&name_str.as_ref()) {
                continue;
            }
            walk_dir(base, &path, depth + 1, out);
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"))
            && !SKIP_FILES.iter().any(|f| name_str.eq_ignore_ascii_case(f))
        {
            let meta = entry.metadata().ok();
            let size = meta.as_ref().map_or(0, std::fs::Metadata::len);
            if size == 0 {
                continue;
            }
            out.push(FirmwareCandidate {
                priority: compute_priority(&path, base),
                path,
                size,
                modified: meta.and_then(|m| m.modified().ok()),
            });
        }
    }
}

/// Lower score = higher priority.
#[allow(clippy::cast_possible_truncation)]
fn compute_priority(path: &Path, base: &Path) -> u32 {
    let rel = path.strip_prefix(base).unwrap_or(path);
    let components: Vec<_> = rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();

    for (i, dir_name) in PRIORITY_DIRS.iter().enumerate() {
        if components.iter().any(|c| c.eq_ignore_ascii_case(dir_name)) {
            return i as u32;
        }
    }

    PRIORITY_DIRS.len() as u32 + components.len() as u32
}

/// Resolve the firmware source: an explicit path or URL is used as is,
/// otherwise the working directory is searched.
///
/// # Errors
///
/// Returns error when:
/// - No firmware specified and none found in the directory tree
/// - Non-interactive mode and multiple candidates found
/// - User cancels interactive selection
pub fn resolve_firmware(
    firmware: Option<&str>,
    non_interactive: bool,
    quiet: bool,
) -> Result<FirmwareSource> {
    if let Some(location) = firmware {
        return Ok(FirmwareSource::from_arg(location));
    }

    let base = std::env::current_dir().context("failed to get current directory")?;
    let candidates = find_firmware_files(&base);

    match candidates.as_slice() {
        [] => Err(CliError::Usage(t!("flash.no_firmware_found").to_string()).into()),
        [chosen] => {
            let rel = chosen.relative(&base);
            if !quiet {
                eprintln!(
                    "{} {}",
                    style("📦").cyan(),
                    t!("flash.auto_found_one", path = &rel, size = chosen.human_size())
                );
            }

            if non_interactive {
                return Ok(FirmwareSource::File(chosen.path.clone()));
            }

            let confirmed = dialoguer::Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(t!("flash.confirm_firmware", path = &rel).to_string())
                .default(true)
                .interact_opt()
                .context("firmware confirmation failed")?
                .unwrap_or(false);

            if confirmed {
                Ok(FirmwareSource::File(chosen.path.clone()))
            } else {
                Err(CliError::Cancelled(t!("flash.selection_cancelled").to_string()).into())
            }
        },
        _ if non_interactive => {
            for c in &candidates {
                eprintln!("  {}", c.display_label(&base));
            }
            Err(CliError::Usage(t!("flash.multiple_firmware_non_interactive").to_string()).into())
        },
        _ => select_firmware(&candidates, &base, quiet),
    }
}

fn select_firmware(
    candidates: &[FirmwareCandidate],
    base: &Path,
    quiet: bool,
) -> Result<FirmwareSource> {
    if !quiet {
        eprintln!(
            "{} {}",
            style("🔍").cyan(),
            t!("flash.auto_found_multiple", count = candidates.len())
        );
    }

    let labels: Vec<String> = candidates.iter().map(|c| c.display_label(base)).collect();
    let prompt = t!("flash.select_firmware").to_string();

    let selection = if use_fancy_output() {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(&labels)
            .default(0)
            .interact_opt()
    } else {
        Select::new()
            .with_prompt(prompt)
            .items(&labels)
            .default(0)
            .interact_opt()
    }
    .context("firmware selection failed")?;

    match selection.and_then(|idx| candidates.get(idx)) {
        Some(c) => Ok(FirmwareSource::File(c.path.clone())),
        None => Err(CliError::Cancelled(t!("flash.selection_cancelled").to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    fn create_test_tree(dir: &Path, files: &[&str]) {
        for file in files {
            let path = dir.join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, vec![0u8; 1024]).unwrap();
        }
    }

    #[test]
    fn test_find_no_firmware() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find_firmware_files(tmp.path()).is_empty());
    }

    #[test]
    fn test_find_single_firmware() {
        let tmp = tempfile::tempdir().unwrap();
        create_test_tree(tmp.path(), &["app.bin"]);
        let result = find_firmware_files(tmp.path());
        assert_eq!(result.len(), 1);
        assert!(result[0].path.ends_with("app.bin"));
    }

    #[test]
    fn test_skips_idf_helper_images() {
        let tmp = tempfile::tempdir().unwrap();
        create_test_tree(
            tmp.path(),
            &[
                "build/blink.bin",
                "build/bootloader/bootloader.bin",
                "build/partition_table/partition-table.bin",
                "build/ota_data_initial.bin",
                ".git/objects/fake.bin",
                "target/debug/build.bin",
            ],
        );
        let result = find_firmware_files(tmp.path());
        assert_eq!(result.len(), 1);
        assert!(result[0].path.ends_with("blink.bin"));
    }

    #[test]
    fn test_skips_empty_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("empty.bin"), b"").unwrap();
        assert!(find_firmware_files(tmp.path()).is_empty());
    }

    #[test]
    fn test_priority_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        create_test_tree(tmp.path(), &["random/app.bin", "build/app.bin"]);
        let result = find_firmware_files(tmp.path());
        assert_eq!(result.len(), 2);
        assert!(result[0].path.to_string_lossy().contains("build"));
    }

    #[test]
    fn test_case_insensitive_extension() {
        let tmp = tempfile::tempdir().unwrap();
        create_test_tree(tmp.path(), &["app.BIN", "app2.Bin"]);
        assert_eq!(find_firmware_files(tmp.path()).len(), 2);
    }

    #[test]
    fn test_max_depth_exceeded() {
        let tmp = tempfile::tempdir().unwrap();
        create_test_tree(tmp.path(), &["a/b/c/d/e/f/g/deep.bin"]);
        assert!(find_firmware_files(tmp.path()).is_empty());
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_resolve_with_explicit_location() {
        let source = resolve_firmware(Some("/some/app.bin"), false, false).unwrap();
        assert_eq!(source, FirmwareSource::File(PathBuf::from("/some/app.bin")));

        let source = resolve_firmware(Some("https://example.com/app.bin"), true, true).unwrap();
        assert!(source.is_remote());
    }

    #[test]
    fn test_resolve_no_firmware_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let _guard = TempCwdGuard::new(tmp.path());
        let err = resolve_firmware(None, true, true).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
    }

    #[test]
    fn test_resolve_single_non_interactive() {
        let tmp = tempfile::tempdir().unwrap();
        create_test_tree(tmp.path(), &["build/my_app.bin"]);
        let _guard = TempCwdGuard::new(tmp.path());
        match resolve_firmware(None, true, true).unwrap() {
            FirmwareSource::File(path) => assert!(path.ends_with("my_app.bin")),
            FirmwareSource::Url(url) => panic!("unexpected url {url}"),
        }
    }

    #[test]
    fn test_resolve_multiple_non_interactive_fails() {
        let tmp = tempfile::tempdir().unwrap();
        create_test_tree(tmp.path(), &["a.bin", "b.bin"]);
        let _guard = TempCwdGuard::new(tmp.path());
        let err = resolve_firmware(None, true, true).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
    }

    static CWD_LOCK: Mutex<()> = Mutex::new(());

    /// RAII guard that temporarily changes the working directory.
    struct TempCwdGuard {
        original: PathBuf,
        _lock: MutexGuard<'static, ()>,
    }

    impl TempCwdGuard {
        fn new(path: &Path) -> Self {
            let lock = CWD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            let original = std::env::current_dir().unwrap();
            std::env::set_current_dir(path).unwrap();
            Self {
                original,
                _lock: lock,
            }
        }
    }

    impl Drop for TempCwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.original);
        }
    }
}
