//! Resolution of the external flasher.
//!
//! esptool is installed in several shapes depending on the platform and
//! Python setup. [`FlasherProvider`] probes an ordered list of candidate
//! commands once and hands back the first that answers `version`.

use std::fmt;
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::flasher::ExternalFlasher;

/// Default candidate commands, in probe order.
pub const DEFAULT_CANDIDATES: &[&str] = &[
    "esptool",
    "esptool.py",
    "python3 -m esptool",
    "python -m esptool",
];

/// One way of invoking esptool: a program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlasherCandidate {
    /// Executable name or path.
    pub program: String,
    /// Arguments placed before any esptool option (e.g. `-m esptool`).
    pub prefix_args: Vec<String>,
}

impl FlasherCandidate {
    /// Parse a whitespace-separated command line such as `python3 -m esptool`.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            prefix_args: parts.collect(),
        })
    }

    /// A [`Command`] for this candidate with the prefix arguments applied.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args);
        cmd
    }
}

impl fmt::Display for FlasherCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.prefix_args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

type Probe = Box<dyn Fn(&FlasherCandidate) -> Option<String> + Send + Sync>;

/// Resolves an [`ExternalFlasher`] from an ordered list of candidates.
pub struct FlasherProvider {
    candidates: Vec<FlasherCandidate>,
    probe: Probe,
}

impl Default for FlasherProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FlasherProvider {
    /// Provider over [`DEFAULT_CANDIDATES`].
    pub fn new() -> Self {
        Self::with_candidates(DEFAULT_CANDIDATES.iter().copied())
    }

    /// Provider over custom candidate command lines; blank entries are skipped.
    pub fn with_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            candidates: candidates
                .into_iter()
                .filter_map(|c| FlasherCandidate::parse(c.as_ref()))
                .collect(),
            probe: Box::new(probe_version),
        }
    }

    /// Replace the probe used to test a candidate.
    ///
    /// The probe returns the tool's version string, or `None` if the
    /// candidate is not usable.
    #[must_use]
    pub fn with_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn(&FlasherCandidate) -> Option<String> + Send + Sync + 'static,
    {
        self.probe = Box::new(probe);
        self
    }

    /// Candidates in probe order.
    pub fn candidates(&self) -> &[FlasherCandidate] {
        &self.candidates
    }

    /// Probe candidates in order; the first that answers wins.
    pub fn resolve(&self) -> Result<ExternalFlasher> {
        for candidate in &self.candidates {
            debug!("Probing flasher candidate '{candidate}'");
            if let Some(version) = (self.probe)(candidate) {
                info!("Using flasher '{candidate}' ({version})");
                return Ok(ExternalFlasher::new(candidate.clone()).with_version(version));
            }
        }

        let tried = self
            .candidates
            .iter()
            .map(|c| format!("'{c}'"))
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::Unavailable(if tried.is_empty() {
            "no flasher candidates configured".to_string()
        } else {
            format!("esptool not found (tried {tried})")
        }))
    }
}

/// Run `<candidate> version` and return the last line it printed.
fn probe_version(candidate: &FlasherCandidate) -> Option<String> {
    let output = candidate
        .command()
        .arg("version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or("unknown version")
        .to_string();
    Some(version)
}
