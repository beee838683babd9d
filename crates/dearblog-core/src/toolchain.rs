//! Locating and probing the `hugo` executable.
//!
//! The pre-flight runs `<binary> version` synchronously and only checks that
//! it exits zero. The version text is parsed on a best-effort basis for
//! logging and `dearblog doctor`; an unrecognised format is not an error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{BlogError, Result};

pub const VERSION_ARGS: &[&str] = &["version"];

/// `serve`, including drafts (`-D`) and future-dated content (`-F`).
pub const SERVE_ARGS: &[&str] = &["serve", "-D", "-F"];

// ---------------------------------------------------------------------------
// HugoVersion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HugoVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub extended: bool,
}

static VERSION_RE: OnceLock<Regex> = OnceLock::new();

fn version_re() -> &'static Regex {
    VERSION_RE.get_or_init(|| {
        Regex::new(r"v(\d+)\.(\d+)\.(\d+)(?:-[0-9A-Za-z]+)?(\+extended)?").unwrap()
    })
}

impl HugoVersion {
    /// Extract the first `vMAJOR.MINOR.PATCH` from `hugo version` output.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = version_re().captures(text)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
            extended: caps.get(4).is_some(),
        })
    }
}

impl fmt::Display for HugoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.extended {
            f.write_str("+extended")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hugo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub binary: String,
    pub path: Option<PathBuf>,
    pub version: Option<HugoVersion>,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct Hugo {
    binary: String,
}

impl Hugo {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Resolve the binary against PATH (or as a literal path).
    pub fn locate(&self) -> Option<PathBuf> {
        which::which(&self.binary).ok()
    }

    /// Run `<binary> version` and fail with [`BlogError::ToolMissing`] unless it
    /// exits zero. Blocks the calling thread.
    pub fn preflight(&self) -> Result<PreflightReport> {
        let output = Command::new(&self.binary)
            .args(VERSION_ARGS)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BlogError::ToolMissing {
                binary: self.binary.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let status = match output.status.code() {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_string(),
            };
            let detail = if stderr.is_empty() {
                format!("`{} version` {status}", self.binary)
            } else {
                format!("`{} version` {status}: {stderr}", self.binary)
            };
            return Err(BlogError::ToolMissing {
                binary: self.binary.clone(),
                detail,
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(PreflightReport {
            binary: self.binary.clone(),
            path: self.locate(),
            version: HugoVersion::parse(&text),
            output: text,
        })
    }

    /// Build the long-running `serve` command rooted at `root`.
    pub fn serve_command(&self, root: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(SERVE_ARGS)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
