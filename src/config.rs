//! Runtime configuration read from the environment

use std::path::PathBuf;

/// Environment variable selecting where the report goes
pub const OUTPUT_ENV: &str = "HWCPROBE_OUTPUT";

/// Value of [`OUTPUT_ENV`] meaning standard output
pub const STDOUT_SENTINEL: &str = "-";

/// Where the teardown report is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stdout,
    /// Created or truncated when the report is written
    File(PathBuf),
}

impl ReportDestination {
    /// Interpret a configuration value; empty means no report
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" => None,
            STDOUT_SENTINEL => Some(Self::Stdout),
            path => Some(Self::File(PathBuf::from(path))),
        }
    }
}

impl std::fmt::Display for ReportDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "<stdout>"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// `None` disables the report
    pub destination: Option<ReportDestination>,
}

impl RuntimeConfig {
    /// Configuration that never writes a report
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_destination(destination: ReportDestination) -> Self {
        Self {
            destination: Some(destination),
        }
    }

    /// Read the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup` instead of the process environment
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let destination = lookup(OUTPUT_ENV)
            .as_deref()
            .and_then(ReportDestination::parse);
        Self { destination }
    }
}
