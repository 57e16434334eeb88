//! CLI argument parsing for hwcprobe

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::counters::BackendKind;

/// Counter backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// Software event registers (always available)
    Simulated,
    /// Linux perf_event (requires the `perf` feature)
    Perf,
}

impl BackendArg {
    /// Map onto a compiled-in backend, if there is one
    pub fn kind(self) -> Option<BackendKind> {
        match self {
            BackendArg::Simulated => Some(BackendKind::Simulated),
            #[cfg(feature = "perf")]
            BackendArg::Perf => Some(BackendKind::Perf),
            #[cfg(not(feature = "perf"))]
            BackendArg::Perf => None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "hwcprobe")]
#[command(version)]
#[command(
    about = "Hardware counter instrumentation: identifiers, selections and metadata blobs",
    long_about = None
)]
pub struct Cli {
    /// Counter backend used to validate and describe counters
    #[arg(long, value_enum, global = true)]
    pub backend: Option<BackendArg>,

    /// Enable debug tracing output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the identifier of a function or region
    Id {
        #[command(subcommand)]
        entity: IdCommand,

        /// Print the identifier in hexadecimal
        #[arg(long, global = true)]
        hex: bool,
    },

    /// List the counters the backend knows
    Counters,

    /// Validate a selection document and list what it selects
    Check {
        /// Selection document (.toml or .json)
        selection: PathBuf,
    },

    /// Build a metadata blob from a selection and a discovery manifest
    Build {
        /// Selection document (.toml or .json)
        #[arg(short, long)]
        selection: PathBuf,

        /// Discovery manifest (JSON) written by the source analyzer
        #[arg(short, long)]
        manifest: PathBuf,

        /// Where to write the metadata blob
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Decode a metadata blob and print its records
    Dump {
        /// Metadata blob
        blob: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run every unit of a metadata blob through the runtime on the simulated
    /// backend and emit the teardown report (destination from HWCPROBE_OUTPUT)
    Replay {
        /// Metadata blob
        blob: PathBuf,

        /// Intervals per unit; each one records one event per counter
        #[arg(long, default_value_t = 1)]
        calls: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum IdCommand {
    /// Identifier of a function, from its linkage name
    Function {
        /// Linkage (mangled) name
        linkage_name: String,
    },

    /// Identifier of a source region
    Region {
        file: String,
        start_line: u32,
        end_line: u32,

        /// Counter requested for the region (repeatable, in order)
        #[arg(short, long = "counter", value_name = "COUNTER")]
        counters: Vec<String>,
    },
}
