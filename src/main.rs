use anyhow::{Context, Result};
use clap::Parser;
use hwcprobe::catalog::{DescriptorCatalog, DiscoveryManifest};
use hwcprobe::cli::{BackendArg, Cli, Command, IdCommand};
use hwcprobe::config::{RuntimeConfig, OUTPUT_ENV};
use hwcprobe::counters::simulated::SimulatedBackend;
use hwcprobe::counters::{self, CounterBackend, CounterRef};
use hwcprobe::identity;
use hwcprobe::metadata::Metadata;
use hwcprobe::runtime::Runtime;
use hwcprobe::selection::SelectionIndex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_backend(arg: Option<BackendArg>) -> Result<Arc<dyn CounterBackend>> {
    let kind = match arg {
        None => counters::BackendKind::default(),
        Some(arg) => match arg.kind() {
            Some(kind) => kind,
            None => anyhow::bail!(
                "backend `{:?}` is not compiled in (enable the `perf` feature)",
                arg
            ),
        },
    };
    counters::open_backend(kind).context("Failed to initialize counter backend")
}

fn format_id(id: u64, as_hex: bool) -> String {
    if as_hex {
        hex::encode(id.to_be_bytes())
    } else {
        id.to_string()
    }
}

fn print_id(entity: IdCommand, as_hex: bool, backend: Option<BackendArg>) -> Result<()> {
    let id = match entity {
        IdCommand::Function { linkage_name } => identity::function_id(&linkage_name),
        IdCommand::Region {
            file,
            start_line,
            end_line,
            counters,
        } => {
            // Identity uses canonical names, so resolve through the backend
            let backend = open_backend(backend)?;
            let names = counters
                .iter()
                .map(|name| {
                    let counter = backend.resolve(name)?;
                    backend.counter_name(counter).map(str::to_string)
                })
                .collect::<Result<Vec<_>, _>>()
                .context("Invalid region counter")?;
            identity::region_id(
                &file,
                start_line,
                end_line,
                names.iter().map(String::as_str),
            )
        }
    };
    println!("{}", format_id(id, as_hex));
    Ok(())
}

fn print_counters(backend: &dyn CounterBackend) {
    println!("Counters ({} backend):", backend.backend_name());
    for info in backend.counters() {
        println!(
            "  {:<14} {:<26} {}",
            info.name, info.short_description, info.long_description
        );
    }
}

fn check_selection(path: &std::path::Path, backend: &dyn CounterBackend) -> Result<()> {
    let selection = SelectionIndex::from_file(path, backend)
        .with_context(|| format!("Invalid selection: {}", path.display()))?;

    let counters = selection
        .default_counters()
        .iter()
        .map(|counter| backend.counter_name(*counter).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;

    println!("Selection OK: {}", path.display());
    println!("  counters:  {}", counters.join(", "));
    println!("  functions: {}", selection.len());
    for entry in selection.entries() {
        println!("    {}", entry.entity_name);
    }
    Ok(())
}

fn build_blob(
    selection: &std::path::Path,
    manifest: &std::path::Path,
    output: &std::path::Path,
    backend: Arc<dyn CounterBackend>,
) -> Result<()> {
    let selection = SelectionIndex::from_file(selection, backend.as_ref())
        .with_context(|| format!("Invalid selection: {}", selection.display()))?;
    let manifest = DiscoveryManifest::from_file(manifest)?;

    let mut catalog = DescriptorCatalog::new(backend, selection);
    let (functions, regions) = catalog.ingest(&manifest)?;
    hwcprobe::metadata::write_blob(&catalog, output)?;

    eprintln!(
        "Wrote {} function and {} region descriptors to {}",
        functions,
        regions,
        output.display()
    );
    Ok(())
}

fn dump_blob(path: &std::path::Path, json: bool) -> Result<()> {
    let metadata = Metadata::read_file(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("functions: {}", metadata.functions.len());
    for f in &metadata.functions {
        let qualified = if f.qualified_name.is_empty() {
            String::new()
        } else {
            format!(" ({})", f.qualified_name)
        };
        println!(
            "  {:>20}  {}{}  counters={}",
            f.id,
            f.source_name,
            qualified,
            f.counters.len()
        );
    }
    println!("regions: {}", metadata.regions.len());
    for r in &metadata.regions {
        println!(
            "  {:>20}  {}:{}-{}  counters={}",
            r.id,
            r.file,
            r.start_line,
            r.end_line,
            r.counters.len()
        );
    }
    Ok(())
}

/// One interval: enter, record one event per counter, exit
fn replay_interval(
    scope: hwcprobe::runtime::Result<hwcprobe::stats::Scope<'_>>,
    counters: &[CounterRef],
    backend: &SimulatedBackend,
) -> Result<()> {
    let _scope = scope?;
    for counter in counters {
        backend.tick_ref(*counter, 1)?;
    }
    Ok(())
}

fn replay_blob(path: &std::path::Path, calls: u64, arg: Option<BackendArg>) -> Result<()> {
    if arg.is_some_and(|arg| arg != BackendArg::Simulated) {
        anyhow::bail!("replay only runs on the simulated backend");
    }
    let metadata = Metadata::read_file(path)?;
    let backend = SimulatedBackend::new();
    let config = RuntimeConfig::from_env();
    if config.destination.is_none() {
        eprintln!("{} is not set; no report will be written", OUTPUT_ENV);
    }
    let runtime = Runtime::new(metadata.clone(), Arc::new(backend.clone()), config)?;

    // duplicate records share the first one's unit
    let mut seen = HashSet::new();
    for record in &metadata.functions {
        if !seen.insert(record.id) {
            continue;
        }
        for _ in 0..calls {
            replay_interval(
                runtime.try_function_scope(record.id),
                &record.counters,
                &backend,
            )?;
        }
    }
    seen.clear();
    for record in &metadata.regions {
        if !seen.insert(record.id) {
            continue;
        }
        for _ in 0..calls {
            replay_interval(
                runtime.try_region_scope(record.id),
                &record.counters,
                &backend,
            )?;
        }
    }

    runtime.finish().context("Failed to write report")
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match args.command {
        Command::Id { entity, hex } => print_id(entity, hex, args.backend),
        Command::Counters => {
            let backend = open_backend(args.backend)?;
            print_counters(backend.as_ref());
            Ok(())
        }
        Command::Check { selection } => {
            let backend = open_backend(args.backend)?;
            check_selection(&selection, backend.as_ref())
        }
        Command::Build {
            selection,
            manifest,
            output,
        } => {
            let backend = open_backend(args.backend)?;
            build_blob(&selection, &manifest, &output, backend)
        }
        Command::Dump { blob, json } => dump_blob(&blob, json),
        Command::Replay { blob, calls } => replay_blob(&blob, calls, args.backend),
    }
}
