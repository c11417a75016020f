//! # method-tracer - Main Entry Point
//!
//! Loads class files into an in-process runtime, warms the tracer up, applies
//! the trace and timing filters, reports what was instrumented, optionally
//! writes the rewritten classes, and flushes timing events as JSON lines.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use method_tracer::cli::{Args, FilterConfig};
use method_tracer::domain::{ClassLoader, Modification};
use method_tracer::export::JsonLinesSink;
use method_tracer::runtime::OfflineRuntime;
use method_tracer::tracer::{PlatformTracer, TracerState};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Loader handle for classes read from the command line.
const APP_LOADER: ClassLoader = ClassLoader::Defined(1);

/// Bad invocation that clap cannot detect on its own.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

fn main() {
    env_logger::init();
    let args = Args::parse();
    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<UsageError>().is_some() {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Command-line filters first, then the config file's.
fn load_filters(args: &Args) -> Result<FilterConfig> {
    let mut filters = FilterConfig { trace: args.trace.clone(), timing: args.timing.clone() };
    if let Some(ref path) = args.config {
        filters.merge(FilterConfig::from_file(path)?);
    }
    if filters.is_empty() {
        return Err(UsageError(
            "No filters given.\n\n\
             Use --trace <FILTER>, --timing <FILTER> or --config <FILE>.\n\
             Run 'method-tracer --help' for the filter syntax"
                .to_string(),
        )
        .into());
    }
    for (modification, text) in filters.invalid() {
        warn!("Ignoring invalid {modification} filter \"{text}\"");
    }
    Ok(filters)
}

fn run(args: &Args) -> Result<()> {
    let filters = load_filters(args)?;

    let output: Box<dyn Write + Send> = match args.events {
        Some(ref path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create event file {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    let sink = Arc::new(JsonLinesSink::new(output));
    let runtime = Arc::new(OfflineRuntime::new());
    let tracer = PlatformTracer::new(runtime.clone(), sink.clone());

    let loader = if args.bootstrap { ClassLoader::Bootstrap } else { APP_LOADER };
    for path in &args.class_files {
        let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let id = runtime
            .define_class(bytes, loader, &tracer)
            .with_context(|| format!("Failed to load class file {}", path.display()))?;
        info!("Loaded {} as class {id}", path.display());
    }

    if let Err(e) = tracer.initialize() {
        warn!("Continuing without instrumentation: {e}");
    }
    if tracer.state() == TracerState::Unavailable {
        anyhow::bail!("Method tracing is unavailable, see the log for details");
    }
    tracer.set_filters(Modification::TRACING, &filters.trace)?;
    tracer.set_filters(Modification::TIMING, &filters.timing)?;

    if !args.quiet {
        print_report(&runtime);
    }
    if let Some(ref dir) = args.output {
        write_classes(&runtime, dir)?;
    }

    let emitted = tracer.emit_timing();
    let written = sink.finish().context("Failed to write events")?;
    info!("Emitted {emitted} timing event(s), {written} event(s) written in total");
    Ok(())
}

/// Summary of instrumented methods on stderr, keeping stdout for events.
fn print_report(runtime: &OfflineRuntime) {
    let methods = runtime.modified_methods();
    let rewritten = runtime.class_ids().into_iter().filter(|id| runtime.is_modified(*id)).count();
    eprintln!("{} method(s) selected, {rewritten} class(es) rewritten", methods.len());
    for method in &methods {
        let status = if runtime.is_modified(method.class_id()) { "" } else { "  (unchanged)" };
        let modification = method.modification.to_string();
        eprintln!("  {:<60} {modification:<15} {}{status}", method.name, method.id);
    }
}

fn write_classes(runtime: &OfflineRuntime, dir: &Path) -> Result<()> {
    for id in runtime.class_ids() {
        let (Some(name), Some(bytes)) = (runtime.class_name(id), runtime.class_bytes(id)) else {
            continue;
        };
        let path = dir.join(format!("{name}.class"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {}", path.display());
    }
    Ok(())
}
