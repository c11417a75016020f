//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "method-tracer",
    about = "Instrument JVM class files with method tracing and timing probes",
    after_help = "\
FILTERS:
    com.example.Foo          every method of a class
    com.example.Foo::bar     one method of a class
    ::bar                    a method name in any class
    @com.example.Traced      methods annotated, or in a class annotated

EXAMPLES:
    method-tracer --timing com.example.Foo Foo.class
    method-tracer --trace ::run --output out/ build/classes/*.class
    method-tracer --config filters.json --events events.jsonl *.class"
)]
pub struct Args {
    /// Class files to load
    #[arg(value_name = "CLASS_FILES", required = true)]
    pub class_files: Vec<PathBuf>,

    /// Trace methods matching FILTER (repeatable)
    #[arg(long = "trace", value_name = "FILTER")]
    pub trace: Vec<String>,

    /// Time methods matching FILTER (repeatable)
    #[arg(long = "timing", value_name = "FILTER")]
    pub timing: Vec<String>,

    /// JSON file with "trace" and "timing" filter lists
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write rewritten class files to DIR
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Write events as JSON lines to FILE (default: stdout)
    #[arg(long, value_name = "FILE")]
    pub events: Option<PathBuf>,

    /// Load classes as the bootstrap loader, applying the exclusion list
    #[arg(long)]
    pub bootstrap: bool,

    /// Suppress the instrumentation report
    #[arg(short, long)]
    pub quiet: bool,
}
