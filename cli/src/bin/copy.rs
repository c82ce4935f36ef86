//! copy - copy a file or tree with all its metadata, optionally verifying it.

use clap::Parser;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use treemirror_cli::{
    error_summary, format_elapsed, init_tracing, resolve_input_path, working_directory, ConsoleSink,
};
use treemirror_engine::{
    copy_and_verify, resolve_destination, AbortFlag, CompareStatus, CopyOptions, CopyStatus, EngineError,
};

/// copy - metadata-preserving tree copy
#[derive(Parser, Debug)]
#[command(name = "copy")]
#[command(version)]
#[command(about = "Copy a file or directory tree, preserving metadata and hard links")]
struct Args {
    /// Verify results after copy
    #[arg(short = 'y')]
    verify: bool,

    /// Verbose: also print matching items while verifying
    #[arg(short = 'v')]
    verbose: bool,

    /// Worker threads (0 = one per CPU)
    #[arg(long, value_name = "N", default_value_t = 0)]
    jobs: usize,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,

    /// Item to copy
    source: PathBuf,

    /// Destination path, or an existing directory to copy into
    destination: PathBuf,
}

fn main() {
    init_tracing();
    let args = Args::parse();

    let started = Instant::now();
    let exit_code = match run_cli(&args) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(msg) => {
            println!("{}", msg);
            1
        }
    };

    let caption = if args.verify { "Copy & verify took" } else { "Copy took" };
    println!("{}", format_elapsed(caption, started.elapsed().as_secs()));
    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
///
/// Returns Ok(true) only if the copy (and, with `-y`, its verification)
/// succeeded.
fn run_cli(args: &Args) -> Result<bool, String> {
    let working_dir = working_directory();
    let source = resolve_input_path(&args.source, working_dir.as_deref())
        .ok_or_else(|| format!("copy: Cannot resolve path: <{}>", args.source.display()))?;
    let destination = resolve_input_path(&args.destination, working_dir.as_deref())
        .ok_or_else(|| format!("copy: Cannot resolve path: <{}>", args.destination.display()))?;

    match fs::symlink_metadata(&source) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(format!("copy: Source item doesn't exist at path: <{}>", source.display()))
        }
        Err(e) => return Err(format!("copy: Cannot access source <{}>: {}", source.display(), e)),
    }

    let target = resolve_destination(&source, &destination).map_err(|e| match e {
        EngineError::DestinationNotDirectory { path } if path == destination => format!(
            "copy: Destination path exists and is not a directory, aborting. <{}>.",
            path.display()
        ),
        EngineError::DestinationNotDirectory { path } => format!(
            "copy: Destination path parent exists but is not a directory, aborting. <{}>.",
            path.display()
        ),
        EngineError::DestinationParentNotFound { path } => {
            format!("copy: Destination parent path not found: <{}>", path.display())
        }
        other => format!("copy: {}", other),
    })?;

    let options = CopyOptions::default()
        .with_workers(args.jobs)
        .with_verify(args.verify);
    let abort = AbortFlag::new();

    let copy_sink = ConsoleSink::new().with_json(args.json);
    let verify_sink = ConsoleSink::new()
        .with_json(args.json)
        .with_hide_matches(!args.verbose);
    let outcome = copy_and_verify(&source, &target, &options, &copy_sink, &verify_sink, &abort)
        .map_err(|e| format!("copy: {}", e))?;

    if outcome.copy != CopyStatus::Success {
        if !args.json {
            print!("{}", error_summary(&copy_sink.errors(), "-------"));
        }
        println!("COPY FAILED.");
        return Ok(false);
    }

    if let Some(verified) = outcome.verify {
        if verified != CompareStatus::Success {
            println!("VERIFY FAILED.");
        }
        if !args.json {
            print!("{}", error_summary(&verify_sink.errors(), "-----"));
        }
    }
    Ok(outcome.is_success())
}
