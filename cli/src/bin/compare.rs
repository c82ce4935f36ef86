//! compare - report every difference between two files or directory trees.

use clap::Parser;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use treemirror_cli::{error_summary, init_tracing, resolve_input_path, working_directory, ConsoleSink};
use treemirror_engine::{compare_trees, AbortFlag, CompareOptions, CompareStatus};

/// compare - item-by-item comparison of two trees
#[derive(Parser, Debug)]
#[command(name = "compare")]
#[command(version)]
#[command(about = "Compare two files or directory trees, including their metadata")]
struct Args {
    /// Ignore creation/modification dates when comparing items
    #[arg(short = 'd')]
    ignore_dates: bool,

    /// Ignore finder info when comparing items
    #[arg(short = 'f')]
    ignore_finder_info: bool,

    /// Summarize differences without going into detail
    #[arg(short = 's')]
    summarize: bool,

    /// Worker threads (0 = one per CPU)
    #[arg(long, value_name = "N", default_value_t = 0)]
    jobs: usize,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,

    /// First item
    path_1: PathBuf,

    /// Second item
    path_2: PathBuf,
}

fn main() {
    init_tracing();
    let args = Args::parse();

    let exit_code = match run_cli(&args) {
        Ok(CompareStatus::Success) => 0,
        Ok(_) => 1,
        Err(msg) => {
            println!("{}", msg);
            1
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<CompareStatus, String> {
    let working_dir = working_directory();
    let path1 = resolve_input_path(&args.path_1, working_dir.as_deref())
        .ok_or_else(|| format!("compare: Cannot resolve path: <{}>", args.path_1.display()))?;
    let path2 = resolve_input_path(&args.path_2, working_dir.as_deref())
        .ok_or_else(|| format!("compare: Cannot resolve path: <{}>", args.path_2.display()))?;

    check_exists(&path1, 1, &args.path_1)?;
    check_exists(&path2, 2, &args.path_2)?;

    let options = CompareOptions::default()
        .with_ignore_dates(args.ignore_dates)
        .with_ignore_finder_info(args.ignore_finder_info)
        .with_workers(args.jobs);
    let sink = ConsoleSink::new()
        .with_summarize(args.summarize)
        .with_json(args.json);

    let status = compare_trees(&path1, &path2, &options, &sink, &AbortFlag::new())
        .map_err(|e| format!("compare: {}", e))?;

    if !args.json {
        print!("{}", error_summary(&sink.errors(), "-----"));
    }
    Ok(status)
}

fn check_exists(path: &Path, index: u8, as_given: &Path) -> Result<(), String> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(format!(
            "compare: Item {} doesn't exist at path: <{}>",
            index,
            as_given.display()
        )),
        Err(e) => Err(format!("compare: Cannot access item {} at <{}>: {}", index, path.display(), e)),
    }
}
