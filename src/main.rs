mod cli;
mod output;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use humansize::{BINARY, format_size};
use serde_json::json;
use std::path::Path;
use std::process::ExitCode;

use cli::Cli;
use multiextract::{ExtractError, Extractor, FileEntry, MiniMagic};
use output::print_line;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            let hit_limit = e
                .downcast_ref::<ExtractError>()
                .is_some_and(|e| e.limit_kind().is_some());
            if hit_limit {
                eprintln!("{}", "Extraction stopped by a resource limit.".yellow());
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let extractor = Extractor::new(cli.config());
    for path in &cli.files {
        if cli.detect {
            detect(path, cli.json)?;
        } else {
            list(&extractor, path, cli)?;
        }
    }
    Ok(())
}

fn detect(path: &Path, as_json: bool) -> Result<()> {
    let mut entry =
        FileEntry::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let archive_type = MiniMagic::detect(&mut entry);
    if as_json {
        print_line!(
            "{}",
            json!({ "path": path.display().to_string(), "type": archive_type.as_str() })
        );
    } else {
        print_line!("{}: {}", path.display(), archive_type.to_string().cyan());
    }
    Ok(())
}

fn list(extractor: &Extractor, path: &Path, cli: &Cli) -> Result<()> {
    // Parallel runs finish before the first leaf is available
    let spinner = cli
        .parallel
        .then(|| ui::create_spinner(&format!("Extracting {}...", path.display())));
    let result = extractor.extract_file(path, cli.parallel);
    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }
    let mut extraction = result.with_context(|| format!("Failed to extract {}", path.display()))?;

    let mut count = 0u64;
    let mut bytes = 0u64;
    for leaf in extraction.by_ref() {
        let leaf = leaf.with_context(|| format!("Failed to extract {}", path.display()))?;
        count += 1;
        bytes += leaf.len();
        if cli.json {
            print_line!(
                "{}",
                json!({
                    "path": leaf.full_path(),
                    "name": leaf.name,
                    "size": leaf.len(),
                    "depth": leaf.depth,
                })
            );
        } else {
            print_line!(
                "{:>10}  {:>2}  {}",
                format_size(leaf.len(), BINARY),
                leaf.depth,
                leaf.full_path()
            );
        }
    }

    for skipped in extraction.take_branch_errors() {
        eprintln!(
            "{} {}: {}",
            "Skipped:".yellow().bold(),
            skipped.path,
            skipped.error
        );
    }
    if !cli.json {
        let stats = extraction.stats();
        eprintln!(
            "{}",
            format!(
                "{count} files, {} in leaves ({} extracted, max depth {}) in {:.2?}",
                format_size(bytes, BINARY),
                format_size(stats.total_bytes, BINARY),
                stats.max_depth,
                stats.elapsed
            )
            .dimmed()
        );
    }
    Ok(())
}
