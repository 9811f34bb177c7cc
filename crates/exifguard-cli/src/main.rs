// File: crates/exifguard-cli/src/main.rs

use anyhow::{Context, Result, bail};
use clap::Parser;
use exifguard_core::{
    Batch, BatchConfig, ProcessingState, RawImage, TagReport, extract, scrubber_for,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// View and remove camera, GPS and timestamp metadata from JPEG photos.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log what the parser is doing
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// View metadata for a file
    View {
        /// The path to the file
        #[arg(required = true)]
        file_path: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove metadata from a file
    Clean {
        /// The path to the file
        #[arg(required = true)]
        file_path: PathBuf,

        /// Overwrite the file in-place
        #[arg(short, long)]
        in_place: bool,
    },
    /// Remove metadata from many files at once
    Batch {
        /// The files to clean
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory that receives the cleaned files
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Prefix for every cleaned file name
        #[arg(short, long, default_value = "clean_")]
        prefix: String,

        /// Maximum number of files cleaned at the same time
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

/// Declared content type, guessed from the file extension.
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg" | "jpe" | "jfif") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic" | "heif") => "image/heic",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// File name of `path`, suffixed with `-1`, `-2`, ... when an earlier input
/// already claimed it, so cleaned outputs never overwrite each other.
fn unique_name(path: &Path, taken: &mut HashSet<String>) -> String {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    if taken.insert(name.clone()) {
        return name;
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|s| s.to_str());
    (1..)
        .map(|n| match ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        })
        .find(|candidate| taken.insert(candidate.clone()))
        .unwrap_or(name)
}

async fn load(path: &Path) -> Result<RawImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(RawImage::new(bytes, content_type_for(path)))
}

/// Loads every input into `batch`. Files that cannot be read are reported and
/// left out; returns how many there were.
async fn add_inputs(batch: &mut Batch, files: &[PathBuf]) -> usize {
    let mut taken = HashSet::new();
    let mut unreadable = 0;
    for path in files {
        match load(path).await {
            Ok(image) => {
                batch.add(unique_name(path, &mut taken), image);
            }
            Err(err) => {
                eprintln!("Skipping {}: {err:#}", path.display());
                unreadable += 1;
            }
        }
    }
    unreadable
}

fn print_report(path: &Path, report: &TagReport) {
    if report.is_empty() {
        println!("No metadata found in {}.", path.display());
        return;
    }
    println!("Metadata for {}:", path.display());
    if let Some(make) = report.make() {
        println!("  Camera make:  {make}");
    }
    if let Some(model) = report.model() {
        println!("  Camera model: {model}");
    }
    if let Some(date) = report.date_time() {
        println!("  Taken:        {date}");
    }
    if let Some(iso) = report.iso() {
        println!("  ISO:          {iso}");
    }
    if let Some(f) = report.f_number() {
        println!("  Aperture:     f/{f:.1}");
    }
    match report.location() {
        Some(p) => println!("  GPS:          {:.6}, {:.6}", p.latitude, p.longitude),
        None => println!("  GPS:          none"),
    }
    for entry in report.entries() {
        println!("  - {}: {} = {}", entry.directory, entry.label(), entry.value);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::View { file_path, json } => {
            let image = load(&file_path).await?;
            let report = extract(&image)
                .with_context(|| format!("Failed to read metadata of {}", file_path.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&file_path, &report);
            }
        }

        Commands::Clean {
            file_path,
            in_place,
        } => {
            let image = load(&file_path).await?;

            // Use the factory function to get the correct scrubber
            let scrubber = scrubber_for(image)?;
            let result = scrubber.scrub()?;

            if result.segments_removed == 0 {
                println!("No metadata found to remove from {}.", file_path.display());
                return Ok(());
            }

            let output_path = if in_place {
                file_path.clone()
            } else {
                let original_name = file_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("file");

                let extension = file_path
                    .extension()
                    .and_then(|s| s.to_str())
                    .unwrap_or("jpg");
                let new_file_name = format!("{}.clean.{}", original_name, extension);
                file_path.with_file_name(new_file_name)
            };

            tokio::fs::write(&output_path, result.cleaned_file_bytes)
                .await
                .with_context(|| {
                    format!("Failed to write cleaned file to {}", output_path.display())
                })?;

            println!(
                "Successfully removed {} metadata segment(s), {} bytes.",
                result.segments_removed, result.bytes_removed
            );
            println!("Cleaned file saved to: {}", output_path.display());
        }

        Commands::Batch {
            files,
            out_dir,
            prefix,
            workers,
        } => {
            let mut config = BatchConfig {
                output_prefix: prefix,
                ..BatchConfig::default()
            };
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let mut batch = Batch::new(config);

            let unreadable = add_inputs(&mut batch, &files).await;

            batch.analyze_pending();
            for record in batch.records() {
                match (record.state(), record.report()) {
                    (ProcessingState::Idle, Some(report)) if report.has_gps() => {
                        println!("{}: carries GPS position", record.name());
                    }
                    (ProcessingState::Error, _) => {
                        if let Some(err) = record.error() {
                            eprintln!("{}: {}", record.name(), err);
                        }
                    }
                    _ => {}
                }
            }

            let output = batch.clean_all().await;

            tokio::fs::create_dir_all(&out_dir)
                .await
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;
            for cleaned in &output.cleaned {
                let target = out_dir.join(&cleaned.name);
                tokio::fs::write(&target, &cleaned.bytes[..])
                    .await
                    .with_context(|| format!("Failed to write {}", target.display()))?;
                log::debug!("wrote {} ({} bytes)", target.display(), cleaned.bytes.len());
            }

            println!(
                "Cleaned {} of {} file(s) into {}.",
                output.cleaned.len(),
                files.len(),
                out_dir.display()
            );
            for failed in &output.failed {
                eprintln!("Could not clean {}: {}", failed.name, failed.reason);
            }
            let failures = output.failed.len() + unreadable;
            if failures > 0 {
                bail!("{failures} file(s) could not be cleaned");
            }
        }
    }

    Ok(())
}
