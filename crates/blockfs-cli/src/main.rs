use std::error::Error;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use blockfs_engine::format::format;
use blockfs_engine::Filesystem;
use clap::{Parser, Subcommand};
use log::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format a fresh image
    Fmt {
        /// Path to the image file
        #[arg(long, default_value = "sample.dat")]
        image: PathBuf,

        /// Image size in megabytes
        #[arg(long, default_value_t = 10)]
        size_mb: u64,
    },
    /// Run per-worker command scripts against an image
    Run {
        /// Number of worker threads
        workers: usize,

        /// Path to the image file
        #[arg(long, default_value = "sample.dat")]
        image: PathBuf,

        /// Master script duplicated to each worker
        #[arg(long, default_value = "input.txt")]
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Fmt { image, size_mb } => {
            let sb = format(&image, size_mb)?;
            println!(
                "Formatted {} with {} blocks.",
                image.display(),
                sb.total_blocks
            );
        }
        Commands::Run {
            workers,
            image,
            input,
        } => {
            run_workers(&image, &input, workers)?;
            println!("All workers completed.");
        }
    }

    Ok(())
}

/// Duplicates the master script into `input_thread{i}.txt` per worker, runs
/// one session per worker thread against the shared image, and joins them.
fn run_workers(image: &Path, input: &Path, workers: usize) -> Result<(), Box<dyn Error>> {
    let fs = Arc::new(Filesystem::mount(image)?);
    let dir = input.parent().unwrap_or(Path::new("")).to_path_buf();

    let mut scripts = Vec::with_capacity(workers);
    for id in 0..workers {
        let script = dir.join(format!("input_thread{id}.txt"));
        fs::copy(input, &script)?;
        info!("created {} from {}", script.display(), input.display());
        scripts.push(script);
    }

    let handles: Vec<_> = scripts
        .into_iter()
        .enumerate()
        .map(|(id, script)| {
            let fs = Arc::clone(&fs);
            let output = dir.join(format!("output_thread{id}.txt"));
            thread::spawn(move || worker(&fs, id, &script, &output))
        })
        .collect();

    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("worker failed: {e}"),
            Err(_) => error!("worker panicked"),
        }
    }
    Ok(())
}

/// Dispatches the worker's script line by line, writing one status per
/// command. Blank and `#` comment lines are skipped.
fn worker(fs: &Arc<Filesystem>, id: usize, script: &Path, output: &Path) -> std::io::Result<()> {
    let input = BufReader::new(File::open(script)?);
    let mut out = BufWriter::new(File::create(output)?);
    let mut session = fs.session();

    for line in input.lines() {
        let line = line?;
        let command = line.trim();
        if command.is_empty() || command.starts_with('#') {
            continue;
        }
        let status = session.execute_command(command);
        writeln!(out, "{status}")?;
    }
    out.flush()?;
    info!("worker {id} finished");
    Ok(())
}
