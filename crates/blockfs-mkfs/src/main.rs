use std::error::Error;
use std::path::PathBuf;

use blockfs_disk::BLOCK_SIZE;
use blockfs_engine::format::format;
use clap::Parser;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to the image file
    #[arg(short, long, default_value = "sample.dat")]
    image: PathBuf,

    /// Image size in megabytes
    #[arg(short, long, default_value_t = 10)]
    size_mb: u64,

    /// Overwrite an existing image
    #[arg(short, long)]
    force: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();

    if cli.image.exists() && !cli.force {
        eprintln!(
            "{} already exists; pass --force to overwrite",
            cli.image.display()
        );
        std::process::exit(1);
    }

    println!(
        "Formatting {} ({} MB)...",
        cli.image.display(),
        cli.size_mb
    );
    let sb = format(&cli.image, cli.size_mb)?;
    println!(
        "Format complete: {} blocks of {} bytes, {} inodes.",
        sb.total_blocks, BLOCK_SIZE, sb.total_inodes
    );

    Ok(())
}
