//! CLI entry point for `mkfs_ext2`

use std::path::PathBuf;

use clap::Parser;
use ext2img::commands::parse_args;
use ext2img::{config::Config, logger, mkfs};

/// Formats a new 128 KiB ext2 image
#[derive(Parser)]
struct Cli {
    /// Where to write the image (replaced if it exists)
    image: PathBuf,

    /// Optional config.ini
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Volume label, overriding the config
    #[arg(short = 'L', long)]
    label: Option<String>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args: Cli = parse_args();

    let cfg = match Config::load_or_default(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("mkfs_ext2: {}", e);
            std::process::exit(libc::EXIT_FAILURE);
        }
    };
    logger::init(logger::bump(cfg.log_level, args.verbose));

    let mut opts = cfg.format_options();
    if let Some(label) = args.label {
        opts.volume_name = label;
    }

    if let Err(e) = mkfs::run_mkfs(&args.image, &opts) {
        eprintln!("mkfs_ext2: {}", e);
        std::process::exit(e.errno());
    }
    println!("ext2 image created at {}", args.image.display());
}
