use std::path::PathBuf;

use clap::Parser;
use ext2img::commands::{parse_args, copy_in, run_session, SessionArgs};

/// Copies a file from the host into an ext2 image
#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    /// File on the host
    source: PathBuf,

    /// Absolute destination path (or directory) inside the image
    target: String,
}

fn main() {
    let args: Cli = parse_args();
    let code = run_session(&args.session, "ext2_cp", true, |img| {
        copy_in(img, &args.source, &args.target).map(|_| ())
    });
    std::process::exit(code);
}
