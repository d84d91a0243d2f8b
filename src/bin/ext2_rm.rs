use clap::Parser;
use ext2img::commands::{parse_args, remove, run_session, SessionArgs};

/// Removes a file or link (or, with -r, a directory) from an ext2 image
#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    /// Remove directories and their contents
    #[arg(short)]
    r: bool,

    /// Absolute path inside the image
    path: String,
}

fn main() {
    let args: Cli = parse_args();
    let code = run_session(&args.session, "ext2_rm", true, |img| {
        remove(img, &args.path, args.r)
    });
    std::process::exit(code);
}
