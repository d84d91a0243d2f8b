use clap::Parser;
use ext2img::commands::{parse_args, link, run_session, SessionArgs};

/// Creates a hard or symbolic link inside an ext2 image
#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    /// Make a symbolic link instead of a hard link
    #[arg(short)]
    s: bool,

    /// Existing absolute path
    source: String,

    /// Absolute path of the new link
    target: String,
}

fn main() {
    let args: Cli = parse_args();
    let code = run_session(&args.session, "ext2_ln", true, |img| {
        link(img, &args.source, &args.target, args.s)
    });
    std::process::exit(code);
}
