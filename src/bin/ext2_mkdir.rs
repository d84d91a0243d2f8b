use clap::Parser;
use ext2img::commands::{parse_args, make_dir, run_session, SessionArgs};

/// Creates a directory inside an ext2 image
#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    /// Absolute path of the new directory
    path: String,
}

fn main() {
    let args: Cli = parse_args();
    let code = run_session(&args.session, "ext2_mkdir", true, |img| {
        make_dir(img, &args.path).map(|_| ())
    });
    std::process::exit(code);
}
