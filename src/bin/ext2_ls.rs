use clap::Parser;
use ext2img::commands::{parse_args, list, run_session, SessionArgs};

/// Lists a directory (or names a file) inside an ext2 image
#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    /// Include "." and ".."
    #[arg(short)]
    a: bool,

    /// Absolute path inside the image
    path: String,
}

fn main() {
    let args: Cli = parse_args();
    let code = run_session(&args.session, "ext2_ls", false, |img| {
        for name in list(img, &args.path, args.a)? {
            println!("{}", name);
        }
        Ok(())
    });
    std::process::exit(code);
}
