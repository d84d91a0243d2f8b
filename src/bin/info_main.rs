//! CLI entry point for `ext2_info`

use clap::Parser;
use ext2img::commands::{parse_args, run_session, SessionArgs};
use ext2img::info;

/// Inspection tool for ext2 images
#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,
}

fn main() {
    let args: Cli = parse_args();
    let code = run_session(&args.session, "ext2_info", false, |img| {
        print!("{}", info::describe(img));
        Ok(())
    });
    std::process::exit(code);
}
