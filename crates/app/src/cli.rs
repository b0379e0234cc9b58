use anyhow::{Result, bail};
use clap::Parser;
use movid::tracking::{self, TrackCliArgs};

/// Track hands, face and pose in recorded task videos.
#[derive(Debug, Parser)]
#[command(name = "movid track")]
struct TrackCommand {
    #[command(flatten)]
    args: TrackCliArgs,
}

pub fn handle_commands(args: &[String]) -> Result<bool> {
    match args.get(1).map(|s| s.as_str()) {
        Some("track") => {
            let command = TrackCommand::parse_from(&args[1..]);
            let summary = tracking::run_from_args(command.args)?;
            for (video, err) in summary.failures() {
                eprintln!("FAILED {}: {}", video.display(), err.describe());
            }
            if summary.failed() > 0 {
                bail!(
                    "{} of {} video(s) failed",
                    summary.failed(),
                    summary.runs.len()
                );
            }
            Ok(true)
        }
        None | Some("help" | "--help" | "-h") => {
            print_help();
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub fn print_help() {
    println!("movid - offline landmark tracking for recorded task videos");
    println!();
    println!("Commands:");
    println!("  track   process videos and write annotated copies plus landmark tables");
    println!("  help    show this message");
    println!();
    println!("Run `movid track --help` for the track options.");
}
