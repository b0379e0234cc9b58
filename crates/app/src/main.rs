mod cli;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if cli::handle_commands(&args)? {
        return Ok(());
    }

    cli::print_help();
    let command = args.get(1).map(String::as_str).unwrap_or("");
    anyhow::bail!("unknown command {command:?}")
}
