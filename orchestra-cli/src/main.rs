mod cli;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Sequential(mut args) => {
            args.workers = Some(1);
            cli::run(args)?
        }
        Commands::Parallel(args) => cli::run(args)?,
        Commands::Sprint(args) => cli::run_sprint(args)?,
    };

    std::process::exit(exit_code);
}
