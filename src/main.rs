mod cmd;

use clap::Parser;
use cmd::{Cli, Command};

fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Command::Refresh(args) => cmd::refresh::run(&cli, args),
        Command::Find(args) => cmd::find::run(&cli, args),
        Command::Revisions(args) => cmd::revisions::run(&cli, args),
        Command::Status(args) => cmd::status::run(&cli, args),
    }
}
