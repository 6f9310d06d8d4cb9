//! nbfleet CLI - Provision and tear down per-user notebook sandboxes

mod cli;
mod logging;
mod runner;

use clap::Parser;
use cli::Cli;
use console::style;

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    match runner::execute(cli.command) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}
