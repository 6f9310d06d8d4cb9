use chrono::Local;
use console::style;
use env_logger::{Builder, Env};
use log::Level;
use std::io::Write;

/// Module a record came from, without the crate prefix (`controller`, `accounts::linux`)
fn short_target(target: &str) -> &str {
    target
        .strip_prefix("nbfleet::")
        .or_else(|| target.strip_prefix("nbfleet"))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(target)
}

/// Lines read `12:04:31 INFO  controller  Created account 'alice'`.
///
/// Default level is info, `-v` raises it to debug, and `RUST_LOG` overrides both.
pub fn init_logger(verbose: bool) {
    let env = Env::default().filter_or("RUST_LOG", if verbose { "debug" } else { "info" });

    Builder::from_env(env)
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => style("ERROR").red().bold(),
                Level::Warn => style("WARN ").yellow().bold(),
                Level::Info => style("INFO ").green(),
                Level::Debug => style("DEBUG").cyan(),
                Level::Trace => style("TRACE").dim(),
            };
            writeln!(
                buf,
                "{} {} {:<11} {}",
                style(Local::now().format("%H:%M:%S")).dim(),
                level,
                style(short_target(record.target())).dim(),
                record.args()
            )
        })
        .init();
}
