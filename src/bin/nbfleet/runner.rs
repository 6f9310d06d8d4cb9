use console::style;
use log::{debug, error, info};
use nbfleet::accounts;
use nbfleet::presenter::{self, PresenterState};
use nbfleet::roster::{self, Roster};
use nbfleet::utils;
use nbfleet::{
    AccountProvider, AssumeYes, BatchReport, Config, Confirm, Controller, Executor, FleetError,
    Result, RowOutcome, SystemExecutor,
};
use std::io::{self, BufRead, IsTerminal, Write};

use crate::cli::Commands;

/// Asks on the terminal; anything but an explicit yes declines
pub struct PromptConfirm;

impl Confirm for PromptConfirm {
    fn confirm(&self, question: &str) -> bool {
        print!("{} {} ", style(question).bold(), style("[y/N]").dim());
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(e) => {
                error!("Could not read answer: {}", e);
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Run one command end to end; `Ok(false)` when some row failed
pub fn execute(command: Commands) -> Result<bool> {
    utils::require_root()?;

    let config = Config::load(command.config_path())?;

    let interactive = matches!(command, Commands::Remove { yes: false, .. });
    if interactive && !io::stdin().is_terminal() {
        return Err(FleetError::Usage(
            "remove asks for confirmation; pass --yes when stdin is not a terminal".to_string(),
        ));
    }

    let provider = accounts::for_host()?;
    debug!("Using {} account provider", provider.platform());
    let confirm: &dyn Confirm = if interactive { &PromptConfirm } else { &AssumeYes };

    let report = run_command(&command, &config, provider.as_ref(), &SystemExecutor, confirm)?;
    print_summary(&report);
    Ok(!report.has_failures())
}

/// Load the roster, run `command` over it and write it back.
///
/// The roster is saved on every path once loaded, including fatal errors, so
/// secrets and ports assigned before the failure are kept.
fn run_command(
    command: &Commands,
    config: &Config,
    accounts: &dyn AccountProvider,
    exec: &dyn Executor,
    confirm: &dyn Confirm,
) -> Result<BatchReport> {
    let user_list = &config.setup.user_list;
    let (mut users, format) = roster::load(user_list)?;
    info!("Loaded {} users from {}", users.len(), user_list.display());

    let controller = Controller::new(config, accounts, exec, confirm);
    let outcome = dispatch(&controller, command, &mut users, |snapshot| {
        roster::save(user_list, snapshot, format)
    });

    let saved = roster::save(user_list, &users, format);
    if let Err(e) = &saved {
        error!("Could not save {}: {}", user_list.display(), e);
    }
    let report = outcome?;
    saved?;
    Ok(report)
}

fn dispatch<F>(
    controller: &Controller<'_>,
    command: &Commands,
    roster: &mut Roster,
    mut persist: F,
) -> Result<BatchReport>
where
    F: FnMut(&Roster) -> Result<()>,
{
    match command {
        Commands::Setup { .. } => controller.setup(roster),
        Commands::Send { .. } => Ok(controller.send(roster)),
        Commands::Launch { .. } => {
            let mut report = controller.launch(roster)?;
            // Kernels are running now; record their ports before blocking.
            persist(roster)?;
            let state = PresenterState::from_roster(roster, controller.config());
            if let Err(e) = presenter::serve(state) {
                error!("{}", e);
                report.errors.push(e.to_string());
            }
            Ok(report)
        }
        Commands::Shutdown { .. } => Ok(controller.shutdown(roster)),
        Commands::Retrieve { .. } => Ok(controller.retrieve(roster)),
        Commands::Remove { keep_files, .. } => {
            let retrieve_first = controller.config().shutdown.retrieve_before_remove && !keep_files;
            Ok(controller.remove(roster, retrieve_first))
        }
    }
}

fn outcome_line(outcome: &RowOutcome) -> String {
    match &outcome.error {
        None => format!(
            "  {} {} {}",
            style("ok").green().bold(),
            outcome.username,
            style(outcome.reached).dim()
        ),
        Some(e) => format!(
            "  {} {} {} {}",
            style("failed").red().bold(),
            outcome.username,
            style(format!("(stopped at {})", outcome.reached)).dim(),
            e
        ),
    }
}

fn print_summary(report: &BatchReport) {
    for outcome in &report.outcomes {
        println!("{}", outcome_line(outcome));
    }
    for e in &report.errors {
        println!("  {} {}", style("failed").red().bold(), e);
    }

    let failed = report.failed().count() + report.errors.len();
    let failed_styled = if failed == 0 {
        style(failed).green().bold()
    } else {
        style(failed).red().bold()
    };
    println!(
        "{}={} | {}={} | {}={}",
        style("command").dim(),
        style(report.command).bold(),
        style("succeeded").dim(),
        style(report.succeeded().count()).bold(),
        style("failed").dim(),
        failed_styled,
    );
}
