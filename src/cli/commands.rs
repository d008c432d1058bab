//! Command dispatch

use std::io;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use tracing::{debug, instrument};

use crate::application::{Scenario, ScenarioEvent};
use crate::cli::args::{Cli, Commands, ConfigCommands};
use crate::cli::error::{CliError, CliResult};
use crate::cli::output;
use crate::config::{global_config_path, Settings};
use crate::infrastructure::InfraError;

pub fn execute_command(cli: &Cli) -> CliResult<()> {
    match &cli.command {
        Some(Commands::Run { scenario, tree }) => run_scenario(cli.config.as_deref(), scenario, *tree),
        Some(Commands::Config { command }) => config_command(cli.config.as_deref(), command),
        Some(Commands::Completion { shell }) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        None => Err(CliError::Usage("no command given, see --help".into())),
    }
}

#[instrument]
fn run_scenario(config: Option<&Path>, path: &Path, show_tree: bool) -> CliResult<()> {
    let settings = Settings::load(config)?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| InfraError::io(format!("read {}", path.display()), e))?;
    let scenario = Scenario::parse(&content)?;
    debug!(
        "scenario: {} node(s), {} observer(s), {} step(s)",
        scenario.nodes.len(),
        scenario.observers.len(),
        scenario.steps.len()
    );

    let outcome = scenario.run(settings)?;
    for event in &outcome.events {
        match event {
            ScenarioEvent::Delivered { observer, records } => {
                output::header(&format!("{} <- {} record(s)", observer, records.len()));
                records.iter().for_each(|r| output::record(r));
            }
            ScenarioEvent::Taken { observer, records } => {
                output::action("taken", &format!("{} ({} record(s))", observer, records.len()));
                records.iter().for_each(|r| output::record(r));
            }
            ScenarioEvent::Flushed { passes, failures } => {
                output::success(&format!("flush complete after {} pass(es)", passes));
                if *failures > 0 {
                    output::warning(&format!("{} callback(s) failed", failures));
                }
            }
        }
    }
    if show_tree {
        output::header("tree");
        output::info(&outcome.tree);
    }
    Ok(())
}

fn config_command(config: Option<&Path>, command: &ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Show => {
            let settings = Settings::load(config)?;
            output::info(&settings.to_toml()?);
        }
        ConfigCommands::Init { global } => {
            let path = if *global {
                global_config_path()
                    .ok_or_else(|| CliError::Usage("cannot determine config directory".into()))?
            } else {
                PathBuf::from("treewatch.toml")
            };
            if path.exists() {
                return Err(CliError::Usage(format!(
                    "{} already exists",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| InfraError::io(format!("create {}", parent.display()), e))?;
            }
            std::fs::write(&path, Settings::template())
                .map_err(|e| InfraError::io(format!("write {}", path.display()), e))?;
            output::success(&format!("created {}", path.display()));
        }
        ConfigCommands::Path => {
            match global_config_path() {
                Some(path) => output::action("global", &format_path(&path)),
                None => output::warning("cannot determine config directory"),
            }
            match config {
                Some(path) => output::action("local", &format_path(path)),
                None => output::action("local", "(none, pass --config)"),
            }
        }
    }
    Ok(())
}

fn format_path(path: &Path) -> String {
    if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (missing)", path.display())
    }
}
