// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bastion command-line host.
//
//   bastion [report]                  assessment and health as JSON
//   bastion incidents                 incident statistics as JSON
//   bastion export <csv|json> [FILE]  incident export; with FILE, sealed
//                                     under $BASTION_EXPORT_PASSPHRASE
//   bastion lockdown                  emergency lockdown
//   bastion config                    write the effective settings to
//                                     security.json

mod services;

use std::process::ExitCode;

use bastion_core::error::{BastionError, Result};
use bastion_security::ExportFormat;

use services::app_services::AppServices;

const PASSPHRASE_VAR: &str = "BASTION_EXPORT_PASSPHRASE";

#[derive(Debug, PartialEq)]
enum Command {
    Report,
    Incidents,
    Export {
        format: ExportFormat,
        sealed_to: Option<String>,
    },
    Lockdown,
    WriteConfig,
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args.first().map(String::as_str) {
        None | Some("report") => Ok(Command::Report),
        Some("incidents") => Ok(Command::Incidents),
        Some("lockdown") => Ok(Command::Lockdown),
        Some("config") => Ok(Command::WriteConfig),
        Some("export") => {
            let format = args
                .get(1)
                .ok_or_else(|| BastionError::InvalidConfig("export needs a format".into()))?
                .parse()?;
            Ok(Command::Export {
                format,
                sealed_to: args.get(2).cloned(),
            })
        }
        Some(other) => Err(BastionError::InvalidConfig(format!(
            "unknown command {other:?}"
        ))),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Bastion starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            tracing::error!(error = %e, "invalid arguments");
            return ExitCode::from(2);
        }
    };

    let svc = match AppServices::init().await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "persistent key store failed; using in-memory fallback");
            match AppServices::fallback().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "security subsystem could not start");
                    return ExitCode::FAILURE;
                }
            }
        }
    };

    match run(&svc, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(svc: &AppServices, command: Command) -> Result<()> {
    let manager = svc.manager();
    match command {
        Command::Report => {
            let report = svc.posture_report().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Incidents => {
            let stats = manager.incident_statistics().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Export {
            format,
            sealed_to: None,
        } => {
            print!("{}", manager.export_incidents(format).await?);
        }
        Command::Export {
            format,
            sealed_to: Some(path),
        } => {
            let passphrase = std::env::var(PASSPHRASE_VAR).map_err(|_| {
                BastionError::Export(format!("{PASSPHRASE_VAR} is not set"))
            })?;
            let sealed = manager.export_incidents_sealed(format, &passphrase).await?;
            std::fs::write(&path, sealed)?;
            tracing::info!(%path, "sealed export written");
        }
        Command::Lockdown => {
            manager.emergency_lockdown().await?;
            println!("locked");
        }
        Command::WriteConfig => {
            let path = svc.save_config().await?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
