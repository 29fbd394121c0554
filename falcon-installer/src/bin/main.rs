use clap::Parser;
use falcon_installer::cli::{Cli, CliError};
use falcon_installer::context::Context;
use falcon_installer::logs;
use falcon_installer::pipeline::Pipeline;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logs::try_init(cli.log_level) {
        eprintln!("Failed to initialize logging: {err}");
        return CliError::from(err).into();
    }

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            err.into()
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let config = cli.installer_config()?;

    let context = Context::new();
    create_shutdown_signal_handler(context.clone())?;

    let pipeline = Pipeline::try_from_config(config, context)?;
    match pipeline.run(&cli.credentials()) {
        Ok(report) => {
            if let Some(outcome) = &report.install {
                println!("{}", outcome.output);
            }
            info!(
                sensor = %report.build.name,
                version = %report.build.version,
                path = %report.artifact.path().display(),
                ccid = %report.tenant,
                "Falcon sensor provisioning finished"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!("{err}");
            Ok(err.into())
        }
    }
}

/// Cancels the run on SIGINT/SIGTERM. Stages stop at their next check and clean up.
fn create_shutdown_signal_handler(context: Context) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("Received a termination signal, cancelling the run");
        context.cancel();
    })
    .inspect_err(|e| error!("Could not set signal handler: {e}"))
}
