use std::{path::Path, process::ExitCode};

use clap::Parser;
use log::error;

use formulate::{
    cli::{
        args::{CliArgs, Command},
        command_handlers::{do_list_options, do_write_plan},
    },
    Formulate,
};

fn run() -> anyhow::Result<()> {
    let cli_args: CliArgs = CliArgs::parse();

    let mut builder = Formulate::builder().formula_file_name(&cli_args.formula);
    if let Some(prefix) = &cli_args.prefix {
        builder = builder.prefix(prefix);
    }
    if let Some(cellar) = &cli_args.cellar {
        builder = builder.cellar(cellar);
    }
    let formulate = builder.try_build()?;

    match cli_args.cmd {
        Command::Resolve { selection, output } => {
            let plan = formulate.resolve(&selection.selection(), &selection.probes.overrides())?;
            do_write_plan(&plan, output.as_deref().map(Path::new))
        }
        Command::Options => {
            print!("{}", do_list_options(formulate.options()));
            Ok(())
        }
        Command::Probe { probes } => {
            let snapshot = formulate.probe(&probes.overrides())?;
            print!("{}", snapshot.to_string()?);
            Ok(())
        }
        Command::Prepare {
            source_directory,
            selection,
        } => {
            formulate.prepare(
                &selection.selection(),
                &selection.probes.overrides(),
                &source_directory,
            )?;
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
