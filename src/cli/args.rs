use clap::{Args, Parser, Subcommand};

use crate::{probe::ProbeSnapshot, resolver::Selection};

/// Resolves build formulae into configure/build plans.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Location of the formula toml file
    #[clap(short, long, default_value = "formula.toml")]
    pub formula: String,
    /// Root install prefix [default: $FORMULATE_PREFIX or /usr/local]
    #[clap(long)]
    pub prefix: Option<String>,
    /// Directory kegs are installed under [default: $FORMULATE_CELLAR or <prefix>/Cellar]
    #[clap(long)]
    pub cellar: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Prints the resolved plan as toml
    Resolve {
        #[clap(flatten)]
        selection: SelectionArgs,
        /// Write the plan to a file instead of stdout
        #[clap(short, long)]
        output: Option<String>,
    },
    /// Lists declared and implicit options
    Options,
    /// Prints the host probe snapshot
    Probe {
        #[clap(flatten)]
        probes: ProbeArgs,
    },
    /// Resolves the formula and patches unpacked sources
    Prepare {
        source_directory: String,
        #[clap(flatten)]
        selection: SelectionArgs,
    },
}

#[derive(Debug, Args)]
pub struct SelectionArgs {
    /// Enable an option, may be repeated
    #[clap(short, long = "enable", value_name = "OPTION")]
    pub enable: Vec<String>,
    /// Disable an option that is on by default, may be repeated
    #[clap(short, long = "disable", value_name = "OPTION")]
    pub disable: Vec<String>,
    /// Build from the HEAD source
    #[clap(long)]
    pub head: bool,
    #[clap(flatten)]
    pub probes: ProbeArgs,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Override a probe result, e.g. `x11-installed=false`
    #[clap(short, long = "probe", value_name = "NAME=BOOL", value_parser = parse_probe)]
    pub probe: Vec<(String, bool)>,
}

impl SelectionArgs {
    pub fn selection(&self) -> Selection {
        let selection = self.enable.iter().cloned().collect::<Selection>();
        self.disable
            .iter()
            .fold(selection, |selection, name| selection.disable(name.as_str()))
            .head(self.head)
    }
}

impl ProbeArgs {
    pub fn overrides(&self) -> ProbeSnapshot {
        self.probe.iter().cloned().collect()
    }
}

fn parse_probe(value: &str) -> Result<(String, bool), String> {
    let (name, flag) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=BOOL, got `{}`", value))?;
    let flag = match flag.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => true,
        "false" | "no" | "0" => false,
        other => return Err(format!("`{}` is not a boolean", other)),
    };
    if name.is_empty() {
        return Err("probe name is empty".to_string());
    }
    Ok((name.to_string(), flag))
}
