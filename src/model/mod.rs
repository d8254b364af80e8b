use std::path::PathBuf;

use thiserror::Error;

use crate::patch::PatchParseError;

pub mod formula;
pub mod plan;
pub mod template;

use formula::predicate::PredicateError;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading formula: {0}")]
    IO(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid condition in {rule}: {source}")]
    Predicate {
        rule: String,
        source: PredicateError,
    },
    #[error("Could not read patch `{name}` from {}: {source}", path.display())]
    PatchFile {
        name: String,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Patch `{name}` is not a valid unified diff: {source}")]
    Patch {
        name: String,
        source: PatchParseError,
    },
    #[error("Source checksum `{0}` is not a sha256 hex digest")]
    InvalidChecksum(String),
    #[error("Option `{0}` is declared more than once")]
    DuplicateOption(String),
    #[error("{rule} refers to undeclared option `{option}`")]
    UndeclaredOption { option: String, rule: String },
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
}
