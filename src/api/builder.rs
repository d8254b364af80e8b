use std::{env, path::PathBuf};

use crate::{
    config::FormulateConfig,
    model::{formula::Formula, template::Variables},
    Formulate,
};

#[derive(Default)]
pub struct FormulateBuilder {
    // Relative paths are resolved against `root`
    root: Option<PathBuf>,
    formula_file_name: Option<PathBuf>,
    prefix: Option<PathBuf>,
    cellar: Option<PathBuf>,
}

impl FormulateBuilder {
    /// Directory the formula file is looked up in.
    ///
    /// Defaults to the current directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Name of the formula toml file.
    ///
    /// Defaults to `formula.toml`.
    pub fn formula_file_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.formula_file_name = Some(path.into());
        self
    }

    /// Root install prefix, exposed to templates as `%(root)s`.
    ///
    /// Defaults to `$FORMULATE_PREFIX`, then `/usr/local`.
    pub fn prefix(mut self, path: impl Into<PathBuf>) -> Self {
        self.prefix = Some(path.into());
        self
    }

    /// Directory kegs are installed under.
    ///
    /// Defaults to `$FORMULATE_CELLAR`, then `<prefix>/Cellar`.
    pub fn cellar(mut self, path: impl Into<PathBuf>) -> Self {
        self.cellar = Some(path.into());
        self
    }

    pub fn try_build(self) -> anyhow::Result<Formulate> {
        let Self {
            root,
            formula_file_name,
            prefix,
            cellar,
        } = self;
        let root = match root {
            Some(root) => root,
            None => env::current_dir()?,
        };

        let formula_file_name =
            formula_file_name.unwrap_or_else(|| PathBuf::from("formula.toml"));

        let config = FormulateConfig::load()?;
        let cellar = match (cellar, &prefix) {
            (Some(cellar), _) => cellar,
            (None, Some(prefix)) => prefix.join("Cellar"),
            (None, None) => config.cellar,
        };
        let prefix = prefix.unwrap_or(config.prefix);

        let formula = Formula::from_file(&root.join(formula_file_name))?;

        let keg = cellar.join(&formula.name).join(&formula.version);
        let variables = Variables::new()
            .with("root", prefix.to_string_lossy())
            .with("cellar", cellar.to_string_lossy())
            .with("prefix", keg.to_string_lossy())
            .with("name", formula.name.as_str())
            .with("version", formula.version.as_str());

        Ok(Formulate { formula, variables })
    }
}
