use std::{collections::BTreeMap, path::Path};

use log::{debug, trace};
use serde::Serialize;

use crate::model::{
    formula::{Formula, ProbeSpec},
    template::{UndefinedVariable, Variables},
};

/// Host facts collected once, before resolution starts.
///
/// The resolver only reads a snapshot; it never looks at the host itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProbeSnapshot(BTreeMap<String, bool>);

impl ProbeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: bool) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Runs every probe declared by `formula` against the host.
    pub fn collect(formula: &Formula, variables: &Variables) -> Result<Self, UndefinedVariable> {
        let mut snapshot = BTreeMap::new();
        for (name, spec) in &formula.probes {
            let value = run_probe(spec, variables)?;
            debug!("Probe {} = {}", name, value);
            snapshot.insert(name.clone(), value);
        }
        Ok(ProbeSnapshot(snapshot))
    }

    /// Caller-supplied values win over collected ones.
    pub fn with_overrides(mut self, overrides: &ProbeSnapshot) -> Self {
        for (name, value) in &overrides.0 {
            if self.0.insert(name.clone(), *value).is_some_and(|old| old != *value) {
                debug!("Probe {} overridden to {}", name, value);
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for ProbeSnapshot {
    fn from_iter<T: IntoIterator<Item = (K, bool)>>(iter: T) -> Self {
        ProbeSnapshot(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

fn run_probe(spec: &ProbeSpec, variables: &Variables) -> Result<bool, UndefinedVariable> {
    match spec {
        ProbeSpec::Directory { paths } => {
            for path in paths {
                let path = variables.expand(path)?;
                trace!("Checking directory {}", path);
                if Path::new(&path).is_dir() {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ProbeSpec::Installed { package } => {
            let path = variables.expand(&format!("%(root)s/opt/{}", package))?;
            trace!("Checking installed package at {}", path);
            Ok(Path::new(&path).is_dir())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const FORMULA: &str = r#"
        name = "example"
        version = "1.0"
        [source]
        url = "https://example.com/example-1.0.tar.bz2"
        sha256 = "fb32cdeef812bc2c3bb9e9f48f3cfc75c1e2640f784ef2670a0dbf948e538677"

        [probes.fonts]
        kind = "directory"
        paths = ["%(root)s/missing", "%(root)s/share/ghostscript/fonts"]

        [probes.x11-installed]
        kind = "directory"
        paths = ["%(root)s/X11"]

        [probes.freetype]
        kind = "installed"
        package = "freetype"
    "#;

    #[test]
    fn collect_from_filesystem() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("share/ghostscript/fonts")).unwrap();
        std::fs::create_dir_all(root.path().join("opt/freetype")).unwrap();
        let variables = Variables::new().with("root", root.path().to_string_lossy());

        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let snapshot = ProbeSnapshot::collect(&formula, &variables).unwrap();

        assert_eq!(
            snapshot,
            ProbeSnapshot::new()
                .with("fonts", true)
                .with("freetype", true)
                .with("x11-installed", false)
        );
    }

    #[test]
    fn collect_needs_root_variable() {
        let formula = Formula::from_toml_str(FORMULA).unwrap();
        let err = ProbeSnapshot::collect(&formula, &Variables::new()).unwrap_err();
        assert_eq!(err.variable, "root");
    }

    #[test]
    fn overrides_win() {
        let collected = ProbeSnapshot::new().with("x11-installed", false);
        let overrides = ProbeSnapshot::new()
            .with("x11-installed", true)
            .with("extra", false);
        let merged = collected.with_overrides(&overrides);
        assert_eq!(merged.get("x11-installed"), Some(true));
        assert_eq!(merged.get("extra"), Some(false));
        assert_eq!(merged.get("unknown"), None);
    }

    #[test]
    fn serializes_as_flat_table() {
        let snapshot = ProbeSnapshot::new().with("b", false).with("a", true);
        assert_eq!(snapshot.to_string().unwrap(), "a = true\nb = false\n");
    }
}
