use std::path::PathBuf;

use serde::Serialize;

use crate::patch::Patch;

use super::formula::DependencyKind;

/// Fully determined dependencies, configure arguments and patches for one build.
///
/// Only ordered containers are used so that two resolutions of the same inputs
/// serialize to identical text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPlan {
    pub formula: String,
    pub version: String,
    pub arguments: Vec<String>,
    pub caveats: Vec<String>,
    /// Build steps: the configure invocation first, then the install commands.
    pub install: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub test: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skip_clean: Vec<String>,
    pub source: ResolvedSource,
    pub dependencies: Vec<ResolvedDependency>,
    pub patches: Vec<ResolvedPatch>,
    pub inreplacements: Vec<ResolvedInreplace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSource {
    pub url: String,
    /// Absent for HEAD builds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub head: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDependency {
    pub name: String,
    pub kind: DependencyKind,
}

impl ResolvedDependency {
    pub fn is_build_only(&self) -> bool {
        self.kind == DependencyKind::Build
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPatch {
    pub name: String,
    pub strip: usize,
    pub files: Vec<String>,
    #[serde(skip)]
    pub patch: Patch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedInreplace {
    pub file: PathBuf,
    pub from: String,
    pub to: String,
}

impl ResolvedPlan {
    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.name.as_str())
    }

    /// `configure` followed by its arguments.
    pub fn configure_command(&self) -> Option<&[String]> {
        self.install.first().map(Vec::as_slice)
    }
}
