pub mod predicate;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use log::{debug, error};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::{model::ParseError, patch::Patch};

use predicate::Predicate;

const DEFAULT_CONFIGURE: &str = "./configure";
const DEFAULT_PATCH_STRIP: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDeclaration {
    pub name: String,
    pub description: String,
    /// Active unless the caller disables it.
    pub default: bool,
    /// Derived from a recommended or optional dependency rather than declared.
    pub implicit: bool,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Required,
    Recommended,
    Optional,
    Build,
}

impl Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Required => f.write_str("required"),
            DependencyKind::Recommended => f.write_str("recommended"),
            DependencyKind::Optional => f.write_str("optional"),
            DependencyKind::Build => f.write_str("build"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub kind: DependencyKind,
    pub condition: Predicate,
    /// For required dependencies: an option that waives an unmet condition.
    pub override_option: Option<String>,
}

impl DependencySpec {
    /// `without-<name>` for recommended dependencies.
    pub fn without_option(&self) -> String {
        format!("without-{}", self.name)
    }

    /// `with-<name>` for optional dependencies.
    pub fn with_option(&self) -> String {
        format!("with-{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub when: Predicate,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentRule {
    Always(Vec<String>),
    When { args: Vec<String>, when: Predicate },
    /// Mutually exclusive choices in priority order; the first active one wins.
    Exclusive(Vec<Choice>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    pub name: String,
    pub strip: usize,
    pub patch: Patch,
    pub when: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inreplace {
    pub file: PathBuf,
    pub from: String,
    pub to: String,
    pub when: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caveat {
    pub text: String,
    pub when: Predicate,
}

/// How a host probe is computed when the caller does not supply it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeSpec {
    /// True when any of the paths is a directory.
    Directory { paths: Vec<String> },
    /// True when `%(root)s/opt/<package>` is a directory.
    Installed { package: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub url: String,
    pub sha256: String,
    pub head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub name: String,
    pub version: String,
    pub homepage: Option<String>,
    pub source: Source,
    pub probes: BTreeMap<String, ProbeSpec>,
    pub options: Vec<OptionDeclaration>,
    pub dependencies: Vec<DependencySpec>,
    pub arguments: Vec<ArgumentRule>,
    pub patches: Vec<PatchSpec>,
    pub inreplacements: Vec<Inreplace>,
    pub caveats: Vec<Caveat>,
    pub configure: String,
    pub install: Vec<Vec<String>>,
    pub test: Vec<String>,
    pub skip_clean: Vec<String>,
}

impl Formula {
    pub fn from_file(path: &Path) -> Result<Formula, ParseError> {
        debug!("Attempting to read formula from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or(Path::new("."));

        let formula = Formula::from_toml_str_in(&contents, base_dir);
        if let Err(err) = &formula {
            error!("Could not build a valid formula from {}: {err}", path.display())
        }
        formula
    }

    pub fn from_toml_str(data: &str) -> Result<Formula, ParseError> {
        Formula::from_toml_str_in(data, Path::new("."))
    }

    /// Parses a formula whose patch files are relative to `base_dir`.
    pub fn from_toml_str_in(data: &str, base_dir: &Path) -> Result<Formula, ParseError> {
        let raw = toml::from_str::<RawFormula>(data)?;
        let formula = raw.into_formula(base_dir)?;
        formula.check_option_references()?;
        Ok(formula)
    }

    pub fn option(&self, name: &str) -> Option<&OptionDeclaration> {
        self.options.iter().find(|o| o.name == name)
    }

    /// Every guard in the formula, labelled with the rule it belongs to.
    pub fn guards(&self) -> Vec<(String, &Predicate)> {
        let mut guards = Vec::new();
        for dependency in &self.dependencies {
            guards.push((format!("dependency `{}`", dependency.name), &dependency.condition));
        }
        for (i, rule) in self.arguments.iter().enumerate() {
            match rule {
                ArgumentRule::Always(_) => {}
                ArgumentRule::When { when, .. } => {
                    guards.push((format!("argument rule #{}", i + 1), when))
                }
                ArgumentRule::Exclusive(choices) => {
                    for (j, choice) in choices.iter().enumerate() {
                        guards.push((
                            format!("argument rule #{} choice #{}", i + 1, j + 1),
                            &choice.when,
                        ));
                    }
                }
            }
        }
        for patch in &self.patches {
            guards.push((format!("patch `{}`", patch.name), &patch.when));
        }
        for (i, inreplace) in self.inreplacements.iter().enumerate() {
            guards.push((format!("inreplace #{}", i + 1), &inreplace.when));
        }
        for (i, caveat) in self.caveats.iter().enumerate() {
            guards.push((format!("caveat #{}", i + 1), &caveat.when));
        }
        guards
    }

    fn check_option_references(&self) -> Result<(), ParseError> {
        let declared: BTreeSet<&str> = self.options.iter().map(|o| o.name.as_str()).collect();
        for (rule, guard) in self.guards() {
            if let Some(option) = guard.options().into_iter().find(|o| !declared.contains(o)) {
                return Err(ParseError::UndeclaredOption {
                    option: option.to_string(),
                    rule,
                });
            }
        }
        for dependency in &self.dependencies {
            if let Some(option) = &dependency.override_option {
                if !declared.contains(option.as_str()) {
                    return Err(ParseError::UndeclaredOption {
                        option: option.clone(),
                        rule: format!("override of dependency `{}`", dependency.name),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFormula {
    name: String,
    version: String,
    homepage: Option<String>,
    source: RawSource,
    #[serde(default)]
    probes: BTreeMap<String, ProbeSpec>,
    #[serde(default)]
    options: Vec<RawOption>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    arguments: Vec<RawArgumentRule>,
    #[serde(default)]
    patches: Vec<RawPatch>,
    #[serde(default)]
    inreplace: Vec<RawInreplace>,
    #[serde(default)]
    caveats: Vec<RawCaveat>,
    configure: Option<String>,
    install: Option<Vec<Vec<String>>>,
    #[serde(default)]
    test: Vec<String>,
    #[serde(default)]
    skip_clean: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    url: String,
    sha256: String,
    head: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOption {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    default: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDependency {
    name: String,
    #[serde(default = "default_dependency_kind")]
    kind: DependencyKind,
    when: Option<String>,
    #[serde(rename = "override")]
    override_option: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArgumentRule {
    args: Option<Vec<String>>,
    when: Option<String>,
    choose: Option<Vec<RawChoice>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawChoice {
    when: String,
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPatch {
    name: String,
    diff: Option<String>,
    file: Option<PathBuf>,
    strip: Option<usize>,
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInreplace {
    file: PathBuf,
    from: String,
    to: String,
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCaveat {
    text: String,
    when: Option<String>,
}

fn default_dependency_kind() -> DependencyKind {
    DependencyKind::Required
}

fn parse_guard(when: Option<&str>, rule: impl FnOnce() -> String) -> Result<Predicate, ParseError> {
    match when {
        None => Ok(Predicate::default()),
        Some(expression) => {
            Predicate::parse(expression).map_err(|source| ParseError::Predicate {
                rule: rule(),
                source,
            })
        }
    }
}

fn is_sha256(value: &str) -> bool {
    static SHA256: OnceLock<Regex> = OnceLock::new();
    SHA256
        .get_or_init(|| Regex::new(r"^[0-9a-fA-F]{64}$").unwrap())
        .is_match(value)
}

impl RawFormula {
    fn into_formula(self, base_dir: &Path) -> Result<Formula, ParseError> {
        if !is_sha256(&self.source.sha256) {
            return Err(ParseError::InvalidChecksum(self.source.sha256));
        }

        let mut options: Vec<OptionDeclaration> = Vec::with_capacity(self.options.len());
        for raw in self.options {
            if options.iter().any(|o| o.name == raw.name) {
                return Err(ParseError::DuplicateOption(raw.name));
            }
            options.push(OptionDeclaration {
                name: raw.name,
                description: raw.description,
                default: raw.default,
                implicit: false,
            });
        }

        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for raw in self.dependencies {
            let label = || format!("dependency `{}`", raw.name);
            if raw.override_option.is_some() && raw.kind != DependencyKind::Required {
                return Err(ParseError::InvalidRule(format!(
                    "{} is {} and cannot have an override",
                    label(),
                    raw.kind
                )));
            }
            let explicit_condition = raw.when.is_some();
            let mut dependency = DependencySpec {
                condition: parse_guard(raw.when.as_deref(), label)?,
                name: raw.name,
                kind: raw.kind,
                override_option: raw.override_option,
            };

            let implicit = match dependency.kind {
                DependencyKind::Recommended => Some((
                    dependency.without_option(),
                    format!("Build without {} support", dependency.name),
                )),
                DependencyKind::Optional if !explicit_condition => {
                    dependency.condition = Predicate::option(dependency.with_option());
                    Some((
                        dependency.with_option(),
                        format!("Build with {} support", dependency.name),
                    ))
                }
                _ => None,
            };
            if let Some((name, description)) = implicit {
                if !options.iter().any(|o| o.name == name) {
                    options.push(OptionDeclaration {
                        name,
                        description,
                        default: false,
                        implicit: true,
                    });
                }
            }
            dependencies.push(dependency);
        }

        let mut arguments = Vec::with_capacity(self.arguments.len());
        for (i, raw) in self.arguments.into_iter().enumerate() {
            let label = || format!("argument rule #{}", i + 1);
            let rule = match raw {
                RawArgumentRule {
                    args: Some(args),
                    when: None,
                    choose: None,
                } => ArgumentRule::Always(args),
                RawArgumentRule {
                    args: Some(args),
                    when: Some(when),
                    choose: None,
                } => ArgumentRule::When {
                    when: parse_guard(Some(when.as_str()), label)?,
                    args,
                },
                RawArgumentRule {
                    args: None,
                    when: None,
                    choose: Some(choices),
                } if !choices.is_empty() => ArgumentRule::Exclusive(
                    choices
                        .into_iter()
                        .enumerate()
                        .map(|(j, choice)| {
                            Ok(Choice {
                                when: parse_guard(Some(choice.when.as_str()), || {
                                    format!("{} choice #{}", label(), j + 1)
                                })?,
                                args: choice.args,
                            })
                        })
                        .collect::<Result<Vec<_>, ParseError>>()?,
                ),
                _ => {
                    return Err(ParseError::InvalidRule(format!(
                        "{} must have either `args` (with an optional `when`) or a non-empty `choose`",
                        label()
                    )))
                }
            };
            arguments.push(rule);
        }

        let mut patches = Vec::with_capacity(self.patches.len());
        for raw in self.patches {
            let text = match (raw.diff, raw.file) {
                (Some(diff), None) => diff,
                (None, Some(file)) => {
                    let path = base_dir.join(&file);
                    std::fs::read_to_string(&path).map_err(|source| ParseError::PatchFile {
                        name: raw.name.clone(),
                        path,
                        source,
                    })?
                }
                _ => {
                    return Err(ParseError::InvalidRule(format!(
                        "patch `{}` must have exactly one of `diff` or `file`",
                        raw.name
                    )))
                }
            };
            let patch = Patch::parse(&text).map_err(|source| ParseError::Patch {
                name: raw.name.clone(),
                source,
            })?;
            patches.push(PatchSpec {
                when: parse_guard(raw.when.as_deref(), || format!("patch `{}`", raw.name))?,
                strip: raw.strip.unwrap_or(DEFAULT_PATCH_STRIP),
                name: raw.name,
                patch,
            });
        }

        let inreplacements = self
            .inreplace
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                Ok(Inreplace {
                    when: parse_guard(raw.when.as_deref(), || format!("inreplace #{}", i + 1))?,
                    file: raw.file,
                    from: raw.from,
                    to: raw.to,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        let caveats = self
            .caveats
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                Ok(Caveat {
                    when: parse_guard(raw.when.as_deref(), || format!("caveat #{}", i + 1))?,
                    text: raw.text,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        Ok(Formula {
            name: self.name,
            version: self.version,
            homepage: self.homepage,
            source: Source {
                url: self.source.url,
                sha256: self.source.sha256.to_ascii_lowercase(),
                head: self.source.head,
            },
            probes: self.probes,
            options,
            dependencies,
            arguments,
            patches,
            inreplacements,
            caveats,
            configure: self
                .configure
                .unwrap_or_else(|| DEFAULT_CONFIGURE.to_string()),
            install: self
                .install
                .unwrap_or_else(|| vec![vec!["make".to_string(), "install".to_string()]]),
            test: self.test,
            skip_clean: self.skip_clean,
        })
    }
}
