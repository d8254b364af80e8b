mod selection;

use std::collections::BTreeSet;

use log::{debug, warn};
use thiserror::Error;

use crate::{
    model::{
        formula::{
            predicate::{Facts, Predicate},
            ArgumentRule, DependencyKind, Formula,
        },
        plan::{
            ResolvedDependency, ResolvedInreplace, ResolvedPatch, ResolvedPlan, ResolvedSource,
        },
        template::{UndefinedVariable, Variables},
    },
    probe::ProbeSnapshot,
};

pub use selection::Selection;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Unknown option `{0}`")]
    UnknownOption(String),
    #[error("Probe `{probe}` referenced by {rule} was not supplied")]
    MissingProbe { probe: String, rule: String },
    #[error("Required dependency `{dependency}` cannot be satisfied: `{condition}` is false")]
    UnsatisfiableDependency {
        dependency: String,
        condition: String,
    },
    #[error(transparent)]
    UndefinedVariable(#[from] UndefinedVariable),
    #[error("Formula `{0}` has no HEAD source")]
    NoHeadSource(String),
}

/// Turns a formula's declarations into a plan for one set of inputs.
///
/// Template variables (`prefix`, `root`, `name`, ...) come from the caller.
pub struct Resolver<'a> {
    formula: &'a Formula,
    variables: Variables,
}

struct ActiveFacts<'a> {
    options: BTreeSet<&'a str>,
    probes: &'a ProbeSnapshot,
}

impl<'a> Facts for ActiveFacts<'a> {
    fn has_option(&self, name: &str) -> bool {
        self.options.contains(name)
    }

    fn probe(&self, name: &str) -> Option<bool> {
        self.probes.get(name)
    }
}

impl<'a> Resolver<'a> {
    pub fn new(formula: &'a Formula, variables: Variables) -> Self {
        Resolver { formula, variables }
    }

    pub fn resolve(
        &self,
        selection: &Selection,
        probes: &ProbeSnapshot,
    ) -> Result<ResolvedPlan, ResolveError> {
        self.check_options(selection)?;
        self.check_probes(probes)?;

        let facts = ActiveFacts {
            options: self.effective_options(selection),
            probes,
        };
        debug!(
            "Resolving {} with options [{}]",
            self.formula.name,
            facts.options.iter().copied().collect::<Vec<_>>().join(", ")
        );

        let source = self.source(selection)?;
        let dependencies = self.dependencies(&facts)?;
        let arguments = self.arguments(&facts)?;

        let mut patches = Vec::new();
        for spec in &self.formula.patches {
            if self.holds(&spec.when, &facts)? {
                patches.push(ResolvedPatch {
                    name: spec.name.clone(),
                    strip: spec.strip,
                    files: spec
                        .patch
                        .files
                        .iter()
                        .map(|f| f.new_path.clone())
                        .collect(),
                    patch: spec.patch.clone(),
                });
            }
        }

        let mut inreplacements = Vec::new();
        for inreplace in &self.formula.inreplacements {
            if self.holds(&inreplace.when, &facts)? {
                inreplacements.push(ResolvedInreplace {
                    file: inreplace.file.clone(),
                    from: inreplace.from.clone(),
                    to: inreplace.to.clone(),
                });
            }
        }

        let mut caveats = Vec::new();
        for caveat in &self.formula.caveats {
            if self.holds(&caveat.when, &facts)? {
                caveats.push(self.variables.expand(&caveat.text)?);
            }
        }

        let mut configure = vec![self.formula.configure.clone()];
        configure.extend(arguments.iter().cloned());
        let mut install = vec![configure];
        for step in &self.formula.install {
            install.push(self.expand_all(step)?);
        }

        Ok(ResolvedPlan {
            formula: self.formula.name.clone(),
            version: self.formula.version.clone(),
            arguments,
            caveats,
            install,
            test: self.expand_all(&self.formula.test)?,
            skip_clean: self.formula.skip_clean.clone(),
            source,
            dependencies,
            patches,
            inreplacements,
        })
    }

    fn check_options(&self, selection: &Selection) -> Result<(), ResolveError> {
        match selection
            .enabled()
            .chain(selection.disabled())
            .find(|name| self.formula.option(name).is_none())
        {
            Some(unknown) => Err(ResolveError::UnknownOption(unknown.to_string())),
            None => Ok(()),
        }
    }

    fn check_probes(&self, probes: &ProbeSnapshot) -> Result<(), ResolveError> {
        for (rule, guard) in self.formula.guards() {
            if let Some(probe) = guard.probes().into_iter().find(|p| !probes.contains(p)) {
                return Err(ResolveError::MissingProbe {
                    probe: probe.to_string(),
                    rule,
                });
            }
        }
        Ok(())
    }

    fn effective_options<'s>(&'s self, selection: &'s Selection) -> BTreeSet<&'s str> {
        self.formula
            .options
            .iter()
            .filter(|option| option.default)
            .map(|option| option.name.as_str())
            .chain(selection.enabled())
            .filter(|name| !selection.is_disabled(name))
            .collect()
    }

    fn holds(&self, predicate: &Predicate, facts: &ActiveFacts) -> Result<bool, ResolveError> {
        predicate
            .evaluate(facts)
            .map_err(|missing| ResolveError::MissingProbe {
                probe: missing.0,
                rule: predicate.to_string(),
            })
    }

    fn source(&self, selection: &Selection) -> Result<ResolvedSource, ResolveError> {
        let source = &self.formula.source;
        if selection.is_head() {
            let url = source
                .head
                .clone()
                .ok_or_else(|| ResolveError::NoHeadSource(self.formula.name.clone()))?;
            Ok(ResolvedSource {
                url,
                sha256: None,
                head: true,
            })
        } else {
            Ok(ResolvedSource {
                url: source.url.clone(),
                sha256: Some(source.sha256.clone()),
                head: false,
            })
        }
    }

    fn dependencies(&self, facts: &ActiveFacts) -> Result<Vec<ResolvedDependency>, ResolveError> {
        let mut resolved: Vec<ResolvedDependency> = Vec::new();
        for dependency in &self.formula.dependencies {
            let condition = self.holds(&dependency.condition, facts)?;
            let active = match dependency.kind {
                DependencyKind::Required if !condition => {
                    match &dependency.override_option {
                        Some(option) if facts.has_option(option) => {
                            debug!(
                                "Dropping required dependency {}: waived by {}",
                                dependency.name, option
                            );
                            false
                        }
                        _ => {
                            return Err(ResolveError::UnsatisfiableDependency {
                                dependency: dependency.name.clone(),
                                condition: dependency.condition.to_string(),
                            })
                        }
                    }
                }
                // an explicit condition owns the without- logic
                DependencyKind::Recommended if dependency.condition.is_always() => {
                    !facts.has_option(&dependency.without_option())
                }
                _ => condition,
            };
            if !active {
                continue;
            }

            match resolved.iter_mut().find(|d| d.name == dependency.name) {
                Some(existing) => existing.kind = existing.kind.min(dependency.kind),
                None => resolved.push(ResolvedDependency {
                    name: dependency.name.clone(),
                    kind: dependency.kind,
                }),
            }
        }
        Ok(resolved)
    }

    fn arguments(&self, facts: &ActiveFacts) -> Result<Vec<String>, ResolveError> {
        let mut arguments = Vec::new();
        for rule in &self.formula.arguments {
            match rule {
                ArgumentRule::Always(args) => arguments.extend(self.expand_all(args)?),
                ArgumentRule::When { args, when } => {
                    if self.holds(when, facts)? {
                        arguments.extend(self.expand_all(args)?);
                    }
                }
                ArgumentRule::Exclusive(choices) => {
                    let mut active = Vec::new();
                    for choice in choices {
                        if self.holds(&choice.when, facts)? {
                            active.push(choice);
                        }
                    }
                    if let Some((winner, ignored)) = active.split_first() {
                        if !ignored.is_empty() {
                            warn!(
                                "Conflicting choices [{}]; using `{}`",
                                active
                                    .iter()
                                    .map(|c| c.when.to_string())
                                    .collect::<Vec<_>>()
                                    .join(", "),
                                winner.when
                            );
                        }
                        arguments.extend(self.expand_all(&winner.args)?);
                    }
                }
            }
        }
        Ok(arguments)
    }

    fn expand_all(&self, templates: &[String]) -> Result<Vec<String>, ResolveError> {
        templates
            .iter()
            .map(|t| self.variables.expand(t).map_err(Into::into))
            .collect()
    }
}
