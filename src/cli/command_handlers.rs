use std::path::Path;

use log::{debug, info};

use crate::{
    model::{
        formula::{Formula, OptionDeclaration},
        plan::ResolvedPlan,
        template::Variables,
    },
    prepare::prepare_sources,
    probe::ProbeSnapshot,
    resolver::{Resolver, Selection},
};

/// Handler to probe command
/// Runs the formula's declared probes once; overrides win
pub fn do_probe(
    formula: &Formula,
    variables: &Variables,
    overrides: &ProbeSnapshot,
) -> anyhow::Result<ProbeSnapshot> {
    let snapshot = ProbeSnapshot::collect(formula, variables)?.with_overrides(overrides);
    debug!("Probe snapshot: {:?}", snapshot);
    Ok(snapshot)
}

/// Handler to resolve command
/// Freezes a probe snapshot, then resolves the formula against it
pub fn do_resolve(
    formula: &Formula,
    variables: &Variables,
    selection: &Selection,
    overrides: &ProbeSnapshot,
) -> anyhow::Result<ResolvedPlan> {
    let probes = do_probe(formula, variables, overrides)?;
    let plan = Resolver::new(formula, variables.clone()).resolve(selection, &probes)?;

    info!(
        "Resolved {} {} with {} dependencies ({} build-only), {} configure arguments and {} patches",
        plan.formula,
        plan.version,
        plan.dependencies.len(),
        plan.dependencies.iter().filter(|d| d.is_build_only()).count(),
        plan.arguments.len(),
        plan.patches.len()
    );
    debug!(
        "Dependencies: {}",
        plan.dependency_names().collect::<Vec<_>>().join(", ")
    );
    if let Some(configure) = plan.configure_command() {
        debug!("Configure: {}", configure.join(" "));
    }

    Ok(plan)
}

/// Handler to prepare command
/// 1 - Resolves the plan
/// 2 - Applies its patches to the unpacked sources
/// 3 - Applies its inreplacements
pub fn do_prepare(
    formula: &Formula,
    variables: &Variables,
    selection: &Selection,
    overrides: &ProbeSnapshot,
    source_directory: &Path,
) -> anyhow::Result<ResolvedPlan> {
    let plan = do_resolve(formula, variables, selection, overrides)?;
    prepare_sources(&plan, source_directory)?;
    info!("Sources in {} are ready to configure", source_directory.display());
    Ok(plan)
}

/// Handler to write a plan to a file or stdout
pub fn do_write_plan(plan: &ResolvedPlan, output: Option<&Path>) -> anyhow::Result<()> {
    let text = plan.to_string()?;
    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            info!("Wrote plan to {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

/// Handler to options command
/// Implicit options come from recommended and optional dependencies
pub fn do_list_options(options: &[OptionDeclaration]) -> String {
    let width = options.iter().map(|o| o.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for option in options {
        let mut line = format!("--{:<width$}  {}", option.name, option.description);
        if option.default {
            line.push_str(" (default)");
        }
        if option.implicit {
            line.push_str(" (implicit)");
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
