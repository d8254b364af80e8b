use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::{
    model::plan::{ResolvedInreplace, ResolvedPlan},
    patch::{is_inside_tree, PatchApplicationError},
};

#[derive(Error, Debug)]
pub enum PrepareError {
    #[error(transparent)]
    Patch(#[from] PatchApplicationError),
    #[error("Inreplace failed: `{pattern}` not found in {}", file.display())]
    Inreplace { file: PathBuf, pattern: String },
    #[error("Inreplace target {} is outside the source tree", .0.display())]
    OutsideSourceTree(PathBuf),
    #[error("Bad source dir {0}")]
    BadSourceDir(String),
    #[error("IO error on {}: {source}", file.display())]
    IO {
        file: PathBuf,
        source: std::io::Error,
    },
}

/// Applies the plan's patches, then its inreplacements, to an unpacked source tree.
pub fn prepare_sources(plan: &ResolvedPlan, source_dir: &Path) -> Result<(), PrepareError> {
    if !source_dir.is_dir() {
        return Err(PrepareError::BadSourceDir(
            source_dir.to_string_lossy().to_string(),
        ));
    }

    info!(
        "Preparing {} {} sources in {}",
        plan.formula,
        plan.version,
        source_dir.display()
    );

    for patch in &plan.patches {
        info!("Applying patch {}", patch.name);
        patch.patch.apply_in(&patch.name, source_dir, patch.strip)?;
    }

    for inreplace in &plan.inreplacements {
        apply_inreplace(inreplace, source_dir)?;
    }

    Ok(())
}

fn apply_inreplace(inreplace: &ResolvedInreplace, source_dir: &Path) -> Result<(), PrepareError> {
    if !is_inside_tree(&inreplace.file) {
        return Err(PrepareError::OutsideSourceTree(inreplace.file.clone()));
    }
    let path = source_dir.join(&inreplace.file);
    let io_error = |source| PrepareError::IO {
        file: inreplace.file.clone(),
        source,
    };
    let content = std::fs::read_to_string(&path).map_err(io_error)?;
    if !content.contains(&inreplace.from) {
        return Err(PrepareError::Inreplace {
            file: inreplace.file.clone(),
            pattern: inreplace.from.clone(),
        });
    }
    std::fs::write(&path, content.replace(&inreplace.from, &inreplace.to)).map_err(io_error)?;
    debug!(
        "Replaced `{}` with `{}` in {}",
        inreplace.from,
        inreplace.to,
        inreplace.file.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        model::{formula::Formula, template::Variables},
        probe::ProbeSnapshot,
        resolver::{Resolver, Selection},
    };

    use pretty_assertions::assert_eq;

    const FORMULA: &str = r#"
        name = "example"
        version = "1.0"

        [source]
        url = "https://example.com/example-1.0.tar.bz2"
        sha256 = "fb32cdeef812bc2c3bb9e9f48f3cfc75c1e2640f784ef2670a0dbf948e538677"

        [[patches]]
        name = "xml2-prefix"
        diff = """
--- a/configure
+++ b/configure
@@ -2,3 +2,3 @@
 # detect libxml
-xml2_prefix=`xml2-config --prefix`
+xml2_prefix=/usr
 echo $xml2_prefix
"""

        [[inreplace]]
        file = "configure"
        from = "${PACKAGE_NAME}-${PACKAGE_VERSION}"
        to = "${PACKAGE_NAME}"
    "#;

    const CONFIGURE: &str = "#!/bin/sh
# detect libxml
xml2_prefix=`xml2-config --prefix`
echo $xml2_prefix
docdir=${PACKAGE_NAME}-${PACKAGE_VERSION}
";

    fn plan() -> ResolvedPlan {
        let formula = Formula::from_toml_str(FORMULA).unwrap();
        Resolver::new(&formula, Variables::new())
            .resolve(&Selection::new(), &ProbeSnapshot::new())
            .unwrap()
    }

    #[test]
    fn prepare_applies_patches_then_inreplace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("configure"), CONFIGURE).unwrap();

        prepare_sources(&plan(), dir.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("configure")).unwrap(),
            "#!/bin/sh
# detect libxml
xml2_prefix=/usr
echo $xml2_prefix
docdir=${PACKAGE_NAME}
"
        );
    }

    #[test]
    fn prepare_reports_failing_hunk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("configure"),
            CONFIGURE.replace("--prefix", "--exec-prefix"),
        )
        .unwrap();

        match prepare_sources(&plan(), dir.path()).unwrap_err() {
            PrepareError::Patch(PatchApplicationError::HunkMismatch {
                patch,
                file,
                hunk,
                line,
            }) => {
                assert_eq!(patch, "xml2-prefix");
                assert_eq!(file, PathBuf::from("configure"));
                assert_eq!((hunk, line), (1, 2));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn prepare_reports_missing_inreplace_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("configure"),
            CONFIGURE.replace("docdir=${PACKAGE_NAME}-${PACKAGE_VERSION}\n", ""),
        )
        .unwrap();

        assert!(matches!(
            prepare_sources(&plan(), dir.path()),
            Err(PrepareError::Inreplace { .. })
        ));
    }

    #[test]
    fn prepare_refuses_inreplace_outside_the_tree() {
        let root = tempfile::tempdir().unwrap();
        let sources = root.path().join("src");
        std::fs::create_dir(&sources).unwrap();
        std::fs::write(root.path().join("configure"), "prefix=${PACKAGE_NAME}\n").unwrap();

        for file in ["../configure", "/etc/configure"] {
            let formula = Formula::from_toml_str(&format!(
                r#"
                name = "example"
                version = "1.0"

                [source]
                url = "https://example.com/example-1.0.tar.bz2"
                sha256 = "fb32cdeef812bc2c3bb9e9f48f3cfc75c1e2640f784ef2670a0dbf948e538677"

                [[inreplace]]
                file = "{file}"
                from = "${{PACKAGE_NAME}}"
                to = "imagemagick"
                "#
            ))
            .unwrap();
            let plan = Resolver::new(&formula, Variables::new())
                .resolve(&Selection::new(), &ProbeSnapshot::new())
                .unwrap();

            assert!(matches!(
                prepare_sources(&plan, &sources),
                Err(PrepareError::OutsideSourceTree(_))
            ));
        }
        assert_eq!(
            std::fs::read_to_string(root.path().join("configure")).unwrap(),
            "prefix=${PACKAGE_NAME}\n"
        );
    }

    #[test]
    fn prepare_needs_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            prepare_sources(&plan(), &dir.path().join("missing")),
            Err(PrepareError::BadSourceDir(_))
        ));
    }
}
