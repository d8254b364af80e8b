use std::path::Path;

use crate::{
    cli::command_handlers::{do_prepare, do_probe, do_resolve},
    model::{
        formula::{Formula, OptionDeclaration},
        plan::ResolvedPlan,
        template::Variables,
    },
    probe::ProbeSnapshot,
    resolver::Selection,
};

mod builder;

pub use builder::FormulateBuilder;

pub struct Formulate {
    formula: Formula,
    variables: Variables,
}

impl Formulate {
    pub fn builder() -> FormulateBuilder {
        FormulateBuilder::default()
    }

    /// Declared and implicit options, in declaration order
    pub fn options(&self) -> &[OptionDeclaration] {
        &self.formula.options
    }

    /// Collects the formula's host probes, then applies `overrides`
    pub fn probe(&self, overrides: &ProbeSnapshot) -> anyhow::Result<ProbeSnapshot> {
        do_probe(&self.formula, &self.variables, overrides)
    }

    /// Resolves the formula against a fresh probe snapshot
    pub fn resolve(
        &self,
        selection: &Selection,
        overrides: &ProbeSnapshot,
    ) -> anyhow::Result<ResolvedPlan> {
        do_resolve(&self.formula, &self.variables, selection, overrides)
    }

    /// Resolves, then patches the unpacked sources in `source_dir`
    pub fn prepare(
        &self,
        selection: &Selection,
        overrides: &ProbeSnapshot,
        source_dir: impl AsRef<Path>,
    ) -> anyhow::Result<ResolvedPlan> {
        do_prepare(
            &self.formula,
            &self.variables,
            selection,
            overrides,
            source_dir.as_ref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        model::formula::DependencyKind,
        resolver::{ResolveError, Resolver},
    };

    use pretty_assertions::assert_eq;

    fn imagemagick() -> Formulate {
        Formulate::builder()
            .root(project_root::get_project_root().unwrap().join("formulae"))
            .formula_file_name("imagemagick-rmagick.toml")
            .prefix("/usr/local")
            .cellar("/usr/local/Cellar")
            .try_build()
            .unwrap()
    }

    fn no_probes() -> ProbeSnapshot {
        ProbeSnapshot::new()
            .with("x11-installed", false)
            .with("ghostscript-fonts", false)
    }

    #[test]
    fn keg_prefix_variables() {
        let formulate = imagemagick();
        assert_eq!(formulate.variables.get("root"), Some("/usr/local"));
        assert_eq!(
            formulate.variables.get("prefix"),
            Some("/usr/local/Cellar/imagemagick-rmagick/6.7.7-6")
        );
        assert_eq!(formulate.variables.get("name"), Some("imagemagick-rmagick"));
        assert_eq!(formulate.variables.get("version"), Some("6.7.7-6"));
    }

    #[test]
    fn probes_see_formula_variables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("formula.toml"),
            r#"
            name = "example"
            version = "1.0"

            [source]
            url = "https://example.com/example-1.0.tar.bz2"
            sha256 = "fb32cdeef812bc2c3bb9e9f48f3cfc75c1e2640f784ef2670a0dbf948e538677"

            [probes.keg-present]
            kind = "directory"
            paths = ["%(cellar)s/%(name)s/%(version)s"]
            "#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("Cellar/example/1.0")).unwrap();

        let formulate = Formulate::builder()
            .root(dir.path())
            .prefix(dir.path())
            .try_build()
            .unwrap();
        assert_eq!(
            formulate.probe(&ProbeSnapshot::new()).unwrap(),
            ProbeSnapshot::new().with("keg-present", true)
        );
    }

    #[test]
    fn default_plan() {
        let formulate = imagemagick();
        let plan = formulate.resolve(&Selection::new(), &no_probes()).unwrap();

        assert_eq!(
            plan.dependency_names().collect::<Vec<_>>(),
            vec!["pkg-config", "jpeg", "libpng", "freetype"]
        );
        assert!(!plan
            .dependencies
            .iter()
            .any(|d| d.kind == DependencyKind::Optional));
        assert_eq!(
            plan.arguments,
            vec![
                "--disable-osx-universal-binary",
                "--without-perl",
                "--prefix=/usr/local/Cellar/imagemagick-rmagick/6.7.7-6",
                "--disable-dependency-tracking",
                "--enable-shared",
                "--disable-static",
                "--without-pango",
                "--with-included-ltdl",
                "--with-modules",
                "--disable-openmp",
                "--disable-opencl",
                "--without-gslib",
                "--with-gs-font-dir=/usr/local/share/ghostscript/fonts",
                "--without-x",
                "--with-freetype=yes",
            ]
        );
        assert_eq!(plan.patches.len(), 1);
        assert_eq!(plan.patches[0].files, vec!["b/configure"]);
        assert_eq!(plan.caveats.len(), 1);
        assert!(plan.caveats[0].ends_with("/usr/local/share/ghostscript/fonts"));
        assert_eq!(
            plan.test,
            vec![
                "/usr/local/Cellar/imagemagick-rmagick/6.7.7-6/bin/identify",
                "-version"
            ]
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        let formulate = imagemagick();
        let selection = Selection::from_iter(["with-x", "use-tiff", "with-quantum-depth-16"]);
        let first = formulate.resolve(&selection, &no_probes()).unwrap();
        let second = formulate.resolve(&selection, &no_probes()).unwrap();
        assert_eq!(first.to_string().unwrap(), second.to_string().unwrap());
    }

    #[test]
    fn highest_quantum_depth_wins() {
        let formulate = imagemagick();
        let plan = formulate
            .resolve(
                &Selection::from_iter(["with-quantum-depth-16", "with-quantum-depth-32"]),
                &no_probes(),
            )
            .unwrap();
        let depths = plan
            .arguments
            .iter()
            .filter(|a| a.starts_with("--with-quantum-depth"))
            .collect::<Vec<_>>();
        assert_eq!(depths, vec!["--with-quantum-depth=32"]);
    }

    #[test]
    fn with_x() {
        let formulate = imagemagick();
        let plan = formulate
            .resolve(&Selection::from_iter(["with-x"]), &no_probes())
            .unwrap();
        assert!(plan.arguments.iter().any(|a| a == "--with-x"));
        assert!(!plan.arguments.iter().any(|a| a == "--without-x"));
        assert!(plan
            .dependencies
            .iter()
            .any(|d| d.name == "x11" && d.kind == DependencyKind::Optional));
    }

    #[test]
    fn x11_install_brings_fontconfig_and_keeps_freetype() {
        let formulate = imagemagick();
        let probes = no_probes().with("x11-installed", true);
        let plan = formulate
            .resolve(&Selection::from_iter(["without-freetype"]), &probes)
            .unwrap();
        assert_eq!(
            plan.dependency_names().collect::<Vec<_>>(),
            vec!["pkg-config", "jpeg", "libpng", "fontconfig", "freetype"]
        );
        assert!(plan.arguments.iter().any(|a| a == "--with-fontconfig=yes"));

        let plan = formulate
            .resolve(&Selection::from_iter(["without-freetype"]), &no_probes())
            .unwrap();
        assert!(!plan.dependency_names().any(|d| d == "freetype"));
        assert!(!plan.arguments.iter().any(|a| a == "--with-freetype=yes"));
    }

    #[test]
    fn unknown_option() {
        let err = imagemagick()
            .resolve(&Selection::from_iter(["with-quantum-depth-64"]), &no_probes())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ResolveError>(),
            Some(&ResolveError::UnknownOption(
                "with-quantum-depth-64".to_string()
            ))
        );
    }

    #[test]
    fn missing_probe() {
        let formulate = imagemagick();
        let result = Resolver::new(&formulate.formula, formulate.variables.clone())
            .resolve(&Selection::new(), &ProbeSnapshot::new());
        assert_eq!(
            result,
            Err(ResolveError::MissingProbe {
                probe: "x11-installed".to_string(),
                rule: "dependency `fontconfig`".to_string()
            })
        );
    }

    #[test]
    fn prepare_patches_configure() {
        let formulate = imagemagick();
        let sources = tempfile::tempdir().unwrap();
        let configure = "\
#!/bin/sh
ac_default_prefix=/usr/local/${PACKAGE_NAME}-${PACKAGE_VERSION}
        # Debian installs libxml headers under /usr/include/libxml2/libxml with
        # the shared library installed under /usr/lib, whereas the package
        # installs itself under $prefix/libxml and $prefix/lib.
        xml2_prefix=`xml2-config --prefix`
        if test -d \"${xml2_prefix}/include/libxml2\"; then
            CPPFLAGS=\"$CPPFLAGS -I${xml2_prefix}/include/libxml2\"
        fi
";
        std::fs::write(sources.path().join("configure"), configure).unwrap();

        formulate
            .prepare(&Selection::new(), &no_probes(), sources.path())
            .unwrap();

        let patched = std::fs::read_to_string(sources.path().join("configure")).unwrap();
        assert!(patched.contains("        xml2_prefix=/usr\n"));
        assert!(!patched.contains("xml2-config --prefix"));
        assert!(patched.contains("ac_default_prefix=/usr/local/${PACKAGE_NAME}\n"));
    }

    #[test]
    fn prepare_leaves_mismatched_sources_alone() {
        let formulate = imagemagick();
        let sources = tempfile::tempdir().unwrap();
        std::fs::write(sources.path().join("configure"), "#!/bin/sh\n").unwrap();

        assert!(formulate
            .prepare(&Selection::new(), &no_probes(), sources.path())
            .is_err());
        assert_eq!(
            std::fs::read_to_string(sources.path().join("configure")).unwrap(),
            "#!/bin/sh\n"
        );
    }
}
