use super::*;
use crate::exec::mock::MockExecutor;
use crate::prefs::PreferenceStore;

fn toolbox(registry: Registry, programs: &[&str], prefs: PreferenceStore) -> Toolbox {
    Toolbox::new(Arc::new(registry), Arc::new(prefs))
        .with_executor(Arc::new(MockExecutor::with_programs(programs)))
}

const ALL: &[&str] = &[
    "latex", "pdflatex", "xelatex", "lualatex", "bibtex", "biber", "makeindex", "dvips",
    "dvipdf", "ps2pdf",
];

#[test]
fn test_standard_registry_keeps_whole_catalogue() {
    let registry = Registry::standard().unwrap();
    assert_eq!(registry.runners().len(), 11);
    assert_eq!(registry.builders().len(), 7);
    let pdf: Vec<&str> = registry
        .builders_for_output("pdf")
        .iter()
        .map(|b| b.id.as_str())
        .collect();
    assert_eq!(pdf, vec!["pdflatex-pdf", "xelatex-pdf", "lualatex-pdf", "dvi-pdf", "ps-pdf"]);
}

#[test]
fn test_unknown_implementation_and_runner_are_dropped() {
    let runners = r#"{"runners": [
        {"id": "latex", "input": "tex", "output": "dvi", "implementation": "latex", "executable": "latex"},
        {"id": "odd", "input": "tex", "output": "dvi", "implementation": "reflection", "executable": "odd"}
    ]}"#;
    let builders = r#"{"builders": [
        {"id": "latex-dvi", "input": "tex", "output": "dvi", "implementation": "tex", "runner": "latex"},
        {"id": "odd-dvi", "input": "tex", "output": "dvi", "implementation": "tex", "runner": "odd"},
        {"id": "magic", "input": "tex", "output": "dvi", "implementation": "magic", "runner": "latex"}
    ]}"#;
    let registry = Registry::new(Catalog::from_json(runners, builders).unwrap());
    assert_eq!(registry.runners().len(), 1);
    assert_eq!(registry.builders().len(), 1);
    assert!(matches!(
        registry.create_builder("magic"),
        Err(BuildError::Configuration(_))
    ));
}

#[test]
fn test_cyclic_chains_are_dropped() {
    let runners = r#"{"runners": [
        {"id": "latex", "input": "tex", "output": "dvi", "implementation": "latex", "executable": "latex"},
        {"id": "a2b", "input": "a", "output": "b", "implementation": "dvips", "executable": "a2b"},
        {"id": "b2a", "input": "b", "output": "a", "implementation": "dvips", "executable": "b2a"}
    ]}"#;
    let builders = r#"{"builders": [
        {"id": "latex-dvi", "input": "tex", "output": "dvi", "implementation": "tex", "runner": "latex"},
        {"id": "to-b", "input": "tex", "output": "b", "implementation": "chain", "runner": "a2b"},
        {"id": "to-a", "input": "tex", "output": "a", "implementation": "chain", "runner": "b2a"}
    ]}"#;
    let registry = Registry::new(Catalog::from_json(runners, builders).unwrap());
    let ids: Vec<&str> = registry.builders().iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["latex-dvi"]);
}

#[test]
fn test_resolve_chain_sequence() {
    let mut prefs = PreferenceStore::new();
    prefs.set(keys::preferred_builder("pdf"), "ps-pdf");
    let tools = toolbox(Registry::standard().unwrap(), ALL, prefs);
    let builder = tools.registry.resolve("pdf", None, &tools).unwrap();
    assert_eq!(builder.id(), "ps-pdf");
    assert_eq!(builder.sequence(), "latex+dvips+ps2pdf");
}

#[test]
fn test_resolve_skips_invalid_candidates() {
    // No pdflatex installed: the next pdf builder in catalogue order wins.
    let tools = toolbox(
        Registry::standard().unwrap(),
        &["latex", "xelatex", "dvips", "ps2pdf"],
        PreferenceStore::new(),
    );
    let builder = tools.registry.resolve("pdf", None, &tools).unwrap();
    assert_eq!(builder.id(), "xelatex-pdf");

    let explicit = tools.registry.resolve("pdf", Some("ps-pdf"), &tools).unwrap();
    assert_eq!(explicit.sequence(), "latex+dvips+ps2pdf");
}

#[test]
fn test_resolve_reports_first_failure() {
    let tools = toolbox(Registry::standard().unwrap(), &[], PreferenceStore::new());
    assert!(matches!(
        tools.registry.resolve("pdf", None, &tools),
        Err(BuildError::ToolNotFound { ref runner, .. }) if runner == "pdflatex"
    ));
    assert!(matches!(
        tools.registry.resolve("html", None, &tools),
        Err(BuildError::NoBuilder { .. })
    ));
}
