use std::path::{Path, PathBuf};

use node_forge_field_compiler::{
    compiler::{
        CompilerOptions, FieldCompiler, TemplateKind, TickOutcome, validate_wgsl_with_context,
    },
    dsl, graph,
};

fn cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("cases")
}

fn list_json_cases(dir: &Path) -> Vec<PathBuf> {
    let mut cases = Vec::new();
    let Ok(rd) = std::fs::read_dir(dir) else {
        return cases;
    };
    for entry in rd.flatten() {
        let path = entry.path();
        if path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        {
            cases.push(path);
        }
    }
    cases.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    cases
}

fn case_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("case")
        .to_string()
}

fn compile_case(path: &Path, template: TemplateKind) -> String {
    let graph = dsl::load_graph_from_path(path).unwrap();
    // Validation runs below with the case name in the error context.
    let options = CompilerOptions {
        template,
        validate: false,
        ..Default::default()
    };
    let mut compiler = FieldCompiler::new(options).unwrap();
    match compiler.tick(&graph) {
        TickOutcome::Rebuilt { .. } => {}
        other => panic!("{}: expected a rebuild, got {other:?}", path.display()),
    }
    compiler.artifact().unwrap().source.clone()
}

#[test]
fn every_case_generates_valid_wgsl_for_every_template() {
    let _ = env_logger::builder().is_test(true).try_init();
    let cases = list_json_cases(&cases_dir());
    assert!(!cases.is_empty(), "no cases under {}", cases_dir().display());

    for path in &cases {
        let stem = case_stem(path);
        for template in [TemplateKind::Raymarch, TemplateKind::Compute] {
            let source = compile_case(path, template);
            validate_wgsl_with_context(&source, &format!("{stem} ({})", template.name()))
                .unwrap_or_else(|e| panic!("{e:#}"));
        }
    }
}

#[test]
fn generation_is_deterministic_across_compilers() {
    for path in list_json_cases(&cases_dir()) {
        let a = compile_case(&path, TemplateKind::Raymarch);
        let b = compile_case(&path, TemplateKind::Raymarch);
        assert_eq!(a, b, "{}", path.display());
    }
}

#[test]
fn smooth_union_folds_three_branches() {
    let source = compile_case(
        &cases_dir().join("smooth_union_scene.json"),
        TemplateKind::Raymarch,
    );
    assert_eq!(source.matches("= field_smooth_union(").count(), 1);
    assert!(source.contains("f0 = field_smooth_union(field_smooth_union(f1a, f1b, field_params."));
    assert!(source.contains("fn field_twist("));
    assert!(source.contains("fn sdf_torus("));
}

#[test]
fn unconnected_optional_operand_uses_the_identity_field() {
    let source = compile_case(
        &cases_dir().join("subtraction_single.json"),
        TemplateKind::Raymarch,
    );
    assert!(source.contains("const FIELD_EMPTY = vec4f("));
    assert!(source.contains("f1b = FIELD_EMPTY;"));
    assert!(source.contains("f0 = field_subtraction(f1a, f1b);"));
}

#[test]
fn orphan_nodes_are_left_out() {
    let path = cases_dir().join("intersection_displace.json");
    let graph = dsl::load_graph_from_path(&path).unwrap();
    assert_eq!(graph::unreachable_from_output(&graph), vec!["orphan".to_string()]);

    let source = compile_case(&path, TemplateKind::Raymarch);
    assert!(!source.contains("node_orphan_"));
    assert!(source.contains("const FIELD_FULL = vec4f("));
    assert!(source.contains("textureSampleLevel("));
}
