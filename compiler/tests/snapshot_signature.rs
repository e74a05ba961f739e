// Snapshot tests: lock the C header and listing emitted for each demo declaration.
//
// Uses the library API (signature::load → header::emit_header / describe) on
// the `.psig` files under `demos/`. Snapshots are managed by `insta` and stored
// under `compiler/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use std::path::{Path, PathBuf};

use pbind::runtime::Pipeline;

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn load_demo(name: &str) -> pbind::signature::PipelineDecl {
    let path = project_root().join("demos").join(format!("{name}.psig"));
    let source = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e));
    pbind::signature::load(&source)
        .unwrap_or_else(|errors| panic!("{} failed to load: {:#?}", path.display(), errors))
}

fn snapshot_demo(name: &str) {
    let decl = load_demo(name);
    assert!(decl.warnings.is_empty(), "unexpected warnings: {:?}", decl.warnings);

    let header = pbind::header::emit_header(&decl);
    insta::assert_snapshot!(format!("{name}_header"), header);

    let describe = pbind::header::describe(&decl);
    insta::assert_snapshot!(format!("{name}_describe"), describe);
}

#[test]
fn snapshot_reaction_diffusion_update() {
    snapshot_demo("reaction_diffusion_update");
}

#[test]
fn snapshot_julia_render() {
    snapshot_demo("julia_render");
}

#[test]
fn snapshot_game_of_life_init() {
    snapshot_demo("game_of_life_init");
}

/// The declared update entry point matches the one the demo harness runs.
#[test]
fn declared_update_matches_runtime_signature() {
    let decl = load_demo("reaction_diffusion_update");
    let demo = pbind::demos::Demo::new(pbind::demos::DemoKind::ReactionDiffusion).unwrap();
    assert_eq!(&decl.signature, demo.update.signature());
    assert_eq!(
        decl.signature.fingerprint_hex(),
        demo.update.signature().fingerprint_hex()
    );
}

#[test]
fn fingerprint_ignores_constraints_and_comments() {
    let plain = pbind::signature::load(
        "pipeline julia_render\ninput state : float32[3]\noutput render : int32[2]\n",
    )
    .unwrap();
    let decorated = load_demo("julia_render");
    assert_eq!(
        plain.signature.fingerprint_hex(),
        decorated.signature.fingerprint_hex()
    );
}

#[test]
fn canonical_json_is_stable() {
    let decl = load_demo("julia_render");
    assert_eq!(
        decl.signature.canonical_json(),
        r#"{"name":"julia_render","arguments":[{"name":"state","kind":"buffer","type":"float32","dimensions":3},{"name":"render","kind":"buffer","type":"int32","dimensions":2}]}"#
    );
}
