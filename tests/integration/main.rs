//! Integration tests for Callscope
//!
//! These tests verify that multiple systems work together correctly.

use callscope_builder::{BuildRequest, CallscopeConfig, GraphBuilder};
use callscope_core::{FunctionRef, Graph, Point, VersionSource};
use callscope_indexer::{Direction, StaticIndex};
use callscope_layout::{Extent, LayoutError, LayoutOracle, LayoutRequest, RawLayout};
use callscope_watcher::FileVersions;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

const MANIFEST: &str = r#"{
    "functions": [
        { "name": "main", "qualified_name": "app::main", "file": "src/main.rs", "line": 1,
          "module": "app", "calls": ["app::parse"] },
        { "name": "parse", "qualified_name": "app::parse", "file": "src/parse.rs",
          "module": "app", "calls": ["app::lex"] },
        { "name": "lex", "qualified_name": "app::lex", "file": "src/lex.rs", "module": "app" },
        { "name": "lonely", "qualified_name": "app::lonely", "file": "src/lonely.rs", "module": "app" },
        { "name": "lex_smoke", "qualified_name": "app::lex_smoke", "file": "tests/lex.rs",
          "module": "app", "calls": ["app::lex"] }
    ]
}"#;

fn project(manifest: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("callscope.json"), manifest).unwrap();
    dir
}

fn callscope(root: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_callscope"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI can be invoked
#[test]
fn test_cli_invocation() {
    let output = Command::new(env!("CARGO_BIN_EXE_callscope"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Call graph closure and layout for code bases"));
}

#[test]
fn test_functions_lists_scope() {
    let dir = project(MANIFEST);

    let output = callscope(dir.path(), &["functions", "--scope", "project-no-tests"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 4);
    assert!(stdout.contains("app::main"));
    assert!(!stdout.contains("app::lex_smoke"));
}

#[test]
fn test_functions_unknown_module_fails() {
    let dir = project(MANIFEST);

    let output = callscope(dir.path(), &["functions", "--scope", "module:gone"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("module not found"));
}

/// A lone function needs no layout engine and lands in the center.
#[test]
fn test_build_isolated_seed() {
    let dir = project(MANIFEST);

    let output = callscope(dir.path(), &["build", "--seed", "lonely", "--viewport", "800x600"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let nodes = json["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["qualified_name"], "app::lonely");
    assert_eq!(nodes[0]["x"], 0.5);
    assert_eq!(nodes[0]["y"], 0.5);
    assert_eq!(nodes[0]["device"]["x"], 400.0);
    assert_eq!(nodes[0]["device"]["y"], 300.0);
    assert!(json["edges"].as_array().unwrap().is_empty());
}

#[test]
fn test_build_unknown_seed_fails() {
    let dir = project(MANIFEST);

    let output = callscope(dir.path(), &["build", "--seed", "nope"]);
    assert!(!output.status.success());
}

/// Places nodes on a diagonal in request order.
struct DiagonalOracle;

impl LayoutOracle for DiagonalOracle {
    fn layout(&self, request: &LayoutRequest) -> Result<RawLayout, LayoutError> {
        let positions = request
            .nodes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), Point::new(50.0 * i as f64, 20.0 * i as f64)))
            .collect();
        Ok(RawLayout {
            positions,
            extent: Extent::default(),
        })
    }
}

fn names(graph: &Graph<FunctionRef>) -> Vec<String> {
    let mut names: Vec<String> = graph.nodes().map(|n| n.function.name.clone()).collect();
    names.sort();
    names
}

/// An edited file invalidates its cached calls; untouched files keep theirs.
#[tokio::test]
async fn test_edit_rebuild_through_file_versions() {
    let dir = project(MANIFEST);
    let index = StaticIndex::load(dir.path().join("callscope.json")).unwrap();
    let versions = Arc::new(FileVersions::with_root(index.root()));
    let builder: GraphBuilder<FunctionRef> = GraphBuilder::new(
        Arc::new(index),
        Arc::new(DiagonalOracle),
        Arc::clone(&versions) as Arc<dyn VersionSource>,
        CallscopeConfig::default(),
    );
    let request = BuildRequest::Focus {
        seeds: vec![FunctionRef::new("app::main", "main", "src/main.rs").with_line(1)],
        direction: Direction::Downstream,
    };

    let first = builder.build(request.clone()).await.unwrap();
    assert_eq!(names(&first), vec!["lex", "main", "parse"]);

    // parse now also calls lonely
    let edited = MANIFEST.replace(r#""calls": ["app::lex"] },"#, r#""calls": ["app::lex", "app::lonely"] },"#);
    assert_ne!(edited, MANIFEST);
    std::fs::write(dir.path().join("callscope.json"), &edited).unwrap();
    builder.set_index(Arc::new(StaticIndex::load(dir.path().join("callscope.json")).unwrap()));
    versions.bump(&dir.path().join("src/parse.rs"));

    let second = builder.build(request).await.unwrap();
    assert_eq!(names(&second), vec!["lex", "lonely", "main", "parse"]);
    assert_eq!(second.edge_count(), 3);
    for node in second.nodes() {
        assert!((0.0..=1.0).contains(&node.point.x), "{:?}", node);
        assert!((0.0..=1.0).contains(&node.point.y), "{:?}", node);
    }
    assert_eq!(builder.builds_started(), 2);
}
