//! Import tests: layer remapping, symbol merging, cross-namespace shape
//! calls and parametric symbols defined by imported scripts.

use std::{fs, path::PathBuf};

use litho::{BasicGeom, CompileOptions, ErrorKind, Script};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn compile(path: &PathBuf) -> Script {
    Script::compile_file(path, &BasicGeom, &CompileOptions::default()).unwrap()
}

// === Scenario S6: layer remap ===

#[test]
fn imported_polygons_move_to_the_importer_layer_number() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "child.pls",
        "LAYER 3 metal\nSYMBOL sub\nrect(dx=2, dy=2, c=[0,0])",
    );
    let parent = write(&dir, "parent.pls", "LAYER 7 metal\nIMPORT child.pls AS child\n");
    let script = compile(&parent);

    let sub = script.library.get("sub").unwrap();
    assert!(!sub.polygons.is_empty());
    assert!(sub.polygons.iter().all(|p| p.layer == 7));
}

#[test]
fn unrelated_layers_keep_their_numbers() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "child.pls",
        "LAYER 9 oxide\nSYMBOL sub\nrect(dx=2, dy=2, c=[0,0])",
    );
    let parent = write(&dir, "parent.pls", "LAYER 7 metal\nIMPORT child.pls AS child\n");
    let script = compile(&parent);
    assert!(script.library.get("sub").unwrap().polygons.iter().all(|p| p.layer == 9));
}

// === Namespaced shape calls ===

#[test]
fn namespace_shape_call_evaluates_in_the_imported_scope() {
    let dir = TempDir::new().unwrap();
    write(&dir, "child.pls", "LAYER 3 metal\nSHAPE box(w)\nrect(dx=w, dy=w, c=[0,0])");
    let parent = write(
        &dir,
        "parent.pls",
        "LAYER 7 metal\nIMPORT child.pls AS child\nSYMBOL m\nchild.box(5)",
    );
    let script = compile(&parent);
    let bb = script.library.cell_bounding_box("m").unwrap();
    assert_eq!((bb.width(), bb.height()), (5.0, 5.0));
    // the shape lands on the importer's context layer
    assert!(script.library.get("m").unwrap().polygons.iter().all(|p| p.layer == 7));
}

#[test]
fn default_namespace_is_the_file_stem() {
    let dir = TempDir::new().unwrap();
    write(&dir, "child.pls", "LAYER 3 metal\nSHAPE box(w)\nrect(dx=w, dy=w, c=[0,0])");
    let parent = write(
        &dir,
        "parent.pls",
        "LAYER 7 metal\nIMPORT child.pls\nSYMBOL m\nchild.box(4)",
    );
    let script = compile(&parent);
    assert!(!script.library.get("m").unwrap().polygons.is_empty());
}

// === Parametric symbols across imports ===

#[test]
fn imported_parametric_symbols_instantiate_into_the_importer() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "child.pls",
        "LAYER 3 metal\nSYMBOL cpad_{w}(w)\nrect(dx=w, dy=w, c=[0,0])",
    );
    let parent = write(
        &dir,
        "parent.pls",
        "LAYER 7 metal\nIMPORT child.pls AS child\nSYMBOL top\nref(\"cpad\", 9)",
    );
    let script = compile(&parent);
    assert!(script.library.contains("cpad_9"));
    let top = script.library.get("top").unwrap();
    assert_eq!(top.references[0].cell_name(), "cpad_9");
}

#[test]
fn duplicate_parametric_symbols_are_rejected() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "child.pls",
        "LAYER 3 metal\nSYMBOL q{n}(n)\nrect(dx=n, dy=n, c=[0,0])",
    );
    let parent = write(
        &dir,
        "parent.pls",
        "LAYER 7 metal\nSYMBOL q{n}(n)\nrect(dx=n, dy=n, c=[0,0])\nIMPORT child.pls AS child\n",
    );
    let err = Script::compile_file(&parent, &BasicGeom, &CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateSymbol);
}

// === Header validation ===

#[test]
fn malformed_import_statements_are_parse_errors() {
    let dir = TempDir::new().unwrap();
    write(&dir, "child.pls", "LAYER 3 metal\n");
    let parent = write(&dir, "parent.pls", "IMPORT child.pls WITH child\n");
    let err = Script::compile_file(&parent, &BasicGeom, &CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[test]
fn non_pls_imports_are_rejected() {
    let dir = TempDir::new().unwrap();
    write(&dir, "child.gds", "not a script");
    let parent = write(&dir, "parent.pls", "IMPORT child.gds AS child\n");
    let err = Script::compile_file(&parent, &BasicGeom, &CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[test]
fn import_hash_feeds_the_parent_fingerprint() {
    let dir = TempDir::new().unwrap();
    write(&dir, "child.pls", "LAYER 3 metal\n");
    let parent = write(&dir, "parent.pls", "LAYER 7 metal\nIMPORT child.pls AS child\n");
    let with_child = compile(&parent).hash;

    let dir2 = TempDir::new().unwrap();
    write(&dir2, "child.pls", "LAYER 4 oxide\n");
    let parent2 = write(&dir2, "parent.pls", "LAYER 7 metal\nIMPORT child.pls AS child\n");
    let with_other_child = compile(&parent2).hash;

    assert_ne!(with_child, with_other_child);
}
