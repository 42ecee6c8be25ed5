//! Compiles every demo script in `demos/` and sanity-checks the results,
//! including the emitted artifacts.

use std::{fs, path::PathBuf};

use litho::{BasicGeom, CompileOptions, Script};
use tempfile::TempDir;

/// Copies the repo's demos into a scratch directory so cache files and
/// output artifacts never land in the source tree.
fn demo_dir() -> TempDir {
    let source = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos");
    let dir = TempDir::new().unwrap();
    for entry in fs::read_dir(source).unwrap() {
        let entry = entry.unwrap();
        fs::copy(entry.path(), dir.path().join(entry.file_name())).unwrap();
    }
    dir
}

fn opts() -> CompileOptions {
    CompileOptions {
        force_rerender: false,
        timestamp: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0),
    }
}

#[test]
fn chip_demo_compiles() {
    let dir = demo_dir();
    let script = Script::compile_file(&dir.path().join("chip.pls"), &BasicGeom, &opts()).unwrap();
    let main = script.library.get("main").unwrap();
    assert!(!main.polygons.is_empty());
    assert_eq!(main.references.len(), 2);
    assert!(script.library.contains("via_w4"));
    assert!(script.library.contains("via_w6"));
    assert!(script.library.contains("legend"));
}

#[test]
fn sweep_demo_compiles() {
    let dir = demo_dir();
    let script = Script::compile_file(&dir.path().join("sweep.pls"), &BasicGeom, &opts()).unwrap();
    let row = script.library.cell_bounding_box("row").unwrap();
    assert_eq!((row.min.x, row.max.x), (3.0, 13.0));
    assert!(script.library.get("grid").unwrap().polygons.len() >= 6);
}

#[test]
fn panel_demo_imports_and_remaps() {
    let dir = demo_dir();
    let script = Script::compile_file(&dir.path().join("panel.pls"), &BasicGeom, &opts()).unwrap();
    // imported cell, remapped onto the panel's metal layer
    let unit = script.library.get("unit").unwrap();
    assert!(unit.polygons.iter().all(|p| p.layer == 7));
    // parametric symbol defined by the import, instantiated here
    assert!(script.library.contains("pad_8"));
    let panel = script.library.get("panel").unwrap();
    assert!(!panel.references.is_empty());
    assert!(!panel.polygons.is_empty());
}

#[test]
fn demos_cache_round_trip() {
    let dir = demo_dir();
    for name in ["chip.pls", "sweep.pls", "panel.pls"] {
        let path = dir.path().join(name);
        let first = Script::compile_file(&path, &BasicGeom, &opts()).unwrap();
        let second = Script::compile_file(&path, &BasicGeom, &opts()).unwrap();
        assert!(second.loaded_from_cache, "{name} should restore from cache");
        assert_eq!(first.library, second.library, "{name} library changed across the cache");
    }
}

#[test]
fn emitted_artifacts_have_the_expected_framing() {
    let dir = demo_dir();
    let script = Script::compile_file(&dir.path().join("chip.pls"), &BasicGeom, &opts()).unwrap();

    let gds = dir.path().join("chip.gds");
    litho::emit::gds::write(&script.library, &gds, opts().timestamp).unwrap();
    let bytes = fs::read(&gds).unwrap();
    // HEADER record: length 6, type 0x00, datatype 0x02, version 600
    assert_eq!(&bytes[..6], &[0x00, 0x06, 0x00, 0x02, 0x02, 0x58]);
    // ENDLIB record closes the stream
    assert_eq!(&bytes[bytes.len() - 4..], &[0x00, 0x04, 0x04, 0x00]);
    // every cell name is embedded
    for name in script.library.sorted_names() {
        let needle = name.as_bytes();
        assert!(
            bytes.windows(needle.len()).any(|w| w == needle),
            "cell {name} missing from the stream"
        );
    }

    let pdf_base = dir.path().join("chip");
    litho::emit::pdf::write(&script.library, &pdf_base).unwrap();
    // multi-cell libraries emit one pdf per cell
    let plotted = fs::read_dir(&pdf_base).unwrap().count();
    assert_eq!(plotted, script.library.cells.len());
    let one = fs::read(pdf_base.join("main.pdf")).unwrap();
    assert!(one.starts_with(b"%PDF-1.4"));
}
