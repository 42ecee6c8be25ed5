//! Result cache tests: snapshot round-trips, dependency invalidation and
//! deterministic re-emission.

use std::{fs, path::PathBuf, thread, time::Duration};

use litho::{BasicGeom, CompileOptions, Script};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const CHIP: &str = "LAYER 1 metal\n\
                    SHAPE pad(w)\n\
                    rect(dx=w, dy=w, c=[0,0])\n\
                    SYMBOL main\n\
                    pad(10) + pad(4).translate(12, 0)\n";

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn opts() -> CompileOptions {
    CompileOptions {
        force_rerender: false,
        timestamp: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(12, 0, 0),
    }
}

fn compile(path: &PathBuf, options: &CompileOptions) -> Script {
    Script::compile_file(path, &BasicGeom, options).unwrap()
}

// allow file mtimes to tick between writes
fn settle() {
    thread::sleep(Duration::from_millis(50));
}

// === Round trip ===

#[test]
fn second_compile_restores_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "chip.pls", CHIP);

    let first = compile(&path, &opts());
    assert!(!first.loaded_from_cache);
    assert!(dir.path().join(".chip.plb").exists());

    let second = compile(&path, &opts());
    assert!(second.loaded_from_cache);
    assert_eq!(first.library, second.library);
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.globals, second.globals);
}

#[test]
fn cached_and_fresh_compiles_emit_identical_gds() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "chip.pls", CHIP);
    let options = opts();

    let first = compile(&path, &options);
    let second = compile(&path, &options);
    assert!(second.loaded_from_cache);

    let out1 = dir.path().join("one.gds");
    let out2 = dir.path().join("two.gds");
    litho::emit::gds::write(&first.library, &out1, options.timestamp).unwrap();
    litho::emit::gds::write(&second.library, &out2, options.timestamp).unwrap();
    assert_eq!(fs::read(&out1).unwrap(), fs::read(&out2).unwrap());
}

// === Invalidation ===

#[test]
fn source_change_invalidates_the_cache() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "chip.pls", CHIP);

    compile(&path, &opts());
    settle();
    write(&dir, "chip.pls", &CHIP.replace("dx=w, dy=w", "dx=w, dy=w/2"));

    let recompiled = compile(&path, &opts());
    assert!(!recompiled.loaded_from_cache);
}

#[test]
fn touching_a_transitive_import_invalidates_the_root() {
    let dir = TempDir::new().unwrap();
    write(&dir, "leaf.pls", "LAYER 3 metal\nSYMBOL leaf\nrect(dx=2, dy=2, c=[0,0])");
    write(&dir, "mid.pls", "LAYER 3 metal\nIMPORT leaf.pls AS leaf\n");
    let root = write(&dir, "root.pls", "LAYER 7 metal\nIMPORT mid.pls AS mid\n");

    let first = compile(&root, &opts());
    assert!(!first.loaded_from_cache);
    let warm = compile(&root, &opts());
    assert!(warm.loaded_from_cache);

    settle();
    write(&dir, "leaf.pls", "LAYER 3 metal\nSYMBOL leaf\nrect(dx=6, dy=6, c=[0,0])");

    let invalidated = compile(&root, &opts());
    assert!(!invalidated.loaded_from_cache);
    let bb = invalidated.library.cell_bounding_box("leaf").unwrap();
    assert_eq!(bb.width(), 6.0);
}

#[test]
fn force_rerender_skips_the_cache() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "chip.pls", CHIP);
    compile(&path, &opts());

    let forced = CompileOptions {
        force_rerender: true,
        ..opts()
    };
    assert!(!compile(&path, &forced).loaded_from_cache);
}

// === Corruption tolerance ===

#[test]
fn corrupt_cache_files_fall_back_to_recompiling() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "chip.pls", CHIP);
    let first = compile(&path, &opts());
    settle();

    fs::write(dir.path().join(".chip.plb"), b"definitely not postcard").unwrap();
    settle();

    let recovered = compile(&path, &opts());
    assert!(!recovered.loaded_from_cache);
    assert_eq!(first.library, recovered.library);

    // the recompile refreshed the cache; the next run restores it
    assert!(compile(&path, &opts()).loaded_from_cache);
}
