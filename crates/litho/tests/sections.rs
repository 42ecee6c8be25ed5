//! Section-level tests: symbol and layer context, parametric symbols,
//! sweeps, arrays, transforms and the legend cell.

use litho::{BasicGeom, CompileOptions, ErrorKind, Reference, Script};
use pretty_assertions::assert_eq;

fn compile(src: &str) -> Script {
    Script::compile_source(src, &BasicGeom, &CompileOptions::default()).unwrap()
}

fn compile_err(src: &str) -> litho::Error {
    Script::compile_source(src, &BasicGeom, &CompileOptions::default()).unwrap_err()
}

fn bbox(script: &Script, cell: &str) -> (f64, f64, f64, f64) {
    let bb = script.library.cell_bounding_box(cell).unwrap();
    (bb.min.x, bb.min.y, bb.max.x, bb.max.y)
}

// === Scenario S1: primitives ===

#[test]
fn union_of_rects_lands_in_the_symbol_cell() {
    let s = compile(
        "LAYER 1 metal\n\
         SYMBOL main\n\
         rect(dx=10, dy=4, c=[0,0]) + rect(dx=2, dy=20, c=[0,0])",
    );
    let cell = s.library.get("main").unwrap();
    assert!(!cell.polygons.is_empty());
    assert!(cell.polygons.iter().all(|p| p.layer == 1));
    assert_eq!(bbox(&s, "main"), (-5.0, -10.0, 5.0, 10.0));
}

// === Scenario S2: anchored rect ===

#[test]
fn anchored_rect_positions_its_corner() {
    let s = compile("LAYER 1\nSYMBOL r\nrect(dx=10, dy=4, sw=[1,2])");
    assert_eq!(bbox(&s, "r"), (1.0, 2.0, 11.0, 6.0));
}

// === Scenario S3: text and magic names ===

#[test]
fn text_with_hash_renders_on_the_context_layer() {
    let s = compile(
        "LAYER 2\n\
         SYMBOL label\n\
         text(\"build_\" + __HASH__, dy=5, c=[0,0])",
    );
    let cell = s.library.get("label").unwrap();
    assert!(!cell.polygons.is_empty());
    assert!(cell.polygons.iter().all(|p| p.layer == 2));
    let bb = s.library.cell_bounding_box("label").unwrap();
    assert!((bb.height() - 5.0).abs() < 1e-9);
}

// === Scenario S4: parametric symbols ===

const S4: &str = "LAYER 1\n\
                  SYMBOL pad_x{x}_y{y}(x, y)\n\
                  rect(dx=x, dy=y, c=[0,0])\n\
                  LAYER 2\n\
                  SYMBOL main\n\
                  ref(\"pad\", 14, 3).translate(0,0) + ref(\"pad\", 16, 2).translate(20,0)";

#[test]
fn parametric_symbols_instantiate_one_cell_per_argument_tuple() {
    let s = compile(S4);
    assert!(s.library.contains("pad_x14_y3"));
    assert!(s.library.contains("pad_x16_y2"));
    let main = s.library.get("main").unwrap();
    assert_eq!(main.references.len(), 2);
    assert_eq!(bbox(&s, "pad_x14_y3"), (-7.0, -1.5, 7.0, 1.5));
    // instantiated geometry carries the parametric section's layer
    assert!(
        s.library
            .get("pad_x14_y3")
            .unwrap()
            .polygons
            .iter()
            .all(|p| p.layer == 1)
    );
}

#[test]
fn identical_arguments_reuse_the_same_cell() {
    let s = compile(
        "LAYER 1\n\
         SYMBOL p{n}(n)\n\
         rect(dx=n, dy=n, c=[0,0])\n\
         LAYER 1\n\
         SYMBOL a\n\
         ref(\"p\", 5)\n\
         SYMBOL b\n\
         ref(\"p\", 5) + ref(\"p\", 7)",
    );
    assert!(s.library.contains("p5"));
    assert!(s.library.contains("p7"));
    let a = &s.library.get("a").unwrap().references[0];
    let b = &s.library.get("b").unwrap().references[0];
    assert_eq!(a.cell_name(), b.cell_name());
}

#[test]
fn named_parameters_work_in_ref() {
    let s = compile(
        "LAYER 1\n\
         SYMBOL p{n}(n)\n\
         rect(dx=n, dy=n, c=[0,0])\n\
         SYMBOL top\n\
         ref(\"p\", n=4)",
    );
    assert!(s.library.contains("p4"));
}

#[test]
fn zero_placeholder_pattern_is_an_ordinary_cell() {
    let s = compile("LAYER 1\nSYMBOL solid()\nrect(dx=2, dy=2, c=[0,0])");
    assert!(!s.library.get("solid").unwrap().polygons.is_empty());
}

#[test]
fn undefined_parametric_symbol_is_a_name_error() {
    let err = compile_err("LAYER 1\nSYMBOL s\nref(\"nope\", 1)");
    assert_eq!(err.kind(), ErrorKind::Name);
}

#[test]
fn wrong_parametric_arity_is_an_arity_error() {
    let err = compile_err(
        "LAYER 1\n\
         SYMBOL p{n}(n)\n\
         rect(dx=n, dy=n, c=[0,0])\n\
         SYMBOL top\n\
         ref(\"p\", 1, 2)",
    );
    assert_eq!(err.kind(), ErrorKind::Arity);
}

// === Scenario S5: sweeps ===

#[test]
fn call_sweep_unions_each_instantiation() {
    let s = compile(
        "LAYER 1\n\
         SHAPE sq(n)\n\
         rect(dx=2, dy=2, c=[n*4, 0])\n\
         SYMBOL row\n\
         call(start=[1], step=[1], stop=[3])(sq)",
    );
    // centers at 4, 8, 12 with 2x2 squares
    assert_eq!(bbox(&s, "row"), (3.0, -1.0, 13.0, 1.0));
}

#[test]
fn letter_sweep_renders_labels() {
    let s = compile(
        "LAYER 1\n\
         SHAPE lab(s)\n\
         text(s, dy=4, c=[0,0])\n\
         SYMBOL letters\n\
         call(start=[\"a\"], step=[1], stop=[\"c\"])(lab)",
    );
    assert!(!s.library.get("letters").unwrap().polygons.is_empty());
}

#[test]
fn partial_sweep_specification_is_rejected() {
    let err = compile_err(
        "LAYER 1\n\
         SHAPE sq(n)\n\
         rect(dx=n, dy=n, c=[0,0])\n\
         SYMBOL row\n\
         call(start=[1], step=[1])(sq)",
    );
    assert!(err.message().contains("either all of start/step/stop or none"));
}

// === Transforms ===

#[test]
fn shape_array_builds_a_centered_grid() {
    let s = compile("LAYER 1\nSYMBOL grid\nrect(dx=2, dy=2, c=[0,0]).array(3, 2, 1, 1)");
    let bb = s.library.cell_bounding_box("grid").unwrap();
    // spacing (3, 3): width 2*3 + 2 = 8, height 1*3 + 2 = 5
    assert!((bb.width() - 8.0).abs() < 1e-9);
    assert!((bb.height() - 5.0).abs() < 1e-9);
}

#[test]
fn reference_array_becomes_an_array_reference() {
    let s = compile(
        "LAYER 1\n\
         SYMBOL unit\n\
         rect(dx=2, dy=2, c=[0,0])\n\
         SYMBOL top\n\
         ref(\"unit\").array(2, 3, 1, 1)",
    );
    let top = s.library.get("top").unwrap();
    let Reference::Array(array) = &top.references[0] else {
        panic!("expected an array reference");
    };
    assert_eq!((array.cols, array.rows), (2, 3));
    assert_eq!((array.spacing.x, array.spacing.y), (3.0, 3.0));
}

#[test]
fn zero_sized_array_is_a_domain_error() {
    let err = compile_err("LAYER 1\nSYMBOL s\nrect(dx=1, dy=1, c=[0,0]).array(0, 2)");
    assert_eq!(err.kind(), ErrorKind::Domain);
}

#[test]
fn point_mirror_rotates_half_a_turn() {
    let s = compile("LAYER 1\nSYMBOL m\nrect(sw=[0,0], dx=1, dy=1).mirror(x=1, y=1)");
    let (xmin, ymin, xmax, ymax) = bbox(&s, "m");
    assert!((xmin - 1.0).abs() < 1e-9 && (ymin - 1.0).abs() < 1e-9);
    assert!((xmax - 2.0).abs() < 1e-9 && (ymax - 2.0).abs() < 1e-9);
}

#[test]
fn rotate_on_a_reference_adjusts_its_rotation() {
    let s = compile(
        "LAYER 1\n\
         SYMBOL unit\n\
         rect(dx=2, dy=2, c=[0,0])\n\
         SYMBOL top\n\
         ref(\"unit\").rotate(90)",
    );
    let Reference::Single(r) = &s.library.get("top").unwrap().references[0] else {
        panic!("expected a single reference");
    };
    assert!((r.rotation - 90.0).abs() < 1e-9);
}

#[test]
fn grow_round_and_scale_apply() {
    let s = compile("LAYER 1\nSYMBOL g\nrect(dx=2, dy=2, c=[0,0]).grow(1).round(0.5)");
    let bb = s.library.cell_bounding_box("g").unwrap();
    assert!(bb.width() <= 4.0 + 1e-9 && bb.width() > 3.0);

    let s = compile("LAYER 1\nSYMBOL sc\nrect(dx=2, dy=2, c=[0,0]).scale(2)");
    assert_eq!(bbox(&s, "sc"), (-2.0, -2.0, 2.0, 2.0));
}

#[test]
fn translate_supports_anchor_positioning() {
    let s = compile("LAYER 1\nSYMBOL t\nrect(dx=4, dy=2, c=[0,0]).translate(sw=[10, 10])");
    assert_eq!(bbox(&s, "t"), (10.0, 10.0, 14.0, 12.0));
}

#[test]
fn shape_difference_and_intersection() {
    let s = compile("LAYER 1\nSYMBOL d\nrect(sw=[0,0], dx=4, dy=4) - rect(sw=[2,0], dx=4, dy=4)");
    assert_eq!(bbox(&s, "d"), (0.0, 0.0, 2.0, 4.0));

    let s = compile("LAYER 1\nSYMBOL i\nrect(sw=[0,0], dx=4, dy=4) * rect(sw=[2,2], dx=4, dy=4)");
    assert_eq!(bbox(&s, "i"), (2.0, 2.0, 4.0, 4.0));
}

// === Layer handling ===

#[test]
fn layer_name_number_conflicts_are_rejected() {
    assert_eq!(
        compile_err("LAYER 3 metal\nLAYER 3 poly\nSYMBOL s\nrect(dx=1, dy=1, c=[0,0])").kind(),
        ErrorKind::LayerConflict
    );
    assert_eq!(
        compile_err("LAYER 5 metal\nLAYER 7 metal\nSYMBOL s\nrect(dx=1, dy=1, c=[0,0])").kind(),
        ErrorKind::LayerConflict
    );
}

#[test]
fn layer_numbers_above_255_are_domain_errors() {
    assert_eq!(compile_err("LAYER 300\nSYMBOL s\n").kind(), ErrorKind::Domain);
}

#[test]
fn shapes_without_context_are_parse_errors() {
    // no symbol in scope
    assert_eq!(compile_err("LAYER 1\nrect(dx=1, dy=1, c=[0,0])").kind(), ErrorKind::Parse);
    // symbol but no layer
    assert_eq!(
        compile_err("SYMBOL s\nrect(dx=1, dy=1, c=[0,0])").kind(),
        ErrorKind::Parse
    );
}

// === Legend ===

#[test]
fn named_layers_build_a_legend_cell() {
    let s = compile("LAYER 1 metal\nLAYER 4 poly\nSYMBOL main\nrect(dx=2, dy=2, c=[0,0])");
    let legend = s.library.get("legend").unwrap();
    assert!(!legend.polygons.is_empty());
    assert!(legend.polygons.iter().all(|p| p.layer == 255));
}

#[test]
fn unnamed_layers_build_no_legend() {
    let s = compile("LAYER 1\nSYMBOL main\nrect(dx=2, dy=2, c=[0,0])");
    assert!(!s.library.contains("legend"));
}

// === Error taxonomy odds and ends ===

#[test]
fn qrcode_is_unsupported_by_the_basic_backend() {
    assert_eq!(compile_err("LAYER 1\nSYMBOL q\nqrcode(\"hi\")").kind(), ErrorKind::Geom);
}

#[test]
fn shape_bodies_may_fail_to_evaluate() {
    // the free parameter makes the body unevaluatable; the definition is
    // stored anyway and works once called
    let s = compile(
        "LAYER 1\n\
         SHAPE box(w)\n\
         rect(dx=w, dy=w, c=[0,0])\n\
         SYMBOL s\n\
         box(3)",
    );
    assert_eq!(bbox(&s, "s"), (-1.5, -1.5, 1.5, 1.5));
}

#[test]
fn duplicate_symbol_sections_append() {
    let s = compile(
        "LAYER 1\n\
         SYMBOL main\n\
         rect(dx=2, dy=2, c=[0,0])\n\
         LAYER 2\n\
         SYMBOL main\n\
         rect(dx=2, dy=2, c=[10,0])",
    );
    let main = s.library.get("main").unwrap();
    let layers: Vec<u16> = main.polygons.iter().map(|p| p.layer).collect();
    assert!(layers.contains(&1) && layers.contains(&2));
}
