//! Expression-level tests: operator precedence, coercions, constructors,
//! name resolution and the error taxonomy.
//!
//! Expressions are observed through global assignments: a section body that
//! reduces to an assignment lands in `Script::globals`.

use litho::{BasicGeom, CompileOptions, ErrorKind, Point, Script, Value};
use pretty_assertions::assert_eq;

fn compile(src: &str) -> Script {
    Script::compile_source(src, &BasicGeom, &CompileOptions::default()).unwrap()
}

fn compile_err(src: &str) -> litho::Error {
    Script::compile_source(src, &BasicGeom, &CompileOptions::default()).unwrap_err()
}

fn global(script: &Script, name: &str) -> Value {
    script.globals[name].clone()
}

// === Arithmetic ===

#[test]
fn multiplication_binds_tighter_than_addition() {
    let s = compile("LAYER 0\nx = 1 + 2 * 3");
    assert_eq!(global(&s, "x"), Value::Int(7));
}

#[test]
fn subtraction_is_left_associative() {
    let s = compile("LAYER 0\nx = 10 - 4 - 3");
    assert_eq!(global(&s, "x"), Value::Int(3));
}

#[test]
fn power_is_left_associative() {
    // the single-pass reducer folds left to right: (2^3)^2, not 2^(3^2)
    let s = compile("LAYER 0\nx = 2 ^ 3 ^ 2");
    assert_eq!(global(&s, "x"), Value::Int(64));
}

#[test]
fn division_always_produces_float() {
    let s = compile("LAYER 0\nx = 7 / 2");
    assert_eq!(global(&s, "x"), Value::Float(3.5));
}

#[test]
fn unary_minus_after_operator() {
    let s = compile("LAYER 0\nx = -5 + 3");
    assert_eq!(global(&s, "x"), Value::Int(-2));
    let s = compile("LAYER 0\nx=-2.5");
    assert_eq!(global(&s, "x"), Value::Float(-2.5));
}

#[test]
fn operator_against_wrong_operand_is_a_type_error() {
    let err = compile_err("LAYER 0\nx = 2 * \"abc\"");
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn division_by_zero_is_a_domain_error() {
    assert_eq!(compile_err("LAYER 0\nx = 1 / 0").kind(), ErrorKind::Domain);
}

// === Strings and points ===

#[test]
fn string_concatenation_coerces_numbers() {
    let s = compile("LAYER 0\nx = \"a\" + 5");
    assert_eq!(global(&s, "x"), Value::Str("a5".to_owned()));
    let s = compile("LAYER 0\nx = 3.5 + \"b\"");
    assert_eq!(global(&s, "x"), Value::Str("3.5b".to_owned()));
}

#[test]
fn points_add_component_wise() {
    let s = compile("LAYER 0\nx = [1, 2] + [0.5, 0.5]");
    assert_eq!(global(&s, "x"), Value::Point(Point::new(1.5, 2.5)));
    let s = compile("LAYER 0\nx = [4, 4] - [1, 3]");
    assert_eq!(global(&s, "x"), Value::Point(Point::new(3.0, 1.0)));
}

// === Objects ===

#[test]
fn object_construction_and_merge() {
    let s = compile("LAYER 0\nx = {a=1, b=2, a=3}");
    let Value::Obj(obj) = global(&s, "x") else {
        panic!("expected an object");
    };
    // right wins on key conflict
    assert_eq!(obj["a"], Value::Int(3));
    assert_eq!(obj["b"], Value::Int(2));
}

#[test]
fn unpack_feeds_object_entries_as_named_args() {
    let src = "LAYER 0\n\
               style = {dx=4, dy=6, zzz=1}\n\
               SHAPE box(dx, dy)\n\
               rect(dx=dx, dy=dy, c=[0,0])\n\
               LAYER 1\n\
               SYMBOL s\n\
               box(*style)";
    let s = compile(src);
    let bb = s.library.cell_bounding_box("s").unwrap();
    assert_eq!((bb.width(), bb.height()), (4.0, 6.0));
}

// === Magic names ===

#[test]
fn magic_constants_exist() {
    let s = compile("LAYER 0\nx = True");
    assert_eq!(global(&s, "x"), Value::Int(1));
    let s = compile("LAYER 0\nx = False");
    assert_eq!(global(&s, "x"), Value::Int(0));
}

#[test]
fn hash_magic_matches_script_hash() {
    let s = compile("LAYER 0\nx = \"build_\" + __HASH__");
    assert_eq!(global(&s, "x"), Value::Str(format!("build_{}", s.hash)));
    assert_eq!(s.hash.len(), 5);
}

#[test]
fn magic_names_shadow_user_assignments() {
    let s = compile("LAYER 0\nTrue=5\nLAYER 0\nx = True");
    // the assignment is stored, but resolution sees the magic value
    assert_eq!(s.globals["True"], Value::Int(5));
    assert_eq!(global(&s, "x"), Value::Int(1));
}

#[test]
fn date_and_time_honor_the_pinned_timestamp() {
    let ts = chrono::NaiveDate::from_ymd_opt(2024, 2, 29)
        .unwrap()
        .and_hms_opt(13, 37, 0)
        .unwrap();
    let opts = CompileOptions {
        force_rerender: false,
        timestamp: Some(ts),
    };
    let s = Script::compile_source("LAYER 0\nx = __DATE__ + \" \" + __TIME__", &BasicGeom, &opts).unwrap();
    assert_eq!(s.globals["x"], Value::Str("29.02.2024 13:37".to_owned()));
}

// === Name resolution ===

#[test]
fn free_names_raise_a_name_error_listing_them() {
    let err = compile_err("LAYER 1\nSYMBOL s\nrect(dx=w, dy=4, c=[0,0])");
    assert_eq!(err.kind(), ErrorKind::Name);
    assert_eq!(err.unresolved_names(), ["w".to_owned()]);
}

#[test]
fn globals_resolve_in_later_sections() {
    let s = compile("LAYER 0\nw = 6\nLAYER 1\nSYMBOL s\nrect(dx=w, dy=w, c=[0,0])");
    let bb = s.library.cell_bounding_box("s").unwrap();
    assert_eq!((bb.width(), bb.height()), (6.0, 6.0));
}

#[test]
fn unknown_function_is_a_name_error() {
    let err = compile_err("LAYER 1\nSYMBOL s\nnosuchshape(1)");
    assert_eq!(err.kind(), ErrorKind::Name);
}

// === Scalar builtins ===

#[test]
fn scalar_utilities() {
    assert_eq!(global(&compile("LAYER 0\nx = int(3.9)"), "x"), Value::Int(3));
    assert_eq!(global(&compile("LAYER 0\nx = abs(-4)"), "x"), Value::Float(4.0));
    assert_eq!(global(&compile("LAYER 0\nx = char(2)"), "x"), Value::Str("c".to_owned()));
    assert_eq!(global(&compile("LAYER 0\nx = min(3, 1, 2)"), "x"), Value::Float(1.0));
    assert_eq!(global(&compile("LAYER 0\nx = max(3, 1, 2)"), "x"), Value::Float(3.0));
    assert_eq!(global(&compile("LAYER 0\nx = mean(1, 2, 3)"), "x"), Value::Float(2.0));
    assert_eq!(global(&compile("LAYER 0\nx = sqrt(9)"), "x"), Value::Float(3.0));
}

#[test]
fn trigonometry_defaults_to_degrees() {
    let Value::Float(c) = global(&compile("LAYER 0\nx = cos(60)"), "x") else {
        panic!("expected float");
    };
    assert!((c - 0.5).abs() < 1e-12);
    let Value::Float(a) = global(&compile("LAYER 0\nx = asin(0.5)"), "x") else {
        panic!("expected float");
    };
    assert!((a - 30.0).abs() < 1e-9);
    let Value::Float(t) = global(&compile("LAYER 0\nx = atan2(1, 1)"), "x") else {
        panic!("expected float");
    };
    assert!((t - 45.0).abs() < 1e-9);
}

#[test]
fn scalar_domain_errors() {
    assert_eq!(compile_err("LAYER 0\nx = sqrt(-1)").kind(), ErrorKind::Domain);
    assert_eq!(compile_err("LAYER 0\nx = char(99)").kind(), ErrorKind::Domain);
    assert_eq!(compile_err("LAYER 0\nx = asin(2)").kind(), ErrorKind::Domain);
    assert_eq!(compile_err("LAYER 0\nx = cos(1, unit=\"grad\")").kind(), ErrorKind::Domain);
}

#[test]
fn min_rejects_named_arguments() {
    assert_eq!(compile_err("LAYER 0\nx = min(1, 2, unit=\"deg\")").kind(), ErrorKind::Arity);
}

// === Shape measurements ===

#[test]
fn measurements() {
    assert_eq!(
        global(&compile("LAYER 0\nx = width(rect(dx=10, dy=4, c=[0,0]))"), "x"),
        Value::Float(10.0)
    );
    assert_eq!(
        global(&compile("LAYER 0\nx = height(rect(dx=10, dy=4, c=[0,0]))"), "x"),
        Value::Float(4.0)
    );
    assert_eq!(
        global(&compile("LAYER 0\nx = center(rect(dx=10, dy=4, c=[2,2]))"), "x"),
        Value::Point(Point::new(2.0, 2.0))
    );
    // bb of a union spans both operands
    assert_eq!(
        global(
            &compile("LAYER 0\nx = width(bb(rect(dx=2, dy=2, c=[0,0]) + rect(dx=2, dy=2, c=[10,0])))"),
            "x"
        ),
        Value::Float(12.0)
    );
}

// === Malformed expressions ===

#[test]
fn adjacent_shapes_without_combinator_hint() {
    let err = compile_err("LAYER 1\nSYMBOL s\nrect(dx=1, dy=1, c=[0,0]) rect(dx=2, dy=2, c=[0,0])");
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().contains("combinator"), "got: {}", err.message());
}

#[test]
fn unbalanced_parens_are_parse_errors() {
    assert_eq!(compile_err("LAYER 1\nSYMBOL s\nrect(dx=1").kind(), ErrorKind::Parse);
    assert_eq!(compile_err("LAYER 1\nSYMBOL s\nrect dx=1)").kind(), ErrorKind::Parse);
}
