// Property-based tests for parameter binding invariants.
//
// Three categories:
// 1. Bound accessors: names, derived edges, dimensionality preconditions
// 2. Sampling: placeholder expansion, coordinate counts and type coercion
// 3. Declarations: generated .psig files materialize in declaration order
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use pbind::diag::codes;
use pbind::expr::{Expr, Var};
use pbind::image_param::{ImageParam, OutputImageParam};
use pbind::param::Param;
use pbind::types::ScalarType;
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────────

const KEYWORDS: [&str; 6] = ["pipeline", "input", "output", "param", "constrain", "in"];

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}".prop_filter("keywords are not names", |s| !KEYWORDS.contains(&s.as_str()))
}

fn arb_element_type() -> impl Strategy<Value = ScalarType> {
    prop_oneof![
        Just(ScalarType::uint(8)),
        Just(ScalarType::uint(16)),
        Just(ScalarType::int(32)),
        Just(ScalarType::float(32)),
        Just(ScalarType::float(64)),
    ]
}

fn arb_type_name() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("bool"),
        Just("int8"),
        Just("int16"),
        Just("int32"),
        Just("int64"),
        Just("uint8"),
        Just("uint16"),
        Just("uint32"),
        Just("float32"),
        Just("float64"),
        Just("handle"),
    ]
}

/// Dimensionality plus the number of explicit coordinates around one placeholder.
fn arb_placeholder_call() -> impl Strategy<Value = (usize, usize, usize)> {
    (1usize..=5)
        .prop_flat_map(|dims| (Just(dims), 0..=dims))
        .prop_flat_map(|(dims, explicit)| (Just(dims), Just(explicit), 0..=explicit))
}

#[derive(Debug, Clone)]
enum ArgDecl {
    Input(&'static str, u64),
    Output(&'static str, u64),
    Param(&'static str),
}

fn arb_arg_decl() -> impl Strategy<Value = ArgDecl> {
    prop_oneof![
        (arb_type_name(), 0u64..=4).prop_map(|(t, d)| ArgDecl::Input(t, d)),
        (arb_type_name(), 0u64..=4).prop_map(|(t, d)| ArgDecl::Output(t, d)),
        arb_type_name().prop_map(ArgDecl::Param),
    ]
}

fn render_psig(name: &str, args: &[ArgDecl]) -> String {
    let mut out = format!("pipeline {name}\n");
    for (i, arg) in args.iter().enumerate() {
        let line = match arg {
            ArgDecl::Input(t, d) => format!("input a{i} : {t}[{d}]"),
            ArgDecl::Output(t, d) => format!("output a{i} : {t}[{d}]"),
            ArgDecl::Param(t) => format!("param a{i} : {t}"),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

// ── 1. Bound accessors ──────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn bound_names_follow_the_image(
        name in arb_name(),
        ty in arb_element_type(),
        (dims, d) in (1usize..=6).prop_flat_map(|n| (Just(n), 0..n)),
    ) {
        let im = OutputImageParam::with_name(ty, dims, name.clone());
        prop_assert_eq!(im.min(d).to_string(), format!("{name}.min.{d}"));
        prop_assert_eq!(im.extent(d).to_string(), format!("{name}.extent.{d}"));
        prop_assert_eq!(im.stride(d).to_string(), format!("{name}.stride.{d}"));
        prop_assert_eq!(im.min(d).ty(), ScalarType::int(32));
    }

    #[test]
    fn derived_edges_match_their_definitions(dims in 2usize..=5, ty in arb_element_type()) {
        let im = ImageParam::new(ty, dims);
        prop_assert_eq!(im.left().unwrap(), im.min(0));
        prop_assert_eq!(im.right().unwrap(), im.min(0) + im.extent(0) - 1);
        prop_assert_eq!(im.top().unwrap(), im.min(1));
        prop_assert_eq!(im.bottom().unwrap(), im.min(1) + im.extent(1) - 1);
        prop_assert_eq!(im.width().unwrap(), im.extent(0));
        prop_assert_eq!(im.height().unwrap(), im.extent(1));
    }

    #[test]
    fn edges_need_enough_dimensions(dims in 0usize..=2) {
        let im = ImageParam::new(ScalarType::uint(8), dims);
        prop_assert!(im.channels().unwrap_err().has_code(codes::E0100));
        if dims < 2 {
            prop_assert!(im.bottom().unwrap_err().has_code(codes::E0100));
            prop_assert!(im.height().unwrap_err().has_code(codes::E0100));
        }
        if dims == 0 {
            prop_assert!(im.left().unwrap_err().has_code(codes::E0100));
            prop_assert!(im.right().unwrap_err().has_code(codes::E0100));
        }
    }

    #[test]
    fn installed_constraints_fold_into_edges(
        dims in 1usize..=4,
        min in -1000i32..1000,
        extent in 1i32..5000,
    ) {
        let im = OutputImageParam::with_name(ScalarType::float(32), dims, "folded");
        im.set_bounds(0, min, extent).unwrap();
        prop_assert_eq!(im.apply_constraints(&im.extent(0)).as_int(), Some(i64::from(extent)));
        let right = im.apply_constraints(&im.right().unwrap());
        prop_assert_eq!(right.as_int(), Some(i64::from(min) + i64::from(extent) - 1));
        prop_assert_eq!(im.extent_constraint(0), Some(Expr::int32(extent)));
    }

    #[test]
    fn constraints_past_the_last_dimension_are_rejected(dims in 0usize..=4, extra in 0usize..3) {
        let im = OutputImageParam::with_name(ScalarType::uint(8), dims, "bounded");
        let err = im.set_extent(dims + extra, 8).unwrap_err();
        prop_assert!(err.has_code(codes::E0101));
    }
}

// ── 2. Sampling ─────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn placeholder_expands_in_place((dims, explicit, at) in arb_placeholder_call()) {
        let im = ImageParam::new(ScalarType::uint(8), dims);
        let mut coords: Vec<Expr> = (0..explicit).map(|i| Expr::int32(100 + i as i32)).collect();
        coords.insert(at, Var::placeholder().to_expr());

        let call = im.call(coords).unwrap();
        let Expr::Call { args, .. } = call else {
            panic!("expected a call");
        };
        prop_assert_eq!(args.len(), dims);

        let implicit = dims - explicit;
        for (i, arg) in args.iter().enumerate() {
            if i < at {
                prop_assert_eq!(arg.as_int(), Some(100 + i as i64));
            } else if i < at + implicit {
                let expected = Var::implicit(i - at).to_expr();
                prop_assert_eq!(arg, &expected);
            } else {
                prop_assert_eq!(arg.as_int(), Some(100 + (i - implicit) as i64));
            }
        }
    }

    #[test]
    fn second_placeholder_is_rejected(dims in 1usize..=5, explicit in 0usize..4) {
        let im = ImageParam::new(ScalarType::float(32), dims);
        let mut coords: Vec<Expr> = (0..explicit).map(|i| Expr::int32(i as i32)).collect();
        coords.push(Var::placeholder().to_expr());
        coords.insert(0, Var::placeholder().to_expr());
        let err = im.call(coords).unwrap_err();
        prop_assert!(err.has_code(codes::E0104));
    }

    #[test]
    fn coordinate_count_must_match(dims in 0usize..=5, given in 1usize..=7) {
        prop_assume!(given != dims);
        let im = ImageParam::new(ScalarType::int(32), dims);
        let coords: Vec<Expr> = (0..given).map(|i| Expr::int32(i as i32)).collect();
        let err = im.call(coords).unwrap_err();
        prop_assert!(err.has_code(codes::E0102));
        let expected = format!("{given}-argument access");
        prop_assert!(err.message.contains(&expected));
    }

    #[test]
    fn zero_arguments_need_a_zero_dimensional_image(dims in 1usize..=5) {
        let im = ImageParam::new(ScalarType::int(32), dims);
        let err = im.call(Vec::<Expr>::new()).unwrap_err();
        prop_assert!(err.has_code(codes::E0106));
    }

    #[test]
    fn float_coordinates_are_rejected(
        (dims, slot) in (1usize..=4).prop_flat_map(|n| (Just(n), 0..n)),
        value in -100.0f64..100.0,
        wide in any::<bool>(),
    ) {
        let im = ImageParam::new(ScalarType::uint(8), dims);
        let float = ScalarType::float(if wide { 64 } else { 32 });
        let mut coords: Vec<Expr> = (0..dims).map(|i| Expr::int32(i as i32)).collect();
        coords[slot] = Expr::make_float(float, value);
        let err = im.call(coords).unwrap_err();
        prop_assert!(err.has_code(codes::E0103));
        let expected = format!("argument {}", slot + 1);
        prop_assert!(err.message.contains(&expected));
    }

    #[test]
    fn narrow_integer_coordinates_widen(
        (dims, slot) in (1usize..=4).prop_flat_map(|n| (Just(n), 0..n)),
        value in -1000i64..1000,
    ) {
        let im = ImageParam::new(ScalarType::uint(8), dims);
        let mut coords: Vec<Expr> = (0..dims).map(|i| Expr::int32(i as i32)).collect();
        coords[slot] = Expr::variable(ScalarType::int(16), "narrow");
        let Expr::Call { args, .. } = im.call(coords).unwrap() else {
            panic!("expected a call");
        };
        prop_assert!(args.iter().all(|a| a.ty() == ScalarType::int(32)));
        let widened = matches!(&args[slot], Expr::Cast { .. });
        prop_assert!(widened);

        let mut coords: Vec<Expr> = (0..dims).map(|i| Expr::int32(i as i32)).collect();
        coords[slot] = Expr::make_const(ScalarType::uint(16), value.rem_euclid(65536));
        let Expr::Call { args, .. } = im.call(coords).unwrap() else {
            panic!("expected a call");
        };
        prop_assert_eq!(args[slot].ty(), ScalarType::int(32));
    }

    #[test]
    fn scalar_set_then_get(value in any::<i32>(), f in -1.0e6f32..1.0e6) {
        let p = Param::<i32>::new();
        p.set(value);
        prop_assert_eq!(p.get().unwrap(), value);

        let q = Param::<f32>::with_value("gain", f);
        prop_assert_eq!(q.get().unwrap(), f);
    }
}

// ── 3. Declarations ─────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn declarations_materialize_in_order(
        name in arb_name(),
        args in prop::collection::vec(arb_arg_decl(), 0..8),
    ) {
        let source = render_psig(&name, &args);
        let decl = pbind::signature::load(&source)
            .unwrap_or_else(|errors| panic!("{source}\nfailed: {errors:#?}"));

        prop_assert_eq!(&decl.signature.name, &name);
        prop_assert_eq!(decl.signature.arguments.len(), args.len());
        for (i, (arg, want)) in decl.signature.arguments.iter().zip(&args).enumerate() {
            let expected_name = format!("a{i}");
            prop_assert_eq!(&arg.name, &expected_name);
            match want {
                ArgDecl::Input(t, d) | ArgDecl::Output(t, d) => {
                    prop_assert!(arg.is_buffer());
                    prop_assert_eq!(arg.ty.to_string(), *t);
                    prop_assert_eq!(arg.dimensions as u64, *d);
                }
                ArgDecl::Param(t) => {
                    prop_assert!(!arg.is_buffer());
                    prop_assert_eq!(arg.ty.to_string(), *t);
                }
            }
        }

        let again = pbind::signature::load(&source).unwrap();
        prop_assert_eq!(decl.signature.fingerprint_hex(), again.signature.fingerprint_hex());
    }
}
