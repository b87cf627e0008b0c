use proptest::prelude::*;
use typy_core::{DiagnosticCode, check_source};

const ANNOTATIONS: &[&str] = &[
    "int",
    "str",
    "float",
    "bool",
    "list[int]",
    "dict[str, list[int]]",
    "tuple[int, ...]",
    "set[str] | None",
    "Callable[[int], str]",
];

fn annotation() -> impl Strategy<Value = &'static str> {
    prop::sample::select(ANNOTATIONS)
}

proptest! {
    #[test]
    fn escape_types_never_produce_diagnostics(ann in annotation(), name in "[a-z]{1,8}") {
        let src = format!(
            "from typing import Any, Callable\n\n\ndef f(v: Any, u) -> None:\n    {name}_a: {ann} = v\n    {name}_b: {ann} = u\n    v.anything(u, {name}_a)\n"
        );
        let diags = check_source("prop.py", &src);
        prop_assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn int_literal_against_str_is_one_mismatch(n in 0u32..1_000_000) {
        let diags = check_source("prop.py", &format!("x: str = {n}\ny: int = {n}\n"));
        prop_assert_eq!(diags.len(), 1);
        prop_assert_eq!(diags[0].code, DiagnosticCode::TypeMismatch);
        prop_assert_eq!(diags[0].location.line, 1);
    }

    #[test]
    fn reports_are_idempotent(values in prop::collection::vec(any::<i16>(), 1..6), ann in annotation()) {
        let items = values.iter().map(i16::to_string).collect::<Vec<_>>().join(", ");
        let src = format!("xs: {ann} = [{items}]\nys = xs\nprint(ys[0] + missing)\n");
        let first: Vec<String> = check_source("prop.py", &src).iter().map(ToString::to_string).collect();
        let second: Vec<String> = check_source("prop.py", &src).iter().map(ToString::to_string).collect();
        prop_assert_eq!(first, second);
    }
}
