use typy_ast::Stmt;
use typy_parse::{MAX_NESTING, parse_source, parse_source_with_recovery};

#[test]
fn broken_def_header_yields_one_error_and_keeps_later_statements() {
    let src = "def f(:\n    pass\nx: int = 1\ny = x\n";
    let (module, errors) = parse_source_with_recovery(src);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(module.body.len(), 2);
    assert!(matches!(module.body[0], Stmt::AnnAssign(_)));
}

#[test]
fn error_inside_function_body_keeps_siblings() {
    let src = "def f() -> int:\n    a = (1 +\n    b = 2\n    return b\nz = 3\n";
    let (module, errors) = parse_source_with_recovery(src);
    assert!(!errors.is_empty());
    let Stmt::FunctionDef(def) = &module.body[0] else {
        panic!("expected the function to survive");
    };
    assert!(def.body.stmts.iter().any(|s| matches!(s, Stmt::Return(_))));
    assert!(matches!(module.body.last(), Some(Stmt::Assign(_))));
}

#[test]
fn every_broken_line_is_reported() {
    let src = "a = )\nb = 1\nc = (]\nd = 2\n";
    let (module, errors) = parse_source_with_recovery(src);
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert_eq!(module.body.len(), 2);
}

#[test]
fn unexpected_indent_skips_the_block() {
    let src = "x = 1\n    y = 2\n    z = 3\nw = 4\n";
    let (module, errors) = parse_source_with_recovery(src);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("unexpected indent"));
    assert_eq!(module.body.len(), 2);
}

#[test]
fn lexical_errors_are_reported_once_per_line() {
    let src = "x = $\ny = 2\n";
    let (module, errors) = parse_source_with_recovery(src);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].message.contains("unexpected character"));
    assert_eq!(module.body.len(), 1);
}

#[test]
fn fail_fast_parse_reports_the_first_error() {
    let err = parse_source("x = (\n").expect_err("expected parse error");
    assert!(err.message.starts_with("expected"), "{}", err.message);
}

#[test]
fn missing_block_is_reported() {
    let (_, errors) = parse_source_with_recovery("if x:\npass\n");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("indented block"));
}

fn parenthesized(depth: usize) -> String {
    format!("{}1{}", "(".repeat(depth), ")".repeat(depth))
}

#[test]
fn nesting_below_the_limit_parses() {
    let src = format!("x = {}\n", parenthesized(MAX_NESTING - 10));
    let (module, errors) = parse_source_with_recovery(&src);
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(module.body.len(), 1);
}

#[test]
fn excessive_nesting_is_a_syntax_error() {
    let src = format!("x = {}\ny = 2\n", parenthesized(MAX_NESTING * 3));
    let (module, errors) = parse_source_with_recovery(&src);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].message, "expression nested too deeply");
    assert!(errors[0].span.offset() > MAX_NESTING);
    assert_eq!(module.body.len(), 1);
}

#[test]
fn long_operator_chains_parse() {
    let src = format!("x = 1{}\n", " + 1".repeat(3_000));
    let (module, errors) = parse_source_with_recovery(&src);
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(module.body.len(), 1);
}
