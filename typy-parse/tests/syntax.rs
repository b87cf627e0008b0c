use typy_ast::{
    BinOp, BoolOp, CallArg, CmpOp, CompKind, ExprKind, ParamKind, Stmt,
};
use typy_parse::{parse_expr, parse_source};

#[test]
fn annotated_function_parses() {
    let src = "def add(a: int, b: int = 2, *args: int, key: str, **kw: object) -> int:\n    return a + b\n";
    let module = parse_source(src).expect("parse");
    let Stmt::FunctionDef(def) = &module.body[0] else {
        panic!("expected a function definition");
    };
    assert_eq!(def.name.node, "add");
    let kinds: Vec<ParamKind> = def.params.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ParamKind::Regular,
            ParamKind::Regular,
            ParamKind::VarPositional,
            ParamKind::KeywordOnly,
            ParamKind::VarKeyword,
        ]
    );
    assert!(def.params[1].default.is_some());
    assert!(def.returns.is_some());
    assert_eq!(def.body.stmts.len(), 1);
}

#[test]
fn positional_only_marker_applies_to_preceding_params() {
    let module = parse_source("def f(a, b, /, c):\n    pass\n").expect("parse");
    let Stmt::FunctionDef(def) = &module.body[0] else {
        panic!("expected a function definition");
    };
    let kinds: Vec<ParamKind> = def.params.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![ParamKind::PositionalOnly, ParamKind::PositionalOnly, ParamKind::Regular]
    );
}

#[test]
fn default_ordering_is_enforced() {
    let err = parse_source("def f(a=1, b):\n    pass\n").expect_err("expected parse error");
    assert!(err.message.contains("without a default"), "{}", err.message);
}

#[test]
fn class_with_bases_keywords_and_decorators_parses() {
    let src = "@dataclass\nclass Point(Base, metaclass=Meta):\n    x: int = 0\n    def norm(self) -> float:\n        return 0.0\n";
    let module = parse_source(src).expect("parse");
    let Stmt::ClassDef(class) = &module.body[0] else {
        panic!("expected a class definition");
    };
    assert_eq!(class.decorators.len(), 1);
    assert_eq!(class.bases.len(), 1);
    assert_eq!(class.keywords[0].name.node, "metaclass");
    assert_eq!(class.body.stmts.len(), 2);
}

#[test]
fn chained_comparisons_keep_every_link() {
    let expr = parse_expr("a < b <= c is not None").expect("parse");
    let ExprKind::Compare { ops, comparators, .. } = expr.kind else {
        panic!("expected a comparison");
    };
    assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE, CmpOp::IsNot]);
    assert_eq!(comparators.len(), 3);
}

#[test]
fn precedence_follows_python() {
    let expr = parse_expr("1 + 2 * 3 ** 2").expect("parse");
    let ExprKind::Binary { op, right, .. } = expr.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(op, BinOp::Add);
    let ExprKind::Binary { op, right, .. } = right.kind else {
        panic!("expected a product");
    };
    assert_eq!(op, BinOp::Mul);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Pow, .. }));

    let expr = parse_expr("not a or b and c").expect("parse");
    let ExprKind::BoolOp { op, values } = expr.kind else {
        panic!("expected a boolean operation");
    };
    assert_eq!(op, BoolOp::Or);
    assert!(matches!(values[0].kind, ExprKind::Unary { .. }));
    assert!(matches!(values[1].kind, ExprKind::BoolOp { op: BoolOp::And, .. }));
}

#[test]
fn pep604_union_annotation_parses_as_bitor() {
    let module = parse_source("x: int | None = None\n").expect("parse");
    let Stmt::AnnAssign(ann) = &module.body[0] else {
        panic!("expected an annotated assignment");
    };
    assert!(matches!(ann.annotation.kind, ExprKind::Binary { op: BinOp::BitOr, .. }));
}

#[test]
fn comprehensions_and_displays_parse() {
    let expr = parse_expr("[x * 2 for x in xs if x]").expect("parse");
    assert!(matches!(expr.kind, ExprKind::Comp { kind: CompKind::List, .. }));
    let expr = parse_expr("{k: v for k, v in pairs}").expect("parse");
    assert!(matches!(expr.kind, ExprKind::DictComp { .. }));
    let expr = parse_expr("{1, 2, *rest}").expect("parse");
    assert!(matches!(expr.kind, ExprKind::Set(ref items) if items.len() == 3));
    let expr = parse_expr("sum(x for x in xs)").expect("parse");
    let ExprKind::Call { args, .. } = expr.kind else {
        panic!("expected a call");
    };
    assert!(matches!(
        args[0].value().kind,
        ExprKind::Comp { kind: CompKind::Generator, .. }
    ));
}

#[test]
fn call_arguments_keep_their_form() {
    let expr = parse_expr("f(1, *a, key=2, **kw)").expect("parse");
    let ExprKind::Call { args, .. } = expr.kind else {
        panic!("expected a call");
    };
    assert!(matches!(args[0], CallArg::Positional(_)));
    assert!(matches!(args[1], CallArg::Star(_)));
    assert!(matches!(args[2], CallArg::Keyword { .. }));
    assert!(matches!(args[3], CallArg::DoubleStar(_)));
}

#[test]
fn control_flow_statements_parse() {
    let src = r#"
for i, (a, b) in pairs:
    if a:
        continue
    elif b:
        break
    else:
        pass
else:
    pass
while n > 0:
    n -= 1
try:
    risky()
except (ValueError, KeyError) as err:
    raise RuntimeError("bad") from err
else:
    ok = True
finally:
    done()
with open(p) as fh, lock:
    data = fh.read()
"#;
    let module = parse_source(src).expect("parse");
    assert_eq!(module.body.len(), 4);
    let Stmt::For(for_stmt) = &module.body[0] else {
        panic!("expected a for loop");
    };
    assert!(matches!(for_stmt.target.kind, ExprKind::Tuple(ref items) if items.len() == 2));
    let Stmt::If(if_stmt) = &for_stmt.body.stmts[0] else {
        panic!("expected an if statement");
    };
    let elif = if_stmt.orelse.as_ref().expect("elif branch");
    assert!(matches!(elif.stmts[0], Stmt::If(_)));
    let Stmt::Try(try_stmt) = &module.body[2] else {
        panic!("expected a try statement");
    };
    assert_eq!(try_stmt.handlers[0].name.as_ref().map(|n| n.node.as_str()), Some("err"));
    assert!(try_stmt.finalbody.is_some());
}

#[test]
fn imports_parse() {
    let src = "import os.path as osp, sys\nfrom typing import (Optional,\n    List as L,)\nfrom . import sibling\nfrom ..pkg import *\n";
    let module = parse_source(src).expect("parse");
    let Stmt::Import(import) = &module.body[0] else {
        panic!("expected an import");
    };
    assert_eq!(import.names[0].name.node, "os.path");
    assert_eq!(import.names[0].asname.as_ref().map(|a| a.node.as_str()), Some("osp"));
    let Stmt::ImportFrom(from) = &module.body[1] else {
        panic!("expected a from-import");
    };
    assert_eq!(from.names.len(), 2);
    let Stmt::ImportFrom(relative) = &module.body[2] else {
        panic!("expected a relative import");
    };
    assert_eq!(relative.level, 1);
    assert!(relative.module.is_none());
    let Stmt::ImportFrom(star) = &module.body[3] else {
        panic!("expected a star import");
    };
    assert_eq!(star.level, 2);
    assert!(star.star.is_some());
}

#[test]
fn assignments_of_every_shape_parse() {
    let src = "a = b = 1\nx, *rest = items\nobj.attr: int = 3\ncounts[k] += 1\nlast = yield\n";
    let module = parse_source(src).expect("parse");
    let Stmt::Assign(chain) = &module.body[0] else {
        panic!("expected an assignment");
    };
    assert_eq!(chain.targets.len(), 2);
    assert!(matches!(module.body[2], Stmt::AnnAssign(_)));
    let Stmt::AugAssign(aug) = &module.body[3] else {
        panic!("expected an augmented assignment");
    };
    assert_eq!(aug.op, BinOp::Add);
}

#[test]
fn invalid_targets_are_rejected() {
    let err = parse_source("f() = 1\n").expect_err("expected parse error");
    assert!(err.message.contains("cannot assign"), "{}", err.message);
    let err = parse_source("1 + 2: int\n").expect_err("expected parse error");
    assert!(err.message.contains("annotation"), "{}", err.message);
}

#[test]
fn implicit_string_concatenation_and_literals() {
    let expr = parse_expr("'a' \"b\"").expect("parse");
    assert_eq!(expr.kind, ExprKind::StrLit("ab".to_string()));
    let expr = parse_expr("f'{x}'").expect("parse");
    let ExprKind::FStringLit(fields) = expr.kind else {
        panic!("expected an f-string");
    };
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].kind, ExprKind::Name("x".to_string()));
    assert_eq!(fields[0].span.offset(), 3);
    let err = parse_expr("b'a' 'b'").expect_err("expected parse error");
    assert!(err.message.contains("bytes"), "{}", err.message);
}

#[test]
fn f_string_fields_are_parsed_in_place() {
    let src = "s = f'a {n + 1:>{w}} b' F\"{d['k']!r}\"\n";
    let module = parse_source(src).expect("parse");
    let Stmt::Assign(assign) = &module.body[0] else {
        panic!("expected an assignment");
    };
    let ExprKind::FStringLit(fields) = &assign.value.kind else {
        panic!("expected an f-string");
    };
    assert_eq!(fields.len(), 3);
    assert!(matches!(fields[0].kind, ExprKind::Binary { op: BinOp::Add, .. }));
    assert_eq!(fields[1].kind, ExprKind::Name("w".to_string()));
    assert_eq!(fields[1].span.offset(), src.find('w').unwrap());
    assert!(matches!(fields[2].kind, ExprKind::Subscript { .. }));

    let err = parse_source("s = f'{x'\n").expect_err("expected parse error");
    assert_eq!(err.message, "f-string: expecting '}'");
    assert_eq!(err.span.offset(), 6);
    let err = parse_source("s = f'{1 +}'\n").expect_err("expected parse error");
    assert!(err.span.offset() >= 7, "{:?}", err.span);
}

#[test]
fn lambda_walrus_and_conditional_parse() {
    let expr = parse_expr("lambda x, y=1: x if x else y").expect("parse");
    let ExprKind::Lambda { params, body } = expr.kind else {
        panic!("expected a lambda");
    };
    assert_eq!(params.len(), 2);
    assert!(matches!(body.kind, ExprKind::IfExp { .. }));
    let module = parse_source("if (n := len(a)) > 10:\n    pass\n").expect("parse");
    let Stmt::If(if_stmt) = &module.body[0] else {
        panic!("expected an if statement");
    };
    let ExprKind::Compare { left, .. } = &if_stmt.test.kind else {
        panic!("expected a comparison");
    };
    assert!(matches!(left.kind, ExprKind::Named { .. }));
}

#[test]
fn slices_and_subscripts_parse() {
    let expr = parse_expr("m[1:2, ::3]").expect("parse");
    let ExprKind::Subscript { index, .. } = expr.kind else {
        panic!("expected a subscript");
    };
    let ExprKind::Tuple(items) = index.kind else {
        panic!("expected a tuple index");
    };
    assert!(items.iter().all(|i| matches!(i.kind, ExprKind::Slice { .. })));
}

#[test]
fn spans_cover_their_source_text() {
    let src = "value: int = compute(1, 2)\n";
    let module = parse_source(src).expect("parse");
    let Stmt::AnnAssign(ann) = &module.body[0] else {
        panic!("expected an annotated assignment");
    };
    let value = ann.value.as_ref().expect("initializer");
    let start = value.span.offset();
    assert_eq!(&src[start..start + value.span.len()], "compute(1, 2)");
    assert_eq!(ann.span.offset(), 0);
}

#[test]
fn inline_suites_and_semicolons_parse() {
    let module = parse_source("if x: a = 1; b = 2\nelse: pass\n").expect("parse");
    let Stmt::If(if_stmt) = &module.body[0] else {
        panic!("expected an if statement");
    };
    assert_eq!(if_stmt.body.stmts.len(), 2);
    assert!(if_stmt.orelse.is_some());
}
