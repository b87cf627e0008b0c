use typy_core::{Diagnostic, DiagnosticCode, Location, Severity, check_source};

fn check(src: &str) -> Vec<Diagnostic> {
    check_source("module.py", src)
}

fn messages(src: &str) -> Vec<String> {
    check(src).into_iter().map(|d| d.message).collect()
}

fn codes(src: &str) -> Vec<DiagnosticCode> {
    check(src).into_iter().map(|d| d.code).collect()
}

#[test]
fn annotated_module_is_clean() {
    let src = r#"from typing import Optional


class Stack:
    def __init__(self) -> None:
        self.items: list[int] = []

    def push(self, x: int) -> None:
        self.items.append(x)

    def pop(self) -> Optional[int]:
        if not self.items:
            return None
        return self.items.pop()


def total(xs: list[int]) -> int:
    result = 0
    for x in xs:
        result += x
    return result


s = Stack()
s.push(1)
top = s.pop()
if top is not None:
    print(top + 1)
print(total([1, 2, 3]))
"#;
    let diags = check(src);
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn one_mismatch_points_at_the_initializer() {
    let diags = check("x: int = \"s\"\n");
    assert_eq!(diags.len(), 1);
    let d = &diags[0];
    assert_eq!(d.code, DiagnosticCode::TypeMismatch);
    assert_eq!(d.severity, Severity::Error);
    assert_eq!(d.message, "type mismatch for `x`: expected `int`, got `str`");
    assert_eq!(d.location, Location { line: 1, col: 10 });
    assert_eq!(d.to_string(), "module.py:1:10: error[TypeMismatch]: type mismatch for `x`: expected `int`, got `str`");
}

#[test]
fn checking_continues_after_a_syntax_error() {
    let codes = codes("def f(:\n    pass\n\ny: int = 'a'\n");
    assert_eq!(codes[0], DiagnosticCode::SyntaxError);
    assert_eq!(codes.iter().filter(|c| **c == DiagnosticCode::SyntaxError).count(), 1);
    assert!(codes.contains(&DiagnosticCode::TypeMismatch), "{codes:?}");
}

#[test]
fn undefined_names_are_reported() {
    assert_eq!(messages("print(missing)\n"), vec!["undefined name `missing`"]);
}

#[test]
fn any_and_unknown_never_complain() {
    let src = "from typing import Any\n\n\ndef f(x: Any, y) -> int:\n    z: str = x\n    return y.whatever + x\n";
    assert!(check(src).is_empty());
}

#[test]
fn unannotated_variables_keep_their_first_type() {
    assert_eq!(
        messages("x = 1\nx = 'a'\n"),
        vec!["type mismatch for `x`: expected `int`, got `str`"]
    );
    assert_eq!(
        messages("x = None\nx = 1\nx = 'a'\n"),
        vec!["type mismatch for `x`: expected `int | None`, got `str`"]
    );
}

#[test]
fn empty_containers_are_refined_by_later_assignments() {
    let src = "xs = []\nxs = [1]\nxs.append('a')\n";
    assert_eq!(
        messages(src),
        vec!["type mismatch for argument `object` of `append`: expected `int`, got `str`"]
    );
}

#[test]
fn conflicting_declarations_carry_the_previous_span() {
    let diags = check("def f() -> None:\n    pass\n\nf = 1\n");
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, DiagnosticCode::SymbolConflictError);
    assert_eq!(diags[0].related.len(), 1);
    assert_eq!(diags[0].related[0].location.line, 1);
}

#[test]
fn redefining_a_function_is_only_a_warning() {
    let src = "def f() -> None:\n    pass\n\n\ndef f() -> None:\n    pass\n";
    let diags = check(src);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, DiagnosticCode::Redefinition);
    assert!(!diags[0].is_error());
}

#[test]
fn returns_are_checked() {
    assert_eq!(
        messages("def f() -> str:\n    return 1\n"),
        vec!["incompatible return value: expected `str`, got `int`"]
    );
    assert_eq!(
        messages("def f(x: int) -> int:\n    if x:\n        return 1\n"),
        vec!["missing return statement in `f`: declared return type `int`"]
    );
    assert!(check("def f() -> int:\n    ...\n").is_empty());
    assert_eq!(codes("return 1\n"), vec![DiagnosticCode::SyntaxError]);
}

#[test]
fn unknown_attributes_on_classes_with_known_bases() {
    let src = "class A:\n    def __init__(self) -> None:\n        self.x = 1\n\n\na = A()\na.x\na.y\n";
    assert_eq!(messages(src), vec!["`A` has no attribute `y`"]);
}

#[test]
fn attribute_on_optional_mentions_the_none_member() {
    let src = "def f(s: str | None) -> None:\n    s.upper()\n";
    assert_eq!(
        messages(src),
        vec!["item `None` of `str | None` has no attribute `upper`"]
    );
}

#[test]
fn operators_follow_numeric_promotion() {
    assert_eq!(
        messages("1 + 'a'\n"),
        vec!["unsupported operand types for +: `int` and `str`"]
    );
    assert_eq!(
        messages("x: float = 1 + 2.5\ny: int = 3 / 2\nz: str = 'ab' * 2\n"),
        vec!["type mismatch for `y`: expected `int`, got `float`"]
    );
}

#[test]
fn subscripts_check_index_and_key_types() {
    let src = "xs = [1, 2]\nxs['a']\nd = {'a': 1}\nd[1]\nt = (1, 'a')\ns: str = t[1]\nt[5]\n";
    assert_eq!(
        messages(src),
        vec![
            "invalid index type `str` for `list[int]`; expected `int`",
            "invalid key type `int` for `dict[str, int]`; expected `str`",
            "tuple index out of range: index 5, length 2",
        ]
    );
}

#[test]
fn loop_targets_receive_element_types() {
    assert_eq!(
        messages("for c in 'abc':\n    n: int = c\n"),
        vec!["type mismatch for `n`: expected `int`, got `str`"]
    );
    assert_eq!(
        messages("for k, v in {'a': 1}.items():\n    w: str = v\n"),
        vec!["type mismatch for `w`: expected `str`, got `int`"]
    );
    assert_eq!(codes("for i in 3:\n    pass\n"), vec![DiagnosticCode::UnsupportedOperation]);
}

#[test]
fn instances_follow_the_class_hierarchy() {
    let src = r#"class Animal:
    def speak(self) -> str:
        return ''


class Dog(Animal):
    pass


def talk(a: Animal) -> str:
    return a.speak()


talk(Dog())
talk(1)
"#;
    assert_eq!(
        messages(src),
        vec!["type mismatch for argument `a` of `talk`: expected `Animal`, got `int`"]
    );
}

#[test]
fn comprehensions_have_their_own_scope() {
    assert_eq!(
        messages("xs = [1, 2]\nys: list[str] = [x for x in xs]\n"),
        vec!["type mismatch for `ys`: expected `list[str]`, got `list[int]`"]
    );
    assert_eq!(
        messages("[y for y in range(3)]\nprint(y)\n"),
        vec!["undefined name `y`"]
    );
}

#[test]
fn walrus_binds_in_the_enclosing_scope() {
    assert_eq!(
        messages("if (n := len('abc')) > 2:\n    s: str = n\n"),
        vec!["type mismatch for `s`: expected `str`, got `int`"]
    );
}

#[test]
fn global_declarations_reach_the_module_binding() {
    let src = "count = 0\n\n\ndef bump() -> None:\n    global count\n    count += 1\n";
    assert!(check(src).is_empty());
}

#[test]
fn attribute_assignments_are_checked() {
    let src = "class P:\n    def __init__(self) -> None:\n        self.name: str = ''\n\n\np = P()\np.name = 1\n";
    assert_eq!(
        messages(src),
        vec!["type mismatch for attribute `name`: expected `str`, got `int`"]
    );
}

#[test]
fn unpacking_checks_lengths() {
    assert_eq!(
        messages("a, b = (1, 2, 3)\n"),
        vec!["cannot unpack 3 values into 2 targets"]
    );
}

#[test]
fn properties_read_as_their_return_type() {
    let src = "class C:\n    @property\n    def size(self) -> int:\n        return 1\n\n\ns: str = C().size\n";
    assert_eq!(
        messages(src),
        vec!["type mismatch for `s`: expected `str`, got `int`"]
    );
}

#[test]
fn forward_references_in_string_annotations() {
    let src = r#"class Node:
    def __init__(self, next: 'Node | None') -> None:
        self.next = next


def last(n: Node) -> Node:
    following = n.next
    while following is not None:
        n = following
        following = n.next
    return n
"#;
    let diags = check(src);
    assert!(diags.is_empty(), "{diags:?}");
}

#[test]
fn checking_twice_gives_the_same_report() {
    let src = "x: int = 'a'\ny = [1]\ny.append('b')\nprint(z)\n";
    let first: Vec<String> = check(src).iter().map(ToString::to_string).collect();
    let second: Vec<String> = check(src).iter().map(ToString::to_string).collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
}

#[test]
fn deep_expressions_are_checked_without_overflow() {
    let chain = format!("x: str = 1{}\n", " + 1".repeat(3_000));
    assert_eq!(
        messages(&chain),
        vec!["type mismatch for `x`: expected `str`, got `int`"]
    );

    let depth = 150;
    let nested = format!("y = {}1{}\nz: int = 'a'\n", "[".repeat(depth), "]".repeat(depth));
    assert_eq!(codes(&nested), vec![DiagnosticCode::TypeMismatch]);

    let negations = format!("w: str = {}1\n", "-".repeat(3_000));
    assert_eq!(codes(&negations), vec![DiagnosticCode::TypeMismatch]);
}

#[test]
fn excessive_nesting_is_reported_and_checking_continues() {
    let src = format!("x = {}1{}\ny: int = 'a'\n", "(".repeat(1_000), ")".repeat(1_000));
    assert_eq!(
        codes(&src),
        vec![DiagnosticCode::SyntaxError, DiagnosticCode::TypeMismatch]
    );
}

#[test]
fn leading_byte_order_mark_is_ignored() {
    assert!(check("\u{feff}x: int = 1\n").is_empty());
    let d = check("\u{feff}x: int = 'a'\n");
    assert_eq!(d.len(), 1);
    assert_eq!(d[0].code, DiagnosticCode::TypeMismatch);
    assert_eq!(d[0].span.offset(), "\u{feff}x: int = ".len());
}

#[test]
fn declared_unions_narrow_to_the_assigned_value() {
    assert!(check("x: int | str = 1\ny: int = x\n").is_empty());
    assert_eq!(
        codes("x: int | str = 1\nx = 'a'\ny: int = x\n"),
        vec![DiagnosticCode::TypeMismatch]
    );
    assert_eq!(
        codes("def f(x: int | str) -> None:\n    y: int = x\n"),
        vec![DiagnosticCode::TypeMismatch]
    );
}

#[test]
fn f_string_fields_are_checked() {
    assert_eq!(codes("s = f'{missing}'\n"), vec![DiagnosticCode::UndefinedName]);
    assert_eq!(
        codes("n = 1\ns = f'{n + \"a\"!r:>{n}}'\n"),
        vec![DiagnosticCode::UnsupportedOperation]
    );
    assert_eq!(codes("n = 1\nx: int = f'{n}'\n"), vec![DiagnosticCode::TypeMismatch]);
    assert!(check("n = 1\ns = f'{n=} {{literal}} {[n for n in range(3)]}'\n").is_empty());
}
