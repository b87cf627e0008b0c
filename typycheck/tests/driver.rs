use std::fs;
use std::path::Path;

use typycheck::report::{JsonReport, summary};
use typycheck::{CheckConfig, CheckError, Driver, check_source, type_check};
use typy_core::DiagnosticCode;

fn write(root: &Path, rel: &str, text: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pkg/ok.py", b"def f(x: int) -> int:\n    return x + 1\n");
    write(dir.path(), "pkg/bad.py", b"x: int = 'a'\n");
    write(dir.path(), "main.py", b"print(missing)\n");
    write(dir.path(), "build/gen.py", b"y: str = 1\n");
    dir
}

#[test]
fn directory_results_follow_sorted_discovery_order() {
    let dir = project();
    let result = type_check(dir.path()).unwrap();
    let names: Vec<_> = result
        .files
        .iter()
        .map(|f| f.path.strip_prefix(dir.path()).unwrap().to_path_buf())
        .collect();
    assert_eq!(
        names,
        vec![
            Path::new("main.py").to_path_buf(),
            Path::new("pkg/bad.py").to_path_buf(),
            Path::new("pkg/ok.py").to_path_buf(),
        ]
    );
    let codes: Vec<_> = result.diagnostics().map(|d| d.code).collect();
    assert_eq!(codes, vec![DiagnosticCode::UndefinedName, DiagnosticCode::TypeMismatch]);
    assert!(!result.success());
    assert!(result.files[2].success());
}

#[test]
fn missing_path_fails_before_checking() {
    let err = type_check("/nonexistent/typycheck/path").unwrap_err();
    assert!(matches!(err, CheckError::NotFound { .. }));
}

#[test]
fn valid_file_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "ok.py", b"def greet(name: str) -> str:\n    return 'hi ' + name\n");
    let result = type_check(dir.path().join("ok.py")).unwrap();
    assert!(result.success());
    assert_eq!(result.files_checked(), 1);
    assert_eq!(result.diagnostics().count(), 0);
}

#[test]
fn non_utf8_file_is_an_io_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "latin.py", b"s = '\xe9'\n");
    write(dir.path(), "z.py", b"z: int = 1\n");
    let result = type_check(dir.path()).unwrap();
    assert_eq!(result.files_checked(), 2);
    let io: Vec<_> = result.files[0].diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(io, vec![DiagnosticCode::Io]);
    assert!(result.files[1].success());
    assert!(!result.success());
}

#[test]
fn warnings_fail_only_when_requested() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "dup.py",
        b"def f() -> None:\n    pass\n\n\ndef f() -> None:\n    pass\n",
    );
    let lenient = Driver::new(CheckConfig::default()).check(dir.path()).unwrap();
    assert_eq!(lenient.warning_count(), 1);
    assert!(lenient.success());

    let strict = Driver::new(CheckConfig {
        warnings_as_errors: true,
        ..CheckConfig::default()
    })
    .check(dir.path())
    .unwrap();
    assert!(!strict.success());
}

#[test]
fn thread_count_does_not_change_the_report() {
    let dir = project();
    for i in 0..12 {
        write(dir.path(), &format!("many/m{i:02}.py"), format!("v{i}: str = {i}\n").as_bytes());
    }
    let render = |jobs| {
        Driver::new(CheckConfig {
            jobs,
            ..CheckConfig::default()
        })
        .check(dir.path())
        .unwrap()
        .diagnostics()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
    };
    let single = render(1);
    assert_eq!(single.len(), 14);
    assert_eq!(single, render(4));
    assert_eq!(single, render(0));
}

#[test]
fn in_memory_source_reports_syntax_then_type_errors() {
    let report = check_source("mem.py", "def f(:\n    pass\n\ny: int = 'a'\n");
    assert_eq!(report.path, Path::new("mem.py"));
    assert_eq!(report.diagnostics[0].code, DiagnosticCode::SyntaxError);
    assert!(report.diagnostics.iter().any(|d| d.code == DiagnosticCode::TypeMismatch));
    assert!(!report.success());
}

#[test]
fn json_report_lists_every_diagnostic() {
    let dir = project();
    let result = type_check(dir.path()).unwrap();
    let value = serde_json::to_value(JsonReport::new(&result)).unwrap();
    assert_eq!(value["schema"], "typycheck.report.v1");
    assert_eq!(value["success"], false);
    assert_eq!(value["files_checked"], 3);
    assert_eq!(value["errors"], 2);
    let mismatch = &value["diagnostics"][1];
    assert_eq!(mismatch["code"], "TypeMismatch");
    assert_eq!(mismatch["severity"], "error");
    assert_eq!(mismatch["line"], 1);
    assert_eq!(mismatch["column"], 10);
    assert_eq!(mismatch["span"]["offset"], 9);
    assert!(summary(&result).starts_with("found 2 errors and 0 warnings in 3 files"));
}

#[test]
fn very_long_expressions_are_checked_on_pool_workers() {
    let dir = tempfile::tempdir().unwrap();
    let chain = format!("x: str = 1{}\n", " + 1".repeat(20_000));
    write(dir.path(), "chain.py", chain.as_bytes());
    let nested = format!("y = {}1{}\n", "(".repeat(1_000), ")".repeat(1_000));
    write(dir.path(), "nested.py", nested.as_bytes());

    let result = Driver::new(CheckConfig { jobs: 2, ..CheckConfig::default() })
        .check(dir.path())
        .unwrap();
    let codes: Vec<_> = result.diagnostics().map(|d| d.code).collect();
    assert_eq!(codes, vec![DiagnosticCode::TypeMismatch, DiagnosticCode::SyntaxError]);
}

#[test]
fn in_memory_source_matches_the_core_pipeline() {
    let src = "def f(:\nx: int = 'a'\nprint(f'{missing}')\n";
    let report = check_source("m.py", src);
    let core: Vec<_> = typy_core::check_source("m.py", src)
        .iter()
        .map(ToString::to_string)
        .collect();
    let driver: Vec<_> = report.diagnostics.iter().map(ToString::to_string).collect();
    assert_eq!(driver, core);
    assert_eq!(driver.len(), 3);
}
