//! Path safety invariants
//!
//! Everything outside the workspace root is rejected, blocked directory
//! segments are matched segment-equal (never substring), and resolution
//! is idempotent.

use switchyard::analysis::PathPolicy;

fn policy() -> PathPolicy {
    PathPolicy::new("/workspace")
}

#[test]
fn test_paths_outside_workspace_rejected() {
    let cases = [
        "/home/user/secret.txt",
        "/workspace/../home/user/secret.txt",
        "/etc/passwd",
        "/proc/self/environ",
        "/sys/class/net",
        "/workspace/a/b/../../../outside.rs",
    ];
    for input in cases {
        let err = policy().resolve(input).unwrap_err();
        assert_eq!(err.kind(), "rejected", "{} must be rejected", input);
    }
}

#[test]
fn test_blocked_segment_vs_lookalike_name() {
    // The directory segment is blocked...
    assert_eq!(
        policy().resolve("/workspace/build").unwrap_err().kind(),
        "rejected"
    );
    assert_eq!(
        policy()
            .resolve("/workspace/pkg/node_modules/dep/index.js")
            .unwrap_err()
            .kind(),
        "rejected"
    );

    // ...but a file whose name merely contains the word is served.
    assert!(policy().resolve("/workspace/build_scripts.go").is_ok());
    assert!(policy().resolve("/workspace/rebuild.rs").is_ok());
    assert!(policy().resolve("/workspace/distance/calc.rs").is_ok());
}

#[test]
fn test_resolution_is_idempotent() {
    let inputs = [
        "/workspace/src/main.rs",
        "relative/path.rs",
        r"C:\workspace\windows\style.ts",
        r"\\wsl.localhost\Ubuntu\workspace\wsl\file.py",
        "/workspace//double//separators.rs",
    ];
    let pol = policy();
    for input in inputs {
        let once = pol.resolve(input).expect(input);
        let twice = pol.resolve(&once.display().to_string()).expect(input);
        assert_eq!(once, twice, "resolve(resolve({})) must be stable", input);
    }
}

#[test]
fn test_surface_forms_converge() {
    let pol = policy();
    let posix = pol.resolve("/workspace/src/app.py").unwrap();
    let windows = pol.resolve(r"C:\workspace\src\app.py").unwrap();
    let wsl = pol
        .resolve(r"\\wsl.localhost\Ubuntu\workspace\src\app.py")
        .unwrap();
    assert_eq!(posix, windows);
    assert_eq!(posix, wsl);
}

#[test]
fn test_diagnosis_reports_failing_gate() {
    let report = policy().diagnose("/workspace/../etc/passwd");
    assert!(
        report.checks.iter().any(|c| !c.passed),
        "at least one check must fail"
    );

    let report = policy().diagnose("/workspace/src/ok.rs");
    let path_checks_pass = report
        .checks
        .iter()
        .filter(|c| c.name != "exists" && c.name != "size_within_limit")
        .all(|c| c.passed);
    assert!(path_checks_pass);
}
