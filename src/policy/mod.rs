//! Phase-conditional file access policy.
//!
//! [`is_test_file`] is the pure classifier both enforcement points share:
//! the executor consults it inline on every file-mutation tool call during
//! the TDD-write phase, and the external pre-tool-use hook applies the
//! identical rule set (see [`hook`]). The two must agree on every path.
//!
//! Matching is case-sensitive on the basename plus a path-substring check
//! for directory patterns; Windows separators are normalized to `/` first.

pub mod hook;

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Write policy attached to a phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhasePolicy {
    /// No restriction on modified paths.
    #[default]
    Unrestricted,
    /// Only test files may be modified (the TDD-write rule).
    TestsOnly,
}

/// Directory names whose presence anywhere in the path marks a test file.
const TEST_DIRS: &[&str] = &[
    "test",
    "tests",
    "__tests__",
    "spec",
    "e2e",
    "integration",
    "fixture",
    "fixtures",
    "testdata",
    "mock",
    "mocks",
    "stub",
    "stubs",
    "fake",
    "fakes",
];

/// Suffixes of test-file basenames: `*_test.go`, `foo.test.ts`, ...
const TEST_SUFFIXES: &[&str] = &[
    "_test.go",
    "_test.py",
    "_test.ts",
    "_test.js",
    "_test.tsx",
    "_test.jsx",
    "_test.rs",
    "_test.rb",
    ".test.ts",
    ".test.js",
    ".test.tsx",
    ".test.jsx",
    ".test.mjs",
    ".test.cjs",
    ".spec.ts",
    ".spec.js",
    ".spec.tsx",
    ".spec.jsx",
    ".spec.mjs",
    ".spec.cjs",
    ".spec.rb",
    "_spec.rb",
];

/// Suffixes of mock/stub/fake basenames.
const MOCK_SUFFIXES: &[&str] = &[
    ".mock.ts", ".mock.js", ".mock.go", ".mock.py", ".mock.tsx", ".mock.jsx",
    ".stub.ts", ".stub.js", ".stub.go", ".stub.py", ".stub.tsx", ".stub.jsx",
    ".fake.ts", ".fake.js", ".fake.go", ".fake.py", ".fake.tsx", ".fake.jsx",
];

/// Exact test-infrastructure basenames.
const INFRA_BASENAMES: &[&str] = &["conftest.py", "pytest.ini"];

fn infra_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"^(jest|vitest|playwright|cypress)\.config\..+$").expect("valid regex"),
            Regex::new(r"^setupTests?\.(ts|js|tsx|jsx)$").expect("valid regex"),
        ]
    })
}

/// Classify a path as a test file.
pub fn is_test_file(path: &str) -> bool {
    let path = path.replace('\\', "/");
    let basename = path.rsplit('/').next().unwrap_or(&path);

    if TEST_SUFFIXES.iter().any(|s| basename.ends_with(s)) {
        return true;
    }
    if basename.starts_with("test_") && basename.ends_with(".py") {
        return true;
    }
    if MOCK_SUFFIXES.iter().any(|s| basename.ends_with(s)) {
        return true;
    }
    if INFRA_BASENAMES.contains(&basename) {
        return true;
    }
    if infra_patterns().iter().any(|re| re.is_match(basename)) {
        return true;
    }
    TEST_DIRS.iter().any(|dir| {
        path.starts_with(&format!("{dir}/")) || path.contains(&format!("/{dir}/"))
    })
}

/// The machine-readable denial reason both enforcement points emit.
pub fn block_reason(path: &str) -> String {
    format!(
        "{path} is not a test file; only test files may be modified during the tdd_write phase"
    )
}

/// Check a file mutation against a phase policy. `Err` carries the
/// machine-readable reason.
pub fn check_write(policy: PhasePolicy, path: &str) -> Result<(), String> {
    match policy {
        PhasePolicy::Unrestricted => Ok(()),
        PhasePolicy::TestsOnly => {
            if is_test_file(path) {
                Ok(())
            } else {
                Err(block_reason(path))
            }
        }
    }
}
