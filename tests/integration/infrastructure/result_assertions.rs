use testbed::{HarnessError, Phase, TestResult, TestStatus};

/// Assertions on test results produced by the runner

/// Assert that a test passed, showing its details otherwise
pub fn assert_passed(result: &TestResult) {
    assert!(result.is_success(), "{} should pass, details: {:?}", result, result.details);
}

/// Assert that a test failed in the given phase and return the harness error, if any
pub fn assert_failed_in(result: &TestResult, phase: Phase) -> Option<&HarnessError> {
    let failure = result
        .failure()
        .unwrap_or_else(|| panic!("{} should have failed in {:?}", result, phase));
    assert_eq!(failure.phase, phase, "{} failed in the wrong phase", result);
    failure.harness_error()
}

/// Assert that a test ended with an exit request handed to its caller
pub fn assert_exited(result: &TestResult, expected: i32) {
    match result.status {
        TestStatus::Exited { code } => assert_eq!(code, expected),
        _ => panic!("{} should have exited with {}", result, expected),
    }
}
