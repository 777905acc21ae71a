use std::future::Future;

use crate::core::domain::{ExecutionResult, TestCase, TestResult};

/// Feeds each test case's input to `run`, one at a time, and scores the output.
///
/// The next case starts only after the previous one has finished, so at most
/// one execution context exists at any moment.
pub async fn run_sequentially<F, Fut>(test_cases: &[TestCase], mut run: F) -> Vec<TestResult>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ExecutionResult>,
{
    let mut results = Vec::with_capacity(test_cases.len());
    for test_case in test_cases {
        let result = run(test_case.input.clone()).await;
        let test_result = TestResult::from((test_case, result));
        tracing::debug!(
            id = %test_case.id,
            name = %test_case.name,
            passed = test_result.passed,
            "test case finished"
        );
        results.push(test_result);
    }
    results
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use itertools::Itertools;

    use super::*;

    fn cases(inputs: &[(&str, &str)]) -> Vec<TestCase> {
        inputs
            .iter()
            .enumerate()
            .map(|(idx, (input, expected))| TestCase {
                id: idx.to_string(),
                name: format!("case {idx}"),
                input: input.to_string(),
                expected_output: expected.to_string(),
                description: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_one_result_per_case_in_order() {
        let test_cases = cases(&[("a", "A"), ("b", "wrong"), ("c", "C\n")]);
        let results = run_sequentially(&test_cases, |input| async move {
            ExecutionResult::success(input.to_uppercase(), Duration::from_millis(1))
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.test_case.id.as_str()).collect_vec(),
            vec!["0", "1", "2"]
        );
        assert_eq!(
            results.iter().map(|r| r.passed).collect_vec(),
            vec![true, false, true]
        );
        assert_eq!(results[1].actual_output, "B");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let results = run_sequentially(&[], |_| async {
            ExecutionResult::success("", Duration::ZERO)
        })
        .await;
        assert!(results.is_empty());
    }
}
