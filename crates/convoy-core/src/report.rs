//! Structured test reports workers upload while building.

use serde::{Deserialize, Serialize};

/// A full test report for one node-run. A node-run has at most one current
/// report; a later upload from the same job replaces it wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestReport {
    pub total: i32,
    pub ok: i32,
    pub ko: i32,
    pub skipped: i32,
    pub suites: Vec<TestSuite>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    pub total: i32,
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub status: TestCaseStatus,
    #[serde(default)]
    pub failures: Vec<TestFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestCaseStatus {
    Ok,
    Ko,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestFailure {
    pub value: String,
    pub kind: String,
    pub message: String,
}

impl TestReport {
    /// Recompute the run-level aggregates by summing over the suites of
    /// this report. Reported totals are not trusted; the cases are.
    pub fn recompute(&mut self) {
        self.total = 0;
        self.ok = 0;
        self.ko = 0;
        self.skipped = 0;
        for suite in &mut self.suites {
            suite.total = suite.cases.len() as i32;
            for case in &suite.cases {
                self.total += 1;
                match case.status {
                    TestCaseStatus::Ok => self.ok += 1,
                    TestCaseStatus::Ko => self.ko += 1,
                    TestCaseStatus::Skipped => self.skipped += 1,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(name: &str, status: TestCaseStatus) -> TestCase {
        TestCase {
            name: name.to_string(),
            status,
            failures: vec![],
        }
    }

    #[test]
    fn aggregates_are_summed_over_suites() {
        let mut report = TestReport {
            suites: vec![
                TestSuite {
                    name: "suite-1".to_string(),
                    total: 0,
                    cases: vec![case("case-1", TestCaseStatus::Ok)],
                },
                TestSuite {
                    name: "suite-2".to_string(),
                    total: 0,
                    cases: vec![case("case-1", TestCaseStatus::Ko)],
                },
            ],
            ..TestReport::default()
        };
        report.recompute();

        assert_eq!(report.total, 2);
        assert_eq!(report.ok, 1);
        assert_eq!(report.ko, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.suites[0].total, 1);
    }

    #[test]
    fn declared_totals_are_overwritten() {
        let mut report = TestReport {
            total: 99,
            ok: 99,
            suites: vec![TestSuite {
                name: "suite".to_string(),
                total: 99,
                cases: vec![case("only", TestCaseStatus::Skipped)],
            }],
            ..TestReport::default()
        };
        report.recompute();
        assert_eq!((report.total, report.ok, report.skipped), (1, 0, 1));
    }
}
