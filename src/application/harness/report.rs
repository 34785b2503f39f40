use std::fmt;
use std::time::Duration;

use super::lifecycle::TeardownReport;

/// 1 件のテストの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    /// 失敗理由（エラーチェーンまたは panic メッセージ）
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    pub status: TestStatus,
    pub elapsed: Duration,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// テストグループ全体の結果
#[derive(Debug)]
pub struct GroupReport {
    pub group: String,
    /// 登録順のテスト結果
    pub outcomes: Vec<TestOutcome>,
    pub teardown: TeardownReport,
}

impl GroupReport {
    pub fn outcome(&self, name: &str) -> Option<&TestOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name == name)
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    /// すべてのテストが成功し、ティアダウンでもエラーが無かったか
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none() && self.teardown.is_clean()
    }

    /// 失敗があれば内容を一覧にして panic する
    ///
    /// `#[tokio::test]` の中で呼び、グループの結果をテストランナーに伝える。
    #[track_caller]
    pub fn assert_success(&self) {
        if !self.is_success() {
            panic!("{self}");
        }
    }
}

impl fmt::Display for GroupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.outcomes.len() - self.passed_count();
        writeln!(
            f,
            "test group {}: {} passed; {} failed",
            self.group,
            self.passed_count(),
            failed
        )?;
        for outcome in self.failures() {
            if let TestStatus::Failed(reason) = &outcome.status {
                writeln!(f, "  FAILED {}: {}", outcome.name, reason)?;
            }
        }
        for err in &self.teardown.errors {
            writeln!(f, "  teardown error: {}", error_chain(err))?;
        }
        Ok(())
    }
}

/// エラーとその原因をすべて ": " でつないだ文字列にする
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
