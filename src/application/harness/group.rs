use crate::adapters::postgres::launcher::TempPostgres;
use crate::adapters::postgres::pool::DbPool;
use crate::domain::migration::MigrationSet;
use crate::domain::settings::HarnessConfig;
use crate::ports::database_launcher::DatabaseLauncher;
use futures::{FutureExt, StreamExt};
use sqlx::PgConnection;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use super::errors::{HarnessError, Result};
use super::lifecycle::{self, HarnessDependencies};
use super::report::{GroupReport, TestOutcome, TestStatus, error_chain};
use super::transaction::{ActionFuture, run_pooled, run_rolled_back_with};

/// グループ単位のフィクスチャ読み込み処理
type FixtureLoader<F> =
    Box<dyn for<'c> FnOnce(&'c mut PgConnection) -> ActionFuture<'c, F> + Send>;

/// 登録済みテストの本体（戻り値は捨てて成否だけを残す）
type TestBody<F> =
    Box<dyn for<'c> Fn(&'c mut PgConnection, &'c F) -> ActionFuture<'c, ()> + Send + Sync>;

struct RegisteredTest<F> {
    name: String,
    body: TestBody<F>,
}

/// データベースを共有するテストのグループ
///
/// `run` で次のライフサイクルを 1 回だけ実行する。
///
/// 1. 全テストの前: 接続先の解決 → マイグレーション（up） → プール作成 → フィクスチャ読み込み
/// 2. 各テスト: プールの接続でトランザクションを開始し、本体を実行して必ずロールバック
/// 3. 全テストの後: マイグレーション（down） → プール破棄 → プロセス停止
///
/// # 使用例
/// ```ignore
/// let report = TestGroup::new("widgets", HarnessConfig::from_env()?)
///     .migrations(migrations)
///     .test("insert is visible inside the test", |conn, _| {
///         Box::pin(async move {
///             sqlx::query("INSERT INTO widgets (id) VALUES (1)")
///                 .execute(&mut *conn)
///                 .await?;
///             Ok(())
///         })
///     })
///     .run()
///     .await?;
/// report.assert_success();
/// ```
pub struct TestGroup<F = ()> {
    name: String,
    config: HarnessConfig,
    migrations: MigrationSet,
    launcher: Option<Arc<dyn DatabaseLauncher>>,
    fixture: FixtureLoader<F>,
    tests: Vec<RegisteredTest<F>>,
    concurrency: usize,
}

fn unit_fixture(_conn: &mut PgConnection) -> ActionFuture<'_, ()> {
    async { Ok(()) }.boxed()
}

/// 高階ライフタイムを持つクロージャとして型推論させるための恒等関数
fn erase<F, C>(body: C) -> C
where
    C: for<'c> Fn(&'c mut PgConnection, &'c F) -> ActionFuture<'c, ()>,
{
    body
}

impl TestGroup<()> {
    /// フィクスチャを持たないグループ
    ///
    /// 各テストにはフィクスチャとして `()` が渡される。
    pub fn new(name: impl Into<String>, config: HarnessConfig) -> Self {
        Self::build(name.into(), config, Box::new(unit_fixture))
    }
}

impl<F> TestGroup<F>
where
    F: Send + Sync + 'static,
{
    /// フィクスチャを持つグループ
    ///
    /// `loader` はマイグレーション適用後、最初のテストより前に 1 回だけ
    /// トランザクションなしの接続で実行される。
    /// 結果の値はグループ内の全テストに同じインスタンスへの参照として渡される。
    pub fn with_fixture<L>(name: impl Into<String>, config: HarnessConfig, loader: L) -> Self
    where
        L: for<'c> FnOnce(&'c mut PgConnection) -> ActionFuture<'c, F> + Send + 'static,
    {
        Self::build(name.into(), config, Box::new(loader))
    }

    fn build(name: String, config: HarnessConfig, fixture: FixtureLoader<F>) -> Self {
        Self {
            name,
            config,
            migrations: MigrationSet::empty(),
            launcher: None,
            fixture,
            tests: Vec::new(),
            concurrency: 1,
        }
    }

    pub fn migrations(mut self, migrations: MigrationSet) -> Self {
        self.migrations = migrations;
        self
    }

    /// 一時データベースの起動方法を差し替える（デフォルトは TempPostgres）
    pub fn launcher(mut self, launcher: impl DatabaseLauncher + 'static) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    /// 同時に実行するテスト数（デフォルトは 1 で逐次実行）
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// テストを登録する
    ///
    /// 本体はトランザクション内の接続とフィクスチャへの参照を受け取る。
    /// フィクスチャが不要なテストは 2 番目の引数を無視すればよい。
    /// 本体の戻り値は捨てられ、成功・失敗だけが記録される。
    pub fn test<T, B>(mut self, name: impl Into<String>, body: B) -> Self
    where
        T: Send + 'static,
        B: for<'c> Fn(&'c mut PgConnection, &'c F) -> ActionFuture<'c, T> + Send + Sync + 'static,
    {
        let body: TestBody<F> = Box::new(erase::<F, _>(move |conn, fixture| {
            body(conn, fixture).map(|result| result.map(|_| ())).boxed()
        }));
        self.tests.push(RegisteredTest {
            name: name.into(),
            body,
        });
        self
    }

    /// 登録済みのテスト数
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// セットアップ・全テスト・ティアダウンを実行する
    ///
    /// # エラー
    /// セットアップ（起動・マイグレーション・フィクスチャ）の失敗は致命的で、
    /// テストを 1 件も実行せずに返す。テストの失敗とティアダウンのエラーは
    /// `GroupReport` に記録される。
    pub async fn run(self) -> Result<GroupReport> {
        let Self {
            name,
            config,
            migrations,
            launcher,
            fixture,
            tests,
            concurrency,
        } = self;

        let launcher: Arc<dyn DatabaseLauncher> = match launcher {
            Some(launcher) => launcher,
            None => Arc::new(TempPostgres::new(config.launcher.clone())),
        };
        let deps = HarnessDependencies {
            config,
            migrations,
            launcher,
        };

        tracing::info!(group = %name, tests = tests.len(), "Setting up test group");
        let ctx = lifecycle::setup(&deps).await?;

        let fixture = match run_pooled(ctx.pool(), fixture).await {
            Ok(fixture) => fixture,
            Err(err) => {
                let teardown = lifecycle::teardown(ctx, &deps.migrations).await;
                for teardown_err in &teardown.errors {
                    tracing::warn!(error = %teardown_err, "Teardown error after fixture failure");
                }
                return Err(HarnessError::Fixture(err));
            }
        };

        let outcomes: Vec<TestOutcome> = futures::stream::iter(tests.iter())
            .map(|test| run_one(ctx.pool(), &fixture, test))
            .buffered(concurrency)
            .collect()
            .await;
        drop(fixture);

        let teardown = lifecycle::teardown(ctx, &deps.migrations).await;
        let report = GroupReport {
            group: name,
            outcomes,
            teardown,
        };
        tracing::info!(
            group = %report.group,
            passed = report.passed_count(),
            failed = report.outcomes.len() - report.passed_count(),
            "Test group finished"
        );
        Ok(report)
    }
}

/// 1 件のテストをロールバック前提のトランザクション内で実行する
///
/// エラーも panic も失敗として記録し、接続はどちらの場合もプールへ戻る。
async fn run_one<F>(
    pool: &DbPool,
    fixture: &F,
    test: &RegisteredTest<F>,
) -> TestOutcome {
    let started = Instant::now();
    let run = run_rolled_back_with(pool, fixture, |conn, fixture| (test.body)(conn, fixture));
    let status = match AssertUnwindSafe(run).catch_unwind().await {
        Ok(Ok(())) => TestStatus::Passed,
        Ok(Err(err)) => TestStatus::Failed(error_chain(err.as_ref())),
        Err(panic) => TestStatus::Failed(format!("panicked: {}", panic_message(panic.as_ref()))),
    };

    match &status {
        TestStatus::Passed => tracing::debug!(test = %test.name, "Test passed"),
        TestStatus::Failed(reason) => tracing::debug!(test = %test.name, %reason, "Test failed"),
    }

    TestOutcome {
        name: test.name.clone(),
        status,
        elapsed: started.elapsed(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
