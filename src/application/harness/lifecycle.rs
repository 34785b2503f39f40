use crate::adapters::postgres::migrator::{apply_down, apply_up};
use crate::adapters::postgres::pool::{DbPool, PoolError, create_pool, destroy_pool};
use crate::domain::migration::MigrationSet;
use crate::domain::settings::HarnessConfig;
use crate::ports::database_launcher::{DatabaseLauncher, DatabaseProcess};
use sqlx::{Connection, PgConnection};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::errors::{HarnessError, Result};
use super::provisioner::resolve_connection;

/// ハーネスの依存関係
///
/// セットアップとティアダウンに必要なものをデータ構造としてまとめる。
#[derive(Clone)]
pub struct HarnessDependencies {
    pub config: HarnessConfig,
    pub migrations: MigrationSet,
    pub launcher: Arc<dyn DatabaseLauncher>,
}

/// テストグループ単位の共有状態
///
/// セットアップで 1 回だけ作られ、ティアダウンで消費される。
/// 各テストにはプールへの参照だけが渡る。
pub struct TestContext {
    process: Option<Box<dyn DatabaseProcess>>,
    pool: DbPool,
    connection_string: String,
    log_path: Option<PathBuf>,
}

impl TestContext {
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// このコンテキストが一時データベースを起動したか
    pub fn launched_process(&self) -> bool {
        self.process.is_some()
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("connection_string", &self.connection_string)
            .field("launched_process", &self.launched_process())
            .field("pool", &self.pool)
            .finish()
    }
}

/// ティアダウンの結果
///
/// マイグレーションの取り消しに失敗しても、プール破棄とプロセス停止は必ず実行される。
/// 発生したエラーはここに記録される。
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub migrations_reverted: usize,
    pub process_stopped: bool,
    pub errors: Vec<HarnessError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// テストグループのセットアップ
///
/// 接続先の解決 → マイグレーション（up） → プール作成 の順に実行する。
/// マイグレーションはプール外の専用接続で適用する。
///
/// # エラー
/// すべて致命的。途中まで確保したリソース（適用済みマイグレーション、
/// 起動済みプロセス）は返す前に可能な限り片付ける。
pub async fn setup(deps: &HarnessDependencies) -> Result<TestContext> {
    deps.config
        .pool
        .validate()
        .map_err(HarnessError::InvalidPoolSettings)?;

    let resolved = resolve_connection(&deps.config, deps.launcher.as_ref()).await?;
    let connection_string = resolved.connection_string;
    let mut process = resolved.process;

    if deps.config.print_connection_string {
        println!("{connection_string}");
    }
    tracing::info!(
        launched = process.is_some(),
        migrations = deps.migrations.len(),
        "Provisioned test database"
    );

    if let Err(err) = migrate_up(&connection_string, &deps.migrations).await {
        stop_process(&mut process).await;
        return Err(err);
    }

    let pool = match create_pool(&connection_string, &deps.config.pool) {
        Ok(pool) => pool,
        Err(err) => {
            revert_quietly(&connection_string, &deps.migrations).await;
            stop_process(&mut process).await;
            return Err(match err {
                PoolError::InvalidSettings(message) => HarnessError::InvalidPoolSettings(message),
                PoolError::Connect(source) => HarnessError::Connect(source),
            });
        }
    };

    Ok(TestContext {
        process,
        pool,
        connection_string,
        log_path: resolved.log_path,
    })
}

/// テストグループのティアダウン
///
/// マイグレーション（down） → プール破棄 → プロセス停止 の順に実行する。
/// どのステップが失敗しても後続のステップは実行される。
pub async fn teardown(ctx: TestContext, migrations: &MigrationSet) -> TeardownReport {
    let TestContext {
        mut process,
        pool,
        connection_string,
        ..
    } = ctx;
    let mut report = TeardownReport::default();

    match migrate_down(&connection_string, migrations).await {
        Ok(reverted) => report.migrations_reverted = reverted,
        Err(err) => {
            tracing::error!(error = %err, "Down migrations failed; continuing teardown");
            report.errors.push(err);
        }
    }

    destroy_pool(pool).await;

    if let Some(running) = process.as_mut() {
        match running.stop().await {
            Ok(()) => report.process_stopped = true,
            Err(err) => {
                tracing::error!(error = %err, "Failed to stop ephemeral database");
                report.errors.push(HarnessError::Stop(err));
            }
        }
    }

    tracing::info!(
        reverted = report.migrations_reverted,
        errors = report.errors.len(),
        "Torn down test database"
    );
    report
}

/// 専用接続でマイグレーションを適用する
///
/// 途中で失敗した場合は適用済みのステップを巻き戻してからエラーを返す。
async fn migrate_up(connection_string: &str, migrations: &MigrationSet) -> Result<()> {
    if migrations.is_empty() {
        return Ok(());
    }

    let mut conn = PgConnection::connect(connection_string)
        .await
        .map_err(HarnessError::Connect)?;

    let result = apply_up(&mut conn, migrations).await;
    if let Err(err) = &result {
        let applied = migrations.prefix(err.applied);
        if let Err(revert_err) = apply_down(&mut conn, &applied).await {
            tracing::warn!(error = %revert_err, "Failed to revert partially applied migrations");
        }
    }

    if let Err(err) = conn.close().await {
        tracing::warn!(error = %err, "Failed to close migration connection");
    }
    result.map(|_| ()).map_err(HarnessError::from)
}

async fn migrate_down(connection_string: &str, migrations: &MigrationSet) -> Result<usize> {
    if migrations.is_empty() {
        return Ok(0);
    }

    let mut conn = PgConnection::connect(connection_string)
        .await
        .map_err(HarnessError::Connect)?;
    let result = apply_down(&mut conn, migrations).await;
    if let Err(err) = conn.close().await {
        tracing::warn!(error = %err, "Failed to close migration connection");
    }
    result.map_err(HarnessError::from)
}

async fn revert_quietly(connection_string: &str, migrations: &MigrationSet) {
    if let Err(err) = migrate_down(connection_string, migrations).await {
        tracing::warn!(error = %err, "Failed to revert migrations after setup error");
    }
}

async fn stop_process(process: &mut Option<Box<dyn DatabaseProcess>>) {
    if let Some(running) = process.as_mut() {
        if let Err(err) = running.stop().await {
            tracing::warn!(error = %err, "Failed to stop ephemeral database after setup error");
        }
    }
}
