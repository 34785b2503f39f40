use pg_test_harness::adapters::postgres::migrations_from;
use pg_test_harness::application::harness::{HarnessDependencies, error_chain, setup, teardown};
use pg_test_harness::{BoxError, HarnessConfig, MigrationSet, TempPostgres, logging};
use sqlx::migrate::Migrator;
use std::path::Path;
use std::sync::Arc;

/// デバッグ用に使い捨てデータベースを立ち上げる
///
/// TEST_DB_* 環境変数で設定し、MIGRATIONS_DIR があればそのマイグレーションを適用する。
/// 接続文字列を表示したあと Ctrl-C を待ち、ティアダウンしてから終了する。
#[tokio::main]
async fn main() -> Result<(), BoxError> {
    logging::init_tracing();

    let config = HarnessConfig::from_env()?;

    let migrations = match std::env::var("MIGRATIONS_DIR") {
        Ok(dir) => {
            let migrator = Migrator::new(Path::new(&dir)).await?;
            migrations_from(&migrator)?
        }
        Err(_) => MigrationSet::empty(),
    };

    let launcher = Arc::new(TempPostgres::new(config.launcher.clone()));
    let deps = HarnessDependencies {
        config,
        migrations,
        launcher,
    };

    let ctx = setup(&deps).await?;
    tracing::info!("Database ready; press Ctrl-C to tear down");

    tokio::signal::ctrl_c().await?;

    let report = teardown(ctx, &deps.migrations).await;
    for err in &report.errors {
        tracing::error!("{}", error_chain(err));
    }

    Ok(())
}
