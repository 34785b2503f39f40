#![allow(dead_code)]

use pg_test_harness::ports::LaunchedDatabase;
use pg_test_harness::{DatabaseLauncher, HarnessConfig, TempPostgres, logging};
use sqlx::{Connection, PgConnection};

/// テスト用データベース
///
/// TEST_DB_CONNECTION_STRING が設定されていればその既存データベースを、
/// なければこのテスト専用に起動した一時 PostgreSQL を指す。
pub struct TestDatabase {
    pub url: String,
    launched: Option<LaunchedDatabase>,
}

impl TestDatabase {
    /// 既存データベースとして扱う設定（接続文字列は表示しない）
    pub fn config(&self) -> HarnessConfig {
        HarnessConfig::external(self.url.clone()).quiet()
    }

    /// 専用接続を開く
    pub async fn connect(&self) -> PgConnection {
        PgConnection::connect(&self.url)
            .await
            .expect("Failed to connect to test database")
    }

    /// テーブルが存在するか
    pub async fn table_exists(&self, table: &str) -> bool {
        let mut conn = self.connect().await;
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(&mut conn)
            .await
            .expect("Failed to look up table");
        conn.close().await.expect("Failed to close connection");
        exists
    }

    /// テスト後の後始末（テーブル削除など）
    pub async fn execute(&self, sql: &str) {
        let mut conn = self.connect().await;
        sqlx::raw_sql(sql)
            .execute(&mut conn)
            .await
            .expect("Failed to run cleanup SQL");
        conn.close().await.expect("Failed to close connection");
    }

    pub async fn shutdown(mut self) {
        if let Some(launched) = self.launched.as_mut() {
            launched
                .process
                .stop()
                .await
                .expect("Failed to stop test database");
        }
    }
}

/// テスト用データベースを用意する
///
/// どちらも使えない環境では None を返すので、呼び出し側はテストをスキップする。
pub async fn test_database() -> Option<TestDatabase> {
    logging::init_test_tracing();

    let config = HarnessConfig::from_env().expect("Invalid TEST_DB_* configuration");

    if let Some(url) = config.external_connection_string {
        return Some(TestDatabase {
            url,
            launched: None,
        });
    }

    if !config.launcher.binaries_available() {
        eprintln!(
            "skipping database test: set TEST_DB_CONNECTION_STRING or put initdb/pg_ctl on PATH"
        );
        return None;
    }

    let launched = TempPostgres::new(config.launcher)
        .start()
        .await
        .expect("Failed to launch test database");

    Some(TestDatabase {
        url: launched.connection_string.clone(),
        launched: Some(launched),
    })
}
