mod common;

use pg_test_harness::adapters::mock::StaticLauncher;
use pg_test_harness::application::harness::{HarnessDependencies, setup, teardown};
use pg_test_harness::{
    BoxError, HarnessConfig, HarnessError, MigrationSet, PoolSettings, TestGroup, TestStatus,
};
use serial_test::serial;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// テスト用のヘルパー
// ============================================================================

fn table_migrations(table: &str) -> MigrationSet {
    MigrationSet::empty().push(
        format!("create {table}"),
        format!("CREATE TABLE {table} (id int PRIMARY KEY, label text)"),
        format!("DROP TABLE {table}"),
    )
}

/// グループ内のテストがどこまで進んでも一定時間で終わることを保証する
async fn within_deadline<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(60), future)
        .await
        .expect("test group hung (leaked connection?)")
}

// ============================================================================
// セットアップとティアダウンの回数
// ============================================================================

#[tokio::test]
#[serial]
async fn test_one_setup_and_one_teardown_for_many_tests() {
    let Some(db) = common::test_database().await else {
        return;
    };

    let launcher = StaticLauncher::new(db.url.clone());
    let counters = launcher.counters();
    let runs = Arc::new(AtomicUsize::new(0));

    let mut group = TestGroup::new("cardinality", HarnessConfig::default().quiet())
        .launcher(launcher)
        .migrations(table_migrations("cardinality_items"));
    for i in 0..5 {
        let runs = runs.clone();
        group = group.test(format!("test {i}"), move |conn, _| {
            let runs = runs.clone();
            Box::pin(async move {
                sqlx::query("SELECT count(*) FROM cardinality_items")
                    .execute(&mut *conn)
                    .await?;
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
        });
    }

    let report = within_deadline(group.run()).await.expect("group setup failed");

    report.assert_success();
    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    assert_eq!(counters.starts(), 1);
    assert_eq!(counters.stops(), 1);
    assert!(!db.table_exists("cardinality_items").await);

    db.shutdown().await;
}

// ============================================================================
// ロールバック
// ============================================================================

#[tokio::test]
#[serial]
async fn test_writes_are_invisible_after_each_test() {
    let Some(db) = common::test_database().await else {
        return;
    };

    let run = TestGroup::new("rollback", db.config())
        .migrations(table_migrations("rollback_items"))
        .test("failing insert", |conn, _| {
            Box::pin(async move {
                sqlx::query("INSERT INTO rollback_items (id, label) VALUES (1, 'failed')")
                    .execute(&mut *conn)
                    .await?;
                Err::<(), BoxError>("intentional failure".into())
            })
        })
        .test("passing insert sees its own row", |conn, _| {
            Box::pin(async move {
                sqlx::query("INSERT INTO rollback_items (id, label) VALUES (2, 'passed')")
                    .execute(&mut *conn)
                    .await?;
                let count: i64 = sqlx::query_scalar("SELECT count(*) FROM rollback_items")
                    .fetch_one(&mut *conn)
                    .await?;
                assert_eq!(count, 1, "only this test's row should be visible");
                Ok::<_, BoxError>(())
            })
        })
        .test("later test sees nothing", |conn, _| {
            Box::pin(async move {
                let count: i64 = sqlx::query_scalar("SELECT count(*) FROM rollback_items")
                    .fetch_one(&mut *conn)
                    .await?;
                assert_eq!(count, 0);
                Ok::<_, BoxError>(())
            })
        })
        .run();
    let report = within_deadline(run).await.expect("group setup failed");

    assert_eq!(
        report.outcome("failing insert").unwrap().status,
        TestStatus::Failed("intentional failure".to_string())
    );
    assert!(report.outcome("passing insert sees its own row").unwrap().passed());
    assert!(report.outcome("later test sees nothing").unwrap().passed());
    assert!(report.teardown.is_clean());

    db.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_panicking_test_releases_its_connection() {
    let Some(db) = common::test_database().await else {
        return;
    };

    // 接続が 1 本しかないので、漏れれば次のテストは永遠に待つ
    let config = db.config().with_pool(PoolSettings {
        max_connections: 1,
        ..PoolSettings::default()
    });

    let run = TestGroup::new("panics", config)
        .migrations(table_migrations("panic_items"))
        .test("panics mid-transaction", |conn, _| {
            Box::pin(async move {
                sqlx::query("INSERT INTO panic_items (id) VALUES (1)")
                    .execute(&mut *conn)
                    .await?;
                let count: i64 = sqlx::query_scalar("SELECT count(*) FROM panic_items")
                    .fetch_one(&mut *conn)
                    .await?;
                if count == 1 {
                    panic!("assertion blew up");
                }
                Ok::<_, BoxError>(())
            })
        })
        .test("next test gets the connection back", |conn, _| {
            Box::pin(async move {
                let count: i64 = sqlx::query_scalar("SELECT count(*) FROM panic_items")
                    .fetch_one(&mut *conn)
                    .await?;
                assert_eq!(count, 0);
                Ok::<_, BoxError>(())
            })
        })
        .run();
    let report = within_deadline(run).await.expect("group setup failed");

    match &report.outcome("panics mid-transaction").unwrap().status {
        TestStatus::Failed(reason) => assert!(reason.contains("assertion blew up")),
        TestStatus::Passed => panic!("panicking test must fail"),
    }
    assert!(
        report
            .outcome("next test gets the connection back")
            .unwrap()
            .passed()
    );

    db.shutdown().await;
}

// ============================================================================
// フィクスチャ
// ============================================================================

struct SeededCatalog {
    ids: Vec<i32>,
}

#[tokio::test]
#[serial]
async fn test_fixture_is_loaded_once_and_shared() {
    let Some(db) = common::test_database().await else {
        return;
    };

    let loads = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let loader_loads = loads.clone();
    let mut group = TestGroup::with_fixture("fixtures", db.config(), move |conn| {
        Box::pin(async move {
            loader_loads.fetch_add(1, Ordering::SeqCst);
            sqlx::query("INSERT INTO catalog_items (id, label) VALUES (10, 'a'), (20, 'b')")
                .execute(&mut *conn)
                .await?;
            Ok::<_, BoxError>(SeededCatalog { ids: vec![10, 20] })
        })
    })
    .migrations(table_migrations("catalog_items"))
    .concurrency(3);

    for i in 0..4 {
        let seen = seen.clone();
        group = group.test(format!("reads fixture {i}"), move |conn, catalog| {
            seen.lock()
                .unwrap()
                .insert(catalog as *const SeededCatalog as usize);
            Box::pin(async move {
                let ids: Vec<i32> = sqlx::query_scalar("SELECT id FROM catalog_items ORDER BY id")
                    .fetch_all(&mut *conn)
                    .await?;
                assert_eq!(ids, catalog.ids);
                Ok::<_, BoxError>(())
            })
        });
    }

    let report = within_deadline(group.run()).await.expect("group setup failed");

    report.assert_success();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(seen.lock().unwrap().len(), 1, "every test sees the same instance");

    db.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_fixture_failure_aborts_and_cleans_up() {
    let Some(db) = common::test_database().await else {
        return;
    };

    let launcher = StaticLauncher::new(db.url.clone());
    let counters = launcher.counters();
    let ran = Arc::new(AtomicUsize::new(0));
    let test_ran = ran.clone();

    let result = TestGroup::with_fixture(
        "broken fixture",
        HarnessConfig::default().quiet(),
        |conn| {
            Box::pin(async move {
                sqlx::query("SELECT * FROM no_such_table")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, BoxError>(())
            })
        },
    )
    .launcher(launcher)
    .migrations(table_migrations("broken_fixture_items"))
    .test("never runs", move |_conn, _| {
        test_ran.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok::<_, BoxError>(()) })
    })
    .run()
    .await;

    assert!(matches!(result, Err(HarnessError::Fixture(_))));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(counters.starts(), 1);
    assert_eq!(counters.stops(), 1);
    assert!(!db.table_exists("broken_fixture_items").await);

    db.shutdown().await;
}

// ============================================================================
// 外部データベースの指定
// ============================================================================

#[tokio::test]
#[serial]
async fn test_external_connection_string_is_used_verbatim() {
    let Some(db) = common::test_database().await else {
        return;
    };

    let launcher = StaticLauncher::new("postgres://must-not-be-used:1/none");
    let counters = launcher.counters();
    let deps = HarnessDependencies {
        config: db.config(),
        migrations: MigrationSet::empty(),
        launcher: Arc::new(launcher),
    };

    let ctx = setup(&deps).await.expect("setup failed");

    assert!(!ctx.launched_process());
    assert_eq!(ctx.connection_string(), db.url);
    assert_eq!(counters.starts(), 0);

    let mut conn = ctx.pool().acquire().await.expect("pool should connect");
    let one: i32 = sqlx::query_scalar("SELECT 1")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(one, 1);
    drop(conn);

    let report = teardown(ctx, &deps.migrations).await;
    assert!(report.is_clean());
    assert!(!report.process_stopped);
    assert_eq!(counters.stops(), 0);

    db.shutdown().await;
}
