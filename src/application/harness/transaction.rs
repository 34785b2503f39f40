use crate::adapters::postgres::pool::DbPool;
use crate::ports::database_launcher::BoxError;
use futures::future::BoxFuture;
use sqlx::PgConnection;

/// トランザクション内で接続を受け取るアクションの戻り値
pub type ActionFuture<'c, T> = BoxFuture<'c, Result<T, BoxError>>;

/// トランザクションの終わらせ方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    CommitOnSuccess,
    AlwaysRollback,
}

/// プールから取得した接続でトランザクションを実行する
///
/// アクションが成功すれば commit、エラーを返せば rollback して
/// そのエラーを呼び出し元へ返す。
/// アクションが panic した場合もトランザクションの drop によりロールバックされ、
/// 接続はプールに戻る。
///
/// # 使用例
/// ```ignore
/// let count = run_in_transaction(&pool, |conn| {
///     Box::pin(async move {
///         let n: i64 = sqlx::query_scalar("SELECT count(*) FROM t")
///             .fetch_one(&mut *conn)
///             .await?;
///         Ok(n)
///     })
/// })
/// .await?;
/// ```
pub async fn run_in_transaction<T, F>(pool: &DbPool, action: F) -> Result<T, BoxError>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> ActionFuture<'c, T>,
{
    execute(pool, &(), |conn, _| action(conn), Completion::CommitOnSuccess).await
}

/// run_in_transaction と同じだが、フィクスチャへの参照もアクションに渡す
pub async fn run_in_transaction_with<X, T, F>(
    pool: &DbPool,
    fixture: &X,
    action: F,
) -> Result<T, BoxError>
where
    X: ?Sized,
    F: for<'c> FnOnce(&'c mut PgConnection, &'c X) -> ActionFuture<'c, T>,
{
    execute(pool, fixture, action, Completion::CommitOnSuccess).await
}

/// トランザクション内でアクションを実行し、結果に関わらず必ずロールバックする
///
/// テスト本体が書き込んだ内容は、成功・失敗どちらの場合もテスト後には見えない。
pub async fn run_rolled_back<T, F>(pool: &DbPool, action: F) -> Result<T, BoxError>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> ActionFuture<'c, T>,
{
    execute(pool, &(), |conn, _| action(conn), Completion::AlwaysRollback).await
}

/// run_rolled_back と同じだが、フィクスチャへの参照もアクションに渡す
pub async fn run_rolled_back_with<X, T, F>(
    pool: &DbPool,
    fixture: &X,
    action: F,
) -> Result<T, BoxError>
where
    X: ?Sized,
    F: for<'c> FnOnce(&'c mut PgConnection, &'c X) -> ActionFuture<'c, T>,
{
    execute(pool, fixture, action, Completion::AlwaysRollback).await
}

/// トランザクションなしでプールの接続を 1 本使ってアクションを実行する
///
/// グループ単位のフィクスチャ読み込みに使う。
/// トランザクションが必要ならアクション側で開始する。
pub async fn run_pooled<T, F>(pool: &DbPool, action: F) -> Result<T, BoxError>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> ActionFuture<'c, T>,
{
    let mut conn = pool.acquire().await?;
    action(&mut *conn).await
}

async fn execute<X, T, F>(
    pool: &DbPool,
    fixture: &X,
    action: F,
    completion: Completion,
) -> Result<T, BoxError>
where
    X: ?Sized,
    F: for<'c> FnOnce(&'c mut PgConnection, &'c X) -> ActionFuture<'c, T>,
{
    let mut tx = pool.begin().await?;
    let result = action(&mut *tx, fixture).await;

    match (result, completion) {
        (Ok(value), Completion::CommitOnSuccess) => {
            tx.commit().await?;
            Ok(value)
        }
        (Ok(value), Completion::AlwaysRollback) => {
            tx.rollback().await?;
            Ok(value)
        }
        (Err(err), _) => {
            // アクション自体のエラーを優先する
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
