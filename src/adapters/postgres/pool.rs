use crate::domain::settings::PoolSettings;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// このレイヤーでは接続取得にタイムアウトを設けない
///
/// sqlx の acquire_timeout は必須なので、実質無制限の値を使う。
const UNBOUNDED_ACQUIRE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// プール作成エラー
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid pool settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid connection string")]
    Connect(#[from] sqlx::Error),
}

/// ストライプ分割されたコネクションプール
///
/// 独立した `PgPool` をストライプ数だけ持ち、容量の合計は max_connections になる。
/// 接続要求はラウンドロビンでストライプに割り振られ、
/// 割り当てられたストライプが満杯なら空きが出るまで待機する。
#[derive(Clone, Debug)]
pub struct DbPool {
    stripes: Arc<[PgPool]>,
    next: Arc<AtomicUsize>,
    max_connections: u32,
}

impl DbPool {
    /// 接続を 1 本取得する
    ///
    /// 返された接続は drop 時にプールへ戻る。
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, sqlx::Error> {
        self.pick().acquire().await
    }

    /// 接続を取得してトランザクションを開始する
    ///
    /// 返されたトランザクションは commit されずに drop されるとロールバックされる。
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pick().begin().await
    }

    /// 全ストライプで現在確立されている接続数
    pub fn size(&self) -> u32 {
        self.stripes.iter().map(|pool| pool.size()).sum()
    }

    /// 全ストライプのアイドル接続数
    pub fn num_idle(&self) -> usize {
        self.stripes.iter().map(|pool| pool.num_idle()).sum()
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_closed(&self) -> bool {
        self.stripes.iter().all(|pool| pool.is_closed())
    }

    fn pick(&self) -> &PgPool {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.stripes.len();
        &self.stripes[index]
    }
}

/// 接続文字列と設定からプールを作成する
///
/// 接続は遅延確立されるので、作成時点ではサーバーに接続しない。
///
/// # エラー
/// - InvalidSettings: 設定値の整合性違反（容量 0 のストライプができる）
/// - Connect: 接続文字列が解釈できない
pub fn create_pool(connection_string: &str, settings: &PoolSettings) -> Result<DbPool, PoolError> {
    settings.validate().map_err(PoolError::InvalidSettings)?;

    let mut stripes = Vec::with_capacity(settings.stripes);
    for capacity in settings.stripe_capacities() {
        let pool = PgPoolOptions::new()
            .max_connections(capacity)
            .min_connections(0)
            .idle_timeout(settings.idle_lifetime)
            .acquire_timeout(UNBOUNDED_ACQUIRE)
            .connect_lazy(connection_string)?;
        stripes.push(pool);
    }

    tracing::debug!(
        stripes = settings.stripes,
        max_connections = settings.max_connections,
        idle_lifetime_secs = settings.idle_lifetime.as_secs(),
        "Created connection pool"
    );

    Ok(DbPool {
        stripes: stripes.into(),
        next: Arc::new(AtomicUsize::new(0)),
        max_connections: settings.max_connections,
    })
}

/// プールを破棄し、すべての接続を閉じる
///
/// 値を消費するので 1 つのプールに対して 1 回しか呼べない。
/// 貸し出し中の接続がある場合は返却を待ってから閉じる。
pub async fn destroy_pool(pool: DbPool) {
    for stripe in pool.stripes.iter() {
        stripe.close().await;
    }
    tracing::debug!("Closed connection pool");
}
