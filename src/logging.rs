use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "pg_test_harness=info,sqlx=warn";

/// バイナリ用のトレーシング初期化
///
/// RUST_LOG が設定されていればそれを、なければクレート単位のデフォルトを使う。
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// テスト用のトレーシング初期化
///
/// 出力はテストランナーのキャプチャに流す。何度呼んでもよい。
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
