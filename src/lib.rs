//! PostgreSQL を使うテストのためのハーネス
//!
//! テストグループごとに一時データベースを起動（または既存のものに接続）し、
//! マイグレーションを適用してからプールの接続を各テストに貸し出す。
//! 各テストはロールバックされるトランザクションの中で実行され、
//! 全テスト終了後にマイグレーションを取り消してデータベースを停止する。

pub mod adapters;
pub mod application;
pub mod domain;
pub mod logging;
pub mod ports;

pub use adapters::postgres::{DbPool, TempPostgres};
pub use application::harness::{
    GroupReport, HarnessError, TestGroup, TestOutcome, TestStatus, run_in_transaction,
    run_pooled, run_rolled_back,
};
pub use domain::{HarnessConfig, LauncherSettings, Migration, MigrationSet, PoolSettings};
pub use ports::{BoxError, DatabaseLauncher};
