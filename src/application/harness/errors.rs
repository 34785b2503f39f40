use crate::adapters::postgres::migrator::MigrationError;
use crate::domain::migration::MigrationSetError;
use crate::ports::database_launcher::BoxError;
use thiserror::Error;

/// テストハーネスのエラー
///
/// セットアップ中に発生したものはすべて致命的で、
/// テストグループ内のテストは 1 件も実行されない。
#[derive(Debug, Error)]
pub enum HarnessError {
    /// プール設定の整合性違反
    #[error("Invalid pool settings: {0}")]
    InvalidPoolSettings(String),

    /// マイグレーション列が不正
    #[error("Invalid migrations: {0}")]
    InvalidMigrations(#[from] MigrationSetError),

    /// 一時データベースの起動に失敗
    #[error("Failed to launch ephemeral database")]
    Launch(#[source] BoxError),

    /// 一時データベースの停止に失敗
    #[error("Failed to stop ephemeral database")]
    Stop(#[source] BoxError),

    /// データベースへの接続・プール作成に失敗
    #[error("Database connection error")]
    Connect(#[source] sqlx::Error),

    /// マイグレーションの適用に失敗
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// フィクスチャの読み込みに失敗
    #[error("Fixture loading failed")]
    Fixture(#[source] BoxError),
}

/// ハーネス層の Result型
pub type Result<T> = std::result::Result<T, HarnessError>;
