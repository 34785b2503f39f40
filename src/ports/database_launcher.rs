use async_trait::async_trait;
use std::path::PathBuf;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, BoxError>;

/// 起動済みの使い捨てデータベース
pub struct LaunchedDatabase {
    /// 起動したプロセスが報告するアドレスから組み立てた接続文字列
    pub connection_string: String,
    /// 起動時の診断ログの場所（あれば）
    pub log_path: Option<PathBuf>,
    /// 停止用のハンドル
    pub process: Box<dyn DatabaseProcess>,
}

impl std::fmt::Debug for LaunchedDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedDatabase")
            .field("connection_string", &self.connection_string)
            .field("log_path", &self.log_path)
            .finish_non_exhaustive()
    }
}

/// データベースプロセス起動ポート
///
/// 空きポートで新しいデータベースプロセスを起動する。
/// 起動失敗はリトライせずにそのまま呼び出し元へ返す。
#[async_trait]
pub trait DatabaseLauncher: Send + Sync {
    async fn start(&self) -> Result<LaunchedDatabase>;
}

/// 起動したプロセスのハンドル
///
/// このハンドルを持つのはプロセスを起動した側だけ。
/// 外部から与えられたデータベースにはハンドルが存在しない。
#[async_trait]
pub trait DatabaseProcess: Send + Sync {
    /// プロセスを停止する
    ///
    /// 停止済みのプロセスに対しては何もしない。
    async fn stop(&mut self) -> Result<()>;
}
