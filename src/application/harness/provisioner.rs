use crate::domain::settings::HarnessConfig;
use crate::ports::database_launcher::{DatabaseLauncher, DatabaseProcess};
use std::path::PathBuf;

use super::errors::{HarnessError, Result};

/// 接続先の解決結果
pub struct ResolvedConnection {
    pub connection_string: String,
    /// この呼び出しで起動したプロセス。外部データベースなら None
    pub process: Option<Box<dyn DatabaseProcess>>,
    pub log_path: Option<PathBuf>,
}

impl std::fmt::Debug for ResolvedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConnection")
            .field("connection_string", &self.connection_string)
            .field("launched", &self.process.is_some())
            .field("log_path", &self.log_path)
            .finish()
    }
}

/// データベースの接続先を決める
///
/// 外部接続文字列が設定されていればそれをそのまま使い、プロセスは起動しない。
/// 設定されていなければランチャーで一時データベースを起動する。
///
/// # エラー
/// - Launch: プロセスの起動に失敗（リトライしない）
pub async fn resolve_connection(
    config: &HarnessConfig,
    launcher: &dyn DatabaseLauncher,
) -> Result<ResolvedConnection> {
    if let Some(connection_string) = &config.external_connection_string {
        tracing::info!("Using externally supplied database");
        return Ok(ResolvedConnection {
            connection_string: connection_string.clone(),
            process: None,
            log_path: None,
        });
    }

    let launched = launcher.start().await.map_err(HarnessError::Launch)?;
    if let Some(log_path) = &launched.log_path {
        tracing::info!(log = %log_path.display(), "Launched ephemeral database");
    }

    Ok(ResolvedConnection {
        connection_string: launched.connection_string,
        process: Some(launched.process),
        log_path: launched.log_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::StaticLauncher;

    #[tokio::test]
    async fn test_external_connection_string_skips_launch() {
        let url = "postgres://app:pw@db.example:5432/app_test";
        let launcher = StaticLauncher::new("postgres://should-not-be-used/");
        let counters = launcher.counters();

        let resolved = resolve_connection(&HarnessConfig::external(url), &launcher)
            .await
            .unwrap();

        assert_eq!(resolved.connection_string, url);
        assert!(resolved.process.is_none());
        assert_eq!(counters.starts(), 0);
    }

    #[tokio::test]
    async fn test_missing_connection_string_launches_once() {
        let launcher = StaticLauncher::new("postgres://127.0.0.1:6543/postgres");
        let counters = launcher.counters();

        let resolved = resolve_connection(&HarnessConfig::default(), &launcher)
            .await
            .unwrap();

        assert_eq!(resolved.connection_string, "postgres://127.0.0.1:6543/postgres");
        assert!(resolved.process.is_some());
        assert_eq!(counters.starts(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_fatal() {
        let launcher = StaticLauncher::failing("no free port");

        let err = resolve_connection(&HarnessConfig::default(), &launcher)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Launch(_)));
        assert_eq!(launcher.counters().starts(), 1);
    }
}
