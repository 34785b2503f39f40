use crate::domain::settings::LauncherSettings;
use crate::ports::database_launcher::{
    DatabaseLauncher, DatabaseProcess, LaunchedDatabase, Result,
};
use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;

/// 一時 PostgreSQL の起動・停止エラー
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{0} not found (set TEST_DB_PG_BIN_DIR or add it to PATH)")]
    BinaryNotFound(&'static str),

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create database {name}")]
    CreateDatabase {
        name: String,
        #[source]
        source: sqlx::Error,
    },
}

/// initdb + pg_ctl で使い捨ての PostgreSQL を起動するランチャー
///
/// データディレクトリ・UNIX ソケット・ログはすべて一時ディレクトリに置かれ、
/// プロセス停止後にディレクトリごと削除される。
pub struct TempPostgres {
    settings: LauncherSettings,
}

impl TempPostgres {
    pub fn new(settings: LauncherSettings) -> Self {
        Self { settings }
    }

    fn binary(&self, name: &'static str) -> std::result::Result<PathBuf, LaunchError> {
        self.settings
            .resolve_binary(name)
            .ok_or(LaunchError::BinaryNotFound(name))
    }

    /// postgres に渡すサーバーオプション文字列を組み立てる
    fn server_options(&self, port: u16, socket_dir: &Path) -> String {
        let mut options = format!("-p {port} -h 127.0.0.1");
        if cfg!(unix) {
            options.push_str(&format!(" -k {}", socket_dir.display()));
        }
        for (key, value) in &self.settings.server_options {
            options.push_str(&format!(" -c {key}={value}"));
        }
        options
    }

    fn connection_string(&self, port: u16, database: &str) -> String {
        format!(
            "postgres://{}@127.0.0.1:{}/{}",
            self.settings.user, port, database
        )
    }
}

impl Default for TempPostgres {
    fn default() -> Self {
        Self::new(LauncherSettings::default())
    }
}

#[async_trait]
impl DatabaseLauncher for TempPostgres {
    async fn start(&self) -> Result<LaunchedDatabase> {
        let initdb = self.binary("initdb")?;
        let pg_ctl = self.binary("pg_ctl")?;

        let root = tempfile::Builder::new()
            .prefix("pg-test-harness-")
            .tempdir()
            .map_err(LaunchError::Io)?;
        let data_dir = root.path().join("data");
        let log_path = root.path().join("postgres.log");
        let port = free_port().await?;

        tracing::debug!(data_dir = %data_dir.display(), "Running initdb");
        run(Command::new(&initdb)
            .arg("-D")
            .arg(&data_dir)
            .arg("-U")
            .arg(&self.settings.user)
            .args(["-A", "trust", "-E", "UTF8", "--no-sync"]))
        .await?;

        tracing::debug!(port, log = %log_path.display(), "Starting postgres");
        run(Command::new(&pg_ctl)
            .arg("-D")
            .arg(&data_dir)
            .arg("-l")
            .arg(&log_path)
            .arg("-o")
            .arg(self.server_options(port, root.path()))
            .arg("-t")
            .arg(self.settings.startup_timeout.as_secs().max(1).to_string())
            .args(["-w", "start"]))
        .await?;

        // ここから先で失敗しても Drop がサーバーを止める
        let process = TempPostgresProcess {
            pg_ctl,
            data_dir,
            running: true,
            _root: root,
        };

        if self.settings.database != "postgres" {
            create_database(
                &self.connection_string(port, "postgres"),
                &self.settings.database,
            )
            .await?;
        }

        tracing::info!(port, "Ephemeral postgres started");

        Ok(LaunchedDatabase {
            connection_string: self.connection_string(port, &self.settings.database),
            log_path: Some(log_path),
            process: Box::new(process),
        })
    }
}

/// TempPostgres が起動したサーバーのハンドル
struct TempPostgresProcess {
    pg_ctl: PathBuf,
    data_dir: PathBuf,
    running: bool,
    // フィールドは Drop::drop の後に破棄されるので、サーバー停止後にディレクトリが消える
    _root: TempDir,
}

#[async_trait]
impl DatabaseProcess for TempPostgresProcess {
    async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        run(Command::new(&self.pg_ctl)
            .arg("-D")
            .arg(&self.data_dir)
            .args(["-m", "fast", "-w", "stop"]))
        .await?;
        self.running = false;

        tracing::info!(data_dir = %self.data_dir.display(), "Ephemeral postgres stopped");
        Ok(())
    }
}

impl Drop for TempPostgresProcess {
    fn drop(&mut self) {
        if !self.running {
            return;
        }

        tracing::warn!(
            data_dir = %self.data_dir.display(),
            "Ephemeral postgres dropped without stop(); shutting it down immediately"
        );
        let status = std::process::Command::new(&self.pg_ctl)
            .arg("-D")
            .arg(&self.data_dir)
            .args(["-m", "immediate", "-w", "stop"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => self.running = false,
            Ok(status) => tracing::warn!(
                data_dir = %self.data_dir.display(),
                %status,
                "Immediate pg_ctl stop failed; the server may still be running"
            ),
            Err(err) => tracing::warn!(
                data_dir = %self.data_dir.display(),
                error = %err,
                "Could not run pg_ctl for immediate stop; the server may still be running"
            ),
        }
    }
}

/// OS に空いているポートを選ばせる
async fn free_port() -> std::result::Result<u16, LaunchError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

async fn run(command: &mut Command) -> std::result::Result<(), LaunchError> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if output.status.success() {
        return Ok(());
    }

    let std_command = command.as_std();
    Err(LaunchError::CommandFailed {
        command: std_command.get_program().to_string_lossy().into_owned(),
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

async fn create_database(admin_url: &str, name: &str) -> std::result::Result<(), LaunchError> {
    let to_error = |source: sqlx::Error| LaunchError::CreateDatabase {
        name: name.to_string(),
        source,
    };

    let mut conn = PgConnection::connect(admin_url).await.map_err(to_error)?;
    let statement = format!("CREATE DATABASE \"{}\"", name.replace('"', "\"\""));
    sqlx::query(&statement)
        .execute(&mut conn)
        .await
        .map_err(to_error)?;
    conn.close().await.map_err(to_error)?;
    Ok(())
}
