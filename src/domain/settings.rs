use std::path::{Path, PathBuf};
use std::time::Duration;

/// 既存データベースへの接続文字列を指定する環境変数
pub const CONNECTION_STRING_ENV: &str = "TEST_DB_CONNECTION_STRING";
pub const POOL_STRIPES_ENV: &str = "TEST_DB_POOL_STRIPES";
pub const POOL_IDLE_SECS_ENV: &str = "TEST_DB_POOL_IDLE_SECS";
pub const POOL_MAX_CONNECTIONS_ENV: &str = "TEST_DB_POOL_MAX_CONNECTIONS";
pub const PG_BIN_DIR_ENV: &str = "TEST_DB_PG_BIN_DIR";

/// 設定値の読み込みエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsError {
    pub key: String,
    pub message: String,
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

impl std::error::Error for SettingsError {}

/// コネクションプールの設定
///
/// ストライプ数・アイドル寿命・最大接続数はすべて設定値として扱う。
/// デフォルトは 1 ストライプ、3600 秒、50 接続。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// プールの分割数（ロック競合を減らすため）
    pub stripes: usize,
    /// アイドル状態の接続を破棄するまでの時間
    pub idle_lifetime: Duration,
    /// 全ストライプ合計の最大接続数
    pub max_connections: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            stripes: 1,
            idle_lifetime: Duration::from_secs(3600),
            max_connections: 50,
        }
    }
}

impl PoolSettings {
    /// 設定値の整合性を検証する
    ///
    /// # エラー
    /// - ストライプ数が 0
    /// - 最大接続数が 0
    /// - 最大接続数がストライプ数より少ない（空のストライプができてしまう）
    pub fn validate(&self) -> Result<(), String> {
        if self.stripes == 0 {
            return Err("stripes must be at least 1".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if (self.max_connections as usize) < self.stripes {
            return Err(format!(
                "max_connections ({}) must be >= stripes ({})",
                self.max_connections, self.stripes
            ));
        }
        Ok(())
    }

    /// 各ストライプの容量を返す
    ///
    /// 合計が必ず max_connections になるよう、余りは先頭のストライプから 1 ずつ配る。
    pub fn stripe_capacities(&self) -> Vec<u32> {
        let stripes = self.stripes.max(1) as u32;
        let base = self.max_connections / stripes;
        let remainder = self.max_connections % stripes;
        (0..stripes)
            .map(|i| if i < remainder { base + 1 } else { base })
            .collect()
    }
}

/// 一時 PostgreSQL プロセスの起動設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSettings {
    /// initdb / pg_ctl のあるディレクトリ。None なら PATH から探す
    pub bin_dir: Option<PathBuf>,
    pub user: String,
    pub database: String,
    /// pg_ctl が起動完了を待つ上限
    pub startup_timeout: Duration,
    /// postgres に `-c key=value` として渡すサーバー設定
    pub server_options: Vec<(String, String)>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            bin_dir: None,
            user: "postgres".to_string(),
            database: "postgres".to_string(),
            startup_timeout: Duration::from_secs(30),
            // 使い捨てのデータベースなので永続性は不要
            server_options: vec![
                ("fsync".to_string(), "off".to_string()),
                ("synchronous_commit".to_string(), "off".to_string()),
                ("full_page_writes".to_string(), "off".to_string()),
            ],
        }
    }
}

impl LauncherSettings {
    /// 実行ファイルのパスを解決する
    ///
    /// bin_dir が指定されていればその中を、なければ PATH を探す。
    /// 実行できないファイルは候補にならない。
    pub fn resolve_binary(&self, name: &str) -> Option<PathBuf> {
        let found = match &self.bin_dir {
            Some(dir) => which::which_in(name, Some(dir), dir),
            None => which::which(name),
        };
        found.ok()
    }

    /// initdb と pg_ctl の両方が見つかるか
    pub fn binaries_available(&self) -> bool {
        self.resolve_binary("initdb").is_some() && self.resolve_binary("pg_ctl").is_some()
    }

    pub fn with_bin_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.bin_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

/// テストハーネス全体の設定
///
/// 環境変数を暗黙に読まず、明示的な値としてセットアップに渡す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// 起動済みデータベースの接続文字列。Some なら一時プロセスを起動しない
    pub external_connection_string: Option<String>,
    pub pool: PoolSettings,
    pub launcher: LauncherSettings,
    /// セットアップ時に接続文字列を標準出力へ表示するか
    pub print_connection_string: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            external_connection_string: None,
            pool: PoolSettings::default(),
            launcher: LauncherSettings::default(),
            print_connection_string: true,
        }
    }
}

impl HarnessConfig {
    /// プロセスの環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー検索関数から設定を読み込む
    ///
    /// 空文字列の値は未設定として扱う。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        config.external_connection_string = get(CONNECTION_STRING_ENV);

        if let Some(value) = get(POOL_STRIPES_ENV) {
            config.pool.stripes = parse_number(POOL_STRIPES_ENV, &value)?;
        }
        if let Some(value) = get(POOL_IDLE_SECS_ENV) {
            config.pool.idle_lifetime = Duration::from_secs(parse_number(POOL_IDLE_SECS_ENV, &value)?);
        }
        if let Some(value) = get(POOL_MAX_CONNECTIONS_ENV) {
            config.pool.max_connections = parse_number(POOL_MAX_CONNECTIONS_ENV, &value)?;
        }
        if let Some(value) = get(PG_BIN_DIR_ENV) {
            config.launcher.bin_dir = Some(PathBuf::from(value));
        }

        Ok(config)
    }

    /// 既存データベースを使う設定を作る
    pub fn external(connection_string: impl Into<String>) -> Self {
        Self {
            external_connection_string: Some(connection_string.into()),
            ..Self::default()
        }
    }

    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.print_connection_string = false;
        self
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SettingsError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| SettingsError {
        key: key.to_string(),
        message: format!("invalid value {value:?}: {e}"),
    })
}
