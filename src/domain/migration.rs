use std::borrow::Cow;
use thiserror::Error;

/// マイグレーションの適用方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// 可逆なスキーマ変更の 1 ステップ
///
/// up で適用した変更は down で完全に元に戻せなければならない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub description: Cow<'static, str>,
    pub up: Cow<'static, str>,
    pub down: Cow<'static, str>,
}

impl Migration {
    pub fn new(
        version: i64,
        description: impl Into<Cow<'static, str>>,
        up: impl Into<Cow<'static, str>>,
        down: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            version,
            description: description.into(),
            up: up.into(),
            down: down.into(),
        }
    }

    /// 指定方向の SQL を返す
    pub fn sql(&self, direction: Direction) -> &str {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }
}

/// マイグレーション集合の構築エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationSetError {
    /// バージョンが昇順になっていない（重複を含む）
    #[error("migration versions must be strictly ascending ({previous} is followed by {next})")]
    OutOfOrder { previous: i64, next: i64 },

    /// down が存在しない
    #[error("migration {version} has no down script")]
    Irreversible { version: i64 },

    /// 対応する up の無い down がある
    #[error("migration {version} has a down script but no up script")]
    MissingUp { version: i64 },
}

/// 順序付きのマイグレーション列
///
/// # 不変条件
/// - バージョンは厳密に昇順
/// - up はリスト順、down は逆順に適用する
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// マイグレーションの列から集合を作る
    ///
    /// # エラー
    /// - OutOfOrder: バージョンが昇順でない
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationSetError> {
        for pair in migrations.windows(2) {
            if pair[1].version <= pair[0].version {
                return Err(MigrationSetError::OutOfOrder {
                    previous: pair[0].version,
                    next: pair[1].version,
                });
            }
        }
        Ok(Self { migrations })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// 次のバージョン番号を自動で振ってマイグレーションを追加する
    pub fn push(
        mut self,
        description: impl Into<Cow<'static, str>>,
        up: impl Into<Cow<'static, str>>,
        down: impl Into<Cow<'static, str>>,
    ) -> Self {
        let version = self.migrations.last().map_or(1, |m| m.version + 1);
        self.migrations
            .push(Migration::new(version, description, up, down));
        self
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// 適用方向に応じた順序で返す
    pub fn ordered(&self, direction: Direction) -> Box<dyn Iterator<Item = &Migration> + '_> {
        match direction {
            Direction::Up => Box::new(self.migrations.iter()),
            Direction::Down => Box::new(self.migrations.iter().rev()),
        }
    }

    /// 先頭 n 件だけを含む集合（部分的に適用されたマイグレーションの巻き戻し用）
    pub fn prefix(&self, n: usize) -> Self {
        Self {
            migrations: self.migrations.iter().take(n).cloned().collect(),
        }
    }
}
