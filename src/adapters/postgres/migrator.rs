use crate::domain::migration::{Direction, Migration, MigrationSet, MigrationSetError};
use sqlx::migrate::{MigrationType, Migrator};
use sqlx::{Connection, PgConnection};
use std::collections::BTreeMap;
use thiserror::Error;

/// マイグレーション 1 ステップの失敗
#[derive(Debug, Error)]
#[error("Migration {version} ({description}) failed while applying {direction}")]
pub struct MigrationError {
    pub version: i64,
    pub description: String,
    pub direction: Direction,
    /// 失敗までに適用が完了したステップ数
    pub applied: usize,
    #[source]
    pub source: sqlx::Error,
}

/// すべてのマイグレーションをリスト順に適用する
///
/// 各ステップは独自のトランザクション内で実行される。
/// 途中で失敗した場合、それまでに完了したステップはそのまま残る。
///
/// # 戻り値
/// 適用したステップ数
pub async fn apply_up(
    conn: &mut PgConnection,
    migrations: &MigrationSet,
) -> Result<usize, MigrationError> {
    apply(conn, migrations, Direction::Up).await
}

/// すべてのマイグレーションを逆順に取り消す
///
/// 最初に失敗したステップで止まる（後続の down は先のステップに依存しうるため）。
pub async fn apply_down(
    conn: &mut PgConnection,
    migrations: &MigrationSet,
) -> Result<usize, MigrationError> {
    apply(conn, migrations, Direction::Down).await
}

async fn apply(
    conn: &mut PgConnection,
    migrations: &MigrationSet,
    direction: Direction,
) -> Result<usize, MigrationError> {
    let mut applied = 0;
    for migration in migrations.ordered(direction) {
        tracing::debug!(
            version = migration.version,
            description = %migration.description,
            %direction,
            "Applying migration"
        );

        apply_step(conn, migration, direction)
            .await
            .map_err(|source| MigrationError {
                version: migration.version,
                description: migration.description.to_string(),
                direction,
                applied,
                source,
            })?;
        applied += 1;
    }

    tracing::info!(count = applied, %direction, "Migrations applied");
    Ok(applied)
}

/// 1 ステップをアトミックに適用する
async fn apply_step(
    conn: &mut PgConnection,
    migration: &Migration,
    direction: Direction,
) -> Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;
    sqlx::raw_sql(migration.sql(direction))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// sqlx の Migrator から可逆マイグレーションの集合を作る
///
/// `<VERSION>_<DESCRIPTION>.up.sql` と `.down.sql` の組をバージョンで対応付ける。
///
/// # エラー
/// - Irreversible: down のない（単純な）マイグレーションが含まれる
/// - MissingUp: up のない down が含まれる
pub fn migrations_from(migrator: &Migrator) -> Result<MigrationSet, MigrationSetError> {
    let mut ups = BTreeMap::new();
    let mut downs = BTreeMap::new();

    for migration in migrator.iter() {
        if matches!(migration.migration_type, MigrationType::Simple) {
            return Err(MigrationSetError::Irreversible {
                version: migration.version,
            });
        }
        if migration.migration_type.is_down_migration() {
            downs.insert(migration.version, migration.sql.clone());
        } else {
            ups.insert(
                migration.version,
                (migration.description.clone(), migration.sql.clone()),
            );
        }
    }

    let mut migrations = Vec::with_capacity(ups.len());
    for (version, (description, up)) in ups {
        let down = downs
            .remove(&version)
            .ok_or(MigrationSetError::Irreversible { version })?;
        migrations.push(Migration::new(version, description, up, down));
    }
    if let Some(&version) = downs.keys().next() {
        return Err(MigrationSetError::MissingUp { version });
    }

    MigrationSet::new(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    async fn migrator_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Migrator) {
        let dir = tempfile::tempdir().unwrap();
        for (name, sql) in files {
            std::fs::write(dir.path().join(name), sql).unwrap();
        }
        let migrator = Migrator::new(Path::new(dir.path())).await.unwrap();
        (dir, migrator)
    }

    #[tokio::test]
    async fn test_migrations_from_pairs_by_version() {
        let (_dir, migrator) = migrator_with(&[
            ("0001_create_t.up.sql", "CREATE TABLE t (id int);"),
            ("0001_create_t.down.sql", "DROP TABLE t;"),
            ("0002_add_name.up.sql", "ALTER TABLE t ADD COLUMN name text;"),
            ("0002_add_name.down.sql", "ALTER TABLE t DROP COLUMN name;"),
        ])
        .await;

        let set = migrations_from(&migrator).unwrap();

        let versions: Vec<i64> = set.ordered(Direction::Down).map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_migrations_from_rejects_down_without_up() {
        let (_dir, migrator) = migrator_with(&[
            ("0001_create_t.up.sql", "CREATE TABLE t (id int);"),
            ("0001_create_t.down.sql", "DROP TABLE t;"),
            ("0002_stray.down.sql", "DROP TABLE u;"),
        ])
        .await;

        let err = migrations_from(&migrator).unwrap_err();
        assert_eq!(err, MigrationSetError::MissingUp { version: 2 });
    }

    #[tokio::test]
    async fn test_migrations_from_rejects_simple_migrations() {
        let (_dir, migrator) = migrator_with(&[("0001_create_t.sql", "CREATE TABLE t (id int);")]).await;

        let err = migrations_from(&migrator).unwrap_err();
        assert_eq!(err, MigrationSetError::Irreversible { version: 1 });
    }
}
