pub mod launcher;
pub mod migrator;
pub mod pool;

// パブリックに型を再エクスポート
pub use launcher::{LaunchError, TempPostgres};
pub use migrator::{MigrationError, apply_down, apply_up, migrations_from};
pub use pool::{DbPool, PoolError, create_pool, destroy_pool};
