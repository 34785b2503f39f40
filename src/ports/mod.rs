pub mod database_launcher;

pub use database_launcher::*;
