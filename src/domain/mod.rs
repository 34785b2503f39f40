pub mod migration;
pub mod settings;

pub use migration::*;
pub use settings::*;
