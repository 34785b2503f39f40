pub mod launcher;

pub use launcher::{LaunchCounters, StaticLauncher};
