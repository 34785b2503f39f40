use crate::ports::database_launcher::{
    DatabaseLauncher, DatabaseProcess, LaunchedDatabase, Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mock implementation of DatabaseLauncher
///
/// Pretends to launch a database and hands back a fixed connection string,
/// usually one pointing at a server the test already has.
/// Counts start and stop calls so tests can check the setup/teardown cardinality.
pub struct StaticLauncher {
    connection_string: String,
    failure: Option<String>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl StaticLauncher {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            failure: None,
            starts: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A launcher whose every start fails with the given message
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new("")
        }
    }

    /// Shared counters, readable after the launcher has been moved into a group
    pub fn counters(&self) -> LaunchCounters {
        LaunchCounters {
            starts: self.starts.clone(),
            stops: self.stops.clone(),
        }
    }
}

/// Observed start/stop counts of a StaticLauncher
#[derive(Clone, Debug)]
pub struct LaunchCounters {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl LaunchCounters {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseLauncher for StaticLauncher {
    async fn start(&self) -> Result<LaunchedDatabase> {
        self.starts.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.failure {
            return Err(message.clone().into());
        }

        Ok(LaunchedDatabase {
            connection_string: self.connection_string.clone(),
            log_path: None,
            process: Box::new(StaticProcess {
                stops: self.stops.clone(),
                running: true,
            }),
        })
    }
}

struct StaticProcess {
    stops: Arc<AtomicUsize>,
    running: bool,
}

#[async_trait]
impl DatabaseProcess for StaticProcess {
    async fn stop(&mut self) -> Result<()> {
        if self.running {
            self.running = false;
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
