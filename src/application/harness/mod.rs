mod errors;
mod group;
mod lifecycle;
mod provisioner;
mod report;
mod transaction;

pub use errors::{HarnessError, Result};
pub use group::TestGroup;
pub use lifecycle::{HarnessDependencies, TeardownReport, TestContext, setup, teardown};
pub use provisioner::{ResolvedConnection, resolve_connection};
pub use report::{GroupReport, TestOutcome, TestStatus, error_chain};
pub use transaction::{
    ActionFuture, run_in_transaction, run_in_transaction_with, run_pooled, run_rolled_back,
    run_rolled_back_with,
};
