//! Run lifecycle monitoring: candidate selection, time-budgeted polling,
//! run-set aggregation, and cascading cancellation.

mod abort;
mod run_sets_poller;
mod runs_poller;
mod selector;

pub use abort::{AbortRequestDetails, RunSetAbortManager};
pub use run_sets_poller::RunSetsPoller;
pub use runs_poller::SmartRunsPoller;
pub use selector::{pick_updatable_runs, PickedUpdatableRuns};

/// Result of one time-budgeted update pass.
///
/// `updated_list` holds every input item, polled or not, in input order;
/// items the budget did not reach are returned unchanged. `fully_updated` is
/// true only when every eligible item was actually polled before the
/// deadline.
#[derive(Debug, Clone)]
pub struct UpdateResult<T> {
    pub updated_list: Vec<T>,
    pub total_eligible: usize,
    pub total_updated: usize,
    pub fully_updated: bool,
}
