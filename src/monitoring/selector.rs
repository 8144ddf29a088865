//! Poll candidate selection.

use crate::models::Run;

/// Selection result: the runs chosen for the next poll pass, plus the size
/// of the full eligible pool before truncation to the batch limit. The pool
/// size is an observability/backpressure signal, not persisted state.
#[derive(Debug, Clone)]
pub struct PickedUpdatableRuns {
    pub runs: Vec<Run>,
    pub eligible_count: usize,
}

/// Choose which runs are due for a status check.
///
/// Terminal runs are excluded entirely, regardless of how long ago they were
/// last polled. The eligible pool is ordered most-overdue-first (ascending
/// `last_polled_timestamp`, never-polled treated as earliest) and truncated
/// to `limit`. Pure function; ties may break arbitrarily.
pub fn pick_updatable_runs(runs: &[Run], limit: usize) -> PickedUpdatableRuns {
    let mut eligible: Vec<&Run> = runs.iter().filter(|r| r.status.non_terminal()).collect();
    let eligible_count = eligible.len();

    // None sorts before any Some, so never-polled runs go first.
    eligible.sort_by_key(|r| r.last_polled_timestamp);
    eligible.truncate(limit);

    PickedUpdatableRuns {
        runs: eligible.into_iter().cloned().collect(),
        eligible_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunSet, RunSetStatus, RunStatus};
    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn test_run_set() -> RunSet {
        RunSet {
            run_set_id: Uuid::new_v4(),
            method_version_id: Uuid::new_v4(),
            name: "selector tests".to_string(),
            description: String::new(),
            is_template: false,
            status: RunSetStatus::Running,
            submission_timestamp: Utc::now(),
            last_modified_timestamp: Utc::now(),
            last_polled_timestamp: None,
            run_count: 0,
            error_count: 0,
            input_definition: "[]".to_string(),
            output_definition: "[]".to_string(),
            record_type: "sample".to_string(),
            user_id: "user".to_string(),
            original_workspace_id: None,
        }
    }

    fn run_polled_secs_ago(status: RunStatus, secs_ago: Option<i64>) -> Run {
        Run {
            run_id: Uuid::new_v4(),
            engine_id: Some(Uuid::new_v4().to_string()),
            run_set: test_run_set(),
            record_id: "rec".to_string(),
            submission_timestamp: Utc::now() - Duration::hours(1),
            status,
            last_modified_timestamp: Utc::now(),
            last_polled_timestamp: secs_ago.map(|s| Utc::now() - Duration::seconds(s)),
            error_messages: None,
        }
    }

    #[test]
    fn picks_most_overdue_first() {
        let overdue = run_polled_secs_ago(RunStatus::Running, Some(300));
        let recent = run_polled_secs_ago(RunStatus::Running, Some(5));
        let middling = run_polled_secs_ago(RunStatus::Queued, Some(60));

        let picked = pick_updatable_runs(
            &[recent.clone(), overdue.clone(), middling.clone()],
            2,
        );
        assert_eq!(picked.eligible_count, 3);
        let ids: Vec<_> = picked.runs.iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![overdue.run_id, middling.run_id]);
    }

    #[test]
    fn never_polled_runs_come_first() {
        let polled = run_polled_secs_ago(RunStatus::Running, Some(3600));
        let never_polled = run_polled_secs_ago(RunStatus::Running, None);

        let picked = pick_updatable_runs(&[polled, never_polled.clone()], 1);
        assert_eq!(picked.runs[0].run_id, never_polled.run_id);
    }

    #[test]
    fn terminal_runs_are_never_selected() {
        let terminal = run_polled_secs_ago(RunStatus::Complete, Some(86_400));
        let active = run_polled_secs_ago(RunStatus::Running, Some(1));

        let picked = pick_updatable_runs(&[terminal, active.clone()], 10);
        assert_eq!(picked.eligible_count, 1);
        assert_eq!(picked.runs.len(), 1);
        assert_eq!(picked.runs[0].run_id, active.run_id);
    }

    #[test]
    fn pool_smaller_than_limit_is_returned_whole() {
        let a = run_polled_secs_ago(RunStatus::Running, Some(10));
        let b = run_polled_secs_ago(RunStatus::Paused, Some(20));
        let picked = pick_updatable_runs(&[a, b], 50);
        assert_eq!(picked.runs.len(), 2);
        assert_eq!(picked.eligible_count, 2);
    }

    proptest! {
        /// With distinct poll timestamps, selection returns exactly the k
        /// most overdue non-terminal runs, and the pool size counts only
        /// non-terminal runs.
        #[test]
        fn selection_ordering_property(
            offsets in proptest::collection::hash_set(1i64..1_000_000, 1..20),
            terminal_count in 0usize..5,
            limit in 1usize..10,
        ) {
            let mut runs: Vec<Run> = offsets
                .iter()
                .map(|&secs| run_polled_secs_ago(RunStatus::Running, Some(secs)))
                .collect();
            for _ in 0..terminal_count {
                runs.push(run_polled_secs_ago(RunStatus::Complete, Some(2_000_000)));
            }

            let eligible = offsets.len();
            let picked = pick_updatable_runs(&runs, limit);

            prop_assert_eq!(picked.eligible_count, eligible);
            prop_assert_eq!(picked.runs.len(), limit.min(eligible));

            // The picked runs are exactly the ones with the largest ages.
            let mut ages: Vec<i64> = offsets.iter().copied().collect();
            ages.sort_unstable_by(|a, b| b.cmp(a));
            let cutoff = ages[picked.runs.len() - 1];
            for run in &picked.runs {
                let age = (Utc::now() - run.last_polled_timestamp.unwrap()).num_seconds();
                // Allow a second of slack for clock movement inside the test.
                prop_assert!(age >= cutoff - 1);
            }
        }
    }
}
