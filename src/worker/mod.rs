use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::unbounded;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobState {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "success")]
    Succeeded,
    #[serde(rename = "error")]
    Failed,
}

impl JobState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use JobState::{Failed, Pending, Running, Succeeded};

        matches!(
            (self, next),
            (Pending, Running) | (Running, Succeeded) | (Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "success",
            Self::Failed => "error",
        }
    }
}

pub fn effective_worker_count(max_workers: usize, jobs: usize) -> usize {
    max_workers.max(1).min(jobs)
}

/// Runs `work` over `items` on at most `max_workers` scoped threads.
///
/// Items are pulled from a shared queue; each outcome is handed to
/// `on_result` on the calling thread as soon as it arrives, i.e. in
/// completion order. A panic inside `work` is caught and reported as `Err`
/// with the panic message; it never takes down sibling items.
pub fn run_bounded<T, R, F, P>(items: Vec<T>, max_workers: usize, work: F, mut on_result: P)
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> R + Sync,
    P: FnMut(usize, Result<R, String>),
{
    let total = items.len();
    let workers = effective_worker_count(max_workers, total);
    if workers == 0 {
        return;
    }

    let (job_tx, job_rx) = unbounded::<(usize, T)>();
    for (index, item) in items.into_iter().enumerate() {
        // The receiver is alive until the scope below ends.
        let _ = job_tx.send((index, item));
    }
    drop(job_tx);
    let (result_tx, result_rx) = unbounded::<(usize, Result<R, String>)>();
    debug!(total, workers, "starting worker pool");

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let work = &work;
            scope.spawn(move || {
                for (index, item) in job_rx.iter() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(index, item)))
                        .map_err(|payload| panic_message(payload.as_ref()));
                    if result_tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        for (index, outcome) in result_rx {
            on_result(index, outcome);
        }
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    String::from("worker panicked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn job_state_machine_only_moves_forward() {
        use JobState::{Failed, Pending, Running, Succeeded};

        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Running));
        assert!(Succeeded.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn worker_count_is_capped_by_jobs() {
        assert_eq!(effective_worker_count(4, 2), 2);
        assert_eq!(effective_worker_count(4, 10), 4);
        assert_eq!(effective_worker_count(0, 3), 1);
        assert_eq!(effective_worker_count(4, 0), 0);
    }

    #[test]
    fn every_item_is_processed_exactly_once() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut results = Vec::new();
        run_bounded(
            (0..25).collect::<Vec<u32>>(),
            4,
            move |_, item| {
                counter.fetch_add(1, Ordering::SeqCst);
                item * 2
            },
            |index, outcome| results.push((index, outcome)),
        );

        assert_eq!(seen.load(Ordering::SeqCst), 25);
        assert_eq!(results.len(), 25);
        let indices = results.iter().map(|(i, _)| *i).collect::<HashSet<_>>();
        assert_eq!(indices.len(), 25);
        for (index, outcome) in results {
            assert_eq!(outcome, Ok(index as u32 * 2));
        }
    }

    #[test]
    fn results_arrive_in_completion_order() {
        let mut order = Vec::new();
        run_bounded(
            vec![120_u64, 0],
            2,
            |_, delay_ms| {
                std::thread::sleep(Duration::from_millis(delay_ms));
                delay_ms
            },
            |index, _| order.push(index),
        );
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn panicking_item_does_not_affect_siblings() {
        let mut results = Vec::new();
        run_bounded(
            vec![1, 2, 3],
            2,
            |_, item| {
                if item == 2 {
                    panic!("bad item {item}");
                }
                item
            },
            |index, outcome| results.push((index, outcome)),
        );
        let failed = results
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().err())
            .collect::<Vec<_>>();
        assert_eq!(failed, vec![&String::from("bad item 2")]);
        assert_eq!(results.iter().filter(|(_, o)| o.is_ok()).count(), 2);
    }

    #[test]
    fn concurrency_never_exceeds_the_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        run_bounded(
            (0..12).collect::<Vec<_>>(),
            3,
            move |_, _item: i32| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                a.fetch_sub(1, Ordering::SeqCst);
            },
            |_, _| {},
        );
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }
}
