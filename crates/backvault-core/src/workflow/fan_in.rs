//! Scatter-gather over activity handles.
//!
//! `gather` waits until every handle of a batch is terminal and yields the
//! outcomes in handle order; `collect_all` turns such a batch into either
//! all values or one `AggregateFailure`. No partial results are exposed, so
//! completion order can never leak into what the orchestration computes.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use backvault_types::activity::ActivityError;
use backvault_types::outcome::{AggregateFailure, FailedItem};

/// Future returned by [`gather`].
pub struct Gather<F: Future> {
    pending: Vec<Option<F>>,
    done: Vec<Option<F::Output>>,
}

// Outputs are moved out, never pinned.
impl<F: Future + Unpin> Unpin for Gather<F> {}

/// Wait for all `futures`, yielding their outputs in input order.
pub fn gather<F: Future + Unpin>(futures: Vec<F>) -> Gather<F> {
    let done = futures.iter().map(|_| None).collect();
    Gather {
        pending: futures.into_iter().map(Some).collect(),
        done,
    }
}

impl<F: Future + Unpin> Future for Gather<F> {
    type Output = Vec<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_ready = true;

        for (slot, out) in this.pending.iter_mut().zip(this.done.iter_mut()) {
            if let Some(fut) = slot {
                match Pin::new(fut).poll(cx) {
                    Poll::Ready(value) => {
                        *out = Some(value);
                        *slot = None;
                    }
                    Poll::Pending => all_ready = false,
                }
            }
        }

        if !all_ready {
            return Poll::Pending;
        }
        Poll::Ready(this.done.iter_mut().filter_map(Option::take).collect())
    }
}

/// Combine a gathered batch.
///
/// `labels[i]` names the item behind `outcomes[i]`; failures are reported in
/// that order with their messages.
pub fn collect_all<T>(
    labels: &[String],
    outcomes: Vec<Result<T, ActivityError>>,
) -> Result<Vec<T>, AggregateFailure> {
    let attempted = outcomes.len();
    let mut values = Vec::with_capacity(attempted);
    let mut failures = Vec::new();

    for (i, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => values.push(value),
            Err(error) => failures.push(FailedItem {
                label: labels.get(i).cloned().unwrap_or_else(|| format!("#{i}")),
                message: error.to_string(),
            }),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(AggregateFailure {
            failures,
            attempted,
        })
    }
}
