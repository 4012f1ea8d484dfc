//! # Merge and Dispatch
//!
//! One step of the k-way merge over all producer queues. Each step peeks at
//! the head of every queue, keeps the record with the smallest timestamp,
//! puts every other head back and hands the winner to the handlers.
//!
//! Because each queue is already ordered by timestamp, repeating the step
//! produces a globally ordered stream. On equal timestamps the producer that
//! was scanned first, i.e. registered first, wins.

use std::sync::Arc;

use crate::clock::TimeSource;
use crate::context::ThreadContext;
use crate::handler::HandlerCollection;
use crate::queue::Candidate;
use crate::record::Record;

/// Dispatches the oldest pending record across `contexts`.
///
/// Returns false if every queue was empty.
pub fn process_next_record<R: Record>(
    contexts: &[Arc<ThreadContext<R>>],
    handlers: &HandlerCollection,
    clock: Option<&dyn TimeSource>,
) -> bool {
    let mut best: Option<(&ThreadContext<R>, Candidate<'_, R>)> = None;

    for context in contexts {
        let Some(candidate) = context.queue().peek() else {
            continue;
        };

        let ts = candidate.get().timestamp();
        if best
            .as_ref()
            .is_none_or(|(_, current)| ts < current.get().timestamp())
        {
            if let Some((previous, loser)) = best.replace((context.as_ref(), candidate)) {
                previous.queue().abandon(loser);
            }
        } else {
            context.queue().abandon(candidate);
        }
    }

    let Some((context, candidate)) = best else {
        return false;
    };

    let record = context.queue().commit(candidate);
    record.backend_process(context.thread_id(), &|| handlers.active_handlers(), clock);
    true
}
