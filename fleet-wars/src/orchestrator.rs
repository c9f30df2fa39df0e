// Auto-reveal orchestration.
//
// Every snapshot refresh calls `AutoRevealer::evaluate`. The gate is read from that
// snapshot alone: reveal window open, server holds my commitment, no server reveal yet, turn
// not already confirmed, nothing in flight for the instance. When it opens, the cached
// payload is checked against the server hash and submitted. The bookkeeping lock is never
// held across the channel call; instead the instance key is parked in an in-flight set so
// overlapping evaluations cannot submit twice.

use crate::cache::{CommitCache, CommitCacheEntry};
use crate::channel::{ChannelError, IntentChannel};
use crate::net::{IntentReceipt, IntentRequest, RejectReason, Rejection};
use crate::tracker::SubmissionTracker;
use shipyard::crypto::validate_reveal;
use shipyard::types::InstanceKind;
use shipyard::{resolve_identity, GameSnapshot};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevealState {
    NotEligible,
    Uncommitted,
    Committed,
    Submitting { turn: u32 },
    Submitted,
    /// The server holds a commitment but this session has no cached payload for it.
    Blocked,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevealEvent {
    ServerCommitMissing,
    ServerCommitSeen,
    ServerRevealSeen,
    CacheMissing,
    SubmitStarted { turn: u32 },
    Confirmed,
    Retry,
    /// The turn moved on while the submission was in flight.
    Superseded,
    Fatal,
}

impl RevealState {
    pub fn on(self, event: RevealEvent) -> RevealState {
        use RevealEvent as E;
        use RevealState as S;
        match (self, event) {
            (S::Failed, _) => S::Failed,
            (S::Submitted, _) => S::Submitted,
            (S::Submitting { .. }, E::Confirmed) => S::Submitted,
            (S::Submitting { .. }, E::Retry) => S::Committed,
            (S::Submitting { .. }, E::Superseded) => S::NotEligible,
            (_, E::Fatal) => S::Failed,
            (S::Submitting { turn }, _) => S::Submitting { turn },
            (_, E::ServerCommitMissing) => S::Uncommitted,
            (_, E::ServerCommitSeen) => S::Committed,
            (_, E::ServerRevealSeen) => S::Submitted,
            (S::Committed | S::Blocked, E::CacheMissing) => S::Blocked,
            (S::Committed, E::SubmitStarted { turn }) => S::Submitting { turn },
            (state, _) => state,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    GameOver,
    NotSeated,
    NoRevealWindow,
    StaleSnapshot,
    NotCommitted,
    AlreadyRevealed,
    AlreadySubmitted,
    InFlight,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Evaluation {
    Skipped(SkipReason),
    Blocked { instance_key: String },
    Submitted { instance_key: String, turn: u32 },
    Retrying { instance_key: String, attempt: u32 },
    Discarded { instance_key: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RevealError {
    #[error("cached payload for {instance_key} does not match the server commitment")]
    LocalHashMismatch { instance_key: String },
    #[error("server refused reveal of {instance_key}: {rejection}")]
    Protocol {
        instance_key: String,
        rejection: Rejection,
    },
    #[error("reveal of {instance_key} failed {attempts} times in a row")]
    RetriesExhausted { instance_key: String, attempts: u32 },
}

#[derive(Default)]
struct Book {
    cache: CommitCache,
    trackers: BTreeMap<InstanceKind, SubmissionTracker>,
    in_flight: BTreeSet<String>,
    states: BTreeMap<String, RevealState>,
    failures: BTreeMap<String, u32>,
    observed_turn: u32,
}

impl Book {
    fn state(&self, key: &str) -> RevealState {
        self.states.get(key).copied().unwrap_or(RevealState::NotEligible)
    }

    fn transition(&mut self, key: &str, event: RevealEvent) -> RevealState {
        let next = self.state(key).on(event);
        self.states.insert(key.to_string(), next);
        next
    }

    fn tracker_mut(&mut self, kind: InstanceKind) -> &mut SubmissionTracker {
        self.trackers.entry(kind).or_default()
    }
}

struct Pending {
    kind: InstanceKind,
    key: String,
    turn: u32,
    request: IntentRequest,
}

enum Step {
    Done(Evaluation),
    Submit(Pending),
}

// Owns the in-flight mark while the channel call is pending. If the evaluation is dropped
// before the reply arrives, the mark is cleared and the instance goes back to `Committed`.
struct InFlightSlot<'a> {
    book: &'a Mutex<Book>,
    key: Option<String>,
}

impl<'a> InFlightSlot<'a> {
    fn hold(book: &'a Mutex<Book>, key: String) -> Self {
        Self { book, key: Some(key) }
    }

    // Hands the mark over to `settle`.
    fn release(mut self) {
        self.key = None;
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        book.in_flight.remove(&key);
        book.transition(&key, RevealEvent::Retry);
        debug!(instance = %key, "reveal abandoned before the server answered");
    }
}

pub struct AutoRevealer<C> {
    channel: C,
    session_id: String,
    retry_budget: u32,
    book: Mutex<Book>,
}

impl<C: IntentChannel> AutoRevealer<C> {
    pub fn new(channel: C, session_id: impl Into<String>, retry_budget: u32) -> Self {
        Self {
            channel,
            session_id: session_id.into(),
            retry_budget: retry_budget.max(1),
            book: Mutex::new(Book::default()),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caches what was committed so it can be revealed later. Replaces any earlier entry
    /// for the same instance.
    pub fn remember(&self, entry: CommitCacheEntry) {
        self.book().cache.insert(entry);
    }

    pub fn forget(&self, instance_key: &str) -> Option<CommitCacheEntry> {
        self.book().cache.remove(instance_key)
    }

    pub fn cached(&self, instance_key: &str) -> Option<CommitCacheEntry> {
        self.book().cache.get(instance_key).cloned()
    }

    pub fn cache(&self) -> CommitCache {
        self.book().cache.clone()
    }

    pub fn tracker(&self, kind: InstanceKind) -> SubmissionTracker {
        self.book().trackers.get(&kind).cloned().unwrap_or_default()
    }

    pub fn state(&self, instance_key: &str) -> RevealState {
        self.book().state(instance_key)
    }

    /// Clears a failed or stuck instance so the next evaluation may try again.
    pub fn reset(&self, instance_key: &str) {
        let mut book = self.book();
        book.states.remove(instance_key);
        book.failures.remove(instance_key);
        book.in_flight.remove(instance_key);
    }

    pub async fn evaluate(&self, snapshot: &GameSnapshot) -> Result<Evaluation, RevealError> {
        let pending = match self.gate(snapshot)? {
            Step::Done(evaluation) => return Ok(evaluation),
            Step::Submit(pending) => pending,
        };
        debug!(instance = %pending.key, turn = pending.turn, "submitting reveal");
        let slot = InFlightSlot::hold(&self.book, pending.key.clone());
        let outcome = self.channel.submit(pending.request.clone()).await;
        slot.release();
        self.settle(pending, outcome)
    }

    fn gate(&self, snapshot: &GameSnapshot) -> Result<Step, RevealError> {
        let skip = |reason| Ok(Step::Done(Evaluation::Skipped(reason)));
        let mut book = self.book();
        if snapshot.is_over() {
            return skip(SkipReason::GameOver);
        }
        if snapshot.turn_number < book.observed_turn {
            return skip(SkipReason::StaleSnapshot);
        }
        book.observed_turn = snapshot.turn_number;
        let pruned = book.cache.prune_before(snapshot.turn_number);
        if pruned > 0 {
            debug!(pruned, turn = snapshot.turn_number, "dropped cache entries for closed turns");
        }

        let identity = resolve_identity(&snapshot.players, Some(self.session_id.as_str()));
        let me = match identity.me_ready_key.as_deref() {
            Some(key) if identity.is_seated() => key.to_string(),
            _ => return skip(SkipReason::NotSeated),
        };
        let Some(kind) = snapshot.phase().and_then(InstanceKind::for_reveal_window) else {
            return skip(SkipReason::NoRevealWindow);
        };
        let turn = snapshot.turn_number;
        let key = kind.instance_key(turn);

        if book.state(&key) == RevealState::Failed {
            return skip(SkipReason::Failed);
        }
        if book.in_flight.contains(&key) {
            return skip(SkipReason::InFlight);
        }
        let Some(commitment) = snapshot.commitment(&key, &me) else {
            book.transition(&key, RevealEvent::ServerCommitMissing);
            return skip(SkipReason::NotCommitted);
        };
        if commitment.is_revealed() {
            book.transition(&key, RevealEvent::ServerRevealSeen);
            book.cache.remove(&key);
            return skip(SkipReason::AlreadyRevealed);
        }
        if book.tracker_mut(kind).contains(turn) {
            return skip(SkipReason::AlreadySubmitted);
        }
        book.transition(&key, RevealEvent::ServerCommitSeen);

        let Some(entry) = book.cache.get(&key).cloned() else {
            book.transition(&key, RevealEvent::CacheMissing);
            warn!(instance = %key, "server holds a commitment with no cached payload");
            return Ok(Step::Done(Evaluation::Blocked { instance_key: key }));
        };
        if !validate_reveal(&entry.payload, &entry.nonce, &commitment.commit_hash) {
            book.transition(&key, RevealEvent::Fatal);
            warn!(instance = %key, "cached payload does not hash to the server commitment");
            return Err(RevealError::LocalHashMismatch { instance_key: key });
        }

        book.in_flight.insert(key.clone());
        book.transition(&key, RevealEvent::SubmitStarted { turn });
        Ok(Step::Submit(Pending {
            kind,
            request: IntentRequest::reveal(key.clone(), me, entry.payload, entry.nonce, turn),
            key,
            turn,
        }))
    }

    fn settle(
        &self,
        pending: Pending,
        outcome: Result<IntentReceipt, ChannelError>,
    ) -> Result<Evaluation, RevealError> {
        let mut book = self.book();
        book.in_flight.remove(&pending.key);
        let moved_on = book.observed_turn != pending.turn;

        match outcome {
            Ok(receipt) if receipt.turn_number == pending.turn => Ok(self.confirm(&mut book, &pending)),
            Ok(receipt) => {
                debug!(instance = %pending.key, reply_turn = receipt.turn_number, "reply for another turn");
                Ok(self.discard(&mut book, &pending))
            }
            Err(ChannelError::Rejected(rejection)) => match rejection.reason {
                RejectReason::AlreadyRevealed => {
                    info!(instance = %pending.key, "server already had this reveal");
                    Ok(self.confirm(&mut book, &pending))
                }
                reason if reason.is_stale() => {
                    book.tracker_mut(pending.kind).remove(pending.turn);
                    if moved_on || rejection.turn_number != pending.turn {
                        return Ok(self.discard(&mut book, &pending));
                    }
                    self.retry(&mut book, &pending, &rejection.message)
                }
                _ => {
                    book.transition(&pending.key, RevealEvent::Fatal);
                    warn!(instance = %pending.key, reason = ?rejection.reason, "reveal refused");
                    Err(RevealError::Protocol {
                        instance_key: pending.key,
                        rejection,
                    })
                }
            },
            Err(e) if moved_on => {
                debug!(instance = %pending.key, error = %e, "failure for a turn already gone");
                Ok(self.discard(&mut book, &pending))
            }
            Err(e) => self.retry(&mut book, &pending, &e.to_string()),
        }
    }

    fn confirm(&self, book: &mut Book, pending: &Pending) -> Evaluation {
        book.tracker_mut(pending.kind).insert(pending.turn);
        book.cache.remove(&pending.key);
        book.failures.remove(&pending.key);
        book.transition(&pending.key, RevealEvent::Confirmed);
        info!(instance = %pending.key, turn = pending.turn, "reveal confirmed");
        Evaluation::Submitted {
            instance_key: pending.key.clone(),
            turn: pending.turn,
        }
    }

    fn discard(&self, book: &mut Book, pending: &Pending) -> Evaluation {
        book.failures.remove(&pending.key);
        book.transition(&pending.key, RevealEvent::Superseded);
        Evaluation::Discarded {
            instance_key: pending.key.clone(),
        }
    }

    fn retry(&self, book: &mut Book, pending: &Pending, cause: &str) -> Result<Evaluation, RevealError> {
        let attempts = {
            let count = book.failures.entry(pending.key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempts >= self.retry_budget {
            book.transition(&pending.key, RevealEvent::Fatal);
            warn!(instance = %pending.key, attempts, cause, "giving up on reveal");
            return Err(RevealError::RetriesExhausted {
                instance_key: pending.key.clone(),
                attempts,
            });
        }
        book.transition(&pending.key, RevealEvent::Retry);
        debug!(instance = %pending.key, attempts, cause, "reveal will be retried");
        Ok(Evaluation::Retrying {
            instance_key: pending.key.clone(),
            attempt: attempts,
        })
    }
}
