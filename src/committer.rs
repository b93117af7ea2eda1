//! Single-vote commits: ledger check, one atomic increment, ledger write.
//!
//! A `(address, poll)` pair is claimed synchronously before anything is sent
//! to the backend, so concurrent commits of the same pair within one client
//! resolve to one increment and `AlreadyVoted` for the rest. The remote part
//! runs on its own task and completes even if the caller stops waiting.

use crate::backend::{BackendError, PollBackend};
use crate::clock::{Clock, SystemClock};
use crate::identity::{Address, IdentityState};
use crate::ledger::{LedgerError, LedgerStore, VoteLedger};
use crate::poll::PollId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::Instrument;

pub struct VoteCommitter<B, S, C = SystemClock> {
    inner: Arc<Inner<B, S, C>>,
}

impl<B, S, C> Clone for VoteCommitter<B, S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<B, S, C> {
    backend: Arc<B>,
    ledger: Arc<VoteLedger<S>>,
    clock: C,
    claimed: Mutex<HashSet<(Address, PollId)>>,
}

impl<B, S, C> VoteCommitter<B, S, C>
where
    B: PollBackend,
    S: LedgerStore,
    C: Clock,
{
    pub fn new(backend: Arc<B>, ledger: Arc<VoteLedger<S>>, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                ledger,
                clock,
                claimed: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub async fn commit_vote(
        &self,
        identity: &IdentityState,
        poll_id: PollId,
        option_index: usize,
    ) -> Result<(), VoteError> {
        let address = identity
            .address
            .clone()
            .ok_or(VoteError::IdentityUnavailable)?;
        self.inner.claim(&address, poll_id)?;

        let inner = self.inner.clone();
        let task = tokio::spawn(
            async move { inner.apply(address, poll_id, option_index).await }.in_current_span(),
        );

        match task.await {
            Ok(res) => res,
            Err(err) => {
                error!("Vote task for {poll_id} did not finish: {err}");
                Err(VoteError::Interrupted)
            }
        }
    }

    /// Option chosen on `poll_id`, if this address has voted there.
    pub fn recorded_vote(
        &self,
        address: &Address,
        poll_id: &PollId,
    ) -> Result<Option<usize>, VoteError> {
        Ok(self.inner.ledger.entry(address, poll_id)?)
    }
}

impl<B, S, C> Inner<B, S, C>
where
    B: PollBackend,
    S: LedgerStore,
    C: Clock,
{
    fn claim(&self, address: &Address, poll_id: PollId) -> Result<(), VoteError> {
        let mut claimed = self.claimed.lock().expect("poisoned lock");

        if let Some(option) = self.ledger.entry(address, &poll_id)? {
            debug!("{} already voted option {option} on {poll_id}", address.short());
            return Err(VoteError::AlreadyVoted(poll_id));
        }
        if !claimed.insert((address.clone(), poll_id)) {
            debug!("{} has a vote on {poll_id} in flight", address.short());
            return Err(VoteError::AlreadyVoted(poll_id));
        }
        Ok(())
    }

    fn release(&self, address: &Address, poll_id: PollId) {
        self.claimed
            .lock()
            .expect("poisoned lock")
            .remove(&(address.clone(), poll_id));
    }

    async fn apply(
        &self,
        address: Address,
        poll_id: PollId,
        option_index: usize,
    ) -> Result<(), VoteError> {
        let res = self.mutate(&address, poll_id, option_index).await;
        match &res {
            // The claim outlives a successful remote write so the pair can
            // never be sent twice from this client.
            Ok(()) | Err(VoteError::LedgerUnrecorded { .. }) => {}
            Err(_) => self.release(&address, poll_id),
        }
        res
    }

    async fn mutate(
        &self,
        address: &Address,
        poll_id: PollId,
        option_index: usize,
    ) -> Result<(), VoteError> {
        let poll = self
            .backend
            .fetch(&poll_id)
            .await
            .map_err(VoteError::Lookup)?
            .ok_or(VoteError::PollNotFound(poll_id))?;

        if option_index >= poll.options.len() {
            return Err(VoteError::InvalidOption {
                poll_id,
                index: option_index,
                options: poll.options.len(),
            });
        }
        if poll.is_ended(self.clock.now()) {
            debug!("Rejecting vote on ended poll {poll_id}");
            return Err(VoteError::PollEnded(poll_id));
        }

        self.backend
            .increment_vote(&poll_id, option_index)
            .await
            .map_err(|err| {
                error!("Vote increment on {poll_id} failed: {err}");
                match err {
                    BackendError::NotFound(id) => VoteError::PollNotFound(id),
                    err => VoteError::RemoteMutationFailed(err),
                }
            })?;

        if let Err(source) = self.ledger.record(address, &poll_id, option_index) {
            warn!(
                "Vote on {poll_id} by {} counted remotely but not recorded locally: {source}",
                address.short()
            );
            return Err(VoteError::LedgerUnrecorded { poll_id, source });
        }

        info!(
            "{} voted option {option_index} on {poll_id}",
            address.short()
        );
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("Connect a wallet to vote")]
    IdentityUnavailable,

    #[error("Already voted on {0}")]
    AlreadyVoted(PollId),

    #[error("Poll {0} has ended")]
    PollEnded(PollId),

    #[error("Poll {0} does not exist")]
    PollNotFound(PollId),

    #[error("Poll {poll_id} has {options} options, {index} is out of range")]
    InvalidOption {
        poll_id: PollId,
        index: usize,
        options: usize,
    },

    #[error("Could not load poll: {0}")]
    Lookup(BackendError),

    #[error("Vote was not applied: {0}")]
    RemoteMutationFailed(BackendError),

    /// The increment is durable on the backend but this client has no
    /// ledger entry for it. The pair stays claimed for the session.
    #[error("Vote on {poll_id} counted but not recorded locally")]
    LedgerUnrecorded {
        poll_id: PollId,
        source: LedgerError,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Vote task was interrupted")]
    Interrupted,
}
