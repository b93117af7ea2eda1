//! Poll creation and live, per-document subscriptions.

use crate::backend::{BackendError, Document, PollBackend};
use crate::constants::SNAPSHOT_CHANNEL_SIZE;
use crate::identity::IdentityState;
use crate::poll::{DraftError, NewPoll, Poll, PollDraft, PollId};
use crate::session::BackendSession;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll as TaskPoll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tracing::Instrument;

/// What a subscription delivers for its document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollSnapshot {
    Found(Poll),
    NotFound,
}

impl PollSnapshot {
    pub fn poll(&self) -> Option<&Poll> {
        match self {
            PollSnapshot::Found(poll) => Some(poll),
            PollSnapshot::NotFound => None,
        }
    }
}

pub type SnapshotResult = Result<PollSnapshot, StoreError>;

pub struct PollStore<B> {
    backend: Arc<B>,
    session: BackendSession,
    buffer: usize,
}

impl<B> Clone for PollStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            session: self.session.clone(),
            buffer: self.buffer,
        }
    }
}

impl<B: PollBackend> PollStore<B> {
    pub fn new(backend: Arc<B>, session: BackendSession) -> Self {
        Self {
            backend,
            session,
            buffer: SNAPSHOT_CHANNEL_SIZE,
        }
    }

    /// Undelivered snapshots each subscription holds before its forwarder waits.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub async fn create(
        &self,
        identity: &IdentityState,
        draft: &PollDraft,
    ) -> Result<Poll, CreateError> {
        let address = identity
            .address
            .clone()
            .ok_or(CreateError::IdentityUnavailable)?;
        let draft = draft.validate()?;
        if !self.session.is_authenticated() {
            return Err(CreateError::Backend(BackendError::Unauthenticated));
        }

        let new = NewPoll::from_draft(draft, address, identity.creator_username());
        let poll = self.backend.insert(new).await.inspect_err(|err| {
            error!("Failed to create poll: {err}");
        })?;

        info!("Created poll {} ending {}", poll.id, poll.end_time);
        Ok(poll)
    }

    /// Opens a live view of one poll. The first item arrives once the backend
    /// session exists and the document has been read; after that one item
    /// per change, including this client's own votes.
    pub fn subscribe(&self, id: PollId) -> PollSubscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let task = tokio::spawn(
            forward(self.backend.clone(), self.session.clone(), id, tx).in_current_span(),
        );
        debug!("Subscribed to poll {id}");

        PollSubscription {
            id,
            rx: ReceiverStream::new(rx),
            task,
        }
    }
}

async fn forward<B: PollBackend>(
    backend: Arc<B>,
    session: BackendSession,
    id: PollId,
    tx: mpsc::Sender<SnapshotResult>,
) {
    if session.authenticated().await.is_none() {
        debug!("Auth source closed before subscription to {id} started");
        return;
    }

    let mut docs = match backend.watch(&id).await {
        Ok(docs) => docs,
        Err(err) => {
            error!("Failed to watch poll {id}: {err}");
            let _ = tx.send(Err(err.into())).await;
            return;
        }
    };

    let mut last_revision = None;
    loop {
        let doc = docs.borrow_and_update().clone();
        if let Some(item) = admit(&id, doc, &mut last_revision) {
            if tx.send(item).await.is_err() {
                trace!("Subscriber for {id} gone");
                return;
            }
        }

        if docs.changed().await.is_err() {
            debug!("Backend closed the watch on {id}");
            return;
        }
    }
}

/// Drops documents no newer than the last one delivered, and refuses to
/// deliver a poll whose counters disagree.
fn admit(id: &PollId, doc: Document, last_revision: &mut Option<u64>) -> Option<SnapshotResult> {
    if last_revision.is_some_and(|last| doc.revision <= last) {
        trace!("Skipping stale revision {} of {id}", doc.revision);
        return None;
    }
    *last_revision = Some(doc.revision);

    let item = match doc.poll {
        None => Ok(PollSnapshot::NotFound),
        Some(poll) if poll.is_consistent() => Ok(PollSnapshot::Found(poll)),
        Some(poll) => {
            error!(
                "Poll {id} total {} disagrees with tallied {}",
                poll.total_votes,
                poll.tallied_votes()
            );
            Err(StoreError::Inconsistent {
                id: *id,
                total: poll.total_votes,
                tallied: poll.tallied_votes(),
            })
        }
    };
    Some(item)
}

/// Live view of one poll. Dropping it stops the forwarding task.
pub struct PollSubscription {
    id: PollId,
    rx: ReceiverStream<SnapshotResult>,
    task: JoinHandle<()>,
}

impl PollSubscription {
    pub fn id(&self) -> PollId {
        self.id
    }

    pub async fn next(&mut self) -> Option<SnapshotResult> {
        StreamExt::next(&mut self.rx).await
    }

    /// Stops delivery. Once this returns the subscription no longer holds
    /// anything open on the backend.
    pub async fn unsubscribe(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
        debug!("Unsubscribed from poll {}", self.id);
    }
}

impl Stream for PollSubscription {
    type Item = SnapshotResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> TaskPoll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for PollSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Poll {id} reported total {total} but its options sum to {tallied}")]
    Inconsistent { id: PollId, total: u64, tallied: u64 },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CreateError {
    #[error("Connect a wallet to create polls")]
    IdentityUnavailable,

    #[error(transparent)]
    Draft(#[from] DraftError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
