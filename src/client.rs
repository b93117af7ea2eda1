//! One participant session wired end to end.

use crate::backend::{BackendAuth, PollBackend};
use crate::bootstrap::{ConnectionBootstrap, IdentityProvider, WalletConnector};
use crate::catalog::{CatalogError, CatalogFilter, PollCatalog, PollSummary};
use crate::clock::{Clock, SystemClock};
use crate::committer::{VoteCommitter, VoteError};
use crate::config::ClientConfig;
use crate::handle::BootstrapHandle;
use crate::identity::IdentityHandle;
use crate::ledger::{LedgerError, LedgerStore, VoteLedger};
use crate::poll::{Poll, PollDraft, PollId};
use crate::profile::{ProfileError, ProfileStats};
use crate::session::BackendSession;
use crate::store::{CreateError, PollStore, PollSubscription};
use std::sync::Arc;
use thiserror::Error;

pub struct PollClient<B, S, C = SystemClock> {
    bootstrap: BootstrapHandle,
    session: BackendSession,
    ledger: Arc<VoteLedger<S>>,
    store: PollStore<B>,
    catalog: PollCatalog<B, C>,
    committer: VoteCommitter<B, S, C>,
    config: ClientConfig,
}

impl<B, S> PollClient<B, S, SystemClock> {
    pub fn builder() -> PollClientBuilder<B, S, SystemClock> {
        PollClientBuilder::default()
    }
}

impl<B, S, C> PollClient<B, S, C>
where
    B: PollBackend + BackendAuth,
    S: LedgerStore,
    C: Clock,
{
    pub fn identity(&self) -> IdentityHandle {
        self.bootstrap.identity()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Waits for the anonymous backend session. `false` if it can no longer
    /// appear.
    pub async fn signed_in(&self) -> bool {
        self.session.authenticated().await.is_some()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn create(&self, draft: &PollDraft) -> Result<Poll, CreateError> {
        self.store.create(&self.identity().current(), draft).await
    }

    pub fn subscribe(&self, id: PollId) -> PollSubscription {
        self.store.subscribe(id)
    }

    /// Votes as whoever the bootstrap has resolved at call time.
    pub async fn vote(&self, id: PollId, option_index: usize) -> Result<(), VoteError> {
        let identity = self.identity().current();
        self.committer.commit_vote(&identity, id, option_index).await
    }

    /// The option this identity chose on `id`, if any.
    pub fn voted_for(&self, id: &PollId) -> Result<Option<usize>, LedgerError> {
        match self.identity().current().address {
            Some(address) => self.ledger.entry(&address, id),
            None => Ok(None),
        }
    }

    pub async fn active(&self) -> Result<Vec<PollSummary>, CatalogError> {
        self.catalog
            .list(CatalogFilter::Active, self.config.active_limit)
            .await
    }

    pub async fn ended(&self) -> Result<Vec<PollSummary>, CatalogError> {
        self.catalog
            .list(CatalogFilter::Ended, self.config.ended_limit)
            .await
    }

    pub async fn profile(&self) -> Result<ProfileStats, ProfileError> {
        let identity = self.identity().current();
        ProfileStats::gather(&identity, &self.ledger, &self.catalog).await
    }

    /// Unmounts the bootstrap. Subscriptions and in-flight votes are not
    /// affected.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.bootstrap.shutdown().await
    }
}

pub struct PollClientBuilder<B, S, C = SystemClock> {
    backend: Option<Arc<B>>,
    ledger: Option<S>,
    clock: C,
    config: ClientConfig,
}

impl<B, S> Default for PollClientBuilder<B, S, SystemClock> {
    fn default() -> Self {
        PollClientBuilder {
            backend: None,
            ledger: None,
            clock: SystemClock,
            config: ClientConfig::default(),
        }
    }
}

impl<B, S, C> PollClientBuilder<B, S, C>
where
    B: PollBackend + BackendAuth,
    S: LedgerStore,
    C: Clock,
{
    pub fn backend(mut self, backend: Arc<B>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn ledger(mut self, store: S) -> Self {
        self.ledger = Some(store);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock<C2: Clock>(self, clock: C2) -> PollClientBuilder<B, S, C2> {
        PollClientBuilder {
            backend: self.backend,
            ledger: self.ledger,
            clock,
            config: self.config,
        }
    }

    /// Mounts the bootstrap and opens the backend session. Must be called
    /// from within a tokio runtime.
    pub fn start<P, W>(self, provider: P, wallet: W) -> Result<PollClient<B, S, C>, ClientError>
    where
        P: IdentityProvider,
        W: WalletConnector,
    {
        let backend = self.backend.ok_or(ClientError::MissingBackend)?;
        let ledger = Arc::new(VoteLedger::new(
            self.ledger.ok_or(ClientError::MissingLedger)?,
        ));

        let bootstrap = ConnectionBootstrap::new(provider, wallet).start();
        let session = BackendSession::start(backend.clone());
        let store = PollStore::new(backend.clone(), session.clone())
            .with_buffer(self.config.snapshot_buffer);
        let catalog = PollCatalog::new(backend.clone(), session.clone(), self.clock.clone());
        let committer = VoteCommitter::new(backend, ledger.clone(), self.clock);

        info!("Poll client started");
        Ok(PollClient {
            bootstrap,
            session,
            ledger,
            store,
            catalog,
            committer,
            config: self.config,
        })
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    #[error("No poll backend configured")]
    MissingBackend,

    #[error("No ledger store configured")]
    MissingLedger,
}
