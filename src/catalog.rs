use crate::backend::{BackendError, EndTimeFilter, PollBackend, PollQuery};
use crate::clock::{Clock, SystemClock};
use crate::constants::SUMMARY_PREVIEW_OPTIONS;
use crate::identity::Address;
use crate::poll::{Category, Poll, PollId, PollOption};
use crate::session::BackendSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CatalogFilter {
    Active,
    Ended,
}

impl CatalogFilter {
    fn end_time(self, now: DateTime<Utc>) -> EndTimeFilter {
        match self {
            CatalogFilter::Active => EndTimeFilter::After(now),
            CatalogFilter::Ended => EndTimeFilter::AtOrBefore(now),
        }
    }
}

impl fmt::Display for CatalogFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            CatalogFilter::Active => write!(f, "active"),
            CatalogFilter::Ended => write!(f, "ended"),
        }
    }
}

/// One catalog row, with the first few options as a preview.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PollSummary {
    pub id: PollId,
    pub question: String,
    pub category: Category,
    pub end_time: DateTime<Utc>,
    pub total_votes: u64,
    pub creator_username: String,
    pub preview: Vec<PollOption>,
    pub option_count: usize,
}

impl From<Poll> for PollSummary {
    fn from(poll: Poll) -> Self {
        let option_count = poll.options.len();
        let preview = poll
            .options
            .into_iter()
            .take(SUMMARY_PREVIEW_OPTIONS)
            .collect();
        Self {
            id: poll.id,
            question: poll.question,
            category: poll.category,
            end_time: poll.end_time,
            total_votes: poll.total_votes,
            creator_username: poll.creator_username,
            preview,
            option_count,
        }
    }
}

/// Point-in-time listings of active and ended polls.
pub struct PollCatalog<B, C = SystemClock> {
    backend: Arc<B>,
    session: BackendSession,
    clock: C,
}

impl<B, C: Clone> Clone for PollCatalog<B, C> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            session: self.session.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<B: PollBackend, C: Clock> PollCatalog<B, C> {
    pub fn new(backend: Arc<B>, session: BackendSession, clock: C) -> Self {
        Self {
            backend,
            session,
            clock,
        }
    }

    /// Polls matching `filter`, latest `end_time` first. Empty until the
    /// backend session exists.
    pub async fn list(
        &self,
        filter: CatalogFilter,
        limit: usize,
    ) -> Result<Vec<PollSummary>, CatalogError> {
        if !self.session.is_authenticated() {
            debug!("Listing {filter} polls before sign-in, returning nothing");
            return Ok(Vec::new());
        }

        let query = PollQuery::end_time(filter.end_time(self.clock.now())).limit(limit);
        let polls = self.backend.query(query).await.inspect_err(|err| {
            error!("Failed to list {filter} polls: {err}");
        })?;

        trace!("Listed {} {filter} poll(s)", polls.len());
        Ok(polls.into_iter().map(PollSummary::from).collect())
    }

    /// Number of polls `creator` has made, active or ended.
    pub async fn created_by(&self, creator: &Address) -> Result<usize, CatalogError> {
        if !self.session.is_authenticated() {
            return Ok(0);
        }
        let query = PollQuery::end_time(EndTimeFilter::After(DateTime::<Utc>::MIN_UTC))
            .creator(creator.clone());
        Ok(self.backend.query(query).await?.len())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error(transparent)]
    Backend(#[from] BackendError),
}
