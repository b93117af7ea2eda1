//! Boundary contracts for the poll persistence surface and its anonymous auth.
//!
//! Implementations must provide the atomic two-field increment used by
//! [`PollBackend::increment_vote`]; nothing in this crate ever writes a
//! poll's `options` wholesale after creation.

use crate::identity::Address;
use crate::poll::{NewPoll, Poll, PollId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tokio::sync::watch;

/// A poll document as the backend sees it. `revision` grows with every
/// write, so observers can drop anything older than what they already hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub revision: u64,
    pub poll: Option<Poll>,
}

impl Document {
    pub fn missing() -> Self {
        Self {
            revision: 0,
            poll: None,
        }
    }
}

/// Inequality filter on `end_time`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndTimeFilter {
    After(DateTime<Utc>),
    AtOrBefore(DateTime<Utc>),
}

impl EndTimeFilter {
    pub fn matches(&self, end_time: DateTime<Utc>) -> bool {
        match *self {
            EndTimeFilter::After(t) => end_time > t,
            EndTimeFilter::AtOrBefore(t) => end_time <= t,
        }
    }
}

/// Range query ordered by `end_time` descending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollQuery {
    pub end_time: EndTimeFilter,
    pub creator: Option<Address>,
    pub limit: Option<usize>,
}

impl PollQuery {
    pub fn end_time(filter: EndTimeFilter) -> Self {
        Self {
            end_time: filter,
            creator: None,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn creator(mut self, creator: Address) -> Self {
        self.creator = Some(creator);
        self
    }
}

pub trait PollBackend: Send + Sync + 'static {
    /// Stores a new poll, assigning its id and server timestamp.
    fn insert(&self, poll: NewPoll) -> impl Future<Output = Result<Poll, BackendError>> + Send;

    fn fetch(&self, id: &PollId) -> impl Future<Output = Result<Option<Poll>, BackendError>> + Send;

    /// Adds exactly one to `options[option_index].votes` and to `total_votes`
    /// as a single indivisible write.
    fn increment_vote(
        &self,
        id: &PollId,
        option_index: usize,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn query(&self, query: PollQuery) -> impl Future<Output = Result<Vec<Poll>, BackendError>> + Send;

    /// Live view of one document. Must yield a [`Document`] with `poll: None`
    /// rather than an error for ids that do not exist.
    fn watch(
        &self,
        id: &PollId,
    ) -> impl Future<Output = Result<watch::Receiver<Document>, BackendError>> + Send;
}

#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(inner: impl Into<String>) -> SessionToken {
        Self(inner.into())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

pub trait BackendAuth: Send + Sync + 'static {
    fn sign_in_anonymously(&self) -> impl Future<Output = Result<SessionToken, BackendError>> + Send;

    /// Current session, `None` while signed out.
    fn session(&self) -> watch::Receiver<Option<SessionToken>>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Poll {0} does not exist")]
    NotFound(PollId),

    #[error("Option {index} is out of range for poll {id}")]
    OptionOutOfRange { id: PollId, index: usize },

    #[error("Not authenticated")]
    Unauthenticated,
}
