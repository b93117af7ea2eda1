#[macro_use]
extern crate tracing;

mod constants;
mod handle;

pub mod backend;
pub mod bootstrap;
pub mod catalog;
pub mod client;
pub mod clock;
pub mod committer;
pub mod config;
pub mod identity;
pub mod ledger;
pub mod memory;
pub mod poll;
pub mod profile;
pub mod session;
pub mod store;

pub use client::{ClientError, PollClient, PollClientBuilder};
pub use committer::{VoteCommitter, VoteError};
pub use handle::BootstrapHandle;
pub use identity::{Address, IdentityHandle, IdentityState};
pub use poll::{Poll, PollDraft, PollId};
pub use store::{PollSnapshot, PollSubscription};
