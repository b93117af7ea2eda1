//! The resolved participant identity and the owned context that publishes it.
//!
//! [`IdentityContext`] is the single writer and belongs to the
//! [`ConnectionBootstrap`](crate::bootstrap::ConnectionBootstrap). Everything
//! else observes it through an [`IdentityHandle`].

use crate::constants::ANONYMOUS_USERNAME;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Chain account identifier; the primary key for voting rights.
#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(inner: impl Into<String>) -> Address {
        Self(inner.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234...abcd` style rendering for display surfaces.
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 10 {
            return self.0.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

/// Profile resolved from the external identity context.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SocialProfile {
    pub external_id: String,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

impl SocialProfile {
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("User")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityState {
    pub address: Option<Address>,
    pub profile: Option<SocialProfile>,
    pub ready: bool,
}

impl IdentityState {
    /// A settled state with nobody to vote as.
    pub fn unavailable() -> Self {
        Self {
            address: None,
            profile: None,
            ready: true,
        }
    }

    pub fn connected(address: Address, profile: Option<SocialProfile>) -> Self {
        Self {
            address: Some(address),
            profile,
            ready: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    /// Name stamped on polls this identity creates.
    pub fn creator_username(&self) -> String {
        self.profile
            .as_ref()
            .and_then(|p| p.username.clone().or_else(|| p.display_name.clone()))
            .unwrap_or_else(|| ANONYMOUS_USERNAME.to_string())
    }
}

impl fmt::Display for IdentityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let ready = if self.ready { "ready" } else { "pending" };
        match (&self.address, &self.profile) {
            (Some(addr), Some(profile)) => {
                write!(f, "{ready} - {} - {}", addr.short(), profile.label())
            }
            (Some(addr), None) => write!(f, "{ready} - {}", addr.short()),
            (None, _) => write!(f, "{ready} - no identity"),
        }
    }
}

/// Owned, per-session identity state. One writer, many [`IdentityHandle`]s.
#[derive(Debug)]
pub struct IdentityContext {
    tx: watch::Sender<IdentityState>,
}

impl IdentityContext {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(IdentityState::default());
        Self { tx }
    }

    pub fn handle(&self) -> IdentityHandle {
        IdentityHandle {
            rx: self.tx.subscribe(),
        }
    }

    pub fn current(&self) -> IdentityState {
        self.tx.borrow().clone()
    }

    /// Returns whether subscribers were notified.
    pub(crate) fn publish(&self, next: IdentityState) -> bool {
        self.tx.send_if_modified(move |current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}

impl Default for IdentityContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct IdentityHandle {
    rx: watch::Receiver<IdentityState>,
}

impl IdentityHandle {
    pub fn current(&self) -> IdentityState {
        self.rx.borrow().clone()
    }

    /// Waits for the next published change. `None` once the context is gone.
    pub async fn changed(&mut self) -> Option<IdentityState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Waits until bootstrap has reached a determination.
    pub async fn ready(&mut self) -> Option<IdentityState> {
        let state = self.rx.wait_for(|state| state.ready).await.ok()?;
        Some(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> SocialProfile {
        SocialProfile {
            external_id: "3621".to_string(),
            display_name: Some("Ada".to_string()),
            username: Some("ada".to_string()),
            avatar_url: None,
        }
    }

    #[test]
    fn short_address() {
        let addr = Address::new("0x71C7656EC7ab88b098defB751B7401B5f6d8976F");
        assert_eq!(addr.short(), "0x71C7...976F");
        assert_eq!(Address::new("0xabc").short(), "0xabc");
    }

    #[test]
    fn creator_username_falls_back() {
        let addr = Address::new("0x1");
        let mut state = IdentityState::connected(addr.clone(), Some(profile()));
        assert_eq!(state.creator_username(), "ada");

        state.profile.as_mut().unwrap().username = None;
        assert_eq!(state.creator_username(), "Ada");

        let state = IdentityState::connected(addr, None);
        assert_eq!(state.creator_username(), "anonymous");
    }

    #[test]
    fn publish_only_notifies_on_change() {
        let ctx = IdentityContext::new();
        let handle = ctx.handle();

        assert!(ctx.publish(IdentityState::unavailable()));
        assert!(!ctx.publish(IdentityState::unavailable()));
        assert_eq!(handle.current(), IdentityState::unavailable());
    }

    #[tokio::test]
    async fn handle_waits_for_ready() {
        let ctx = IdentityContext::new();
        let mut handle = ctx.handle();
        assert!(!handle.current().ready);

        let addr = Address::new("0xfeed");
        let waiter = tokio::spawn(async move { handle.ready().await });
        ctx.publish(IdentityState::connected(addr.clone(), None));

        let state = waiter.await.unwrap().unwrap();
        assert_eq!(state.address, Some(addr));
    }
}
