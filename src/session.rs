use crate::backend::{BackendAuth, SessionToken};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

/// Observes the backend's auth state and gates store and catalog access on it.
#[derive(Clone, Debug)]
pub struct BackendSession {
    session: watch::Receiver<Option<SessionToken>>,
}

impl BackendSession {
    /// Signs in anonymously once if there is no session yet. A failed sign-in
    /// is logged and not retried; the session then stays unauthenticated
    /// until the backend reports one by other means.
    pub fn start<A: BackendAuth>(auth: Arc<A>) -> Self {
        let session = auth.session();
        let signed_in = session.borrow().is_some();

        if signed_in {
            debug!("Reusing existing backend session");
        } else {
            tokio::spawn(
                async move {
                    match auth.sign_in_anonymously().await {
                        Ok(token) => info!("Signed in anonymously as {token}"),
                        Err(err) => error!("Anonymous sign-in failed: {err}"),
                    }
                }
                .in_current_span(),
            );
        }

        Self { session }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.session.borrow().clone()
    }

    /// Resolves once a session exists. `None` if the auth source went away
    /// without ever producing one.
    pub async fn authenticated(&self) -> Option<SessionToken> {
        let mut rx = self.session.clone();
        let token = rx.wait_for(Option::is_some).await.ok()?.clone();
        token
    }
}
