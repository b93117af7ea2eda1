//! Drives acquisition of a wallet identity and reconciles it with the external
//! identity context.
//!
//! The decision logic lives in [`BootstrapMachine`]; this module owns the
//! collaborators, turns their asynchronous signals into [`BootstrapEvent`]s and
//! publishes the resulting identity.

use crate::constants::EVENT_CHANNEL_SIZE;
use crate::handle::BootstrapHandle;
use crate::identity::{Address, IdentityContext, IdentityHandle, SocialProfile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, Sender, UnboundedReceiver},
    oneshot, watch,
};

mod machine;

pub use machine::{BootstrapEvent, BootstrapMachine, Effect, Phase};

/// What the external identity layer currently knows about the participant.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderContext {
    pub user: Option<SocialProfile>,
}

pub trait IdentityProvider: Send + Sync + 'static {
    /// The handshake. May resolve late, never, or with an error.
    fn ready(&self) -> impl Future<Output = Result<(), ProviderError>> + Send;

    fn current_context(&self) -> ProviderContext;

    /// Push notifications for context changes, open for the provider's lifetime.
    fn on_context_changed(&self) -> UnboundedReceiver<ProviderContext>;
}

#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq)]
pub struct ConnectorRef {
    pub id: String,
    pub name: String,
}

impl ConnectorRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub enum WalletStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected(Address),
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use WalletStatus::*;
        match self {
            Disconnected => write!(f, "disconnected"),
            Connecting => write!(f, "connecting"),
            Connected(addr) => write!(f, "connected({})", addr.short()),
        }
    }
}

pub trait WalletConnector: Send + Sync + 'static {
    fn connectors(&self) -> Vec<ConnectorRef>;

    fn status(&self) -> watch::Receiver<WalletStatus>;

    fn connect(
        &self,
        connector: &ConnectorRef,
    ) -> impl Future<Output = Result<Address, ConnectError>> + Send;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

pub struct ConnectionBootstrap<P, W> {
    provider: Arc<P>,
    wallet: Arc<W>,
    context: IdentityContext,
    machine: BootstrapMachine,
}

impl<P, W> ConnectionBootstrap<P, W>
where
    P: IdentityProvider,
    W: WalletConnector,
{
    /// Creates the session's [`IdentityContext`]; the bootstrap is its only writer.
    pub fn new(provider: P, wallet: W) -> Self {
        Self {
            provider: Arc::new(provider),
            wallet: Arc::new(wallet),
            context: IdentityContext::new(),
            machine: BootstrapMachine::new(),
        }
    }

    pub fn identity(&self) -> IdentityHandle {
        self.context.handle()
    }

    /// Mounts the bootstrap on a background task.
    pub fn start(self) -> BootstrapHandle {
        let identity = self.identity();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(self.run(shutdown_rx));
        BootstrapHandle::new(handle, shutdown_tx, identity)
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> anyhow::Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let mut context_rx = self.provider.on_context_changed();
        let mut status_rx = self.wallet.status();
        let status = status_rx.borrow_and_update().clone();
        let connectors = self.wallet.connectors();

        info!(
            "Bootstrap mounting with {} connector(s), wallet {status}",
            connectors.len()
        );
        if connectors.is_empty() {
            warn!("No wallet connector registered");
        }

        self.spawn_handshake(event_tx.clone());
        let mounted = BootstrapEvent::Mounted {
            connectors: connectors.len(),
            status,
        };
        self.apply(mounted, &connectors, &event_tx);

        let mut context_open = true;
        let mut status_open = true;

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    debug!("Bootstrap shutting down");
                    break;
                }

                Some(event) = event_rx.recv() => event,

                ctx = context_rx.recv(), if context_open => match ctx {
                    Some(ctx) => BootstrapEvent::ContextChanged(ctx),
                    None => {
                        debug!("Identity provider closed its change feed");
                        context_open = false;
                        continue;
                    }
                },

                res = status_rx.changed(), if status_open => match res {
                    Ok(()) => BootstrapEvent::WalletStatusChanged(status_rx.borrow_and_update().clone()),
                    Err(_) => {
                        debug!("Wallet status feed closed");
                        status_open = false;
                        continue;
                    }
                },
            };

            self.apply(event, &connectors, &event_tx);
        }

        Ok(())
    }

    fn apply(
        &mut self,
        event: BootstrapEvent,
        connectors: &[ConnectorRef],
        event_tx: &Sender<BootstrapEvent>,
    ) {
        trace!("Bootstrap event: {event:?}");
        if let Some(Effect::Connect) = self.machine.handle(event) {
            match connectors.first() {
                Some(connector) => self.spawn_connect(connector.clone(), event_tx.clone()),
                None => warn!("Connect requested without a connector"),
            }
        }

        let identity = self.machine.identity();
        if self.context.publish(identity.clone()) {
            info!("Identity {identity} ({})", self.machine.phase());
        }
    }

    fn spawn_handshake(&self, tx: Sender<BootstrapEvent>) {
        let provider = self.provider.clone();
        tokio::spawn(async move {
            let event = match provider.ready().await {
                Ok(()) => BootstrapEvent::HandshakeResolved(provider.current_context()),
                Err(err) => {
                    warn!("Identity handshake failed: {err}");
                    BootstrapEvent::HandshakeFailed
                }
            };
            if tx.send(event).await.is_err() {
                debug!("Bootstrap gone before handshake settled");
            }
        });
    }

    fn spawn_connect(&self, connector: ConnectorRef, tx: Sender<BootstrapEvent>) {
        let wallet = self.wallet.clone();
        tokio::spawn(async move {
            info!("Connecting wallet via {}", connector.name);
            let event = match wallet.connect(&connector).await {
                Ok(addr) => BootstrapEvent::ConnectSucceeded(addr),
                Err(err) => {
                    warn!("Wallet connection failed: {err}");
                    BootstrapEvent::ConnectFailed
                }
            };
            if tx.send(event).await.is_err() {
                debug!("Bootstrap gone before connection settled");
            }
        });
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Identity handshake failed: {0}")]
    Handshake(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Connector {0} not found")]
    ConnectorNotFound(String),

    #[error("Connection rejected: {0}")]
    Rejected(String),
}
