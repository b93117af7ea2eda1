use crate::bootstrap::{
    ConnectError, ConnectorRef, IdentityProvider, ProviderContext, ProviderError, WalletConnector,
    WalletStatus,
};
use crate::identity::{Address, SocialProfile};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    watch,
};

/// Identity provider whose handshake settles after a fixed delay.
#[derive(Clone)]
pub struct ScriptedIdentityProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    /// `None` means the handshake never settles.
    delay: Option<Duration>,
    outcome: Result<(), ProviderError>,
    context: Mutex<ProviderContext>,
    subscribers: Mutex<Vec<UnboundedSender<ProviderContext>>>,
    ready_calls: AtomicUsize,
}

impl ScriptedIdentityProvider {
    fn build(
        delay: Option<Duration>,
        outcome: Result<(), ProviderError>,
        user: Option<SocialProfile>,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                delay,
                outcome,
                context: Mutex::new(ProviderContext { user }),
                subscribers: Mutex::new(Vec::new()),
                ready_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Handshake succeeds after `delay` with `user` in the context.
    pub fn resolving(user: Option<SocialProfile>, delay: Duration) -> Self {
        Self::build(Some(delay), Ok(()), user)
    }

    pub fn failing(delay: Duration) -> Self {
        Self::build(
            Some(delay),
            Err(ProviderError::Handshake("host refused the frame".to_string())),
            None,
        )
    }

    /// Handshake that never resolves; only pushed contexts reach the bootstrap.
    pub fn hanging() -> Self {
        Self::build(None, Ok(()), None)
    }

    /// Replaces the context and notifies every open subscriber.
    pub fn push_context(&self, context: ProviderContext) {
        *self.inner.context.lock().expect("poisoned lock") = context.clone();
        let mut subscribers = self.inner.subscribers.lock().expect("poisoned lock");
        subscribers.retain(|tx| tx.send(context.clone()).is_ok());
    }

    pub fn ready_calls(&self) -> usize {
        self.inner.ready_calls.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for ScriptedIdentityProvider {
    async fn ready(&self) -> Result<(), ProviderError> {
        self.inner.ready_calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
        self.inner.outcome.clone()
    }

    fn current_context(&self) -> ProviderContext {
        self.inner.context.lock().expect("poisoned lock").clone()
    }

    fn on_context_changed(&self) -> UnboundedReceiver<ProviderContext> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .expect("poisoned lock")
            .push(tx);
        rx
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Succeed(Address),
    Fail,
}

/// Wallet with a single injected connector whose `connect` settles after a
/// fixed delay.
#[derive(Clone)]
pub struct ScriptedWallet {
    inner: Arc<WalletInner>,
}

struct WalletInner {
    connectors: Vec<ConnectorRef>,
    status: watch::Sender<WalletStatus>,
    outcome: ConnectOutcome,
    delay: Duration,
    /// How long the status feed trails a successful `connect`.
    feed_lag: Option<Duration>,
    connect_calls: AtomicUsize,
}

impl ScriptedWallet {
    fn build(
        connectors: Vec<ConnectorRef>,
        status: WalletStatus,
        outcome: ConnectOutcome,
        delay: Duration,
        feed_lag: Option<Duration>,
    ) -> Self {
        let (status, _) = watch::channel(status);
        Self {
            inner: Arc::new(WalletInner {
                connectors,
                status,
                outcome,
                delay,
                feed_lag,
                connect_calls: AtomicUsize::new(0),
            }),
        }
    }

    fn frame_connector() -> ConnectorRef {
        ConnectorRef::new("frame", "Frame Wallet")
    }

    pub fn new(outcome: ConnectOutcome, delay: Duration) -> Self {
        Self::build(
            vec![Self::frame_connector()],
            WalletStatus::Disconnected,
            outcome,
            delay,
            None,
        )
    }

    pub fn without_connectors() -> Self {
        Self::build(
            Vec::new(),
            WalletStatus::Disconnected,
            ConnectOutcome::Fail,
            Duration::ZERO,
            None,
        )
    }

    /// Already connected when the bootstrap mounts.
    pub fn already_connected(address: Address) -> Self {
        Self::build(
            vec![Self::frame_connector()],
            WalletStatus::Connected(address.clone()),
            ConnectOutcome::Succeed(address),
            Duration::ZERO,
            None,
        )
    }

    /// `connect` returns the address at once, but the status feed only
    /// reports it `lag` later.
    pub fn lagging(address: Address, lag: Duration) -> Self {
        Self::build(
            vec![Self::frame_connector()],
            WalletStatus::Disconnected,
            ConnectOutcome::Succeed(address),
            Duration::ZERO,
            Some(lag),
        )
    }

    /// Drives the status feed directly, as a user acting in the wallet would.
    pub fn set_status(&self, status: WalletStatus) {
        self.inner.status.send_replace(status);
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }
}

impl WalletConnector for ScriptedWallet {
    fn connectors(&self) -> Vec<ConnectorRef> {
        self.inner.connectors.clone()
    }

    fn status(&self) -> watch::Receiver<WalletStatus> {
        self.inner.status.subscribe()
    }

    async fn connect(&self, connector: &ConnectorRef) -> Result<Address, ConnectError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.inner.connectors.contains(connector) {
            return Err(ConnectError::ConnectorNotFound(connector.id.clone()));
        }

        self.set_status(WalletStatus::Connecting);
        tokio::time::sleep(self.inner.delay).await;

        match &self.inner.outcome {
            ConnectOutcome::Succeed(address) => {
                match self.inner.feed_lag {
                    Some(lag) => {
                        let wallet = self.clone();
                        let status = WalletStatus::Connected(address.clone());
                        tokio::spawn(async move {
                            tokio::time::sleep(lag).await;
                            wallet.set_status(status);
                        });
                    }
                    None => self.set_status(WalletStatus::Connected(address.clone())),
                }
                Ok(address.clone())
            }
            ConnectOutcome::Fail => {
                self.set_status(WalletStatus::Disconnected);
                Err(ConnectError::Rejected("user closed the prompt".to_string()))
            }
        }
    }

    async fn disconnect(&self) {
        self.set_status(WalletStatus::Disconnected);
    }
}
