use super::{ProviderContext, WalletStatus};
use crate::identity::{Address, IdentityState, SocialProfile};
use std::fmt;

/// Named bootstrap states. The phase is re-derived from the recorded facts
/// after every event, so each (phase, event) pair has a defined successor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    HandshakeInFlight,
    NoConnectorAvailable,
    AwaitingConnection { connecting: bool },
    Connected(Address),
    Disconnected,
}

impl Phase {
    /// Whether a final determination exists for the current connection state.
    pub fn is_settled(&self) -> bool {
        use Phase::*;
        match self {
            Idle | HandshakeInFlight => false,
            AwaitingConnection { connecting } => !connecting,
            NoConnectorAvailable | Connected(_) | Disconnected => true,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Phase::*;
        match self {
            Idle => write!(f, "idle"),
            HandshakeInFlight => write!(f, "handshake"),
            NoConnectorAvailable => write!(f, "no-connector"),
            AwaitingConnection { connecting: true } => write!(f, "awaiting(connecting)"),
            AwaitingConnection { connecting: false } => write!(f, "awaiting"),
            Connected(addr) => write!(f, "connected.{}", addr.short()),
            Disconnected => write!(f, "disconnected"),
        }
    }
}

#[derive(Clone, Debug)]
pub enum BootstrapEvent {
    Mounted {
        connectors: usize,
        status: WalletStatus,
    },
    HandshakeResolved(ProviderContext),
    HandshakeFailed,
    ContextChanged(ProviderContext),
    WalletStatusChanged(WalletStatus),
    ConnectSucceeded(Address),
    ConnectFailed,
}

/// Side effects the driver must perform after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Connect,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ContextSlot {
    Pending,
    Known(Option<SocialProfile>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AutoConnect {
    NotIssued,
    InFlight,
    Settled,
}

#[derive(Clone, Debug)]
pub struct BootstrapMachine {
    phase: Phase,
    context: ContextSlot,
    wallet: WalletStatus,
    connectors: usize,
    mounted: bool,
    auto_connect: AutoConnect,
    /// A connect call reported an address the status feed has not caught up with.
    awaiting_feed: bool,
    was_connected: bool,
}

impl BootstrapMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            context: ContextSlot::Pending,
            wallet: WalletStatus::Disconnected,
            connectors: 0,
            mounted: false,
            auto_connect: AutoConnect::NotIssued,
            awaiting_feed: false,
            was_connected: false,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn handle(&mut self, event: BootstrapEvent) -> Option<Effect> {
        use BootstrapEvent::*;
        let mut effect = None;

        match event {
            Mounted { connectors, status } => {
                if self.mounted {
                    debug!("Ignoring second mount");
                    return None;
                }
                self.mounted = true;
                self.connectors = connectors;
                self.wallet = status;
                self.awaiting_feed = false;
                self.was_connected = false;

                if self.wallet == WalletStatus::Disconnected
                    && connectors > 0
                    && self.auto_connect == AutoConnect::NotIssued
                {
                    self.auto_connect = AutoConnect::InFlight;
                    effect = Some(Effect::Connect);
                }
            }
            HandshakeResolved(ctx) | ContextChanged(ctx) => {
                self.context = ContextSlot::Known(ctx.user);
            }
            HandshakeFailed => {
                if self.context == ContextSlot::Pending {
                    self.context = ContextSlot::Known(None);
                }
            }
            WalletStatusChanged(WalletStatus::Connecting) if self.awaiting_feed => {
                trace!("Ignoring stale connecting status");
            }
            WalletStatusChanged(status) => {
                self.awaiting_feed = false;
                self.wallet = status;
            }
            ConnectSucceeded(addr) => {
                debug!("Connection attempt succeeded for {}", addr.short());
                self.settle_auto_connect();
                if self.wallet != WalletStatus::Connected(addr.clone()) {
                    self.awaiting_feed = true;
                    self.wallet = WalletStatus::Connected(addr);
                }
            }
            ConnectFailed => {
                self.settle_auto_connect();
            }
        }

        if matches!(self.wallet, WalletStatus::Connected(_)) {
            self.was_connected = true;
        }

        let next = self.derive_phase();
        if next != self.phase {
            debug!("Bootstrap {} -> {}", self.phase, next);
            self.phase = next;
        }

        effect
    }

    /// The identity exposed for the current phase. Only a connected wallet
    /// carries an address or profile.
    pub fn identity(&self) -> IdentityState {
        let ready = self.phase.is_settled();
        match (&self.phase, &self.context) {
            (Phase::Connected(addr), ContextSlot::Known(profile)) => IdentityState {
                address: Some(addr.clone()),
                profile: profile.clone(),
                ready,
            },
            _ => IdentityState {
                address: None,
                profile: None,
                ready,
            },
        }
    }

    fn settle_auto_connect(&mut self) {
        if self.auto_connect == AutoConnect::InFlight {
            self.auto_connect = AutoConnect::Settled;
        }
    }

    fn derive_phase(&self) -> Phase {
        if !self.mounted {
            return Phase::Idle;
        }
        // Losing a wallet is final even while the handshake is still out.
        if self.wallet == WalletStatus::Disconnected
            && self.was_connected
            && self.auto_connect != AutoConnect::InFlight
        {
            return Phase::Disconnected;
        }
        if self.context == ContextSlot::Pending {
            return Phase::HandshakeInFlight;
        }

        match &self.wallet {
            WalletStatus::Connected(addr) => Phase::Connected(addr.clone()),
            WalletStatus::Connecting => Phase::AwaitingConnection { connecting: true },
            WalletStatus::Disconnected => {
                if self.auto_connect == AutoConnect::InFlight {
                    Phase::AwaitingConnection { connecting: true }
                } else if self.connectors == 0 {
                    Phase::NoConnectorAvailable
                } else {
                    Phase::AwaitingConnection { connecting: false }
                }
            }
        }
    }
}

impl Default for BootstrapMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BootstrapEvent::*;

    fn addr() -> Address {
        Address::new("0x00000000000000000000000000000000000000aa")
    }

    fn profile() -> SocialProfile {
        SocialProfile {
            external_id: "42".to_string(),
            username: Some("voter".to_string()),
            ..Default::default()
        }
    }

    fn with_profile() -> ProviderContext {
        ProviderContext {
            user: Some(profile()),
        }
    }

    fn mounted(connectors: usize) -> BootstrapEvent {
        Mounted {
            connectors,
            status: WalletStatus::Disconnected,
        }
    }

    /// Feeds events and returns how many times `ready` went false -> true.
    fn ready_edges(machine: &mut BootstrapMachine, events: Vec<BootstrapEvent>) -> usize {
        let mut edges = 0;
        let mut ready = machine.identity().ready;
        for event in events {
            machine.handle(event);
            let now = machine.identity().ready;
            if now && !ready {
                edges += 1;
            }
            ready = now;
        }
        edges
    }

    #[test]
    fn mount_issues_single_auto_connect() {
        let mut m = BootstrapMachine::new();
        assert_eq!(m.handle(mounted(1)), Some(Effect::Connect));
        assert_eq!(m.phase(), &Phase::HandshakeInFlight);

        assert_eq!(m.handle(mounted(1)), None);
        assert_eq!(
            m.handle(WalletStatusChanged(WalletStatus::Disconnected)),
            None
        );
    }

    #[test]
    fn no_auto_connect_without_connectors_or_when_connected() {
        let mut m = BootstrapMachine::new();
        assert_eq!(m.handle(mounted(0)), None);
        m.handle(HandshakeResolved(ProviderContext::default()));
        assert_eq!(m.phase(), &Phase::NoConnectorAvailable);
        assert_eq!(m.identity(), IdentityState::unavailable());

        let mut m = BootstrapMachine::new();
        let effect = m.handle(Mounted {
            connectors: 1,
            status: WalletStatus::Connected(addr()),
        });
        assert_eq!(effect, None);
    }

    #[test]
    fn wallet_first_then_profile() {
        let mut m = BootstrapMachine::new();
        let edges = ready_edges(
            &mut m,
            vec![
                mounted(1),
                WalletStatusChanged(WalletStatus::Connecting),
                WalletStatusChanged(WalletStatus::Connected(addr())),
                ConnectSucceeded(addr()),
                HandshakeResolved(with_profile()),
            ],
        );
        assert_eq!(edges, 1);
        assert_eq!(m.identity(), IdentityState::connected(addr(), Some(profile())));
    }

    #[test]
    fn profile_first_then_wallet() {
        let mut m = BootstrapMachine::new();
        let edges = ready_edges(
            &mut m,
            vec![
                mounted(1),
                HandshakeResolved(with_profile()),
                WalletStatusChanged(WalletStatus::Connecting),
                WalletStatusChanged(WalletStatus::Connected(addr())),
                ConnectSucceeded(addr()),
            ],
        );
        assert_eq!(edges, 1);
        assert_eq!(m.identity(), IdentityState::connected(addr(), Some(profile())));
    }

    #[test]
    fn pending_attempt_holds_ready_even_before_connecting_status() {
        let mut m = BootstrapMachine::new();
        m.handle(mounted(1));
        m.handle(HandshakeResolved(with_profile()));
        assert_eq!(m.phase(), &Phase::AwaitingConnection { connecting: true });
        assert!(!m.identity().ready);
    }

    #[test]
    fn failures_settle_with_null_identity() {
        let mut m = BootstrapMachine::new();
        m.handle(mounted(1));
        m.handle(HandshakeFailed);
        m.handle(WalletStatusChanged(WalletStatus::Connecting));
        m.handle(WalletStatusChanged(WalletStatus::Disconnected));
        assert_eq!(m.handle(ConnectFailed), None);

        assert_eq!(m.phase(), &Phase::AwaitingConnection { connecting: false });
        assert_eq!(m.identity(), IdentityState::unavailable());
    }

    #[test]
    fn handshake_failure_keeps_pushed_profile() {
        let mut m = BootstrapMachine::new();
        m.handle(Mounted {
            connectors: 1,
            status: WalletStatus::Connected(addr()),
        });
        m.handle(ContextChanged(with_profile()));
        m.handle(HandshakeFailed);
        assert_eq!(m.identity(), IdentityState::connected(addr(), Some(profile())));
    }

    #[test]
    fn disconnect_clears_identity_and_stays_ready() {
        let mut m = BootstrapMachine::new();
        m.handle(mounted(1));
        m.handle(HandshakeResolved(with_profile()));
        m.handle(WalletStatusChanged(WalletStatus::Connected(addr())));
        m.handle(ConnectSucceeded(addr()));
        assert!(m.identity().is_connected());

        assert_eq!(
            m.handle(WalletStatusChanged(WalletStatus::Disconnected)),
            None
        );
        assert_eq!(m.phase(), &Phase::Disconnected);
        assert_eq!(m.identity(), IdentityState::unavailable());

        // An explicit reconnect goes through AwaitingConnection and restores the profile.
        m.handle(WalletStatusChanged(WalletStatus::Connecting));
        assert_eq!(m.phase(), &Phase::AwaitingConnection { connecting: true });
        m.handle(WalletStatusChanged(WalletStatus::Connected(addr())));
        assert_eq!(m.identity(), IdentityState::connected(addr(), Some(profile())));
    }

    #[test]
    fn status_storm_while_connected_is_inert() {
        let mut m = BootstrapMachine::new();
        m.handle(Mounted {
            connectors: 2,
            status: WalletStatus::Connected(addr()),
        });
        m.handle(HandshakeResolved(ProviderContext::default()));
        let before = m.identity();

        for _ in 0..50 {
            assert_eq!(
                m.handle(WalletStatusChanged(WalletStatus::Connected(addr()))),
                None
            );
            assert_eq!(m.handle(ContextChanged(ProviderContext::default())), None);
        }
        assert_eq!(m.identity(), before);
    }

    #[test]
    fn context_change_after_settlement_updates_profile() {
        let mut m = BootstrapMachine::new();
        m.handle(Mounted {
            connectors: 1,
            status: WalletStatus::Connected(addr()),
        });
        m.handle(HandshakeResolved(ProviderContext::default()));
        assert_eq!(m.identity(), IdentityState::connected(addr(), None));

        m.handle(ContextChanged(with_profile()));
        assert_eq!(m.identity(), IdentityState::connected(addr(), Some(profile())));
    }

    #[test]
    fn connect_result_wins_over_a_lagging_feed() {
        let mut m = BootstrapMachine::new();
        let edges = ready_edges(
            &mut m,
            vec![
                mounted(1),
                HandshakeResolved(with_profile()),
                ConnectSucceeded(addr()),
            ],
        );
        assert_eq!(edges, 1);
        assert_eq!(m.phase(), &Phase::Connected(addr()));
        assert_eq!(m.identity(), IdentityState::connected(addr(), Some(profile())));

        let edges = ready_edges(
            &mut m,
            vec![
                WalletStatusChanged(WalletStatus::Connecting),
                WalletStatusChanged(WalletStatus::Connected(addr())),
            ],
        );
        assert_eq!(edges, 0);
        assert_eq!(m.identity(), IdentityState::connected(addr(), Some(profile())));

        // Once the feed has caught up, a user-started reconnect shows again.
        m.handle(WalletStatusChanged(WalletStatus::Connecting));
        assert_eq!(m.phase(), &Phase::AwaitingConnection { connecting: true });
    }

    #[test]
    fn disconnect_during_handshake_settles() {
        let mut m = BootstrapMachine::new();
        m.handle(Mounted {
            connectors: 1,
            status: WalletStatus::Connected(addr()),
        });
        assert_eq!(m.phase(), &Phase::HandshakeInFlight);
        assert!(!m.identity().ready);

        m.handle(WalletStatusChanged(WalletStatus::Disconnected));
        assert_eq!(m.phase(), &Phase::Disconnected);
        assert_eq!(m.identity(), IdentityState::unavailable());

        m.handle(HandshakeResolved(with_profile()));
        assert_eq!(m.phase(), &Phase::Disconnected);
        assert_eq!(m.identity(), IdentityState::unavailable());

        m.handle(WalletStatusChanged(WalletStatus::Connected(addr())));
        assert_eq!(m.identity(), IdentityState::connected(addr(), Some(profile())));
    }

    #[test]
    fn events_before_mount_stay_idle() {
        let mut m = BootstrapMachine::new();
        let events = vec![
            HandshakeResolved(with_profile()),
            HandshakeFailed,
            ContextChanged(ProviderContext::default()),
            WalletStatusChanged(WalletStatus::Connected(addr())),
            ConnectSucceeded(addr()),
            ConnectFailed,
        ];
        for event in events {
            assert_eq!(m.handle(event), None);
            assert_eq!(m.phase(), &Phase::Idle);
            assert!(!m.identity().ready);
        }
    }
}
