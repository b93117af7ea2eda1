use anyhow::Result;
use clap::Parser;
use pollcast::identity::{Address, SocialProfile};
use pollcast::ledger::{FileLedgerStore, LedgerStore, MemoryLedgerStore};
use pollcast::memory::{ConnectOutcome, MemoryBackend, ScriptedIdentityProvider, ScriptedWallet};
use pollcast::poll::{Category, PollDraft, PollWindow};
use pollcast::{PollClient, VoteError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{Instrument, info, info_span, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
struct Args {
    /// Extra voters casting concurrently after Alice and Bob.
    #[arg(short, long, default_value_t = 8)]
    voters: usize,

    /// Upper bound on simulated backend latency.
    #[arg(short, long, default_value_t = 20)]
    jitter_ms: u64,

    /// Keep Alice's ledger in this directory instead of in memory.
    #[arg(long)]
    ledger_dir: Option<PathBuf>,
}

fn participant(name: &str, index: usize) -> (ScriptedIdentityProvider, ScriptedWallet) {
    let profile = SocialProfile {
        external_id: index.to_string(),
        display_name: Some(name.to_string()),
        username: Some(name.to_lowercase()),
        avatar_url: None,
    };
    let address = Address::new(format!("0x{index:040x}"));
    (
        ScriptedIdentityProvider::resolving(Some(profile), Duration::from_millis(50)),
        ScriptedWallet::new(ConnectOutcome::Succeed(address), Duration::from_millis(30)),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter("scenario=info,pollcast=info")
        .with_line_number(true)
        .init();

    let args = Args::parse();
    let backend = Arc::new(MemoryBackend::new());
    backend.set_jitter(Duration::from_millis(args.jitter_ms));

    let (provider, wallet) = participant("Alice", 1);
    match &args.ledger_dir {
        Some(dir) => {
            let alice = PollClient::builder()
                .backend(backend.clone())
                .ledger(FileLedgerStore::new(dir)?)
                .start(provider, wallet)?;
            run_with(alice, backend, args.voters).await
        }
        None => {
            let alice = PollClient::builder()
                .backend(backend.clone())
                .ledger(MemoryLedgerStore::new())
                .start(provider, wallet)?;
            run_with(alice, backend, args.voters).await
        }
    }
}

async fn run_with<S: LedgerStore>(
    alice: PollClient<MemoryBackend, S>,
    backend: Arc<MemoryBackend>,
    voters: usize,
) -> Result<()> {
    let identity = alice.identity().ready().await;
    info!("Alice resolved: {identity:?}");
    alice.signed_in().await;

    let poll = alice
        .create(
            &PollDraft::new("Best chain?", &["Yes", "No"])
                .category(Category::Crypto)
                .window(PollWindow::OneDay),
        )
        .await?;
    info!("Created {poll}");

    let mut feed = alice.subscribe(poll.id);
    let watcher = tokio::spawn(
        async move {
            while let Some(item) = feed.next().await {
                match item {
                    Ok(snapshot) => match snapshot.poll() {
                        Some(poll) => info!("Live: {poll}"),
                        None => info!("Live: poll missing"),
                    },
                    Err(err) => warn!("Live: {err}"),
                }
            }
        }
        .instrument(info_span!("feed")),
    );

    let (provider, wallet) = participant("Bob", 2);
    let bob = PollClient::builder()
        .backend(backend.clone())
        .ledger(MemoryLedgerStore::new())
        .start(provider, wallet)?;
    bob.identity().ready().await;

    alice.vote(poll.id, 0).await?;
    bob.vote(poll.id, 1).await?;
    match alice.vote(poll.id, 1).await {
        Err(VoteError::AlreadyVoted(_)) => info!("Alice's second vote was refused"),
        other => warn!("Second vote unexpectedly returned {other:?}"),
    }

    let mut set = JoinSet::new();
    for i in 0..voters {
        let backend = backend.clone();
        let id = poll.id;
        set.spawn(
            async move {
                let (provider, wallet) = participant(&format!("Voter{i}"), 100 + i);
                let client = PollClient::builder()
                    .backend(backend)
                    .ledger(MemoryLedgerStore::new())
                    .start(provider, wallet)?;
                client.identity().ready().await;
                client.vote(id, i % 2).await?;
                client.shutdown().await
            }
            .instrument(info_span!("voter", i)),
        );
    }
    while let Some(res) = set.join_next().await {
        if let Err(err) = res? {
            warn!("Voter failed: {err}");
        }
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    watcher.abort();

    let final_poll = backend.peek(&poll.id);
    info!("Final: {final_poll:?}");
    info!("Alice's stats: {:?}", alice.profile().await?);

    bob.shutdown().await?;
    alice.shutdown().await
}
