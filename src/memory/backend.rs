use crate::backend::{
    BackendAuth, BackendError, Document, PollBackend, PollQuery, SessionToken,
};
use crate::clock::{Clock, SystemClock};
use crate::poll::{NewPoll, Poll, PollId};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Poll documents and an anonymous session held in process memory. Clones
/// share state, so several clients can work against one instance.
pub struct MemoryBackend<C = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for MemoryBackend<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<C> {
    clock: C,
    docs: Mutex<HashMap<PollId, watch::Sender<Document>>>,
    session: watch::Sender<Option<SessionToken>>,
    faults: Mutex<Faults>,
    increments: AtomicUsize,
    jitter_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct Faults {
    failing_increments: usize,
    failing_auth: bool,
    failing_queries: bool,
}

impl MemoryBackend<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryBackend<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryBackend<C> {
    pub fn with_clock(clock: C) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                clock,
                docs: Mutex::new(HashMap::new()),
                session,
                faults: Mutex::new(Faults::default()),
                increments: AtomicUsize::new(0),
                jitter_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Every call sleeps a random time up to `max` before touching state.
    pub fn set_jitter(&self, max: Duration) {
        self.inner
            .jitter_ms
            .store(max.as_millis() as u64, Ordering::Relaxed);
    }

    /// The next `count` increments fail without writing.
    pub fn fail_increments(&self, count: usize) {
        self.faults().failing_increments = count;
    }

    pub fn fail_auth(&self, fail: bool) {
        self.faults().failing_auth = fail;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.faults().failing_queries = fail;
    }

    /// Successful vote increments since creation.
    pub fn increments(&self) -> usize {
        self.inner.increments.load(Ordering::SeqCst)
    }

    pub fn peek(&self, id: &PollId) -> Option<Poll> {
        let docs = self.inner.docs.lock().expect("poisoned lock");
        docs.get(id).and_then(|tx| tx.borrow().poll.clone())
    }

    /// Open live views on one document.
    pub fn watchers(&self, id: &PollId) -> usize {
        let docs = self.inner.docs.lock().expect("poisoned lock");
        docs.get(id).map_or(0, |tx| tx.receiver_count())
    }

    /// Documents currently held, including placeholders for watched ids.
    pub fn documents(&self) -> usize {
        self.inner.docs.lock().expect("poisoned lock").len()
    }

    pub fn sign_out(&self) {
        self.inner.session.send_replace(None);
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.inner.faults.lock().expect("poisoned lock")
    }

    async fn jitter(&self) {
        let max = self.inner.jitter_ms.load(Ordering::Relaxed);
        if max == 0 {
            return;
        }
        let ms = rand::rng().random_range(0..=max);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Replaces a whole document. Only exists to demonstrate why vote counts
    /// must never be written this way.
    #[cfg(test)]
    pub(crate) fn overwrite(&self, poll: Poll) {
        let docs = self.inner.docs.lock().expect("poisoned lock");
        if let Some(tx) = docs.get(&poll.id) {
            tx.send_modify(|doc| {
                doc.revision += 1;
                doc.poll = Some(poll);
            });
        }
    }
}

impl<C: Clock> PollBackend for MemoryBackend<C> {
    async fn insert(&self, poll: NewPoll) -> Result<Poll, BackendError> {
        self.jitter().await;
        let poll = poll.into_poll(PollId::new(), self.inner.clock.now());
        let mut docs = self.inner.docs.lock().expect("poisoned lock");
        let doc = Document {
            revision: 1,
            poll: Some(poll.clone()),
        };
        match docs.get(&poll.id) {
            Some(tx) => {
                tx.send_replace(doc);
            }
            None => {
                let (tx, _) = watch::channel(doc);
                docs.insert(poll.id, tx);
            }
        }
        debug!("Stored poll {}", poll.id);
        Ok(poll)
    }

    async fn fetch(&self, id: &PollId) -> Result<Option<Poll>, BackendError> {
        self.jitter().await;
        Ok(self.peek(id))
    }

    async fn increment_vote(&self, id: &PollId, option_index: usize) -> Result<(), BackendError> {
        self.jitter().await;
        {
            let mut faults = self.faults();
            if faults.failing_increments > 0 {
                faults.failing_increments -= 1;
                return Err(BackendError::Unavailable("injected failure".to_string()));
            }
        }

        let docs = self.inner.docs.lock().expect("poisoned lock");
        let tx = docs.get(id).ok_or(BackendError::NotFound(*id))?;

        let mut outcome = Err(BackendError::NotFound(*id));
        tx.send_if_modified(|doc| {
            let Some(poll) = doc.poll.as_mut() else {
                return false;
            };
            let Some(option) = poll.options.get_mut(option_index) else {
                outcome = Err(BackendError::OptionOutOfRange {
                    id: *id,
                    index: option_index,
                });
                return false;
            };
            option.votes += 1;
            poll.total_votes += 1;
            doc.revision += 1;
            outcome = Ok(());
            true
        });

        if outcome.is_ok() {
            self.inner.increments.fetch_add(1, Ordering::SeqCst);
        }
        outcome
    }

    async fn query(&self, query: PollQuery) -> Result<Vec<Poll>, BackendError> {
        self.jitter().await;
        if self.faults().failing_queries {
            return Err(BackendError::Unavailable("injected failure".to_string()));
        }

        let docs = self.inner.docs.lock().expect("poisoned lock");
        let mut polls: Vec<Poll> = docs
            .values()
            .filter_map(|tx| tx.borrow().poll.clone())
            .filter(|poll| query.end_time.matches(poll.end_time))
            .filter(|poll| {
                query
                    .creator
                    .as_ref()
                    .is_none_or(|creator| *creator == poll.creator_address)
            })
            .collect();

        polls.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        if let Some(limit) = query.limit {
            polls.truncate(limit);
        }
        Ok(polls)
    }

    async fn watch(&self, id: &PollId) -> Result<watch::Receiver<Document>, BackendError> {
        self.jitter().await;
        let mut docs = self.inner.docs.lock().expect("poisoned lock");
        // Placeholders for ids that never got a poll only live while watched.
        docs.retain(|key, tx| {
            key == id || tx.borrow().poll.is_some() || tx.receiver_count() > 0
        });
        let tx = docs
            .entry(*id)
            .or_insert_with(|| watch::channel(Document::missing()).0);
        Ok(tx.subscribe())
    }
}

impl<C: Clock> BackendAuth for MemoryBackend<C> {
    async fn sign_in_anonymously(&self) -> Result<SessionToken, BackendError> {
        self.jitter().await;
        if self.faults().failing_auth {
            return Err(BackendError::Unavailable("auth rejected".to_string()));
        }
        let token = SessionToken::new(format!("anon-{}", Uuid::new_v4()));
        self.inner.session.send_replace(Some(token.clone()));
        Ok(token)
    }

    fn session(&self) -> watch::Receiver<Option<SessionToken>> {
        self.inner.session.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EndTimeFilter;
    use crate::clock::ManualClock;
    use crate::identity::Address;
    use crate::poll::{PollDraft, PollWindow};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn new_poll(question: &str, window: PollWindow) -> NewPoll {
        let draft = PollDraft::new(question, &["Yes", "No"])
            .window(window)
            .validate()
            .unwrap();
        NewPoll::from_draft(draft, Address::new("0xc0ffee"), "maker".to_string())
    }

    #[tokio::test]
    async fn read_modify_write_loses_a_vote() {
        let backend = MemoryBackend::new();
        let poll = backend
            .insert(new_poll("Lost update?", PollWindow::OneDay))
            .await
            .unwrap();

        // Two clients each read the document before either writes.
        let mut alice = backend.fetch(&poll.id).await.unwrap().unwrap();
        let mut bob = backend.fetch(&poll.id).await.unwrap().unwrap();

        alice.options[0].votes += 1;
        alice.total_votes += 1;
        bob.options[1].votes += 1;
        bob.total_votes += 1;

        backend.overwrite(alice);
        backend.overwrite(bob);

        let stored = backend.peek(&poll.id).unwrap();
        assert_eq!(stored.total_votes, 1, "one of the two votes was dropped");
        assert_eq!(stored.options[0].votes, 0);
    }

    #[tokio::test]
    async fn atomic_increments_keep_both_votes() {
        let backend = MemoryBackend::new();
        let poll = backend
            .insert(new_poll("No lost update", PollWindow::OneDay))
            .await
            .unwrap();

        // Same interleaving as above: both clients have read before writing.
        let _alice = backend.fetch(&poll.id).await.unwrap();
        let _bob = backend.fetch(&poll.id).await.unwrap();

        let (a, b) = tokio::join!(
            backend.increment_vote(&poll.id, 0),
            backend.increment_vote(&poll.id, 1),
        );
        a.unwrap();
        b.unwrap();

        let stored = backend.peek(&poll.id).unwrap();
        assert_eq!(stored.options[0].votes, 1);
        assert_eq!(stored.options[1].votes, 1);
        assert_eq!(stored.total_votes, 2);
        assert_eq!(backend.increments(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_preserve_the_sum() {
        let backend = MemoryBackend::new();
        backend.set_jitter(Duration::from_millis(3));
        let poll = backend
            .insert(new_poll("Stress", PollWindow::OneHour))
            .await
            .unwrap();

        let mut rx = backend.watch(&poll.id).await.unwrap();
        let watcher = tokio::spawn(async move {
            let mut seen = 0;
            while rx.changed().await.is_ok() {
                let doc = rx.borrow_and_update().clone();
                let poll = doc.poll.unwrap();
                assert!(poll.is_consistent());
                seen += 1;
                if poll.total_votes == 200 {
                    break;
                }
            }
            seen
        });

        let mut set = tokio::task::JoinSet::new();
        for i in 0..200 {
            let backend = backend.clone();
            let id = poll.id;
            set.spawn(async move { backend.increment_vote(&id, i % 2).await });
        }
        while let Some(res) = set.join_next().await {
            res.unwrap().unwrap();
        }

        assert!(watcher.await.unwrap() > 0);
        let stored = backend.peek(&poll.id).unwrap();
        assert_eq!(stored.total_votes, 200);
        assert_eq!(stored.options[0].votes, 100);
        assert!(stored.is_consistent());
    }

    #[tokio::test]
    async fn increment_rejects_unknown_targets() {
        let backend = MemoryBackend::new();
        let poll = backend
            .insert(new_poll("Bounds", PollWindow::OneHour))
            .await
            .unwrap();

        let missing = PollId::new();
        assert_eq!(
            backend.increment_vote(&missing, 0).await,
            Err(BackendError::NotFound(missing))
        );
        assert_eq!(
            backend.increment_vote(&poll.id, 2).await,
            Err(BackendError::OptionOutOfRange {
                id: poll.id,
                index: 2
            })
        );
        assert_eq!(backend.increments(), 0);
        assert!(backend.peek(&poll.id).unwrap().is_consistent());
    }

    #[tokio::test]
    async fn query_filters_and_orders_by_end_time() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let backend = MemoryBackend::with_clock(clock.clone());

        let hour = backend.insert(new_poll("1h", PollWindow::OneHour)).await.unwrap();
        let day = backend.insert(new_poll("24h", PollWindow::OneDay)).await.unwrap();
        let week = backend.insert(new_poll("7d", PollWindow::OneWeek)).await.unwrap();

        let now = start + ChronoDuration::hours(2);
        let active = backend
            .query(PollQuery::end_time(EndTimeFilter::After(now)))
            .await
            .unwrap();
        let ids: Vec<_> = active.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![week.id, day.id]);

        let ended = backend
            .query(PollQuery::end_time(EndTimeFilter::AtOrBefore(hour.end_time)))
            .await
            .unwrap();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].id, hour.id);

        let capped = backend
            .query(PollQuery::end_time(EndTimeFilter::After(start)).limit(1))
            .await
            .unwrap();
        assert_eq!(capped[0].id, week.id);
    }

    #[tokio::test]
    async fn watch_reports_missing_documents() {
        let backend = MemoryBackend::new();
        let rx = backend.watch(&PollId::new()).await.unwrap();
        assert_eq!(*rx.borrow(), Document::missing());
    }

    #[tokio::test]
    async fn unwatched_placeholders_are_pruned() {
        let backend = MemoryBackend::new();
        let poll = backend
            .insert(new_poll("Kept", PollWindow::OneDay))
            .await
            .unwrap();

        for _ in 0..10 {
            let rx = backend.watch(&PollId::new()).await.unwrap();
            drop(rx);
        }
        let held = backend.watch(&PollId::new()).await.unwrap();
        assert_eq!(backend.documents(), 2);

        // The id being watched survives its own call.
        let _ = backend.watch(&PollId::new()).await.unwrap();
        assert_eq!(backend.documents(), 3);
        assert_eq!(*held.borrow(), Document::missing());
        assert!(backend.peek(&poll.id).is_some());
    }

    #[tokio::test]
    async fn anonymous_sign_in_publishes_session() {
        let backend = MemoryBackend::new();
        let mut session = backend.session();
        assert!(session.borrow().is_none());

        backend.fail_auth(true);
        assert!(backend.sign_in_anonymously().await.is_err());
        assert!(session.borrow().is_none());

        backend.fail_auth(false);
        let token = backend.sign_in_anonymously().await.unwrap();
        session.changed().await.unwrap();
        assert_eq!(session.borrow().as_ref(), Some(&token));
    }
}
