use super::{Clock, KeyValueStore};
use crate::error::TrackerError;
use crate::models::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};

/// Canonical in-memory record plus a counter bumped on every change
#[derive(Debug)]
struct State {
    record: UsageRecord,
    revision: u64,
    /// The store could not be read at load; `record` holds only this
    /// session's changes and must be merged before anything is written
    unsynced: bool,
}

struct Inner<S> {
    store: S,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    state: Mutex<State>,
    /// Serializes writes; holds the newest revision known to be in the store
    persisted: AsyncMutex<u64>,
    health: Mutex<PersistenceHealth>,
    snapshots: watch::Sender<UsageRecord>,
    load_outcome: LoadOutcome,
}

/// Owner of the usage record shared by every screen.
///
/// Handles are cheap to clone and all point at the same state. Mutations
/// update memory synchronously and then write the newest record to the
/// store, so queries never wait on I/O and concurrent mutations cannot
/// overwrite each other. Write failures are logged and kept in
/// [`PersistenceHealth`]; they never fail the operation that caused them.
pub struct UsageTracker<S: KeyValueStore> {
    inner: Arc<Inner<S>>,
}

impl<S: KeyValueStore> Clone for UsageTracker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: KeyValueStore> UsageTracker<S> {
    /// Load the stored record, falling back to defaults when it is missing
    /// or unreadable, and apply the daily rollover before anything can
    /// query it.
    pub async fn load(store: S, clock: Arc<dyn Clock>, config: TrackerConfig) -> Self {
        let today = clock.today();

        let mut unsynced = false;
        let (mut record, source) = match read_record(&store, &config.storage_key).await {
            Ok(Some(record)) => (record, LoadSource::Restored),
            Ok(None) => {
                log::info!("No usage record stored, starting fresh");
                (UsageRecord::new(today), LoadSource::Fresh)
            }
            Err(e) => {
                // A corrupt record is lost anyway; an unreadable one may come back
                unsynced = matches!(e, TrackerError::PersistenceLoad(_));
                log::warn!("{e}; starting from a default usage record");
                (UsageRecord::new(today), LoadSource::Recovered(e.to_string()))
            }
        };

        let rolled_over = record.roll_over(today);
        if rolled_over {
            log::info!("New day {today}, daily message count reset");
        }

        let (snapshots, _) = watch::channel(record.clone());
        let tracker = Self {
            inner: Arc::new(Inner {
                store,
                clock,
                config,
                state: Mutex::new(State {
                    record,
                    revision: u64::from(rolled_over),
                    unsynced,
                }),
                persisted: AsyncMutex::new(0),
                health: Mutex::new(PersistenceHealth {
                    pending: rolled_over,
                    last_error: None,
                }),
                snapshots,
                load_outcome: LoadOutcome {
                    source,
                    rolled_over,
                },
            }),
        };

        if rolled_over {
            tracker.persist(1).await;
        }
        tracker
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.inner.load_outcome
    }

    pub fn snapshot(&self) -> UsageRecord {
        self.inner.state.lock().record.clone()
    }

    /// Receiver that observes the record after every change
    pub fn subscribe(&self) -> watch::Receiver<UsageRecord> {
        self.inner.snapshots.subscribe()
    }

    pub fn persistence_health(&self) -> PersistenceHealth {
        self.inner.health.lock().clone()
    }

    pub fn is_premium(&self) -> bool {
        self.inner.state.lock().record.is_premium
    }

    pub fn can_send_message(&self) -> bool {
        let state = self.inner.state.lock();
        let record = &state.record;
        record.is_premium
            || record.daily_message_count < self.inner.config.daily_free_limit
            || record.token_balance > 0
    }

    pub fn remaining_messages(&self) -> RemainingMessages {
        let state = self.inner.state.lock();
        let record = &state.record;
        if record.is_premium {
            RemainingMessages::Unlimited
        } else if record.token_balance > 0 {
            RemainingMessages::Tokens(record.token_balance)
        } else {
            RemainingMessages::Free(record.free_remaining(self.inner.config.daily_free_limit))
        }
    }

    /// Whether the low-balance upsell should be shown
    pub fn should_warn(&self) -> bool {
        let config = &self.inner.config;
        match self.remaining_messages() {
            RemainingMessages::Unlimited => false,
            RemainingMessages::Tokens(tokens) => tokens <= config.low_token_threshold,
            RemainingMessages::Free(left) => left <= config.low_quota_threshold,
        }
    }

    pub fn can_use_model(&self, tier: ModelTier) -> bool {
        match tier {
            ModelTier::Free => true,
            ModelTier::Premium => self.is_premium(),
        }
    }

    /// Count one message against today's free quota. Returns the new count.
    pub async fn increment_message_count(&self) -> u32 {
        let (count, revision) = self.mutate(|record| {
            record.daily_message_count = record.daily_message_count.saturating_add(1);
            (record.daily_message_count, true)
        });
        self.persist_change(revision).await;
        count
    }

    /// Spend one token. Returns false, leaving state untouched, when the
    /// balance is empty.
    pub async fn use_token(&self) -> bool {
        let (used, revision) = self.mutate(|record| {
            if record.token_balance == 0 {
                return (false, false);
            }
            record.token_balance -= 1;
            (true, true)
        });
        self.persist_change(revision).await;
        used
    }

    /// Credit `amount` tokens. Returns the new balance.
    pub async fn add_tokens(&self, amount: u32) -> Result<u32, TrackerError> {
        if amount == 0 {
            log::debug!("Ignoring grant of zero tokens");
            return Err(TrackerError::InvalidTokenAmount(amount));
        }
        let (balance, revision) = self.mutate(|record| {
            record.token_balance = record.token_balance.saturating_add(amount);
            (record.token_balance, true)
        });
        log::info!("Added {amount} tokens, balance now {balance}");
        self.persist_change(revision).await;
        Ok(balance)
    }

    /// Grant unlimited access. There is no way back.
    pub async fn upgrade_to_premium(&self) {
        let (upgraded, revision) = self.mutate(|record| {
            let upgraded = !record.is_premium;
            record.is_premium = true;
            (upgraded, upgraded)
        });
        if upgraded {
            log::info!("Upgraded to premium");
        }
        self.persist_change(revision).await;
    }

    /// Charge one outgoing message to the right entitlement: nothing for
    /// premium, then the free quota, then a token.
    pub async fn consume_message(&self) -> Result<MessageCharge, TrackerError> {
        let limit = self.inner.config.daily_free_limit;
        let (charge, revision) = self.mutate(|record| {
            if record.is_premium {
                return (Ok(MessageCharge::Premium), false);
            }
            if record.daily_message_count < limit {
                record.daily_message_count += 1;
                let remaining = record.free_remaining(limit);
                return (Ok(MessageCharge::FreeQuota { remaining }), true);
            }
            if record.token_balance > 0 {
                record.token_balance -= 1;
                let remaining = record.token_balance;
                return (Ok(MessageCharge::Token { remaining }), true);
            }
            (Err(TrackerError::QuotaExhausted), false)
        });
        match &charge {
            Ok(charge) => log::debug!("Message charged: {charge:?}"),
            Err(e) => log::info!("Message refused: {e}"),
        }
        self.persist_change(revision).await;
        charge
    }

    /// Apply a completed paywall purchase
    pub async fn apply_purchase(&self, purchase: Purchase) -> Result<(), TrackerError> {
        match purchase {
            Purchase::Monthly | Purchase::Yearly => {
                self.upgrade_to_premium().await;
                Ok(())
            }
            Purchase::Tokens(pack) => self.add_tokens(pack.tokens()).await.map(|_| ()),
        }
    }

    /// Re-check the calendar day, retry a failed write and re-read a store
    /// that was unreadable at load; called when the app returns to the
    /// foreground. Returns true if the counter rolled over.
    pub async fn refresh(&self) -> bool {
        let today = self.inner.clock.today();
        let (rolled_over, revision) = self.mutate(|record| {
            let rolled = record.roll_over(today);
            (rolled, rolled)
        });
        if rolled_over {
            log::info!("New day {today}, daily message count reset");
        }
        self.persist_change(revision).await;
        // Anything still pending is from an earlier failure
        let _ = self.flush().await;
        rolled_over
    }

    /// Write the current record if the store is behind
    pub async fn flush(&self) -> Result<(), TrackerError> {
        let revision = self.inner.state.lock().revision;
        self.write_through(revision).await
    }

    /// Apply `apply` under the state lock. The closure returns its result and
    /// whether it changed the record; changed records get a new revision.
    fn mutate<T>(&self, apply: impl FnOnce(&mut UsageRecord) -> (T, bool)) -> (T, Option<u64>) {
        let mut state = self.inner.state.lock();
        let (result, changed) = apply(&mut state.record);
        if !changed {
            return (result, None);
        }
        state.revision += 1;
        let revision = state.revision;
        self.inner.snapshots.send_replace(state.record.clone());
        self.inner.health.lock().pending = true;
        (result, Some(revision))
    }

    async fn persist_change(&self, revision: Option<u64>) {
        if let Some(revision) = revision {
            self.persist(revision).await;
        }
    }

    async fn persist(&self, revision: u64) {
        // Failure is already logged and recorded in the health state
        let _ = self.write_through(revision).await;
    }

    /// Re-read a store that failed at load and fold this session's changes
    /// into what it holds. Nothing may be written until this succeeds.
    /// Returns true if a stored record was merged. Callers hold `persisted`.
    async fn reload_unsynced(&self) -> Result<bool, TrackerError> {
        if !self.inner.state.lock().unsynced {
            return Ok(false);
        }

        let stored = match read_record(&self.inner.store, &self.inner.config.storage_key).await {
            Ok(stored) => stored,
            Err(TrackerError::CorruptRecord(e)) => {
                log::warn!("Stored usage record is corrupt ({e}); replacing it");
                None
            }
            Err(e) => {
                log::warn!("{e}; holding changes in memory until the store can be read");
                let mut health = self.inner.health.lock();
                health.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let today = self.inner.clock.today();
        let mut state = self.inner.state.lock();
        state.unsynced = false;
        let Some(stored) = stored else {
            return Ok(false);
        };

        let mut record = stored.merge_session(&state.record);
        record.roll_over(today);
        log::info!("Usage record readable again, merged this session's changes");
        state.record = record;
        state.revision += 1;
        self.inner.snapshots.send_replace(state.record.clone());
        self.inner.health.lock().pending = true;
        Ok(true)
    }

    async fn write_through(&self, revision: u64) -> Result<(), TrackerError> {
        let mut persisted = self.inner.persisted.lock().await;
        let merged = self.reload_unsynced().await?;
        if *persisted >= revision && !merged {
            return Ok(());
        }

        // Always write the newest record; it includes every earlier change
        let (record, latest) = {
            let state = self.inner.state.lock();
            (state.record.clone(), state.revision)
        };

        let result = match serde_json::to_string(&record) {
            Ok(serialized) => self
                .inner
                .store
                .set(&self.inner.config.storage_key, &serialized)
                .await
                .map_err(TrackerError::PersistenceWrite),
            Err(e) => Err(TrackerError::PersistenceWrite(e.into())),
        };

        match result {
            Ok(()) => {
                *persisted = latest;
                let current = self.inner.state.lock().revision;
                let mut health = self.inner.health.lock();
                health.pending = current > latest;
                health.last_error = None;
                Ok(())
            }
            Err(e) => {
                log::error!("{e}; keeping the change in memory and retrying on the next update");
                let mut health = self.inner.health.lock();
                health.pending = true;
                health.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

async fn read_record<S: KeyValueStore>(
    store: &S,
    key: &str,
) -> Result<Option<UsageRecord>, TrackerError> {
    let raw = store.get(key).await.map_err(TrackerError::PersistenceLoad)?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::FixedClock;
    use crate::services::store::MemoryStore;
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    async fn tracker(store: Arc<MemoryStore>) -> UsageTracker<Arc<MemoryStore>> {
        UsageTracker::load(store, Arc::new(FixedClock::new(today())), TrackerConfig::default()).await
    }

    #[tokio::test]
    async fn test_unchanged_operations_do_not_write() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone()).await;

        assert!(!tracker.use_token().await);
        assert!(tracker.add_tokens(0).await.is_err());
        assert_eq!(store.write_count(), 0);

        tracker.upgrade_to_premium().await;
        tracker.upgrade_to_premium().await;
        assert_eq!(tracker.consume_message().await.unwrap(), MessageCharge::Premium);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_revision_is_not_rewritten() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone()).await;

        tracker.increment_message_count().await;
        tracker.increment_message_count().await;
        assert_eq!(store.write_count(), 2);

        // Revision 1 is older than what the store already holds
        tracker.persist(1).await;
        assert_eq!(store.write_count(), 2);
        tracker.flush().await.unwrap();
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_every_change() {
        let tracker = tracker(Arc::new(MemoryStore::new())).await;
        let mut receiver = tracker.subscribe();

        tracker.add_tokens(5).await.unwrap();
        assert!(receiver.has_changed().unwrap());
        assert_eq!(receiver.borrow_and_update().token_balance, 5);

        assert!(tracker.use_token().await);
        assert!(receiver.has_changed().unwrap());
        assert_eq!(receiver.borrow_and_update().token_balance, 4);
    }
}
