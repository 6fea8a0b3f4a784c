//! Vault session management.
//!
//! A session holds the master passphrase and the derived-key cache while
//! unlocked, and performs every seal and open on behalf of its caller.
//! Locking, idle timeout and drop all discard both synchronously.
//!
//! Key derivation runs on blocking worker threads, gated by a semaphore.
//! A worker's permit is held by the blocking task itself, so work that is
//! abandoned after a lock still counts against the limit until it ends.
//! Each unlock starts a new generation with its own cancellation token;
//! work that finishes after the generation ended is thrown away without
//! touching the cache or returning plaintext.

use futures::future::try_join_all;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vaultkeeper_common::{Error, Result, SecretText};
use vaultkeeper_crypto::verifier::validate_new_passphrase;
use vaultkeeper_crypto::{
    derive_key, open_with_key, seal_with_key, DerivedKey, KeyCache, Passphrase, PassphraseId, Salt,
};

use crate::config::SessionConfig;
use crate::model::{Record, SealedField, StoredItem};
use crate::probe::{self, UnlockProbe};
use crate::store::EntityStore;
use crate::throttle::UnlockThrottle;

/// Session handle for tracking active sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a new unique session handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No passphrase or keys held.
    Locked,
    /// A passphrase is being checked.
    Unlocking,
    /// Passphrase confirmed; fields can be opened and sealed.
    Unlocked,
    /// The last unlock attempt failed. Holds nothing; unlock may be retried.
    LockFailed,
}

/// Result of a passphrase change.
#[derive(Debug)]
pub struct Rekeyed {
    /// The working set, resealed under the new passphrase.
    pub items: Vec<StoredItem>,
    /// Canary sealed under the new passphrase.
    pub canary: SealedField,
}

struct Inner {
    state: SessionState,
    passphrase: Option<Passphrase>,
    passphrase_id: Option<PassphraseId>,
    cache: KeyCache,
    generation: u64,
    cancel: CancellationToken,
    last_activity: Instant,
    throttle: UnlockThrottle,
}

impl Inner {
    /// Drop passphrase and keys, end the generation and cancel its work.
    fn reset(&mut self, state: SessionState) -> usize {
        self.state = state;
        self.passphrase = None;
        self.passphrase_id = None;
        self.generation = self.generation.wrapping_add(1);
        self.cancel.cancel();
        self.cache.clear()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state == SessionState::Unlocked
    }
}

/// Snapshot of an unlocked generation, taken at the start of an operation.
struct Active {
    passphrase: Passphrase,
    id: PassphraseId,
    generation: u64,
    cancel: CancellationToken,
}

/// Passphrase change worked out under `active` but not yet installed.
struct PendingRekey {
    active: Active,
    new: Passphrase,
    items: Vec<StoredItem>,
    canary: SealedField,
}

/// Sealed field plus the key derived for it.
type SealedWithKey = (SealedField, Salt, DerivedKey);

/// Blocking workers currently running, and the most ever seen at once.
#[derive(Debug, Default)]
struct WorkerLoad {
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl WorkerLoad {
    fn enter(&self) -> RunningWorker<'_> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        RunningWorker(self)
    }
}

struct RunningWorker<'a>(&'a WorkerLoad);

impl Drop for RunningWorker<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Vault session.
///
/// Shared by reference (wrap in `Arc` to use from several tasks). All
/// methods take `&self`; internal state sits behind a mutex that is never
/// held across an await point.
pub struct VaultSession {
    handle: SessionHandle,
    config: SessionConfig,
    inner: Mutex<Inner>,
    workers: Arc<Semaphore>,
    load: Arc<WorkerLoad>,
}

impl VaultSession {
    /// Create a locked session.
    pub fn new(config: SessionConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers()));
        let throttle = UnlockThrottle::new(config.max_failed_attempts, config.lockout());
        let handle = SessionHandle::new();
        debug!(session = %handle, workers = config.workers(), "Session created");

        Self {
            handle,
            config,
            inner: Mutex::new(Inner {
                state: SessionState::Locked,
                passphrase: None,
                passphrase_id: None,
                cache: KeyCache::new(),
                generation: 0,
                cancel: CancellationToken::new(),
                last_activity: Instant::now(),
                throttle,
            }),
            workers,
            load: Arc::default(),
        }
    }

    /// Get the session handle.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock if the idle timeout has passed. Returns true if it locked.
    fn expire_if_idle(&self, inner: &mut Inner) -> bool {
        let Some(timeout) = self.config.lock_timeout() else {
            return false;
        };
        if inner.state != SessionState::Unlocked || inner.last_activity.elapsed() < timeout {
            return false;
        }
        let cleared = inner.reset(SessionState::Locked);
        info!(session = %self.handle, cleared, "Session auto-locked after idle timeout");
        true
    }

    /// Current state, after applying the idle timeout.
    pub fn state(&self) -> SessionState {
        let mut inner = self.inner();
        self.expire_if_idle(&mut inner);
        inner.state
    }

    /// Whether the session is unlocked, after applying the idle timeout.
    pub fn is_unlocked(&self) -> bool {
        self.state() == SessionState::Unlocked
    }

    /// Apply the idle timeout. Returns true if the session was locked by it.
    pub fn check_timeout(&self) -> bool {
        let mut inner = self.inner();
        self.expire_if_idle(&mut inner)
    }

    /// Record activity without doing anything else.
    pub fn touch(&self) {
        let mut inner = self.inner();
        if !self.expire_if_idle(&mut inner) && inner.state == SessionState::Unlocked {
            inner.last_activity = Instant::now();
        }
    }

    /// Number of derived keys currently cached.
    pub fn cached_keys(&self) -> usize {
        self.inner().cache.len()
    }

    /// Blocking workers running right now, including abandoned ones.
    pub fn busy_workers(&self) -> usize {
        self.load.running.load(Ordering::SeqCst)
    }

    /// Most blocking workers that have run at the same time.
    pub fn peak_workers(&self) -> usize {
        self.load.peak.load(Ordering::SeqCst)
    }

    /// Consecutive failed unlocks since the last success or lockout.
    pub fn failed_attempts(&self) -> u32 {
        self.inner().throttle.failed_attempts()
    }

    /// Unlock with `passphrase`, confirmed against `probe`.
    ///
    /// # Preconditions
    /// - Session is `Locked` or `LockFailed`
    ///
    /// # Postconditions
    /// - On success the session is `Unlocked`, and the key derived for an
    ///   envelope probe is cached
    /// - On failure the session is `LockFailed` and holds no keys
    ///
    /// # Errors
    /// - `Validation` if the passphrase is empty or the session is not locked
    /// - `LockedOut` during a lockout window
    /// - `AuthenticationFailure` if the passphrase is wrong
    /// - `MalformedEnvelope` if the probe is damaged
    /// - `Cancelled` if `lock` was called while the check was running
    pub async fn unlock(&self, passphrase: Passphrase, probe: &UnlockProbe) -> Result<()> {
        if passphrase.is_empty() {
            return Err(Error::Validation("Passphrase cannot be empty".to_string()));
        }

        let (generation, cancel) = {
            let mut inner = self.inner();
            self.expire_if_idle(&mut inner);
            match inner.state {
                SessionState::Unlocked => {
                    return Err(Error::Validation("Session is already unlocked".to_string()))
                }
                SessionState::Unlocking => {
                    return Err(Error::Validation("Unlock already in progress".to_string()))
                }
                SessionState::Locked | SessionState::LockFailed => {}
            }
            inner.throttle.check(Instant::now().into_std())?;

            inner.state = SessionState::Unlocking;
            inner.generation = inner.generation.wrapping_add(1);
            inner.cancel = CancellationToken::new();
            (inner.generation, inner.cancel.clone())
        };
        debug!(session = %self.handle, "Unlocking");

        let candidate = passphrase.clone();
        let probe = probe.clone();
        let outcome = self
            .run_blocking(&cancel, move || probe::check(&probe, &candidate))
            .await;

        let mut inner = self.inner();
        if inner.generation != generation || inner.state != SessionState::Unlocking {
            return Err(Error::Cancelled);
        }

        match outcome {
            Ok(probe_key) => {
                let id = inner.cache.identify(&passphrase);
                if let Some((salt, key)) = probe_key {
                    inner.cache.insert(id, salt, key);
                }
                inner.passphrase = Some(passphrase);
                inner.passphrase_id = Some(id);
                inner.state = SessionState::Unlocked;
                inner.last_activity = Instant::now();
                inner.throttle.record_success();
                info!(session = %self.handle, "Vault unlocked");
                Ok(())
            }
            Err(e) => {
                inner.state = SessionState::LockFailed;
                inner.cache.clear();
                if e.is_authentication_failure() {
                    if inner.throttle.record_failure(Instant::now().into_std()) {
                        warn!(
                            session = %self.handle,
                            lockout_secs = self.config.lockout_secs,
                            "Too many failed unlock attempts, locked out"
                        );
                    } else {
                        warn!(
                            session = %self.handle,
                            failed = inner.throttle.failed_attempts(),
                            "Unlock failed"
                        );
                    }
                } else {
                    warn!(session = %self.handle, error = %e, "Unlock probe unusable");
                }
                Err(e)
            }
        }
    }

    /// Unlock against the store's canary, or its first sealed field if it
    /// has no canary.
    ///
    /// # Errors
    /// - `NotFound` if the store holds nothing sealed
    /// - Everything `unlock` returns
    pub async fn unlock_with_store(
        &self,
        passphrase: Passphrase,
        store: &dyn EntityStore,
    ) -> Result<()> {
        let probe = match store.load_canary().await? {
            Some(canary) => UnlockProbe::Canary(canary),
            None => UnlockProbe::first_field(&store.list_items().await?).ok_or_else(|| {
                Error::NotFound("nothing sealed to check the passphrase against".to_string())
            })?,
        };
        self.unlock(passphrase, &probe).await
    }

    /// Lock the session.
    ///
    /// Discards the passphrase and every cached key before returning and
    /// cancels all pending work. Allowed from any state.
    pub fn lock(&self) {
        let mut inner = self.inner();
        let cleared = inner.reset(SessionState::Locked);
        info!(session = %self.handle, cleared, "Session locked");
    }

    /// Take a snapshot of the unlocked generation and record activity.
    fn active(&self) -> Result<Active> {
        let mut inner = self.inner();
        self.expire_if_idle(&mut inner);
        if inner.state != SessionState::Unlocked {
            return Err(Error::Locked);
        }
        let (Some(passphrase), Some(id)) = (inner.passphrase.clone(), inner.passphrase_id) else {
            return Err(Error::Locked);
        };
        inner.last_activity = Instant::now();

        Ok(Active {
            passphrase,
            id,
            generation: inner.generation,
            cancel: inner.cancel.clone(),
        })
    }

    /// Run CPU-bound work on a blocking thread, bounded by the worker pool.
    async fn run_blocking<T, F>(&self, cancel: &CancellationToken, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = Arc::clone(&self.workers).acquire_owned() => {
                permit.map_err(|_| Error::Cancelled)?
            }
        };

        let load = Arc::clone(&self.load);
        let task = tokio::task::spawn_blocking(move || {
            // Released when the work returns, not when the caller stops waiting.
            let _permit = permit;
            let _running = load.enter();
            work()
        });
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            joined = task => {
                joined.map_err(|e| Error::Crypto(format!("Worker task failed: {}", e)))?
            }
        }
    }

    async fn open_field(&self, active: &Active, field: &SealedField) -> Result<SecretText> {
        let envelope = field.envelope()?;
        let salt = *envelope.salt();
        let cached = self.inner().cache.get(&active.id, &salt);

        let outcome = match cached {
            Some(key) => {
                debug!(session = %self.handle, "Key cache hit");
                open_with_key(&key, &envelope).map(|bytes| (bytes, None))
            }
            None => {
                debug!(session = %self.handle, "Key cache miss");
                let passphrase = active.passphrase.clone();
                self.run_blocking(&active.cancel, move || {
                    let key = derive_key(&passphrase, envelope.salt())?;
                    let bytes = open_with_key(&key, &envelope)?;
                    Ok((bytes, Some(key)))
                })
                .await
            }
        };

        let mut inner = self.inner();
        if !inner.is_current(active.generation) {
            return Err(Error::Cancelled);
        }
        match outcome {
            Ok((bytes, key)) => {
                if let Some(key) = key {
                    inner.cache.insert(active.id, salt, key);
                }
                drop(inner);
                bytes.into_secret_text()
            }
            Err(e) => {
                if e.is_authentication_failure() {
                    let cleared = inner.cache.clear();
                    warn!(
                        session = %self.handle,
                        cleared,
                        "Field failed authentication, key cache cleared"
                    );
                }
                Err(e)
            }
        }
    }

    async fn seal_under(
        &self,
        active: &Active,
        passphrase: &Passphrase,
        plaintext: &SecretText,
    ) -> Result<SealedWithKey> {
        let passphrase = passphrase.clone();
        let plaintext = plaintext.clone();
        self.run_blocking(&active.cancel, move || {
            let salt = Salt::generate();
            let key = derive_key(&passphrase, &salt)?;
            let envelope = seal_with_key(&key, salt, plaintext.expose().as_bytes())?;
            Ok((SealedField::from(&envelope), salt, key))
        })
        .await
    }

    /// Open every sensitive field of `records` concurrently, preserving order.
    async fn reveal_records<R>(
        &self,
        active: &Active,
        records: Vec<R>,
    ) -> Result<Vec<R::WithField<SecretText>>>
    where
        R: Record<Field = SealedField>,
    {
        let fields: Vec<SealedField> = records
            .iter()
            .flat_map(|r| r.sensitive_values().into_iter().map(|(_, f)| f.clone()))
            .collect();
        debug!(
            session = %self.handle,
            records = records.len(),
            fields = fields.len(),
            workers = self.config.workers(),
            "Revealing"
        );

        let mut revealed = try_join_all(fields.iter().map(|f| self.open_field(active, f)))
            .await?
            .into_iter();

        records
            .into_iter()
            .map(|record| {
                record.try_map_sensitive(|name, _| {
                    revealed
                        .next()
                        .ok_or_else(|| Error::Crypto(format!("No revealed value for {}", name)))
                })
            })
            .collect()
    }

    /// Seal every sensitive field of `records` under `passphrase`, each with
    /// a fresh salt. Blank optional values become absent first.
    async fn seal_records<R>(
        &self,
        active: &Active,
        passphrase: &Passphrase,
        records: Vec<R>,
    ) -> Result<(Vec<R::WithField<SealedField>>, Vec<(Salt, DerivedKey)>)>
    where
        R: Record<Field = SecretText>,
    {
        let mut records = records;
        for record in &mut records {
            record.prune_blank_optionals();
            record.validate()?;
        }

        let plaintexts: Vec<SecretText> = records
            .iter()
            .flat_map(|r| r.sensitive_values().into_iter().map(|(_, v)| v.clone()))
            .collect();
        let sealed = try_join_all(
            plaintexts
                .iter()
                .map(|p| self.seal_under(active, passphrase, p)),
        )
        .await?;

        let mut keys = Vec::with_capacity(sealed.len());
        let mut fields = Vec::with_capacity(sealed.len());
        for (field, salt, key) in sealed {
            fields.push(field);
            keys.push((salt, key));
        }
        let mut fields = fields.into_iter();

        let records = records
            .into_iter()
            .map(|record| {
                record.try_map_sensitive(|name, _| {
                    fields
                        .next()
                        .ok_or_else(|| Error::Crypto(format!("No sealed value for {}", name)))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((records, keys))
    }

    /// Cache keys derived under the session passphrase, if still current.
    fn commit_keys(&self, active: &Active, keys: Vec<(Salt, DerivedKey)>) -> Result<()> {
        let mut inner = self.inner();
        if !inner.is_current(active.generation) {
            return Err(Error::Cancelled);
        }
        for (salt, key) in keys {
            inner.cache.insert(active.id, salt, key);
        }
        Ok(())
    }

    /// Open one sealed field.
    ///
    /// Uses a cached key for the field's salt when there is one and caches
    /// the derived key otherwise. An authentication failure clears the
    /// cache but leaves the session unlocked.
    ///
    /// # Errors
    /// - `Locked` if the session is not unlocked
    /// - `MalformedEnvelope` if the field does not decode
    /// - `AuthenticationFailure` on a wrong key or tampering
    /// - `Cancelled` if the session locked before the field was opened
    pub async fn reveal(&self, field: &SealedField) -> Result<SecretText> {
        let active = self.active()?;
        self.open_field(&active, field).await
    }

    /// Convert one stored record to its plaintext view.
    pub async fn reveal_record<R>(&self, record: R) -> Result<R::WithField<SecretText>>
    where
        R: Record<Field = SealedField>,
    {
        let active = self.active()?;
        let mut revealed = self.reveal_records(&active, vec![record]).await?;
        revealed
            .pop()
            .ok_or_else(|| Error::Crypto("No revealed record".to_string()))
    }

    /// Convert a working set to plaintext views on the worker pool.
    ///
    /// Any failure aborts the whole batch; no partial result is returned.
    pub async fn reveal_all<R>(&self, records: Vec<R>) -> Result<Vec<R::WithField<SecretText>>>
    where
        R: Record<Field = SealedField>,
    {
        let active = self.active()?;
        self.reveal_records(&active, records).await
    }

    /// Seal one value with a fresh salt.
    pub async fn seal(&self, plaintext: &SecretText) -> Result<SealedField> {
        let active = self.active()?;
        let (field, salt, key) = self.seal_under(&active, &active.passphrase, plaintext).await?;
        self.commit_keys(&active, vec![(salt, key)])?;
        Ok(field)
    }

    /// Convert one plaintext record to its stored view.
    ///
    /// # Errors
    /// - `Validation` if a required field is empty
    /// - `Locked` or `Cancelled` as for `reveal`
    pub async fn seal_record<R>(&self, record: R) -> Result<R::WithField<SealedField>>
    where
        R: Record<Field = SecretText>,
    {
        let active = self.active()?;
        let (mut records, keys) = self
            .seal_records(&active, &active.passphrase, vec![record])
            .await?;
        self.commit_keys(&active, keys)?;
        records
            .pop()
            .ok_or_else(|| Error::Crypto("No sealed record".to_string()))
    }

    /// Seal a canary under the session passphrase.
    pub async fn create_canary(&self) -> Result<SealedField> {
        let active = self.active()?;
        let passphrase = active.passphrase.clone();
        self.run_blocking(&active.cancel, move || probe::create_canary(&passphrase))
            .await
    }

    /// Reseal `items` and a fresh canary under `new` without touching the
    /// session. The session keeps its current passphrase until
    /// `commit_rekey`.
    async fn prepare_rekey(
        &self,
        current: &Passphrase,
        new: Passphrase,
        items: Vec<StoredItem>,
    ) -> Result<PendingRekey> {
        let active = self.active()?;

        let current_id = self.inner().cache.identify(current);
        if !current_id.ct_matches(&active.id) {
            warn!(session = %self.handle, "Passphrase change rejected");
            return Err(Error::AuthenticationFailure);
        }
        let new_text = std::str::from_utf8(new.as_bytes())
            .map_err(|_| Error::Validation("Passphrase must be valid UTF-8".to_string()))?;
        validate_new_passphrase(new_text)?;

        let plain = self.reveal_records(&active, items).await?;
        let (items, _keys) = self.seal_records(&active, &new, plain).await?;
        let canary_passphrase = new.clone();
        let canary = self
            .run_blocking(&active.cancel, move || probe::create_canary(&canary_passphrase))
            .await?;

        Ok(PendingRekey {
            active,
            new,
            items,
            canary,
        })
    }

    /// Install the new passphrase if the generation that prepared it is
    /// still current. Clears the key cache.
    fn commit_rekey(&self, active: &Active, new: Passphrase, items: usize) -> Result<()> {
        let mut inner = self.inner();
        if !inner.is_current(active.generation) {
            return Err(Error::Cancelled);
        }
        let cleared = inner.cache.clear();
        let new_id = inner.cache.identify(&new);
        inner.passphrase = Some(new);
        inner.passphrase_id = Some(new_id);
        info!(session = %self.handle, items, cleared, "Master passphrase changed");
        Ok(())
    }

    /// Change the master passphrase, resealing `items` under the new one.
    ///
    /// # Postconditions
    /// - Every sensitive field of `items` is resealed under fresh salts
    /// - Identifiers, timestamps and folder references are unchanged
    /// - The key cache is cleared and the session continues under `new`
    ///
    /// # Errors
    /// - `AuthenticationFailure` if `current` is not the session passphrase
    /// - `Validation` if `new` does not meet the passphrase policy
    /// - Any error opening or sealing a field; nothing is changed then
    pub async fn change_passphrase(
        &self,
        current: &Passphrase,
        new: Passphrase,
        items: Vec<StoredItem>,
    ) -> Result<Rekeyed> {
        let PendingRekey {
            active,
            new,
            items,
            canary,
        } = self.prepare_rekey(current, new, items).await?;
        self.commit_rekey(&active, new, items.len())?;
        Ok(Rekeyed { items, canary })
    }

    /// Change the master passphrase and write the resealed items and new
    /// canary back to `store`.
    ///
    /// The store write goes through `replace_items_and_canary`, and the
    /// session moves to `new` only after it succeeds. If the write fails,
    /// both the store and the session stay on `current`. If the session
    /// locks while the write is in flight, the store holds `new` and
    /// `Cancelled` is returned.
    ///
    /// # Errors
    /// - Everything `change_passphrase` returns
    /// - Any store error; nothing is changed then
    pub async fn rekey_store(
        &self,
        current: &Passphrase,
        new: Passphrase,
        store: &dyn EntityStore,
    ) -> Result<()> {
        let items = store.list_items().await?;
        let PendingRekey {
            active,
            new,
            items,
            canary,
        } = self.prepare_rekey(current, new, items).await?;

        let saved = match store.replace_items_and_canary(items, canary).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(
                    session = %self.handle,
                    store = store.name(),
                    error = %e,
                    "Rekeyed vault not written, keeping current passphrase"
                );
                return Err(e);
            }
        };
        self.commit_rekey(&active, new, saved.len())
    }
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("handle", &self.handle)
            .field("state", &self.inner().state)
            .finish_non_exhaustive()
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        inner.reset(SessionState::Locked);
    }
}
