//! LMDB-backed cache implementations.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cached relations in
//! a memory-mapped store that survives process restarts and can be shared
//! by several processes on one host.
//!
//! # Lock Domains
//!
//! Every cache opens its own LMDB environment in a subdirectory named after
//! its [`RelationKind`]. LMDB serializes writers per environment, so
//! separate environments keep the caches from blocking one another.
//!
//! # Blocking
//!
//! Transactions run on tokio's blocking pool, never on a runtime worker.
//! A caller that stops waiting (see [`super::bounded::Bounded`]) gets its
//! answer immediately, but the transaction itself runs to completion: an
//! abandoned write may still commit after the caller saw
//! `BackingStoreUnavailable`. Every write is idempotent, so retrying it is
//! safe.
//!
//! # Key and Value Format
//!
//! Keys are built from [`key_part`], which keeps every key non-empty and
//! within LMDB's 511-byte limit by digesting long identifiers. Values are
//! the JSON encoding of a [`Record`] holding the full key next to the
//! payload; reads compare the full key, so a digested key never answers for
//! another identifier.
//!
//! # Errors
//!
//! Every heed failure surfaces as `BackingStoreUnavailable`.

use std::collections::HashSet;
use std::fmt::Display;
use std::marker::PhantomData;
use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use relcache_core::{
    CacheError, CacheResult, CredentialKey, DeviceId, GroupId, MemberId, OrgId, RelationKind,
    Role,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::role_key::{encode_pair, key_part, pair_prefix, RoleKey};
use super::traits::{
    CacheStats, ChildId, CredentialCache, GroupOrgCache, ParentLinkCache, RoleCache, StatsCounter,
};

type RawDb = Database<Bytes, Bytes>;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: String, reason: String },

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The blocking task running a transaction panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LmdbStoreError {
    /// Tag the failure with the relation it affected.
    pub fn into_cache_error(self, kind: RelationKind) -> CacheError {
        warn!(kind = %kind, error = %self, "LMDB backing store unavailable");
        CacheError::unavailable(kind, self)
    }
}

/// Stored value: the payload next to the full key it belongs to.
#[derive(Serialize, Deserialize)]
struct Record<K, V> {
    key: K,
    value: V,
}

/// One relation's LMDB environment.
struct LmdbStore {
    kind: RelationKind,
    env: Env,
}

impl LmdbStore {
    /// Open (or create) `root/<kind>` and the named databases inside it.
    fn open(
        root: &Path,
        kind: RelationKind,
        max_size_mb: usize,
        names: &[&str],
    ) -> Result<(Self, Vec<RawDb>), LmdbStoreError> {
        let map_size = max_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbStoreError::EnvOpen(format!("map size of {} MB overflows", max_size_mb))
        })?;

        let path = root.join(kind.as_str());
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(names.len() as u32)
                .open(&path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(tx_err)?;

        let mut dbs = Vec::with_capacity(names.len());
        for name in names {
            let db: RawDb = env
                .create_database(&mut wtxn, Some(*name))
                .map_err(|e| LmdbStoreError::DbOpen {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            dbs.push(db);
        }

        wtxn.commit().map_err(tx_err)?;

        Ok((Self { kind, env }, dbs))
    }

    /// Run `f` inside a read transaction on the blocking pool.
    async fn read<R, F>(&self, f: F) -> CacheResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&RoTxn<'_>) -> Result<R, LmdbStoreError> + Send + 'static,
    {
        let env = self.env.clone();
        self.blocking(move || {
            let rtxn = env.read_txn().map_err(tx_err)?;
            f(&rtxn)
        })
        .await
    }

    /// Run `f` inside a write transaction on the blocking pool and commit it.
    async fn write<R, F>(&self, f: F) -> CacheResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut RwTxn<'_>) -> Result<R, LmdbStoreError> + Send + 'static,
    {
        let env = self.env.clone();
        self.blocking(move || {
            let mut wtxn = env.write_txn().map_err(tx_err)?;
            let result = f(&mut wtxn)?;
            wtxn.commit().map_err(tx_err)?;
            Ok(result)
        })
        .await
    }

    async fn blocking<R, F>(&self, op: F) -> CacheResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R, LmdbStoreError> + Send + 'static,
    {
        match tokio::task::spawn_blocking(op).await {
            Ok(result) => result.map_err(|e| self.fail(e)),
            Err(e) => Err(self.fail(LmdbStoreError::Task(e.to_string()))),
        }
    }

    /// Number of entries in `db`, or zero if the store cannot be read.
    fn count(&self, db: RawDb) -> u64 {
        match self.env.read_txn().and_then(|rtxn| db.len(&rtxn)) {
            Ok(count) => count,
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "failed to count LMDB entries");
                0
            }
        }
    }

    fn fail(&self, error: LmdbStoreError) -> CacheError {
        error.into_cache_error(self.kind)
    }
}

fn tx_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LmdbStoreError> {
    serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))
}

fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LmdbStoreError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbStoreError::Deserialization(e.to_string()))
}

fn get_record<K, V>(
    db: RawDb,
    rtxn: &RoTxn<'_>,
    key: &[u8],
) -> Result<Option<Record<K, V>>, LmdbStoreError>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    match db.get(rtxn, key).map_err(tx_err)? {
        Some(bytes) => decode_value(bytes).map(Some),
        None => Ok(None),
    }
}

/// Every entry of `db` whose key starts with `prefix`, with decoded values.
fn scan_prefix<T: DeserializeOwned>(
    db: RawDb,
    rtxn: &RoTxn<'_>,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, T)>, LmdbStoreError> {
    let mut entries = Vec::new();
    for entry in db.prefix_iter(rtxn, prefix).map_err(tx_err)? {
        let (key, value) = entry.map_err(tx_err)?;
        entries.push((key.to_vec(), decode_value(value)?));
    }
    Ok(entries)
}

// ============================================================================
// CREDENTIALS
// ============================================================================

/// LMDB credential cache.
///
/// `keys` maps the credential's key part to `Record<key, device>`;
/// `devices` is the reverse index keyed by `encode_pair(device, credential)`
/// holding `Record<device, key>`.
pub struct LmdbCredentialCache {
    store: LmdbStore,
    keys: RawDb,
    devices: RawDb,
    stats: StatsCounter,
}

impl LmdbCredentialCache {
    pub fn open<P: AsRef<Path>>(root: P, max_size_mb: usize) -> CacheResult<Self> {
        let kind = RelationKind::Credential;
        let (store, dbs) = LmdbStore::open(root.as_ref(), kind, max_size_mb, &["keys", "devices"])
            .map_err(|e| e.into_cache_error(kind))?;
        Ok(Self {
            store,
            keys: dbs[0],
            devices: dbs[1],
            stats: StatsCounter::default(),
        })
    }
}

#[async_trait]
impl CredentialCache for LmdbCredentialCache {
    async fn save(&self, key: &CredentialKey, device_id: &DeviceId) -> CacheResult<()> {
        let forward = key_part(key.expose()).into_owned();
        let reverse = encode_pair(device_id.as_str(), key.expose());
        let record = encode_value(&Record {
            key,
            value: device_id,
        })
        .map_err(|e| self.store.fail(e))?;
        let reverse_record = encode_value(&Record {
            key: device_id,
            value: key,
        })
        .map_err(|e| self.store.fail(e))?;
        let (keys, devices) = (self.keys, self.devices);

        self.store
            .write(move |wtxn| {
                let previous: Option<Record<CredentialKey, DeviceId>> =
                    get_record(keys, wtxn, &forward)?;
                if let Some(previous) = previous {
                    let stale = encode_pair(previous.value.as_str(), previous.key.expose());
                    devices.delete(wtxn, &stale).map_err(tx_err)?;
                }
                keys.put(wtxn, &forward, &record).map_err(tx_err)?;
                devices.put(wtxn, &reverse, &reverse_record).map_err(tx_err)?;
                Ok(())
            })
            .await?;

        debug!(kind = %RelationKind::Credential, device_id = %device_id, "saved credential");
        Ok(())
    }

    async fn resolve(&self, key: &CredentialKey) -> CacheResult<DeviceId> {
        let forward = key_part(key.expose()).into_owned();
        let keys = self.keys;
        let record: Option<Record<CredentialKey, DeviceId>> = self
            .store
            .read(move |rtxn| get_record(keys, rtxn, &forward))
            .await?;

        let found = record.filter(|r| r.key == *key).map(|r| r.value);
        self.stats.record(&found);
        trace!(kind = %RelationKind::Credential, hit = found.is_some(), "credential lookup");
        found.ok_or_else(|| CacheError::not_found(RelationKind::Credential, "<credential>"))
    }

    async fn remove(&self, device_id: &DeviceId) -> CacheResult<()> {
        let prefix = pair_prefix(device_id.as_str());
        let owner = device_id.clone();
        let (keys, devices) = (self.keys, self.devices);

        let removed = self
            .store
            .write(move |wtxn| {
                let entries: Vec<(Vec<u8>, Record<DeviceId, CredentialKey>)> =
                    scan_prefix(devices, wtxn, &prefix)?;
                let mut removed = 0usize;
                for (reverse, record) in entries {
                    if record.key != owner {
                        continue;
                    }
                    keys.delete(wtxn, &key_part(record.value.expose()))
                        .map_err(tx_err)?;
                    devices.delete(wtxn, &reverse).map_err(tx_err)?;
                    removed += 1;
                }
                Ok(removed)
            })
            .await?;

        debug!(kind = %RelationKind::Credential, device_id = %device_id, removed, "removed credentials");
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.store.count(self.keys))
    }
}

// ============================================================================
// SINGLE-PARENT LINKS
// ============================================================================

/// Single database of child -> parent links, holding `Record<child, parent>`.
struct LmdbLinkTable {
    store: LmdbStore,
    links: RawDb,
    stats: StatsCounter,
}

impl LmdbLinkTable {
    fn open(root: &Path, kind: RelationKind, max_size_mb: usize) -> CacheResult<Self> {
        let (store, dbs) = LmdbStore::open(root, kind, max_size_mb, &["links"])
            .map_err(|e| e.into_cache_error(kind))?;
        Ok(Self {
            store,
            links: dbs[0],
            stats: StatsCounter::default(),
        })
    }

    async fn save<V>(&self, child: &str, parent: &V) -> CacheResult<()>
    where
        V: Serialize + Display + Sync,
    {
        let forward = key_part(child).into_owned();
        let record = encode_value(&Record {
            key: child,
            value: parent,
        })
        .map_err(|e| self.store.fail(e))?;
        let links = self.links;

        self.store
            .write(move |wtxn| links.put(wtxn, &forward, &record).map_err(tx_err))
            .await?;
        debug!(kind = %self.store.kind, child, parent = %parent, "saved link");
        Ok(())
    }

    async fn resolve<V>(&self, child: &str) -> CacheResult<V>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let forward = key_part(child).into_owned();
        let links = self.links;
        let record: Option<Record<String, V>> = self
            .store
            .read(move |rtxn| get_record(links, rtxn, &forward))
            .await?;

        let found = record.filter(|r| r.key == child).map(|r| r.value);
        self.stats.record(&found);
        trace!(kind = %self.store.kind, child, hit = found.is_some(), "link lookup");
        found.ok_or_else(|| CacheError::not_found(self.store.kind, child))
    }

    async fn remove(&self, child: &str) -> CacheResult<()> {
        let forward = key_part(child).into_owned();
        let links = self.links;
        let removed = self
            .store
            .write(move |wtxn| links.delete(wtxn, &forward).map_err(tx_err))
            .await?;
        debug!(kind = %self.store.kind, child, removed, "removed link");
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.store.count(self.links))
    }
}

/// LMDB child -> group cache.
pub struct LmdbParentLinkCache<C: ChildId> {
    table: LmdbLinkTable,
    _child: PhantomData<fn() -> C>,
}

impl<C: ChildId> LmdbParentLinkCache<C> {
    pub fn open<P: AsRef<Path>>(root: P, max_size_mb: usize) -> CacheResult<Self> {
        Ok(Self {
            table: LmdbLinkTable::open(root.as_ref(), C::KIND, max_size_mb)?,
            _child: PhantomData,
        })
    }
}

#[async_trait]
impl<C: ChildId> ParentLinkCache<C> for LmdbParentLinkCache<C> {
    async fn save(&self, child: &C, group_id: &GroupId) -> CacheResult<()> {
        self.table.save(child.as_str(), group_id).await
    }

    async fn resolve(&self, child: &C) -> CacheResult<GroupId> {
        self.table.resolve(child.as_str()).await
    }

    async fn remove(&self, child: &C) -> CacheResult<()> {
        self.table.remove(child.as_str()).await
    }

    fn stats(&self) -> CacheStats {
        self.table.stats()
    }
}

/// LMDB group -> organization cache.
pub struct LmdbGroupOrgCache {
    table: LmdbLinkTable,
}

impl LmdbGroupOrgCache {
    pub fn open<P: AsRef<Path>>(root: P, max_size_mb: usize) -> CacheResult<Self> {
        Ok(Self {
            table: LmdbLinkTable::open(root.as_ref(), RelationKind::GroupOrg, max_size_mb)?,
        })
    }
}

#[async_trait]
impl GroupOrgCache for LmdbGroupOrgCache {
    async fn save(&self, group_id: &GroupId, org_id: &OrgId) -> CacheResult<()> {
        self.table.save(group_id.as_str(), org_id).await
    }

    async fn resolve(&self, group_id: &GroupId) -> CacheResult<OrgId> {
        self.table.resolve(group_id.as_str()).await
    }

    async fn remove(&self, group_id: &GroupId) -> CacheResult<()> {
        self.table.remove(group_id.as_str()).await
    }

    fn stats(&self) -> CacheStats {
        self.table.stats()
    }
}

// ============================================================================
// ROLES
// ============================================================================

/// LMDB role cache.
///
/// `assignments` is keyed by [`RoleKey::encode`] and holds
/// `Record<(group, member), role>`; `memberships` is keyed by
/// [`RoleKey::encode_by_member`], holds `Record<member, group>` and is
/// written in the same transaction.
pub struct LmdbRoleCache {
    store: LmdbStore,
    assignments: RawDb,
    memberships: RawDb,
    stats: StatsCounter,
}

impl LmdbRoleCache {
    pub fn open<P: AsRef<Path>>(root: P, max_size_mb: usize) -> CacheResult<Self> {
        let kind = RelationKind::Role;
        let (store, dbs) = LmdbStore::open(
            root.as_ref(),
            kind,
            max_size_mb,
            &["assignments", "memberships"],
        )
        .map_err(|e| e.into_cache_error(kind))?;
        Ok(Self {
            store,
            assignments: dbs[0],
            memberships: dbs[1],
            stats: StatsCounter::default(),
        })
    }
}

#[async_trait]
impl RoleCache for LmdbRoleCache {
    async fn save(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role: &Role,
    ) -> CacheResult<()> {
        let key = RoleKey::new(group_id.clone(), member_id.clone());
        let (forward, reverse) = (key.encode(), key.encode_by_member());
        let record = encode_value(&Record {
            key: (group_id, member_id),
            value: role,
        })
        .map_err(|e| self.store.fail(e))?;
        let membership = encode_value(&Record {
            key: member_id,
            value: group_id,
        })
        .map_err(|e| self.store.fail(e))?;
        let (assignments, memberships) = (self.assignments, self.memberships);

        self.store
            .write(move |wtxn| {
                assignments.put(wtxn, &forward, &record).map_err(tx_err)?;
                memberships.put(wtxn, &reverse, &membership).map_err(tx_err)?;
                Ok(())
            })
            .await?;

        debug!(
            kind = %RelationKind::Role,
            group_id = %group_id,
            member_id = %member_id,
            role = %role,
            "saved role"
        );
        Ok(())
    }

    async fn resolve(&self, group_id: &GroupId, member_id: &MemberId) -> CacheResult<Role> {
        let forward = RoleKey::new(group_id.clone(), member_id.clone()).encode();
        let assignments = self.assignments;
        let record: Option<Record<(GroupId, MemberId), Role>> = self
            .store
            .read(move |rtxn| get_record(assignments, rtxn, &forward))
            .await?;

        let found = record
            .filter(|r| r.key.0 == *group_id && r.key.1 == *member_id)
            .map(|r| r.value);
        self.stats.record(&found);
        trace!(kind = %RelationKind::Role, group_id = %group_id, member_id = %member_id, hit = found.is_some(), "role lookup");
        found.ok_or_else(|| {
            CacheError::not_found(RelationKind::Role, format!("({}, {})", group_id, member_id))
        })
    }

    async fn remove(&self, group_id: &GroupId, member_id: &MemberId) -> CacheResult<()> {
        let key = RoleKey::new(group_id.clone(), member_id.clone());
        let (forward, reverse) = (key.encode(), key.encode_by_member());
        let (assignments, memberships) = (self.assignments, self.memberships);

        let removed = self
            .store
            .write(move |wtxn| {
                let removed = assignments.delete(wtxn, &forward).map_err(tx_err)?;
                memberships.delete(wtxn, &reverse).map_err(tx_err)?;
                Ok(removed)
            })
            .await?;

        debug!(kind = %RelationKind::Role, group_id = %group_id, member_id = %member_id, removed, "removed role");
        Ok(())
    }

    async fn memberships_of(&self, member_id: &MemberId) -> CacheResult<HashSet<GroupId>> {
        let prefix = RoleKey::member_prefix(member_id);
        let owner = member_id.clone();
        let memberships = self.memberships;

        self.store
            .read(move |rtxn| {
                let entries: Vec<(Vec<u8>, Record<MemberId, GroupId>)> =
                    scan_prefix(memberships, rtxn, &prefix)?;
                Ok(entries
                    .into_iter()
                    .filter(|(_, record)| record.key == owner)
                    .map(|(_, record)| record.value)
                    .collect())
            })
            .await
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.store.count(self.assignments))
    }
}
