//! Collections: per-core sharded maps of object name to object.
//!
//! A collection's objects are spread across every core; the shard on core
//! `i` holds exactly the objects whose name hashes to `i`. The collection's
//! own home core (from hashing its name) is the authority for cross-shard
//! operations such as enumeration and removal.

use crate::object::Object;
use crate::store::StoreShared;
use crimson_common::{CollectionName, Error, ObjectName, Result, StoreConfig};
use crimson_runtime::{CoreId, Handle};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Handle to a collection in a store
#[derive(Clone)]
pub struct Collection {
    shared: Arc<CollectionShared>,
}

pub(crate) struct CollectionShared {
    cid: CollectionName,
    home: CoreId,
    runtime: Handle,
    store: Weak<StoreShared>,
    config: Arc<StoreConfig>,
    shards: Vec<ObjectShard>,
    removed: AtomicBool,
}

#[derive(Default)]
struct ObjectShard {
    objects: Mutex<BTreeMap<ObjectName, Object>>,
}

impl Collection {
    pub(crate) fn new(
        runtime: Handle,
        cid: CollectionName,
        home: CoreId,
        store: Weak<StoreShared>,
        config: Arc<StoreConfig>,
    ) -> Self {
        let shards = (0..runtime.core_count())
            .map(|_| ObjectShard::default())
            .collect();
        Self {
            shared: Arc::new(CollectionShared {
                cid,
                home,
                runtime,
                store,
                config,
                shards,
                removed: AtomicBool::new(false),
            }),
        }
    }

    /// Name of the collection
    #[must_use]
    pub fn cid(&self) -> &CollectionName {
        &self.shared.cid
    }

    /// The collection's authoritative core
    #[must_use]
    pub fn on_cpu(&self) -> CoreId {
        self.shared.home
    }

    /// The core an object of this collection lives on, so external
    /// schedulers need not re-hash.
    #[must_use]
    pub fn cpu_for(&self, oid: &ObjectName) -> CoreId {
        crate::core_for(oid.as_bytes(), self.shared.runtime.core_count())
    }

    /// Ensure an object exists, creating it if absent. With `exclusive`,
    /// fails if the object already exists.
    pub async fn create(&self, oid: ObjectName, exclusive: bool) -> Result<Object> {
        let shared = self.shared.clone();
        shared.check_oid(&oid)?;
        let core = self.cpu_for(&oid);
        let runtime = shared.runtime.clone();
        crate::run_on(&runtime, core, move || async move {
            shared.check_live()?;
            let mut objects = shared.shards[core.index()].objects.lock();
            if let Some(existing) = objects.get(&oid) {
                if exclusive {
                    return Err(Error::ObjectExists(oid.as_str().to_string()));
                }
                return Ok(existing.clone());
            }
            let object = Object::new(
                shared.runtime.clone(),
                oid.clone(),
                core,
                Arc::downgrade(&shared),
                shared.config.page_size,
                shared.config.pages_per_stride,
                shared.config.max_attr_name_len,
            );
            objects.insert(oid.clone(), object.clone());
            debug!(cid = %shared.cid, oid = %oid, core = %core, "object created");
            Ok(object)
        })
        .await
    }

    /// Look up an existing object
    pub async fn lookup(&self, oid: ObjectName) -> Result<Object> {
        let shared = self.shared.clone();
        shared.check_oid(&oid)?;
        let core = self.cpu_for(&oid);
        let runtime = shared.runtime.clone();
        crate::run_on(&runtime, core, move || async move {
            shared.check_live()?;
            shared.shards[core.index()]
                .objects
                .lock()
                .get(&oid)
                .cloned()
                .ok_or_else(|| Error::NoSuchObject(oid.as_str().to_string()))
        })
        .await
    }

    /// Check whether an object exists
    pub async fn exists(&self, oid: ObjectName) -> Result<bool> {
        match self.lookup(oid).await {
            Ok(_) => Ok(true),
            Err(Error::NoSuchObject(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Check whether every shard of the collection is empty
    pub async fn empty(&self) -> Result<bool> {
        let shared = self.shared.clone();
        shared.check_live()?;
        shared.all_shards_empty().await
    }

    /// Remove the collection. Succeeds only if every per-core object shard
    /// is empty at the moment the request reaches the home core.
    pub async fn remove(&self) -> Result<()> {
        let shared = self.shared.clone();
        let runtime = shared.runtime.clone();
        let home = shared.home;
        crate::run_on(&runtime, home, move || async move {
            shared.check_live()?;
            if !shared.all_shards_empty().await? {
                return Err(Error::CollectionNotEmpty(shared.cid.as_str().to_string()));
            }
            shared.removed.store(true, Ordering::Release);
            if let Some(store) = shared.store.upgrade() {
                store.unlink_local(&shared.cid);
            }
            debug!(cid = %shared.cid, "collection removed");
            Ok(())
        })
        .await
    }

    /// Enumerate object names in order across all shards, starting after
    /// `start_after`. Returns at most `limit` names plus the resume token
    /// when more remain.
    pub async fn enumerate_objects(
        &self,
        start_after: Option<ObjectName>,
        limit: usize,
    ) -> Result<(Vec<ObjectName>, Option<ObjectName>)> {
        let shared = self.shared.clone();
        let runtime = shared.runtime.clone();
        let home = shared.home;
        crate::run_on(&runtime, home, move || async move {
            shared.check_live()?;
            let per_shard = limit.saturating_add(1);
            let mut names = shared
                .runtime
                .map_reduce(
                    |core| {
                        let shared = shared.clone();
                        let start_after = start_after.clone();
                        move || async move {
                            let objects = shared.shards[core.index()].objects.lock();
                            let lower = match &start_after {
                                Some(name) => Bound::Excluded(name.clone()),
                                None => Bound::Unbounded,
                            };
                            Ok(objects
                                .range((lower, Bound::Unbounded))
                                .take(per_shard)
                                .map(|(name, _)| name.clone())
                                .collect::<Vec<_>>())
                        }
                    },
                    Vec::new(),
                    |mut acc: Vec<ObjectName>, partial| {
                        acc.extend(partial);
                        acc
                    },
                )
                .await?;
            names.sort();
            let truncated = names.len() > limit;
            names.truncate(limit);
            let token = if truncated { names.last().cloned() } else { None };
            Ok((names, token))
        })
        .await
    }

    /// Split this collection into another by predicate
    pub async fn split_collection(&self, _dest: &Collection) -> Result<()> {
        Err(Error::OperationNotSupported("split_collection"))
    }

    /// Cursor positioned at a given object
    pub async fn obj_cursor(&self, _oid: ObjectName) -> Result<()> {
        Err(Error::OperationNotSupported("obj_cursor"))
    }
}

impl CollectionShared {
    fn check_live(&self) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(Error::NoSuchCollection(self.cid.as_str().to_string()));
        }
        Ok(())
    }

    fn check_oid(&self, oid: &ObjectName) -> Result<()> {
        if oid.as_bytes().len() > self.config.max_object_name_len {
            return Err(Error::invalid_argument(format!(
                "object name exceeds {} bytes",
                self.config.max_object_name_len
            )));
        }
        Ok(())
    }

    /// AND of per-shard emptiness, gathered from every core.
    async fn all_shards_empty(self: &Arc<Self>) -> Result<bool> {
        self.runtime
            .map_reduce(
                |core| {
                    let shared = self.clone();
                    move || async move {
                        Ok(shared.shards[core.index()].objects.lock().is_empty())
                    }
                },
                true,
                |acc, empty| acc && empty,
            )
            .await
    }

    /// Drop the shard entry for `oid`. Runs on the object's home core, which
    /// is also the shard's core.
    pub(crate) fn unlink_local(&self, oid: &ObjectName) {
        let core = crate::core_for(oid.as_bytes(), self.runtime.core_count());
        self.shards[core.index()].objects.lock().remove(oid);
    }
}
