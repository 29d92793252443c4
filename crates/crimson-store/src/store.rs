//! The store: per-core sharded map of collection name to collection.

use crate::collection::Collection;
use crimson_common::{CollectionName, Error, Result, StoreConfig};
use crimson_runtime::Handle;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Handle to the store
#[derive(Clone)]
pub struct Store {
    shared: Arc<StoreShared>,
}

pub(crate) struct StoreShared {
    runtime: Handle,
    config: Arc<StoreConfig>,
    fsid: Mutex<Uuid>,
    shards: Vec<CollectionShard>,
}

#[derive(Default)]
struct CollectionShard {
    collections: Mutex<BTreeMap<CollectionName, Collection>>,
}

impl Store {
    /// Create a store over a sharded runtime. The configured core count must
    /// match the runtime's.
    pub fn new(runtime: Handle, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        if config.core_count != runtime.core_count() {
            return Err(Error::invalid_argument(format!(
                "config expects {} cores but the runtime has {}",
                config.core_count,
                runtime.core_count()
            )));
        }
        let fsid = Uuid::new_v4();
        let shards = (0..runtime.core_count())
            .map(|_| CollectionShard::default())
            .collect();
        info!(%fsid, cores = runtime.core_count(), "store created");
        Ok(Self {
            shared: Arc::new(StoreShared {
                runtime,
                config: Arc::new(config),
                fsid: Mutex::new(fsid),
                shards,
            }),
        })
    }

    /// The runtime this store shards over
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.shared.runtime
    }

    /// Cap on object name length in bytes
    #[must_use]
    pub fn max_object_name_len(&self) -> usize {
        self.shared.config.max_object_name_len
    }

    /// Cap on attribute key length in bytes
    #[must_use]
    pub fn max_attr_name_len(&self) -> usize {
        self.shared.config.max_attr_name_len
    }

    /// Create a collection; fails if the name is already taken.
    pub async fn create_collection(&self, cid: CollectionName) -> Result<Collection> {
        let shared = self.shared.clone();
        shared.check_cid(&cid)?;
        let home = crate::core_for(cid.as_bytes(), shared.runtime.core_count());
        let runtime = shared.runtime.clone();
        crate::run_on(&runtime, home, move || async move {
            let mut collections = shared.shards[home.index()].collections.lock();
            if collections.contains_key(&cid) {
                return Err(Error::CollectionExists(cid.as_str().to_string()));
            }
            let collection = Collection::new(
                shared.runtime.clone(),
                cid.clone(),
                home,
                Arc::downgrade(&shared),
                shared.config.clone(),
            );
            collections.insert(cid.clone(), collection.clone());
            info!(%cid, core = %home, "collection created");
            Ok(collection)
        })
        .await
    }

    /// Look up an existing collection
    pub async fn lookup_collection(&self, cid: CollectionName) -> Result<Collection> {
        let shared = self.shared.clone();
        shared.check_cid(&cid)?;
        let home = crate::core_for(cid.as_bytes(), shared.runtime.core_count());
        let runtime = shared.runtime.clone();
        crate::run_on(&runtime, home, move || async move {
            shared.shards[home.index()]
                .collections
                .lock()
                .get(&cid)
                .cloned()
                .ok_or_else(|| Error::NoSuchCollection(cid.as_str().to_string()))
        })
        .await
    }

    /// Remove a collection; fails unless all of its shards are empty.
    pub async fn remove_collection(&self, cid: CollectionName) -> Result<()> {
        self.lookup_collection(cid).await?.remove().await
    }

    /// Check whether a collection exists
    pub async fn collection_exists(&self, cid: CollectionName) -> Result<bool> {
        match self.lookup_collection(cid).await {
            Ok(_) => Ok(true),
            Err(Error::NoSuchCollection(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Check whether a collection holds no objects
    pub async fn collection_empty(&self, cid: CollectionName) -> Result<bool> {
        self.lookup_collection(cid).await?.empty().await
    }

    /// Enumerate collection names in order across all shards, starting after
    /// `start_after`.
    pub async fn enumerate_collections(
        &self,
        start_after: Option<CollectionName>,
        limit: usize,
    ) -> Result<(Vec<CollectionName>, Option<CollectionName>)> {
        let shared = self.shared.clone();
        let per_shard = limit.saturating_add(1);
        let mut names = shared
            .runtime
            .map_reduce(
                |core| {
                    let shared = shared.clone();
                    let start_after = start_after.clone();
                    move || async move {
                        let collections = shared.shards[core.index()].collections.lock();
                        let lower = match &start_after {
                            Some(name) => Bound::Excluded(name.clone()),
                            None => Bound::Unbounded,
                        };
                        Ok(collections
                            .range((lower, Bound::Unbounded))
                            .take(per_shard)
                            .map(|(name, _)| name.clone())
                            .collect::<Vec<_>>())
                    }
                },
                Vec::new(),
                |mut acc: Vec<CollectionName>, partial| {
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
    }

    /// Set the store's fsid
    pub fn set_fsid(&self, fsid: Uuid) {
        *self.shared.fsid.lock() = fsid;
    }

    /// Read the store's fsid
    #[must_use]
    pub fn get_fsid(&self) -> Uuid {
        *self.shared.fsid.lock()
    }

    /// Global barrier: resolves once every core has drained the work queued
    /// before it.
    pub async fn commit(&self) -> Result<()> {
        self.shared
            .runtime
            .parallel_for_each(|_core| || async { Ok(()) })
            .await
    }

    /// Wipe the store: drop every collection shard on every core.
    /// Outstanding object handles keep their objects alive until released.
    pub async fn mkfs(&self) -> Result<()> {
        let shared = self.shared.clone();
        self.shared
            .runtime
            .parallel_for_each(move |core| {
                let shared = shared.clone();
                move || async move {
                    shared.shards[core.index()].collections.lock().clear();
                    Ok(())
                }
            })
            .await
    }
}

impl StoreShared {
    fn check_cid(&self, cid: &CollectionName) -> Result<()> {
        if cid.as_bytes().len() > self.config.max_object_name_len {
            return Err(Error::invalid_argument(format!(
                "collection name exceeds {} bytes",
                self.config.max_object_name_len
            )));
        }
        Ok(())
    }

    /// Drop the shard entry for `cid`. Runs on the collection's home core,
    /// which is also the shard's core.
    pub(crate) fn unlink_local(&self, cid: &CollectionName) {
        let core = crate::core_for(cid.as_bytes(), self.runtime.core_count());
        self.shards[core.index()].collections.lock().remove(cid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iovec::Iovec;
    use bytes::Bytes;
    use crimson_common::{ObjectName, Range};
    use crimson_runtime::Runtime;

    fn store(rt: &Runtime) -> Store {
        let config = StoreConfig {
            core_count: rt.handle().core_count(),
            page_size: 64,
            pages_per_stride: 2,
            ..StoreConfig::default()
        };
        Store::new(rt.handle(), config).unwrap()
    }

    fn cname(name: &str) -> CollectionName {
        CollectionName::new(name).unwrap()
    }

    fn oname(name: &str) -> ObjectName {
        ObjectName::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_lookup_collection() {
        let rt = Runtime::new(3).unwrap();
        let store = store(&rt);

        store.create_collection(cname("c")).await.unwrap();
        assert!(matches!(
            store.create_collection(cname("c")).await,
            Err(Error::CollectionExists(_))
        ));

        let collection = store.lookup_collection(cname("c")).await.unwrap();
        assert_eq!(collection.cid().as_str(), "c");
        assert!(matches!(
            store.lookup_collection(cname("nope")).await,
            Err(Error::NoSuchCollection(_))
        ));
        assert!(store.collection_exists(cname("c")).await.unwrap());
        assert!(!store.collection_exists(cname("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exclusive_create_object() {
        let rt = Runtime::new(2).unwrap();
        let store = store(&rt);
        let collection = store.create_collection(cname("c")).await.unwrap();

        collection.create(oname("o"), true).await.unwrap();
        assert!(matches!(
            collection.create(oname("o"), true).await,
            Err(Error::ObjectExists(_))
        ));
        // non-exclusive create returns the existing object
        collection.create(oname("o"), false).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_rejects_non_empty_collection() {
        let rt = Runtime::new(3).unwrap();
        let store = store(&rt);
        let collection = store.create_collection(cname("c")).await.unwrap();
        let object = collection.create(oname("o"), false).await.unwrap();

        assert!(matches!(
            collection.remove().await,
            Err(Error::CollectionNotEmpty(_))
        ));
        assert!(!store.collection_empty(cname("c")).await.unwrap());

        object.remove().await.unwrap();
        collection.remove().await.unwrap();
        assert!(matches!(
            store.lookup_collection(cname("c")).await,
            Err(Error::NoSuchCollection(_))
        ));
    }

    #[tokio::test]
    async fn test_removed_collection_rejects_creates() {
        let rt = Runtime::new(2).unwrap();
        let store = store(&rt);
        let collection = store.create_collection(cname("c")).await.unwrap();
        collection.remove().await.unwrap();
        assert!(matches!(
            collection.create(oname("o"), false).await,
            Err(Error::NoSuchCollection(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_after_object_remove_fails() {
        let rt = Runtime::new(2).unwrap();
        let store = store(&rt);
        let collection = store.create_collection(cname("c")).await.unwrap();
        let object = collection.create(oname("o"), false).await.unwrap();

        object
            .write(Iovec::single(0, Bytes::from_static(b"payload")))
            .await
            .unwrap();
        object.remove().await.unwrap();

        assert!(matches!(
            collection.lookup(oname("o")).await,
            Err(Error::NoSuchObject(_))
        ));
        assert!(collection.empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_write_survives_via_collection_lookup() {
        let rt = Runtime::new(3).unwrap();
        let store = store(&rt);
        let collection = store.create_collection(cname("c")).await.unwrap();
        let object = collection.create(oname("o"), false).await.unwrap();
        object
            .write(Iovec::single(10, Bytes::from_static(b"hello")))
            .await
            .unwrap();
        object.commit().await.unwrap();

        let again = collection.lookup(oname("o")).await.unwrap();
        let range = Range::new(10, 5).unwrap();
        assert_eq!(again.read(range).await.unwrap().flatten(range), b"hello");
    }

    #[tokio::test]
    async fn test_enumerate_objects_across_shards() {
        let rt = Runtime::new(3).unwrap();
        let store = store(&rt);
        let collection = store.create_collection(cname("c")).await.unwrap();

        let mut names: Vec<String> = (0..10).map(|i| format!("obj-{i:02}")).collect();
        for name in &names {
            collection.create(oname(name), false).await.unwrap();
        }
        names.sort();

        let (first, token) = collection.enumerate_objects(None, 4).await.unwrap();
        assert_eq!(
            first.iter().map(ObjectName::as_str).collect::<Vec<_>>(),
            &names[..4]
        );
        let token = token.unwrap();

        let (rest, token) = collection.enumerate_objects(Some(token), 100).await.unwrap();
        assert_eq!(
            rest.iter().map(ObjectName::as_str).collect::<Vec<_>>(),
            &names[4..]
        );
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn test_enumerate_collections() {
        let rt = Runtime::new(3).unwrap();
        let store = store(&rt);
        for name in ["alpha", "bravo", "charlie"] {
            store.create_collection(cname(name)).await.unwrap();
        }
        let (names, token) = store.enumerate_collections(None, 10).await.unwrap();
        assert_eq!(
            names.iter().map(CollectionName::as_str).collect::<Vec<_>>(),
            vec!["alpha", "bravo", "charlie"]
        );
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn test_mkfs_wipes_collections() {
        let rt = Runtime::new(3).unwrap();
        let store = store(&rt);
        for name in ["a", "b", "c"] {
            store.create_collection(cname(name)).await.unwrap();
        }
        store.mkfs().await.unwrap();
        for name in ["a", "b", "c"] {
            assert!(!store.collection_exists(cname(name)).await.unwrap());
        }
        // names are reusable after a wipe
        store.create_collection(cname("a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_fsid() {
        let rt = Runtime::new(2).unwrap();
        let store = store(&rt);
        let generated = store.get_fsid();
        assert!(!generated.is_nil());

        let fsid = Uuid::new_v4();
        store.set_fsid(fsid);
        assert_eq!(store.get_fsid(), fsid);
    }

    #[tokio::test]
    async fn test_store_commit_barrier() {
        let rt = Runtime::new(4).unwrap();
        let store = store(&rt);
        store.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_name_cap_enforced() {
        let rt = Runtime::new(2).unwrap();
        let config = StoreConfig {
            core_count: 2,
            max_object_name_len: 4,
            ..StoreConfig::default()
        };
        let store = Store::new(rt.handle(), config).unwrap();
        assert!(matches!(
            store.create_collection(cname("toolong")).await,
            Err(Error::InvalidArgument(_))
        ));
        let collection = store.create_collection(cname("c")).await.unwrap();
        assert!(matches!(
            collection.create(oname("toolong"), false).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_core_count_mismatch_rejected() {
        let rt = Runtime::new(2).unwrap();
        let config = StoreConfig {
            core_count: 8,
            ..StoreConfig::default()
        };
        assert!(Store::new(rt.handle(), config).is_err());
    }
}
