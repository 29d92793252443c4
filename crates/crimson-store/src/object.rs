//! Objects: a sparse byte stream, two attribute namespaces, and a header
//! blob, bundled behind a home core.
//!
//! Every method first checks whether the caller is already on the object's
//! home core and forwards itself there if not; that trampoline is the only
//! cross-core access path. Write-class operations register a token in the
//! object's mutation queue at entry so that `commit` can act as a barrier
//! over everything issued before it.

use crate::attr::{AttrCursor, AttrMaps};
use crate::collection::CollectionShared;
use crate::iovec::Iovec;
use crate::mutation::MutationQueue;
use crate::pageset::PageSet;
use bytes::Bytes;
use crimson_common::{AttrNamespace, Error, ObjectName, Range, Result};
use crimson_runtime::{CoreId, Handle};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Handle to an object in a collection
#[derive(Clone)]
pub struct Object {
    shared: Arc<ObjectShared>,
}

pub(crate) struct ObjectShared {
    oid: ObjectName,
    home: CoreId,
    runtime: Handle,
    collection: Weak<CollectionShared>,
    data: PageSet,
    mutations: Arc<MutationQueue>,
    state: Mutex<ObjectState>,
}

struct ObjectState {
    data_len: u64,
    attrs: AttrMaps,
    omap_header: Bytes,
    alloc_hint: Option<AllocHint>,
    removed: bool,
}

#[derive(Clone, Copy)]
struct AllocHint {
    expected_object_size: u64,
    expected_write_size: u64,
}

impl Object {
    pub(crate) fn new(
        runtime: Handle,
        oid: ObjectName,
        home: CoreId,
        collection: Weak<CollectionShared>,
        page_size: u64,
        pages_per_stride: u64,
        max_attr_name_len: usize,
    ) -> Self {
        let data = PageSet::new(runtime.clone(), page_size, pages_per_stride);
        Self {
            shared: Arc::new(ObjectShared {
                oid,
                home,
                runtime,
                collection,
                data,
                mutations: Arc::new(MutationQueue::default()),
                state: Mutex::new(ObjectState {
                    data_len: 0,
                    attrs: AttrMaps::new(max_attr_name_len),
                    omap_header: Bytes::new(),
                    alloc_hint: None,
                    removed: false,
                }),
            }),
        }
    }

    /// Name of the object
    #[must_use]
    pub fn oid(&self) -> &ObjectName {
        &self.shared.oid
    }

    /// Core owning this object
    #[must_use]
    pub fn home_core(&self) -> CoreId {
        self.shared.home
    }

    /// Logical length of the byte stream
    pub async fn len(&self) -> Result<u64> {
        self.on_home(|obj| async move {
            obj.check_live()?;
            Ok(obj.state.lock().data_len)
        })
        .await
    }

    /// Check whether the byte stream is empty
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Read `range`, which must lie within the logical length. The result
    /// covers present pages only; absent pages read as zero.
    pub async fn read(&self, range: Range) -> Result<Iovec> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            obj.check_in_range(range)?;
            obj.data.read(range).await
        })
        .await
    }

    /// Write the buffers of `iov`, extending the logical length to cover the
    /// last written byte.
    pub async fn write(&self, iov: Iovec) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            let _token = obj.mutations.register();
            let end = iov.end();
            obj.data.write(iov).await?;
            if let Some(end) = end {
                let mut state = obj.state.lock();
                if state.data_len < end {
                    state.data_len = end;
                }
            }
            Ok(())
        })
        .await
    }

    /// Zero `range`, extending the logical length to cover it.
    pub async fn zero(&self, range: Range) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            let _token = obj.mutations.register();
            {
                let mut state = obj.state.lock();
                if state.data_len < range.end() {
                    state.data_len = range.end();
                }
            }
            obj.data.hole_punch(range).await
        })
        .await
    }

    /// Punch a hole in `range`, which must lie within the logical length.
    pub async fn hole_punch(&self, range: Range) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            obj.check_in_range(range)?;
            let _token = obj.mutations.register();
            obj.data.hole_punch(range).await
        })
        .await
    }

    /// Shrink the byte stream to `length` and release the pages beyond it.
    /// Growing through truncate is rejected.
    pub async fn truncate(&self, length: u64) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            let _token = obj.mutations.register();
            {
                let mut state = obj.state.lock();
                if length > state.data_len {
                    return Err(Error::invalid_argument(format!(
                        "truncate to {length} would grow object of length {}",
                        state.data_len
                    )));
                }
                state.data_len = length;
            }
            obj.data.free_pages_after(length).await
        })
        .await
    }

    /// Remove the object from its collection. The object is torn down once
    /// the last outstanding handle drops.
    pub async fn remove(&self) -> Result<()> {
        self.on_home(|obj| async move {
            obj.check_live()?;
            obj.state.lock().removed = true;
            if let Some(collection) = obj.collection.upgrade() {
                collection.unlink_local(&obj.oid);
            }
            debug!(oid = %obj.oid, "object removed");
            Ok(())
        })
        .await
    }

    /// Get one attribute value as a shared buffer
    pub async fn getattr(&self, ns: AttrNamespace, key: Vec<u8>) -> Result<Bytes> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            obj.state.lock().attrs.get(ns, &key)
        })
        .await
    }

    /// Get several attribute values; fails with the first missing key
    pub async fn getattrs(&self, ns: AttrNamespace, keys: Vec<Vec<u8>>) -> Result<Vec<Bytes>> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            obj.state.lock().attrs.get_many(ns, &keys)
        })
        .await
    }

    /// Set one attribute
    pub async fn setattr(&self, ns: AttrNamespace, key: Vec<u8>, value: Bytes) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            let _token = obj.mutations.register();
            obj.state.lock().attrs.set(ns, key, value)
        })
        .await
    }

    /// Set several attributes
    pub async fn setattrs(&self, ns: AttrNamespace, pairs: Vec<(Vec<u8>, Bytes)>) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            let _token = obj.mutations.register();
            obj.state.lock().attrs.set_many(ns, pairs)
        })
        .await
    }

    /// Remove one attribute, invalidating cursors positioned at it
    pub async fn rmattr(&self, ns: AttrNamespace, key: Vec<u8>) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            let _token = obj.mutations.register();
            obj.state.lock().attrs.remove(ns, &key)
        })
        .await
    }

    /// Remove several attributes
    pub async fn rmattrs(&self, ns: AttrNamespace, keys: Vec<Vec<u8>>) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            let _token = obj.mutations.register();
            obj.state.lock().attrs.remove_many(ns, &keys)
        })
        .await
    }

    /// Remove the attributes between two cursors
    pub async fn rmattr_range(
        &self,
        _ns: AttrNamespace,
        _lower: &AttrCursor,
        _upper: &AttrCursor,
    ) -> Result<()> {
        Err(Error::OperationNotSupported("rmattr_range"))
    }

    /// Enumerate attribute keys in order, resuming at `cursor` if given.
    /// Returns at most `limit` keys plus a cursor when more remain.
    pub async fn enumerate_attr_keys(
        &self,
        ns: AttrNamespace,
        cursor: Option<AttrCursor>,
        limit: usize,
    ) -> Result<(Vec<Vec<u8>>, Option<AttrCursor>)> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            obj.state
                .lock()
                .attrs
                .enumerate_keys(ns, cursor.as_ref(), limit)
        })
        .await
    }

    /// Enumerate attribute key/value pairs in order
    pub async fn enumerate_attr_kvs(
        &self,
        ns: AttrNamespace,
        cursor: Option<AttrCursor>,
        limit: usize,
    ) -> Result<(Vec<(Vec<u8>, Bytes)>, Option<AttrCursor>)> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            obj.state
                .lock()
                .attrs
                .enumerate_kvs(ns, cursor.as_ref(), limit)
        })
        .await
    }

    /// Cursor that resumes enumeration at an existing key
    pub async fn attr_cursor(&self, ns: AttrNamespace, key: Vec<u8>) -> Result<AttrCursor> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            obj.state.lock().attrs.cursor_at(ns, &key)
        })
        .await
    }

    /// Get the omap header blob
    pub async fn get_header(&self) -> Result<Bytes> {
        self.on_home(|obj| async move {
            obj.check_live()?;
            Ok(obj.state.lock().omap_header.clone())
        })
        .await
    }

    /// Replace the omap header blob
    pub async fn set_header(&self, header: Bytes) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            let _token = obj.mutations.register();
            obj.state.lock().omap_header = header;
            Ok(())
        })
        .await
    }

    /// Record expected allocation sizes. Advisory; the memory store only
    /// remembers them.
    pub async fn set_alloc_hint(
        &self,
        expected_object_size: u64,
        expected_write_size: u64,
    ) -> Result<()> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            obj.state.lock().alloc_hint = Some(AllocHint {
                expected_object_size,
                expected_write_size,
            });
            Ok(())
        })
        .await
    }

    /// The recorded allocation hint, if any
    pub async fn alloc_hint(&self) -> Result<Option<(u64, u64)>> {
        self.on_home(|obj| async move {
            obj.check_live()?;
            Ok(obj
                .state
                .lock()
                .alloc_hint
                .map(|hint| (hint.expected_object_size, hint.expected_write_size)))
        })
        .await
    }

    /// Ranges within `range` backed by allocated pages
    pub async fn get_extents(&self, range: Range) -> Result<Vec<Range>> {
        self.on_home(move |obj| async move {
            obj.check_live()?;
            obj.check_in_range(range)?;
            obj.data.extents(range).await
        })
        .await
    }

    /// Clone the whole object into another object
    pub async fn clone_object(&self, _dest: &Object) -> Result<()> {
        Err(Error::OperationNotSupported("clone"))
    }

    /// Clone a byte range into another object
    pub async fn clone_range(
        &self,
        _src: Range,
        _dest: &Object,
        _dest_offset: u64,
    ) -> Result<()> {
        Err(Error::OperationNotSupported("clone_range"))
    }

    /// Move this object to another collection
    pub async fn move_to_collection(
        &self,
        _dest_cid: crimson_common::CollectionName,
        _dest_oid: ObjectName,
    ) -> Result<()> {
        Err(Error::OperationNotSupported("move_to_collection"))
    }

    /// Barrier over the mutations issued before this call: the returned
    /// future resolves once all of them have completed. Mutations issued
    /// afterwards may run concurrently with the commit.
    pub async fn commit(&self) -> Result<()> {
        self.on_home(|obj| async move {
            obj.check_live()?;
            let fired = obj.mutations.register_commit();
            fired.await.map_err(|_| Error::Closed)
        })
        .await
    }

    /// Run `f` on the object's home core, forwarding there if the caller is
    /// on a different core.
    async fn on_home<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<ObjectShared>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + 'static,
        T: Send + 'static,
    {
        let shared = self.shared.clone();
        let runtime = shared.runtime.clone();
        let home = shared.home;
        crate::run_on(&runtime, home, move || f(shared)).await
    }
}

impl ObjectShared {
    fn check_live(&self) -> Result<()> {
        if self.state.lock().removed {
            return Err(Error::NoSuchObject(self.oid.as_str().to_string()));
        }
        Ok(())
    }

    fn check_in_range(&self, range: Range) -> Result<()> {
        let data_len = self.state.lock().data_len;
        if range.end() > data_len {
            return Err(Error::OutOfRange {
                offset: range.offset,
                length: range.length,
                object_len: data_len,
            });
        }
        Ok(())
    }
}
