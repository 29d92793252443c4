//! Compound operations and sequencers.
//!
//! A [`Compound`] is an ordered list of store operations submitted as one
//! unit. A [`Sequencer`] orders compounds: compounds queued under the same
//! sequencer apply in sequence, while different sequencers run in parallel.
//! This is the scheduling hook only; there is no durability behind it, and a
//! compound that fails partway is not rolled back.

use crate::store::Store;
use bytes::Bytes;
use crimson_common::{AttrNamespace, CollectionName, ObjectName, Range, Result};
use crate::iovec::Iovec;
use std::sync::Arc;
use tracing::debug;

/// One step of a compound
pub enum Op {
    /// Create a collection
    CreateCollection { cid: CollectionName },
    /// Remove an empty collection
    RemoveCollection { cid: CollectionName },
    /// Ensure an object exists
    Touch { cid: CollectionName, oid: ObjectName },
    /// Write bytes at an offset
    Write {
        cid: CollectionName,
        oid: ObjectName,
        offset: u64,
        data: Bytes,
    },
    /// Zero a byte range, extending the object if needed
    Zero {
        cid: CollectionName,
        oid: ObjectName,
        range: Range,
    },
    /// Shrink an object
    Truncate {
        cid: CollectionName,
        oid: ObjectName,
        length: u64,
    },
    /// Remove an object
    Remove { cid: CollectionName, oid: ObjectName },
    /// Upsert an attribute
    SetAttr {
        cid: CollectionName,
        oid: ObjectName,
        ns: AttrNamespace,
        key: Vec<u8>,
        value: Bytes,
    },
    /// Remove an attribute
    RmAttr {
        cid: CollectionName,
        oid: ObjectName,
        ns: AttrNamespace,
        key: Vec<u8>,
    },
    /// Replace an object's header blob
    SetHeader {
        cid: CollectionName,
        oid: ObjectName,
        header: Bytes,
    },
}

/// An ordered list of operations applied as one unit
#[derive(Default)]
pub struct Compound {
    ops: Vec<Op>,
}

impl Compound {
    /// Create an empty compound
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check whether any operations are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Append an operation
    pub fn push(&mut self, op: Op) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn create_collection(&mut self, cid: CollectionName) -> &mut Self {
        self.push(Op::CreateCollection { cid })
    }

    pub fn touch(&mut self, cid: CollectionName, oid: ObjectName) -> &mut Self {
        self.push(Op::Touch { cid, oid })
    }

    pub fn write(
        &mut self,
        cid: CollectionName,
        oid: ObjectName,
        offset: u64,
        data: Bytes,
    ) -> &mut Self {
        self.push(Op::Write {
            cid,
            oid,
            offset,
            data,
        })
    }

    pub fn setattr(
        &mut self,
        cid: CollectionName,
        oid: ObjectName,
        ns: AttrNamespace,
        key: Vec<u8>,
        value: Bytes,
    ) -> &mut Self {
        self.push(Op::SetAttr {
            cid,
            oid,
            ns,
            key,
            value,
        })
    }

    pub fn remove(&mut self, cid: CollectionName, oid: ObjectName) -> &mut Self {
        self.push(Op::Remove { cid, oid })
    }
}

/// Orders compounds queued under it
#[derive(Clone, Default)]
pub struct Sequencer {
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl Sequencer {
    /// Create an idle sequencer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve once every compound queued before this call has applied.
    pub async fn flush(&self) -> Result<()> {
        let _in_order = self.gate.lock().await;
        Ok(())
    }
}

impl Store {
    /// Apply a compound under a sequencer. Operations apply in list order;
    /// a failure stops the compound, and already-applied operations are not
    /// rolled back.
    pub async fn exec_compound(&self, sequencer: &Sequencer, compound: Compound) -> Result<()> {
        let _in_order = sequencer.gate.lock().await;
        debug!(ops = compound.len(), "exec_compound");
        for op in compound.ops {
            self.apply(op).await?;
        }
        Ok(())
    }

    async fn apply(&self, op: Op) -> Result<()> {
        match op {
            Op::CreateCollection { cid } => {
                self.create_collection(cid).await?;
            }
            Op::RemoveCollection { cid } => {
                self.remove_collection(cid).await?;
            }
            Op::Touch { cid, oid } => {
                self.lookup_collection(cid).await?.create(oid, false).await?;
            }
            Op::Write {
                cid,
                oid,
                offset,
                data,
            } => {
                let object = self.lookup_collection(cid).await?.create(oid, false).await?;
                object.write(Iovec::single(offset, data)).await?;
            }
            Op::Zero { cid, oid, range } => {
                let object = self.lookup_collection(cid).await?.lookup(oid).await?;
                object.zero(range).await?;
            }
            Op::Truncate { cid, oid, length } => {
                let object = self.lookup_collection(cid).await?.lookup(oid).await?;
                object.truncate(length).await?;
            }
            Op::Remove { cid, oid } => {
                let object = self.lookup_collection(cid).await?.lookup(oid).await?;
                object.remove().await?;
            }
            Op::SetAttr {
                cid,
                oid,
                ns,
                key,
                value,
            } => {
                let object = self.lookup_collection(cid).await?.create(oid, false).await?;
                object.setattr(ns, key, value).await?;
            }
            Op::RmAttr { cid, oid, ns, key } => {
                let object = self.lookup_collection(cid).await?.lookup(oid).await?;
                object.rmattr(ns, key).await?;
            }
            Op::SetHeader { cid, oid, header } => {
                let object = self.lookup_collection(cid).await?.create(oid, false).await?;
                object.set_header(header).await?;
            }
        }
        Ok(())
    }
}
