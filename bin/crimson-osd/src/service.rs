//! Request dispatch onto the store.
//!
//! One service wraps the store and a default collection; each accepted
//! connection gets a task running [`OsdService::serve_connection`], which
//! decodes requests, routes them to the addressed object's home core, and
//! writes replies carrying the acknowledged stages or an error code.

use bytes::Bytes;
use crimson_common::{CollectionName, Error, ObjectName, Range, Result};
use crimson_net::{Connection, Message, FLAG_ON_APPLY, FLAG_ON_COMMIT};
use crimson_store::{Collection, Iovec, Store};
use tracing::{debug, warn};

/// Name of the collection all wire operations address
const DEFAULT_COLLECTION: &str = "osd";

/// Daemon-side request handler
pub struct OsdService {
    store: Store,
    collection: Collection,
}

impl OsdService {
    /// Wrap a store, creating the default collection.
    pub async fn new(store: Store) -> Result<Self> {
        let collection = store
            .create_collection(CollectionName::new(DEFAULT_COLLECTION)?)
            .await?;
        Ok(Self { store, collection })
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Serve one connection until the peer closes it.
    pub async fn serve_connection(&self, mut conn: Connection) -> Result<()> {
        while let Some(message) = conn.read_message().await? {
            match message {
                Message::OsdWrite {
                    sequence,
                    object,
                    offset,
                    flags,
                    data,
                } => {
                    debug!(
                        sequence,
                        oid = %object,
                        offset,
                        length = data.len(),
                        flags,
                        "osd_write"
                    );
                    let reply = match self.handle_write(object, offset, data, flags).await {
                        Ok(acked) => Message::OsdWriteReply {
                            sequence,
                            flags: acked,
                            error_code: 0,
                        },
                        Err(err) => {
                            warn!(sequence, %err, "osd_write failed");
                            Message::OsdWriteReply {
                                sequence,
                                flags: 0,
                                error_code: err.errno(),
                            }
                        }
                    };
                    conn.write_message(reply).await?;
                }
                Message::OsdRead {
                    sequence,
                    object,
                    offset,
                    length,
                } => {
                    debug!(sequence, oid = %object, offset, length, "osd_read");
                    let reply = match self.handle_read(object, offset, length).await {
                        Ok(data) => Message::OsdReadReply {
                            sequence,
                            error_code: 0,
                            data,
                        },
                        Err(err) => {
                            warn!(sequence, %err, "osd_read failed");
                            Message::OsdReadReply {
                                sequence,
                                error_code: err.errno(),
                                data: Bytes::new(),
                            }
                        }
                    };
                    conn.write_message(reply).await?;
                }
                other => {
                    warn!(tag = other.tag_name(), "unhandled message");
                    return Err(Error::protocol(format!(
                        "unhandled message {}",
                        other.tag_name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply a write and commit it; returns the stages acknowledged.
    async fn handle_write(
        &self,
        object: String,
        offset: u64,
        data: Bytes,
        flags: u32,
    ) -> Result<u32> {
        let oid = ObjectName::new(object)?;
        Range::new(offset, data.len() as u64)?;
        let object = self.collection.create(oid, false).await?;
        object.write(Iovec::single(offset, data)).await?;

        let mut acked = flags & FLAG_ON_APPLY;
        if flags & FLAG_ON_COMMIT != 0 {
            object.commit().await?;
            acked |= FLAG_ON_COMMIT;
        }
        Ok(acked)
    }

    /// Read a range of an object into one contiguous reply payload, with
    /// holes reading as zero.
    async fn handle_read(&self, object: String, offset: u64, length: u64) -> Result<Bytes> {
        let oid = ObjectName::new(object)?;
        let object = self.collection.lookup(oid).await?;
        let range = Range::new(offset, length)?;
        let iov = object.read(range).await?;
        Ok(Bytes::from(iov.flatten(range)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crimson_common::{StoreConfig, WriteClientConfig};
    use crimson_net::direct_pair;
    use crimson_runtime::Runtime;
    use std::sync::Arc;

    async fn service(rt: &Runtime) -> Arc<OsdService> {
        let config = StoreConfig {
            core_count: rt.handle().core_count(),
            page_size: 64,
            pages_per_stride: 2,
            ..StoreConfig::default()
        };
        let store = Store::new(rt.handle(), config).unwrap();
        Arc::new(OsdService::new(store).await.unwrap())
    }

    #[tokio::test]
    async fn test_write_then_read_over_the_wire() {
        let rt = Runtime::new(2).unwrap();
        let service = service(&rt).await;

        let (mut client, server_conn) = direct_pair();
        let server = {
            let service = service.clone();
            tokio::spawn(async move { service.serve_connection(server_conn).await })
        };

        client
            .write_message(Message::OsdWrite {
                sequence: 1,
                object: "o".to_string(),
                offset: 100,
                flags: FLAG_ON_APPLY | FLAG_ON_COMMIT,
                data: Bytes::from_static(b"ABCDEF"),
            })
            .await
            .unwrap();
        let reply = client.read_message().await.unwrap().unwrap();
        assert_eq!(
            reply,
            Message::OsdWriteReply {
                sequence: 1,
                flags: FLAG_ON_APPLY | FLAG_ON_COMMIT,
                error_code: 0,
            }
        );

        client
            .write_message(Message::OsdRead {
                sequence: 2,
                object: "o".to_string(),
                offset: 100,
                length: 6,
            })
            .await
            .unwrap();
        let reply = client.read_message().await.unwrap().unwrap();
        assert_eq!(
            reply,
            Message::OsdReadReply {
                sequence: 2,
                error_code: 0,
                data: Bytes::from_static(b"ABCDEF"),
            }
        );

        client.close().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_read_of_missing_object_replies_enoent() {
        let rt = Runtime::new(2).unwrap();
        let service = service(&rt).await;

        let (mut client, server_conn) = direct_pair();
        let server = {
            let service = service.clone();
            tokio::spawn(async move { service.serve_connection(server_conn).await })
        };

        client
            .write_message(Message::OsdRead {
                sequence: 9,
                object: "missing".to_string(),
                offset: 0,
                length: 8,
            })
            .await
            .unwrap();
        let reply = client.read_message().await.unwrap().unwrap();
        let Message::OsdReadReply {
            sequence,
            error_code,
            data,
        } = reply
        else {
            panic!("expected read reply");
        };
        assert_eq!(sequence, 9);
        assert_eq!(error_code, Error::NoSuchObject("missing".into()).errno());
        assert!(data.is_empty());

        client.close().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_write_client_end_to_end() {
        let rt = Runtime::new(3).unwrap();
        let service = service(&rt).await;

        let (client_conn, server_conn) = direct_pair();
        let server = {
            let service = service.clone();
            tokio::spawn(async move { service.serve_connection(server_conn).await })
        };

        let config = WriteClientConfig {
            max_in_flight: 4,
            ..WriteClientConfig::default()
        };
        let client =
            Arc::new(crimson_client::WriteClient::new(client_conn, "target", &config).unwrap());

        let mut sends = Vec::new();
        for block in 0..8u64 {
            let client = client.clone();
            sends.push(tokio::spawn(async move {
                client.send(block * 8, Bytes::from(vec![block as u8; 8])).await
            }));
        }
        for send in sends {
            send.await.unwrap().unwrap();
        }
        client.close().await.unwrap();
        server.await.unwrap().unwrap();

        // the object now holds every block
        let collection = service
            .store()
            .lookup_collection(CollectionName::new("osd").unwrap())
            .await
            .unwrap();
        let object = collection
            .lookup(ObjectName::new("target").unwrap())
            .await
            .unwrap();
        let range = Range::new(0, 64).unwrap();
        let flat = object.read(range).await.unwrap().flatten(range);
        for block in 0..8usize {
            assert_eq!(&flat[block * 8..(block + 1) * 8], &vec![block as u8; 8][..]);
        }
    }
}
