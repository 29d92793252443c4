//! Ordered attribute maps with cursor enumeration.
//!
//! Each object carries one map per [`AttrNamespace`]. Keys are byte strings
//! in lexicographic order; values are shared buffers, so `getattr` hands out
//! references without copying. Cursors are refcounted handles positioned at
//! the next key an enumeration would yield; removing that key invalidates
//! every cursor referencing it.

use bytes::Bytes;
use crimson_common::{AttrNamespace, Error, Result};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Resume token for attribute enumeration
#[derive(Clone)]
pub struct AttrCursor {
    inner: Arc<CursorInner>,
}

struct CursorInner {
    ns: AttrNamespace,
    key: Vec<u8>,
    valid: AtomicBool,
}

impl AttrCursor {
    /// Check whether the cursor still references a live entry
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }
}

pub(crate) struct AttrMaps {
    maps: [BTreeMap<Vec<u8>, Bytes>; 2],
    cursors: Vec<Weak<CursorInner>>,
    max_key_len: usize,
}

impl AttrMaps {
    pub(crate) fn new(max_key_len: usize) -> Self {
        Self {
            maps: [BTreeMap::new(), BTreeMap::new()],
            cursors: Vec::new(),
            max_key_len,
        }
    }

    pub(crate) fn get(&self, ns: AttrNamespace, key: &[u8]) -> Result<Bytes> {
        self.maps[ns.index()]
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NoSuchAttributeKey(String::from_utf8_lossy(key).into_owned()))
    }

    /// All-or-nothing multi-get; fails with the first missing key.
    pub(crate) fn get_many(&self, ns: AttrNamespace, keys: &[Vec<u8>]) -> Result<Vec<Bytes>> {
        keys.iter().map(|key| self.get(ns, key)).collect()
    }

    pub(crate) fn set(&mut self, ns: AttrNamespace, key: Vec<u8>, value: Bytes) -> Result<()> {
        self.check_key(&key)?;
        self.maps[ns.index()].insert(key, value);
        Ok(())
    }

    pub(crate) fn set_many(
        &mut self,
        ns: AttrNamespace,
        pairs: Vec<(Vec<u8>, Bytes)>,
    ) -> Result<()> {
        for (key, _) in &pairs {
            self.check_key(key)?;
        }
        for (key, value) in pairs {
            self.maps[ns.index()].insert(key, value);
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, ns: AttrNamespace, key: &[u8]) -> Result<()> {
        if self.maps[ns.index()].remove(key).is_none() {
            return Err(Error::NoSuchAttributeKey(
                String::from_utf8_lossy(key).into_owned(),
            ));
        }
        self.invalidate_cursors(ns, key);
        Ok(())
    }

    pub(crate) fn remove_many(&mut self, ns: AttrNamespace, keys: &[Vec<u8>]) -> Result<()> {
        for key in keys {
            self.remove(ns, key)?;
        }
        Ok(())
    }

    /// Walk keys in order, starting at `cursor` (or the beginning). Yields at
    /// most `limit` keys plus a cursor when more remain.
    pub(crate) fn enumerate_keys(
        &mut self,
        ns: AttrNamespace,
        cursor: Option<&AttrCursor>,
        limit: usize,
    ) -> Result<(Vec<Vec<u8>>, Option<AttrCursor>)> {
        let lower = self.cursor_bound(ns, cursor)?;
        let map = &self.maps[ns.index()];
        let mut iter = map.range((lower, Bound::Unbounded));

        let mut keys = Vec::new();
        while keys.len() < limit {
            match iter.next() {
                Some((key, _)) => keys.push(key.clone()),
                None => return Ok((keys, None)),
            }
        }
        let next = iter.next().map(|(key, _)| key.clone());
        Ok((keys, next.map(|key| self.make_cursor(ns, key))))
    }

    /// Like [`Self::enumerate_keys`] but yields key/value pairs.
    pub(crate) fn enumerate_kvs(
        &mut self,
        ns: AttrNamespace,
        cursor: Option<&AttrCursor>,
        limit: usize,
    ) -> Result<(Vec<(Vec<u8>, Bytes)>, Option<AttrCursor>)> {
        let lower = self.cursor_bound(ns, cursor)?;
        let map = &self.maps[ns.index()];
        let mut iter = map.range((lower, Bound::Unbounded));

        let mut pairs = Vec::new();
        while pairs.len() < limit {
            match iter.next() {
                Some((key, value)) => pairs.push((key.clone(), value.clone())),
                None => return Ok((pairs, None)),
            }
        }
        let next = iter.next().map(|(key, _)| key.clone());
        Ok((pairs, next.map(|key| self.make_cursor(ns, key))))
    }

    /// Cursor that resumes enumeration at `key`, which must exist.
    pub(crate) fn cursor_at(&mut self, ns: AttrNamespace, key: &[u8]) -> Result<AttrCursor> {
        if !self.maps[ns.index()].contains_key(key) {
            return Err(Error::NoSuchAttributeKey(
                String::from_utf8_lossy(key).into_owned(),
            ));
        }
        Ok(self.make_cursor(ns, key.to_vec()))
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_argument("attribute key cannot be empty"));
        }
        if key.len() > self.max_key_len {
            return Err(Error::invalid_argument(format!(
                "attribute key exceeds {} bytes",
                self.max_key_len
            )));
        }
        Ok(())
    }

    fn cursor_bound(
        &self,
        ns: AttrNamespace,
        cursor: Option<&AttrCursor>,
    ) -> Result<Bound<Vec<u8>>> {
        match cursor {
            None => Ok(Bound::Unbounded),
            Some(cursor) => {
                if cursor.inner.ns != ns || !cursor.is_valid() {
                    return Err(Error::InvalidCursor);
                }
                Ok(Bound::Included(cursor.inner.key.clone()))
            }
        }
    }

    fn make_cursor(&mut self, ns: AttrNamespace, key: Vec<u8>) -> AttrCursor {
        let inner = Arc::new(CursorInner {
            ns,
            key,
            valid: AtomicBool::new(true),
        });
        self.cursors.retain(|weak| weak.strong_count() > 0);
        self.cursors.push(Arc::downgrade(&inner));
        AttrCursor { inner }
    }

    fn invalidate_cursors(&mut self, ns: AttrNamespace, key: &[u8]) {
        self.cursors.retain(|weak| match weak.upgrade() {
            Some(cursor) => {
                if cursor.ns == ns && cursor.key == key {
                    cursor.valid.store(false, Ordering::Release);
                }
                true
            }
            None => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps() -> AttrMaps {
        AttrMaps::new(1024)
    }

    fn bytes(data: &str) -> Bytes {
        Bytes::copy_from_slice(data.as_bytes())
    }

    #[test]
    fn test_set_get_remove() {
        let mut attrs = maps();
        attrs
            .set(AttrNamespace::Xattr, b"k".to_vec(), bytes("v"))
            .unwrap();
        assert_eq!(attrs.get(AttrNamespace::Xattr, b"k").unwrap(), bytes("v"));

        // namespaces are independent
        assert!(attrs.get(AttrNamespace::Omap, b"k").is_err());

        attrs.remove(AttrNamespace::Xattr, b"k").unwrap();
        assert!(matches!(
            attrs.get(AttrNamespace::Xattr, b"k"),
            Err(Error::NoSuchAttributeKey(_))
        ));
    }

    #[test]
    fn test_get_many_is_all_or_nothing() {
        let mut attrs = maps();
        attrs
            .set(AttrNamespace::Omap, b"a".to_vec(), bytes("1"))
            .unwrap();
        let keys = vec![b"a".to_vec(), b"missing".to_vec()];
        assert!(attrs.get_many(AttrNamespace::Omap, &keys).is_err());
    }

    #[test]
    fn test_overwrite_preserves_handed_out_values() {
        let mut attrs = maps();
        attrs
            .set(AttrNamespace::Xattr, b"k".to_vec(), bytes("old"))
            .unwrap();
        let held = attrs.get(AttrNamespace::Xattr, b"k").unwrap();
        attrs
            .set(AttrNamespace::Xattr, b"k".to_vec(), bytes("new"))
            .unwrap();
        assert_eq!(held, bytes("old"));
        assert_eq!(attrs.get(AttrNamespace::Xattr, b"k").unwrap(), bytes("new"));
    }

    #[test]
    fn test_enumeration_order_and_pagination() {
        let mut attrs = maps();
        for key in ["delta", "alpha", "echo", "charlie", "bravo"] {
            attrs
                .set(AttrNamespace::Xattr, key.as_bytes().to_vec(), bytes("x"))
                .unwrap();
        }

        let (first, cursor) = attrs.enumerate_keys(AttrNamespace::Xattr, None, 2).unwrap();
        assert_eq!(first, vec![b"alpha".to_vec(), b"bravo".to_vec()]);
        let cursor = cursor.unwrap();

        let (rest, cursor) = attrs
            .enumerate_keys(AttrNamespace::Xattr, Some(&cursor), 10)
            .unwrap();
        assert_eq!(
            rest,
            vec![b"charlie".to_vec(), b"delta".to_vec(), b"echo".to_vec()]
        );
        assert!(cursor.is_none());
    }

    #[test]
    fn test_exact_limit_yields_no_cursor() {
        let mut attrs = maps();
        attrs
            .set(AttrNamespace::Xattr, b"a".to_vec(), bytes("x"))
            .unwrap();
        attrs
            .set(AttrNamespace::Xattr, b"b".to_vec(), bytes("x"))
            .unwrap();
        let (keys, cursor) = attrs.enumerate_keys(AttrNamespace::Xattr, None, 2).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(cursor.is_none());
    }

    #[test]
    fn test_removal_invalidates_cursor() {
        let mut attrs = maps();
        for key in ["a", "b", "c"] {
            attrs
                .set(AttrNamespace::Xattr, key.as_bytes().to_vec(), bytes("x"))
                .unwrap();
        }
        let (_, cursor) = attrs.enumerate_keys(AttrNamespace::Xattr, None, 1).unwrap();
        let cursor = cursor.unwrap(); // positioned at "b"

        attrs.remove(AttrNamespace::Xattr, b"b").unwrap();
        assert!(!cursor.is_valid());
        assert!(matches!(
            attrs.enumerate_keys(AttrNamespace::Xattr, Some(&cursor), 1),
            Err(Error::InvalidCursor)
        ));
    }

    #[test]
    fn test_cursor_namespace_mismatch() {
        let mut attrs = maps();
        attrs
            .set(AttrNamespace::Xattr, b"a".to_vec(), bytes("x"))
            .unwrap();
        attrs
            .set(AttrNamespace::Xattr, b"b".to_vec(), bytes("x"))
            .unwrap();
        let (_, cursor) = attrs.enumerate_keys(AttrNamespace::Xattr, None, 1).unwrap();
        let cursor = cursor.unwrap();
        assert!(matches!(
            attrs.enumerate_keys(AttrNamespace::Omap, Some(&cursor), 1),
            Err(Error::InvalidCursor)
        ));
    }

    #[test]
    fn test_cursor_at_key() {
        let mut attrs = maps();
        for key in ["a", "b", "c"] {
            attrs
                .set(AttrNamespace::Omap, key.as_bytes().to_vec(), bytes("x"))
                .unwrap();
        }
        let cursor = attrs.cursor_at(AttrNamespace::Omap, b"b").unwrap();
        let (keys, _) = attrs
            .enumerate_keys(AttrNamespace::Omap, Some(&cursor), 10)
            .unwrap();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);

        assert!(attrs.cursor_at(AttrNamespace::Omap, b"zzz").is_err());
    }

    #[test]
    fn test_key_length_cap() {
        let mut attrs = AttrMaps::new(4);
        assert!(attrs
            .set(AttrNamespace::Xattr, b"okay".to_vec(), bytes("x"))
            .is_ok());
        assert!(attrs
            .set(AttrNamespace::Xattr, b"toolong".to_vec(), bytes("x"))
            .is_err());
    }
}
