//! Core type definitions for Crimson
//!
//! Identifiers are UTF-8 byte strings of bounded length. Equality is
//! byte-exact and ordering is lexicographic on bytes, which `String` ordering
//! already provides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard cap on identifier length in bytes. Configured limits may be lower,
/// never higher.
pub const MAX_NAME_LEN: usize = 1024;

/// A contiguous byte range within an object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Byte offset of the first byte
    pub offset: u64,
    /// Number of bytes
    pub length: u64,
}

impl Range {
    /// Create a range, rejecting `offset + length` overflow
    pub fn new(offset: u64, length: u64) -> Result<Self> {
        if offset.checked_add(length).is_none() {
            return Err(Error::invalid_argument(format!(
                "range [{offset}, +{length}) overflows u64"
            )));
        }
        Ok(Self { offset, length })
    }

    /// One past the last byte of the range
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Check whether the range covers zero bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Intersect with another range; `None` if they do not overlap
    #[must_use]
    pub fn intersect(&self, other: &Range) -> Option<Range> {
        let offset = self.offset.max(other.offset);
        let end = self.end().min(other.end());
        if offset < end {
            Some(Range {
                offset,
                length: end - offset,
            })
        } else {
            None
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, +{})", self.offset, self.length)
    }
}

/// Name of a collection within a store
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionName(String);

impl CollectionName {
    /// Create a collection name, enforcing the hard length cap
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("collection name", &name)?;
        Ok(Self(name))
    }

    /// Get the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the name bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionName({:?})", self.0)
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an object within a collection
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectName(String);

impl ObjectName {
    /// Create an object name, enforcing the hard length cap
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("object name", &name)?;
        Ok(Self(name))
    }

    /// Get the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the name bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName({:?})", self.0)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument(format!("{what} cannot be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_argument(format!(
            "{what} exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

/// Attribute namespace selector.
///
/// Every object carries two independent ordered key/value maps: extended
/// attributes and the omap. The namespace is an argument to every attribute
/// operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrNamespace {
    /// Extended attributes
    Xattr,
    /// Object map entries
    Omap,
}

/// Number of attribute namespaces on an object
pub const ATTR_NAMESPACES: usize = 2;

impl AttrNamespace {
    /// Index into per-object namespace arrays
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Xattr => 0,
            Self::Omap => 1,
        }
    }

    /// Decode a namespace carried on the wire or in a config file
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(Self::Xattr),
            1 => Ok(Self::Omap),
            other => Err(Error::invalid_argument(format!(
                "invalid attribute namespace {other}"
            ))),
        }
    }
}

impl fmt::Display for AttrNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xattr => f.write_str("xattr"),
            Self::Omap => f.write_str("omap"),
        }
    }
}
