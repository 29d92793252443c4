//! Copy-on-write pages.
//!
//! A page is a fixed-size byte block shared by reference count. Once a page
//! has more than one owner it is immutable; writers clone it first. Readers
//! hand out [`Bytes`] windows that keep the backing page alive, so a reader
//! that retained a window keeps its pre-modification view.

use bytes::Bytes;
use std::sync::Arc;

/// A fixed-size byte block
pub(crate) struct Page {
    data: Box<[u8]>,
}

pub(crate) type PageRef = Arc<Page>;

impl Page {
    /// Allocate a zero-filled page
    pub(crate) fn zeroed(size: u64) -> PageRef {
        Arc::new(Self {
            data: vec![0u8; size as usize].into_boxed_slice(),
        })
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Write `src` at `offset` within the page, cloning first if shared.
    ///
    /// The reference count at the moment of the call is the copy-on-write
    /// observation point.
    pub(crate) fn write(page: &mut PageRef, offset: usize, src: &[u8]) {
        match Arc::get_mut(page) {
            Some(unique) => unique.data[offset..offset + src.len()].copy_from_slice(src),
            None => {
                let mut data = page.data.clone();
                data[offset..offset + src.len()].copy_from_slice(src);
                *page = Arc::new(Self { data });
            }
        }
    }

    /// Zero `[offset, offset + len)` within the page, cloning first if shared
    pub(crate) fn zero(page: &mut PageRef, offset: usize, len: usize) {
        match Arc::get_mut(page) {
            Some(unique) => unique.data[offset..offset + len].fill(0),
            None => {
                let mut data = page.data.clone();
                data[offset..offset + len].fill(0);
                *page = Arc::new(Self { data });
            }
        }
    }

    /// A zero-copy window over `[start, end)` of the page.
    ///
    /// The returned buffer owns a page reference for its whole lifetime.
    pub(crate) fn window(page: &PageRef, start: usize, end: usize) -> Bytes {
        Bytes::from_owner(PageWindow {
            page: page.clone(),
            start,
            end,
        })
    }
}

struct PageWindow {
    page: PageRef,
    start: usize,
    end: usize,
}

impl AsRef<[u8]> for PageWindow {
    fn as_ref(&self) -> &[u8] {
        &self.page.as_slice()[self.start..self.end]
    }
}
