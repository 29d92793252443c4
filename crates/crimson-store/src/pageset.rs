//! Per-core partitioned sparse page map.
//!
//! A page set maps page indices to shared pages, with missing pages reading
//! as zero. Pages are partitioned across cores in strides: a run of
//! `pages_per_stride` consecutive pages belongs to one core, and successive
//! runs round-robin across cores. The partition owning byte offset `b` is
//! `(b / (page_size * pages_per_stride)) % core_count`.
//!
//! Operations are issued from the owning object's home core and fan out to
//! the partitions holding the affected strides; each partition slot is only
//! ever touched from its own core.

use crate::iovec::Iovec;
use crate::page::{Page, PageRef};
use bytes::Bytes;
use crimson_common::{Range, Result};
use crimson_runtime::{CoreId, Handle};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) struct PageSet {
    runtime: Handle,
    page_size: u64,
    stride_bytes: u64,
    partitions: Arc<Vec<Partition>>,
}

#[derive(Default)]
struct Partition {
    pages: Mutex<BTreeMap<u64, PageRef>>,
}

impl PageSet {
    pub(crate) fn new(runtime: Handle, page_size: u64, pages_per_stride: u64) -> Self {
        let partitions = Arc::new(
            (0..runtime.core_count())
                .map(|_| Partition::default())
                .collect::<Vec<_>>(),
        );
        Self {
            runtime,
            page_size,
            stride_bytes: page_size * pages_per_stride,
            partitions,
        }
    }

    /// Zero-copy read of every present page intersecting `range`.
    pub(crate) async fn read(&self, range: Range) -> Result<Iovec> {
        let per_core = self.split_range(range);
        let mut pending = Vec::new();
        for (index, ranges) in per_core.into_iter().enumerate() {
            if ranges.is_empty() {
                continue;
            }
            let partitions = self.partitions.clone();
            let page_size = self.page_size;
            pending.push(
                self.runtime
                    .submit_to(CoreId::new(index as u32), move || async move {
                        partitions[index].read_ranges(&ranges, page_size)
                    }),
            );
        }

        let mut iov = Iovec::new();
        for result in futures::future::join_all(pending).await {
            for (offset, data) in result? {
                iov.insert(offset, data)?;
            }
        }
        Ok(iov)
    }

    /// Write the buffers of `iov`, allocating and copy-on-writing pages as
    /// needed.
    pub(crate) async fn write(&self, iov: Iovec) -> Result<()> {
        let per_core = self.split_iovec(iov);
        let mut pending = Vec::new();
        for (index, pieces) in per_core.into_iter().enumerate() {
            if pieces.is_empty() {
                continue;
            }
            let partitions = self.partitions.clone();
            let page_size = self.page_size;
            pending.push(
                self.runtime
                    .submit_to(CoreId::new(index as u32), move || async move {
                        partitions[index].write_pieces(&pieces, page_size);
                    }),
            );
        }
        for result in futures::future::join_all(pending).await {
            result?;
        }
        Ok(())
    }

    /// Drop pages fully inside `range`; zero the affected bytes of partially
    /// covered edge pages.
    pub(crate) async fn hole_punch(&self, range: Range) -> Result<()> {
        let per_core = self.split_range(range);
        let mut pending = Vec::new();
        for (index, ranges) in per_core.into_iter().enumerate() {
            if ranges.is_empty() {
                continue;
            }
            let partitions = self.partitions.clone();
            let page_size = self.page_size;
            pending.push(
                self.runtime
                    .submit_to(CoreId::new(index as u32), move || async move {
                        partitions[index].punch_ranges(&ranges, page_size);
                    }),
            );
        }
        for result in futures::future::join_all(pending).await {
            result?;
        }
        Ok(())
    }

    /// Drop every page at or past `offset` and zero the tail of the boundary
    /// page. Used by truncate.
    pub(crate) async fn free_pages_after(&self, offset: u64) -> Result<()> {
        let partitions = self.partitions.clone();
        let page_size = self.page_size;
        self.runtime
            .parallel_for_each(move |core| {
                let partitions = partitions.clone();
                move || async move {
                    partitions[core.index()].free_after(offset, page_size);
                    Ok(())
                }
            })
            .await
    }

    /// Ranges within `range` that are backed by allocated pages, coalesced.
    pub(crate) async fn extents(&self, range: Range) -> Result<Vec<Range>> {
        let per_core = self.split_range(range);
        let mut pending = Vec::new();
        for (index, ranges) in per_core.into_iter().enumerate() {
            if ranges.is_empty() {
                continue;
            }
            let partitions = self.partitions.clone();
            let page_size = self.page_size;
            pending.push(
                self.runtime
                    .submit_to(CoreId::new(index as u32), move || async move {
                        partitions[index].extent_ranges(&ranges, page_size)
                    }),
            );
        }

        let mut extents = Vec::new();
        for result in futures::future::join_all(pending).await {
            extents.extend(result?);
        }
        extents.sort_by_key(|extent| extent.offset);

        // coalesce page-adjacent extents
        let mut merged: Vec<Range> = Vec::with_capacity(extents.len());
        for extent in extents {
            match merged.last_mut() {
                Some(last) if last.end() == extent.offset => last.length += extent.length,
                _ => merged.push(extent),
            }
        }
        Ok(merged)
    }

    /// Split a byte range into per-partition sub-ranges along stride
    /// boundaries.
    fn split_range(&self, range: Range) -> Vec<Vec<Range>> {
        let cores = self.partitions.len();
        let mut per_core = vec![Vec::new(); cores];
        let mut offset = range.offset;
        let mut remaining = range.length;
        while remaining > 0 {
            let stride = offset / self.stride_bytes;
            let stride_end = stride
                .checked_add(1)
                .and_then(|next| next.checked_mul(self.stride_bytes))
                .unwrap_or(u64::MAX);
            let chunk = remaining.min(stride_end - offset);
            per_core[(stride % cores as u64) as usize].push(Range {
                offset,
                length: chunk,
            });
            offset += chunk;
            remaining -= chunk;
        }
        per_core
    }

    /// Split write buffers into per-partition pieces along stride boundaries.
    fn split_iovec(&self, iov: Iovec) -> Vec<Vec<(u64, Bytes)>> {
        let cores = self.partitions.len();
        let mut per_core = vec![Vec::new(); cores];
        for (start, data) in iov {
            let mut consumed = 0u64;
            let total = data.len() as u64;
            while consumed < total {
                let offset = start + consumed;
                let stride = offset / self.stride_bytes;
                let stride_end = stride
                    .checked_add(1)
                    .and_then(|next| next.checked_mul(self.stride_bytes))
                    .unwrap_or(u64::MAX);
                let chunk = (total - consumed).min(stride_end - offset);
                let piece = data.slice(consumed as usize..(consumed + chunk) as usize);
                per_core[(stride % cores as u64) as usize].push((offset, piece));
                consumed += chunk;
            }
        }
        per_core
    }

    #[cfg(test)]
    fn partition_page_indices(&self) -> Vec<Vec<u64>> {
        self.partitions
            .iter()
            .map(|partition| partition.pages.lock().keys().copied().collect())
            .collect()
    }
}

impl Partition {
    fn read_ranges(&self, ranges: &[Range], page_size: u64) -> Vec<(u64, Bytes)> {
        let pages = self.pages.lock();
        let mut out = Vec::new();
        for range in ranges {
            if range.is_empty() {
                continue;
            }
            let first = range.offset / page_size;
            let last = (range.end() - 1) / page_size;
            for (index, page) in pages.range(first..=last) {
                let page_start = index * page_size;
                let start = range.offset.max(page_start);
                let end = range.end().min(page_start + page_size);
                let window = Page::window(
                    page,
                    (start - page_start) as usize,
                    (end - page_start) as usize,
                );
                out.push((start, window));
            }
        }
        out
    }

    fn write_pieces(&self, pieces: &[(u64, Bytes)], page_size: u64) {
        let mut pages = self.pages.lock();
        for (start, data) in pieces {
            let mut offset = *start;
            let mut consumed = 0usize;
            while consumed < data.len() {
                let index = offset / page_size;
                let in_page = (offset % page_size) as usize;
                let chunk = (page_size as usize - in_page).min(data.len() - consumed);
                let page = pages.entry(index).or_insert_with(|| Page::zeroed(page_size));
                Page::write(page, in_page, &data[consumed..consumed + chunk]);
                offset += chunk as u64;
                consumed += chunk;
            }
        }
    }

    fn punch_ranges(&self, ranges: &[Range], page_size: u64) {
        let mut pages = self.pages.lock();
        for range in ranges {
            if range.is_empty() {
                continue;
            }
            let first = range.offset / page_size;
            let last = (range.end() - 1) / page_size;
            let present: Vec<u64> = pages.range(first..=last).map(|(index, _)| *index).collect();
            for index in present {
                let page_start = index * page_size;
                let page_end = page_start + page_size;
                if range.offset <= page_start && range.end() >= page_end {
                    pages.remove(&index);
                } else if let Some(page) = pages.get_mut(&index) {
                    let start = range.offset.max(page_start);
                    let end = range.end().min(page_end);
                    Page::zero(page, (start - page_start) as usize, (end - start) as usize);
                }
            }
        }
    }

    fn free_after(&self, offset: u64, page_size: u64) {
        let mut pages = self.pages.lock();
        let boundary = offset / page_size;
        let in_page = (offset % page_size) as usize;
        let first_removed = if in_page == 0 { boundary } else { boundary + 1 };
        let stale: Vec<u64> = pages.range(first_removed..).map(|(index, _)| *index).collect();
        for index in stale {
            pages.remove(&index);
        }
        if in_page != 0 {
            if let Some(page) = pages.get_mut(&boundary) {
                Page::zero(page, in_page, page_size as usize - in_page);
            }
        }
    }

    fn extent_ranges(&self, ranges: &[Range], page_size: u64) -> Vec<Range> {
        let pages = self.pages.lock();
        let mut out = Vec::new();
        for range in ranges {
            if range.is_empty() {
                continue;
            }
            let first = range.offset / page_size;
            let last = (range.end() - 1) / page_size;
            for (index, _) in pages.range(first..=last) {
                let page_start = index * page_size;
                let start = range.offset.max(page_start);
                let end = range.end().min(page_start + page_size);
                out.push(Range {
                    offset: start,
                    length: end - start,
                });
            }
        }
        out
    }
}
