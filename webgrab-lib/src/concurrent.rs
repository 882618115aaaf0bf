//! Concurrent batch processing.
//!
//! A batch is split in three steps:
//!
//! 1. [`group_by_domain`] buckets URLs by authority, keeping first-seen order.
//! 2. [`generate_partitions`] cuts every bucket into contiguous chunks.
//! 3. [`dispatch`] runs one worker per chunk, at most `limit` at a time.
//!
//! Each worker only ever touches the index range of its own partition and
//! hands its results back through its join handle, so assembling the final
//! map needs no shared mutable state.

use crate::error::GrabError;
use crate::response::Response;
use crate::utils::extract_authority;
use indexmap::IndexMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// URLs bucketed by authority (scheme + host + port).
#[derive(Debug, Clone, Default)]
pub struct DomainGroups {
    groups: IndexMap<String, Vec<String>>,
    len: usize,
}

impl DomainGroups {
    /// Number of URLs across all groups.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct authorities.
    pub fn domain_count(&self) -> usize {
        self.groups.len()
    }

    /// URLs of one authority.
    pub fn get(&self, domain: &str) -> Option<&[String]> {
        self.groups.get(domain).map(Vec::as_slice)
    }

    /// Authorities in first-seen order.
    pub fn domains(&self) -> impl Iterator<Item = &String> {
        self.groups.keys()
    }

    /// Groups in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.groups.iter()
    }

    /// URL at a flat index across all groups, in group order.
    ///
    /// Negative indices count from the end.
    pub fn nth(&self, index: isize) -> Option<&String> {
        let len = self.len as isize;
        let index = if index < 0 { index + len } else { index };
        if index < 0 || index >= len {
            return None;
        }

        let mut remaining = index as usize;
        for urls in self.groups.values() {
            if remaining < urls.len() {
                return urls.get(remaining);
            }
            remaining -= urls.len();
        }
        None
    }

    /// Whether an authority has more URLs than `cutoff`.
    pub fn is_high_volume(&self, domain: &str, cutoff: usize) -> bool {
        self.groups
            .get(domain)
            .map(|urls| urls.len() > cutoff)
            .unwrap_or(false)
    }
}

/// Group URLs by authority.
///
/// Insertion order of the first occurrence of each authority is preserved,
/// as is the order of URLs inside a group. Empty input yields empty groups.
pub fn group_by_domain<S: AsRef<str>>(urls: &[S]) -> DomainGroups {
    let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
    for url in urls {
        let url = url.as_ref();
        groups
            .entry(extract_authority(url))
            .or_default()
            .push(url.to_string());
    }
    DomainGroups {
        len: urls.len(),
        groups,
    }
}

/// A contiguous slice of one domain's URL list, owned by a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// First index in the domain's URL list
    pub start: usize,
    /// Number of URLs in the slice
    pub count: usize,
    /// Authority the slice belongs to
    pub domain: String,
}

impl Partition {
    pub fn new<D: Into<String>>(start: usize, count: usize, domain: D) -> Self {
        Self {
            start,
            count,
            domain: domain.into(),
        }
    }

    /// Index range covered by this partition.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.count
    }
}

/// Cut domain groups into worker partitions.
///
/// Domains are visited in group order and each is chunked until exhausted
/// before moving to the next. High-volume domains (more than `cutoff`
/// URLs) use `chunk_size * multiplier` per chunk; the rest use
/// `chunk_size`. The last chunk of a domain may be smaller.
pub fn generate_partitions(
    groups: &DomainGroups,
    cutoff: usize,
    chunk_size: usize,
    multiplier: usize,
) -> Vec<Partition> {
    let chunk_size = chunk_size.max(1);
    let mut partitions = Vec::new();

    for (domain, urls) in groups.iter() {
        let size = if urls.len() > cutoff {
            chunk_size.saturating_mul(multiplier.max(1))
        } else {
            chunk_size
        };

        let mut start = 0;
        while start < urls.len() {
            let count = size.min(urls.len() - start);
            partitions.push(Partition::new(start, count, domain.clone()));
            start += count;
        }
    }

    partitions
}

/// One URL handed to the fetch function by a worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub url: String,
    pub domain: String,
    /// Whether the domain qualifies for a dedicated session
    pub high_volume: bool,
}

/// Outcome of one URL.
pub type WorkResult = (String, Result<Response, GrabError>);

/// Run every partition and collect the per-URL outcomes.
///
/// At most `limit` workers are in flight; a new one is only launched once a
/// slot frees up, and `time_rest` is slept between launches. All workers are
/// joined before returning. A worker that panics loses its outcomes; callers
/// that need one entry per URL must fill the gaps.
pub async fn dispatch<F, Fut>(
    groups: Arc<DomainGroups>,
    partitions: Vec<Partition>,
    cutoff: usize,
    limit: usize,
    time_rest: Duration,
    fetch: F,
) -> Vec<WorkResult>
where
    F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, GrabError>> + Send + 'static,
{
    let fetch = Arc::new(fetch);
    let slots = Arc::new(Semaphore::new(limit.max(1)));
    let mut workers = JoinSet::new();

    for (launched, partition) in partitions.into_iter().enumerate() {
        if launched > 0 && !time_rest.is_zero() {
            tokio::time::sleep(time_rest).await;
        }

        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let groups = Arc::clone(&groups);
        let fetch = Arc::clone(&fetch);
        workers.spawn(async move {
            let _permit = permit;
            run_partition(&groups, &partition, cutoff, fetch.as_ref()).await
        });
    }

    let mut results = Vec::with_capacity(groups.len());
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(chunk) => results.extend(chunk),
            Err(e) => tracing::error!(error = %e, "batch worker did not finish"),
        }
    }
    results
}

async fn run_partition<F, Fut>(
    groups: &DomainGroups,
    partition: &Partition,
    cutoff: usize,
    fetch: &F,
) -> Vec<WorkResult>
where
    F: Fn(WorkItem) -> Fut,
    Fut: Future<Output = Result<Response, GrabError>>,
{
    let Some(urls) = groups.get(&partition.domain) else {
        return Vec::new();
    };
    let high_volume = urls.len() > cutoff;

    let mut out = Vec::with_capacity(partition.count);
    for index in partition.range() {
        // Out-of-range indices mean the partition overshoots the list
        let Some(url) = urls.get(index) else {
            break;
        };
        let item = WorkItem {
            url: url.clone(),
            domain: partition.domain.clone(),
            high_volume,
        };
        let outcome = fetch(item).await;
        out.push((url.clone(), outcome));
    }
    out
}
