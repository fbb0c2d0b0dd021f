//! Distributed sort for data that fits in memory.
//!
//! Every member sorts its whole input first. The first member of the group picks the range
//! boundaries from its own sorted data and broadcasts them; every member then cuts its sorted
//! input into one slice per range. Slices for other members are streamed out over one tag per
//! sending member, and the incoming slices are merged with the slice that stays here while
//! they arrive.

use std::cmp::Ordering;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use super::merge::KWayMerge;
use super::Comparator;
use crate::cluster::{Cluster, TagLease};
use crate::error::{fatal, Error, Result};
use crate::group::Group;
use crate::pipeline::LocalSource;
use crate::transport::{recv_packet, recv_value, send_packet, send_value, Data, Packet, Tag};

/// Boundaries picked by the first member from its sorted input. Empty if that input is empty.
pub fn boundaries<T: Clone>(sorted: &[T], buckets: usize) -> Vec<T> {
    if sorted.is_empty() {
        return Vec::new();
    }
    (1..buckets).map(|i| sorted[sorted.len() * i / buckets].clone()).collect()
}

/// End offsets of the `buckets` slices of `sorted`. Without boundaries everything goes into
/// the first slice.
pub fn cut_points<T>(sorted: &[T], bounds: &[T], buckets: usize, cmp: &Comparator<T>) -> Vec<usize> {
    (0..buckets)
        .map(|i| match bounds.get(i) {
            Some(b) => sorted.partition_point(|e| cmp(e, b) == Ordering::Less),
            None => sorted.len(),
        })
        .collect()
}

/// Splits `sorted` at the given end offsets.
fn into_slices<T>(mut sorted: Vec<T>, ends: &[usize]) -> Vec<Vec<T>> {
    let mut slices = Vec::with_capacity(ends.len());
    for i in (0..ends.len()).rev() {
        let start = if i == 0 { 0 } else { ends[i - 1] };
        slices.push(sorted.split_off(start));
    }
    slices.reverse();
    slices
}

type Task = JoinHandle<Result<()>>;

pub fn sort<T: Data + Clone>(cluster: &Arc<Cluster>,
                             group: &Group,
                             source: LocalSource<T>,
                             cmp: Comparator<T>)
                             -> Result<PresortedMerge<T>> {
    let buckets = group.len();
    let bcast = cluster.next_tag(group)?;
    let mut leases = Vec::with_capacity(buckets);
    for _ in 0..buckets {
        leases.push(cluster.next_tag(group)?);
    }
    let tags: Vec<Tag> = leases.iter().map(|l| l.tag()).collect();
    let me = group.index_of(cluster.me()).ok_or(Error::NotInGroup {
        rank: cluster.rank(),
        group: group.id(),
    })?;
    let name = cluster.me().name().to_string();

    let mut local: Vec<T> = source.collect();
    local.sort_by(|a, b| cmp(a, b));
    debug!(node = %name, items = local.len(), "sorted local input");

    let t = cluster.transport();
    let bounds: Vec<T> = if me == 0 {
        let bounds = boundaries(&local, buckets);
        for node in group.iter().skip(1) {
            send_value(t, &bounds, node.rank(), bcast.tag())?;
        }
        bounds
    } else {
        recv_value(t, bcast.tag())?.1
    };
    drop(bcast);

    let ends = cut_points(&local, &bounds, buckets, &cmp);
    let slices = into_slices(local, &ends);

    let mut tasks: Vec<Task> = Vec::with_capacity(2 * buckets);
    let mut sources: Vec<LocalSource<T>> = Vec::with_capacity(buckets);
    for (i, slice) in slices.into_iter().enumerate() {
        if i == me {
            sources.push(Box::new(slice.into_iter()));
            continue;
        }

        let dst = group.get(i).map(|n| n.rank()).unwrap_or(i);
        let (c, out_tag) = (cluster.clone(), tags[me]);
        tasks.push(thread::Builder::new()
            .name(format!("{}-sort-send-{}", name, i))
            .spawn(move || -> Result<()> {
                let t = c.transport();
                for e in slice {
                    send_packet(t, &Packet::Item(e), dst, out_tag)?;
                }
                send_packet::<T>(t, &Packet::End, dst, out_tag)
            })?);

        let (tx, rx) = channel();
        let (c, in_tag) = (cluster.clone(), tags[i]);
        tasks.push(thread::Builder::new()
            .name(format!("{}-sort-recv-{}", name, i))
            .spawn(move || -> Result<()> {
                let t = c.transport();
                loop {
                    match recv_packet::<T>(t, in_tag)? {
                        // Keeps draining the tag even if nobody reads the merge anymore.
                        (_, Packet::Item(e)) => {
                            let _ = tx.send(e);
                        }
                        (_, Packet::End) => return Ok(()),
                    }
                }
            })?);
        sources.push(Box::new(rx.into_iter()));
    }

    Ok(PresortedMerge {
        merge: KWayMerge::new(sources, cmp),
        tasks: tasks,
        leases: leases,
    })
}

/// The output of the presorted sort on one process.
pub struct PresortedMerge<T> {
    merge: KWayMerge<T, LocalSource<T>>,
    tasks: Vec<Task>,
    leases: Vec<TagLease>,
}

impl<T> PresortedMerge<T> {
    fn finish(&mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            match task.join() {
                Err(_) => return Err(Error::Contract(String::from("sort transfer task panicked"))),
                Ok(r) => r?,
            }
        }
        self.leases.clear();
        Ok(())
    }
}

impl<T> Iterator for PresortedMerge<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.merge.next() {
            Some(e) => Some(e),
            None => {
                if let Err(e) = self.finish() {
                    fatal("finishing presorted merge", e);
                }
                None
            }
        }
    }
}

impl<T> Drop for PresortedMerge<T> {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        for task in self.tasks.drain(..) {
            if let Ok(Err(e)) = task.join() {
                error!(error = %e, "sort transfer task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::compare::natural;

    #[test]
    fn test_cut_points() {
        let cmp = natural::<u32>();
        let sorted = vec![1, 2, 2, 5, 7, 9];
        let bounds = boundaries(&sorted, 3);
        assert_eq!(bounds, vec![2, 7]);
        assert_eq!(cut_points(&sorted, &bounds, 3, &cmp), vec![1, 4, 6]);

        let slices = into_slices(sorted.clone(), &[1, 4, 6]);
        assert_eq!(slices, vec![vec![1], vec![2, 2, 5], vec![7, 9]]);
    }

    #[test]
    fn test_no_boundaries() {
        let cmp = natural::<u32>();
        let sorted = vec![4, 8];
        assert!(boundaries::<u32>(&[], 3).is_empty());
        let ends = cut_points(&sorted, &[], 3, &cmp);
        assert_eq!(ends, vec![2, 2, 2]);
        assert_eq!(into_slices(sorted, &ends), vec![vec![4, 8], vec![], vec![]]);
    }
}
