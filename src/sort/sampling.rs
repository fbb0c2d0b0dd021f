//! Sample-based distributed external sort.
//!
//! The first elements of every member's input double as a sample: they are broadcast to the
//! whole group, which derives the same range boundaries everywhere. The rest of the input is
//! streamed to the member owning its range as soon as the boundaries are known. Received
//! elements are buffered and spilled as sorted runs whenever memory runs low; the output is a
//! k-way merge over all runs.

use std::cmp::Ordering;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

use super::spill::{SortedRuns, SpillRegistry};
use super::Comparator;
use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::group::Group;
use crate::pipeline::LocalSource;
use crate::transport::{recv_packet, send_packet, Data, Packet};

/// This member's share of `total` samples when split over `buckets` members.
pub fn local_samples(total: usize, buckets: usize, index: usize) -> usize {
    total / buckets + if index < total % buckets { 1 } else { 0 }
}

/// The `buckets - 1` range boundaries taken from sorted samples. Empty if there are no samples.
pub fn boundaries<T: Clone>(samples: &[T], buckets: usize) -> Vec<T> {
    if samples.is_empty() {
        return Vec::new();
    }
    (1..buckets).map(|i| samples[i * samples.len() / buckets].clone()).collect()
}

/// Index of the bucket `e` belongs to: the number of boundaries strictly less than `e`.
pub fn bucket_of<T>(bounds: &[T], e: &T, cmp: &Comparator<T>) -> usize {
    bounds.partition_point(|b| cmp(b, e) == Ordering::Less)
}

pub fn sort<T: Data + Clone>(cluster: &Arc<Cluster>,
                             group: &Group,
                             source: LocalSource<T>,
                             cmp: Comparator<T>)
                             -> Result<SortedRuns<T>> {
    let bcast = cluster.next_tag(group)?;
    let distrib = cluster.next_tag(group)?;
    let (btag, dtag) = (bcast.tag(), distrib.tag());

    let params = cluster.params();
    let buckets = group.len();
    let me = group.index_of(cluster.me()).ok_or(Error::NotInGroup {
        rank: cluster.rank(),
        group: group.id(),
    })?;
    let quota = local_samples(params.sort_samples, buckets, me);
    let name = cluster.me().name().to_string();
    debug!(node = %name, samples = quota, buckets = buckets, "sampling sort");

    let (bounds_tx, bounds_rx) = sync_channel::<Vec<T>>(1);
    let sender = {
        let c = cluster.clone();
        let cmp = cmp.clone();
        let ranks = group.ranks();
        thread::Builder::new()
            .name(format!("{}-sort-{}", name, dtag))
            .spawn(move || -> Result<()> {
                let t = c.transport();
                let to_all = |packet: &Packet<T>, tag| -> Result<()> {
                    let buf = bincode::serialize(packet)?;
                    for r in ranks.iter() {
                        t.send_object(buf.clone(), *r, tag)?;
                    }
                    Ok(())
                };

                if quota == 0 {
                    to_all(&Packet::End, btag)?;
                }
                let mut count = 0;
                let mut bounds = None;
                for e in source {
                    count += 1;
                    if count <= quota {
                        to_all(&Packet::Item(e), btag)?;
                        if count == quota {
                            to_all(&Packet::End, btag)?;
                        }
                        continue;
                    }
                    if bounds.is_none() {
                        let b = bounds_rx
                            .recv()
                            .map_err(|_| Error::Contract(String::from("sort boundaries were never computed")))?;
                        bounds = Some(b);
                    }
                    let idx = match bounds {
                        Some(ref b) => bucket_of(b, &e, &cmp),
                        None => 0,
                    };
                    send_packet(t, &Packet::Item(e), ranks[idx], dtag)?;
                }
                if count < quota {
                    to_all(&Packet::End, btag)?;
                }
                for r in ranks.iter() {
                    send_packet::<T>(t, &Packet::End, *r, dtag)?;
                }
                Ok(())
            })?
    };

    let t = cluster.transport();
    let mut samples = Vec::new();
    let mut ends = 0;
    while ends < buckets {
        match recv_packet::<T>(t, btag)? {
            (_, Packet::Item(e)) => samples.push(e),
            (_, Packet::End) => ends += 1,
        }
    }
    samples.sort_by(|a, b| cmp(a, b));
    // The send task may be done already if its input fit into the sample.
    let _ = bounds_tx.send(boundaries(&samples, buckets));

    let registry = SpillRegistry::new(params, &name)?;
    let (from, to) = (me * samples.len() / buckets, (me + 1) * samples.len() / buckets);
    if from < to {
        registry.add(&samples[from..to])?;
    }
    drop(samples);

    let memory = cluster.memory();
    let mut buffer = Vec::new();
    ends = 0;
    while ends < buckets {
        if buffer.len() > params.spill_min_items && memory.low_memory() {
            info!(node = %name, "Spilling {} items to disk", buffer.len());
            buffer.sort_by(|a, b| cmp(a, b));
            registry.add(&buffer)?;
            buffer = Vec::new();
            memory.reclaim();
        }
        match recv_packet::<T>(t, dtag)? {
            (_, Packet::Item(e)) => buffer.push(e),
            (_, Packet::End) => ends += 1,
        }
    }
    if !buffer.is_empty() {
        buffer.sort_by(|a, b| cmp(a, b));
        registry.add(&buffer)?;
    }
    drop(buffer);

    match sender.join() {
        Err(_) => return Err(Error::Contract(String::from("sort send task panicked"))),
        Ok(r) => r?,
    }
    drop((bcast, distrib));

    registry.into_sorted(params.merge_fan_in, cmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::compare::natural;

    #[test]
    fn test_sample_quota() {
        assert_eq!(local_samples(1024, 3, 0), 342);
        assert_eq!(local_samples(1024, 3, 1), 341);
        assert_eq!(local_samples(1024, 3, 2), 341);
        assert_eq!(local_samples(2, 3, 2), 0);
        let sum: usize = (0..7).map(|i| local_samples(1024, 7, i)).sum();
        assert_eq!(sum, 1024);
    }

    #[test]
    fn test_boundaries() {
        let samples: Vec<u32> = (0..10).collect();
        assert_eq!(boundaries(&samples, 3), vec![3, 6]);
        assert_eq!(boundaries(&samples, 1), Vec::<u32>::new());
        assert_eq!(boundaries(&[7u32], 3), vec![7, 7]);
        assert!(boundaries::<u32>(&[], 4).is_empty());
    }

    #[test]
    fn test_bucket_of() {
        let cmp = natural::<u32>();
        let bounds = vec![3, 6];
        assert_eq!(bucket_of(&bounds, &0, &cmp), 0);
        assert_eq!(bucket_of(&bounds, &3, &cmp), 0);
        assert_eq!(bucket_of(&bounds, &4, &cmp), 1);
        assert_eq!(bucket_of(&bounds, &100, &cmp), 2);
        assert_eq!(bucket_of(&[], &5, &cmp), 0);
    }
}
