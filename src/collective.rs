//! Collective operations: distribute (shuffle), broadcast and reduce.
//!
//! Every member of the participating group must call the same collective, in the same order.
//! Data-moving collectives start a send task in the background and hand back a `PullSource`
//! for the incoming side, so two ranks sending to each other never block one another.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::group::Group;
use crate::source::PullSource;
use crate::transport::{recv_value, send_packet, send_value, Data, Packet};

/// Default partition function. Deterministic within one build of the program, which is all
/// SPMD needs.
pub fn hash_partition<T: Hash + ?Sized>(e: &T) -> i64 {
    let mut h = DefaultHasher::new();
    e.hash(&mut h);
    h.finish() as i64
}

/// Index into a destination group of `n` members for a partition value; negative values are
/// folded by absolute value.
pub fn destination_index(partition: i64, n: usize) -> usize {
    (partition.unsigned_abs() % n as u64) as usize
}

/// Sends every local element to `dest[|partition(e)| mod |dest|]`.
///
/// Collective over `source ∪ dest`. Members of `source` send their `local` elements, every
/// member of the union receives whatever was addressed to it. A member that is not in `source`
/// must pass an empty iterator; anything else is a `Contract` error.
pub fn distribute<T, I, P>(cluster: &Arc<Cluster>,
                           source: &Group,
                           local: I,
                           dest: &Group,
                           partition: P)
                           -> Result<PullSource<T>>
    where T: Data,
          I: Iterator<Item = T> + Send + 'static,
          P: Fn(&T) -> i64 + Send + 'static
{
    if dest.is_empty() {
        return Err(Error::EmptyGroup);
    }
    let union = source.union(dest);
    let lease = cluster.next_tag(&union)?;
    let tag = lease.tag();
    debug!(node = cluster.me().name(), tag = tag, from = ?source, to = ?dest, "distribute");

    let sender = if source.contains(cluster.me()) {
        let c = cluster.clone();
        let targets = dest.ranks();
        let everyone = union.ranks();
        let task = thread::Builder::new()
            .name(format!("{}-distribute-{}", cluster.me().name(), tag))
            .spawn(move || -> Result<()> {
                let t = c.transport();
                for e in local {
                    let dst = targets[destination_index(partition(&e), targets.len())];
                    send_packet(t, &Packet::Item(e), dst, tag)?;
                }
                // No more data: one End to every member of both groups
                for r in everyone {
                    send_packet::<T>(t, &Packet::End, r, tag)?;
                }
                Ok(())
            })?;
        Some(task)
    } else {
        let mut local = local;
        if local.next().is_some() {
            return Err(Error::Contract(format!("{} holds data for a distribute it is not a source of",
                                               cluster.me().name())));
        }
        None
    };

    Ok(PullSource::new(cluster.clone(), lease, source.len(), sender))
}

/// Sends every local element to every member of `group`, including this one.
pub fn broadcast<T, I>(cluster: &Arc<Cluster>, group: &Group, local: I) -> Result<PullSource<T>>
    where T: Data,
          I: Iterator<Item = T> + Send + 'static
{
    let lease = cluster.next_tag(group)?;
    let tag = lease.tag();
    debug!(node = cluster.me().name(), tag = tag, group = ?group, "broadcast");

    let c = cluster.clone();
    let everyone = group.ranks();
    let task = thread::Builder::new()
        .name(format!("{}-broadcast-{}", cluster.me().name(), tag))
        .spawn(move || -> Result<()> {
            let t = c.transport();
            for e in local {
                let buf = bincode::serialize(&Packet::Item(e))?;
                for r in everyone.iter() {
                    t.send_object(buf.clone(), *r, tag)?;
                }
            }
            let end = bincode::serialize(&Packet::<T>::End)?;
            for r in everyone.iter() {
                t.send_object(end.clone(), *r, tag)?;
            }
            Ok(())
        })?;

    Ok(PullSource::new(cluster.clone(), lease, group.len(), Some(task)))
}

/// Folds one value per member into a single value known to every member.
///
/// The root folds the partials in arrival order, so `combiner` has to be associative and
/// should be commutative.
pub fn reduce<T, F>(cluster: &Arc<Cluster>, group: &Group, partial: T, combiner: F) -> Result<T>
    where T: Data,
          F: Fn(T, T) -> T
{
    let lease = cluster.next_tag(group)?;
    let tag = lease.tag();
    let t = cluster.transport();
    let root = group.root().ok_or(Error::EmptyGroup)?;

    if root.rank() == cluster.rank() {
        let mut result = partial;
        for _ in 1..group.len() {
            let (_, more) = recv_value::<T>(t, tag)?;
            result = combiner(result, more);
        }
        for node in group.iter().skip(1) {
            send_value(t, &result, node.rank(), tag)?;
        }
        Ok(result)
    } else {
        send_value(t, &partial, root.rank(), tag)?;
        let (_, result) = recv_value::<T>(t, tag)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Parameters;
    use crate::transport::local::run_local;

    fn params() -> Parameters {
        Parameters::new().set_workers(1)
    }

    #[test]
    fn test_destination_index() {
        assert_eq!(destination_index(7, 3), 1);
        assert_eq!(destination_index(-7, 3), 1);
        assert_eq!(destination_index(i64::MIN, 3), (1u64 << 63) as usize % 3);
    }

    #[test]
    fn test_distribute_placement() {
        let got = run_local(3, params(), |c| {
            let g = c.group();
            let local: Vec<i64> = (0..30).map(|i| i * 3 + c.rank() as i64).collect();
            let src = distribute(&c, &g, local.into_iter(), &g, |e| *e)?;
            let mut v: Vec<i64> = src.collect();
            v.sort();
            Ok(v)
        })
        .unwrap();

        for (rank, v) in got.iter().enumerate() {
            assert_eq!(v.len(), 30);
            assert!(v.iter().all(|e| (*e % 3) as usize == rank));
        }
    }

    #[test]
    fn test_distribute_to_subgroup() {
        // Everything goes to node1; node0 and node2 receive nothing.
        let got = run_local(3, params(), |c| {
            let all = c.group();
            let dest = Group::single(c.node(1).unwrap().clone());
            let local = vec![c.rank() as u32; 5];
            let src = distribute(&c, &all, local.into_iter(), &dest, |e| *e as i64)?;
            Ok(src.count())
        })
        .unwrap();
        assert_eq!(got, vec![0, 15, 0]);
    }

    #[test]
    fn test_distribute_from_subgroup() {
        // Only node0 holds data; it is spread over all three.
        let got = run_local(3, params(), |c| {
            let source = Group::single(c.node(0).unwrap().clone());
            let dest = c.group();
            let local: Vec<u32> = if c.rank() == 0 { (0..9).collect() } else { Vec::new() };
            let src = distribute(&c, &source, local.into_iter(), &dest, |e| *e as i64)?;
            Ok(src.count())
        })
        .unwrap();
        assert_eq!(got, vec![3, 3, 3]);
    }

    #[test]
    fn test_distribute_data_outside_source() {
        let got = run_local(2, params(), |c| {
            let source = Group::single(c.node(0).unwrap().clone());
            let dest = c.group();
            let local = vec![c.rank() as u32 + 1; 4];
            match distribute(&c, &source, local.into_iter(), &dest, |e| *e as i64) {
                Ok(src) if c.rank() == 0 => Ok(src.count() < 4),
                Err(Error::Contract(_)) => Ok(c.rank() == 1),
                _ => Ok(false),
            }
        })
        .unwrap();
        assert_eq!(got, vec![true, true]);
    }

    #[test]
    fn test_broadcast() {
        let got = run_local(4, params(), |c| {
            let g = c.group();
            let local = vec![c.rank(); c.rank()];
            let mut v: Vec<usize> = broadcast(&c, &g, local.into_iter())?.collect();
            v.sort();
            Ok(v)
        })
        .unwrap();
        for v in got {
            assert_eq!(v, vec![1, 2, 2, 3, 3, 3]);
        }
    }

    #[test]
    fn test_reduce() {
        let got = run_local(5, params(), |c| {
            let g = c.group();
            let sum = reduce(&c, &g, c.rank() as u64 + 1, |a, b| a + b)?;
            let max = reduce(&c, &g, c.rank(), |a, b| a.max(b))?;
            Ok((sum, max))
        })
        .unwrap();
        assert!(got.iter().all(|r| *r == (15, 4)));
    }

    #[test]
    fn test_back_to_back_collectives() {
        let got = run_local(2, params(), |c| {
            let g = c.group();
            let a = distribute(&c, &g, vec![1u8, 2, 3].into_iter(), &g, |e| *e as i64)?;
            let b = broadcast(&c, &g, vec![c.rank() as u8].into_iter())?;
            // Consume in the opposite order of creation.
            let nb = b.count();
            let na = a.count();
            Ok((na, nb))
        })
        .unwrap();
        assert_eq!(got[0].0 + got[1].0, 6);
        assert_eq!(got[0].1, 2);
        assert_eq!(got[1].1, 2);
    }
}
