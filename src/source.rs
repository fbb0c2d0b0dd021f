//! The receiving end of a collective.
//!
//! A `PullSource` turns messages arriving on one tag into an ordinary iterator. It knows how
//! many senders take part and counts down one `End` packet per sender; after the last one it
//! waits for the local send task and only then reports the end of the data.

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::vec;

use crate::cluster::{Cluster, TagLease};
use crate::error::{fatal, Error, Result};
use crate::transport::{recv_packet, Data, Packet};

/// Eagerly takes a bounded batch off the front of an iterator, so it can be processed
/// somewhere else (e.g. by a worker thread).
pub trait Split: Iterator {
    /// Returns up to `batch` elements, or None if the iterator is exhausted.
    fn split(&mut self, batch: usize) -> Option<vec::IntoIter<Self::Item>> {
        let mut items = Vec::with_capacity(batch.min(4096));
        while items.len() < batch {
            match self.next() {
                None => break,
                Some(e) => items.push(e),
            }
        }
        if items.is_empty() {
            None
        } else {
            Some(items.into_iter())
        }
    }
}

impl<I: Iterator + ?Sized> Split for I {}

pub type SendTask = JoinHandle<Result<()>>;

pub struct PullSource<T> {
    cluster: Arc<Cluster>,
    lease: Option<TagLease>,
    pending_ends: usize,
    sender: Option<SendTask>,
    _data: PhantomData<fn() -> T>,
}

impl<T: Data> PullSource<T> {
    /// `senders` is the number of ranks that will each finish with one `End` on the lease's tag.
    /// `sender` is this rank's own send task, if it is one of them.
    pub fn new(cluster: Arc<Cluster>, lease: TagLease, senders: usize, sender: Option<SendTask>) -> PullSource<T> {
        PullSource {
            cluster: cluster,
            lease: Some(lease),
            pending_ends: senders,
            sender: sender,
            _data: PhantomData,
        }
    }

    fn pull(&mut self) -> Result<Option<T>> {
        let tag = match self.lease {
            None => return Ok(None),
            Some(ref l) => l.tag(),
        };
        while self.pending_ends > 0 {
            match recv_packet::<T>(self.cluster.transport(), tag)? {
                (_, Packet::Item(e)) => return Ok(Some(e)),
                (_, Packet::End) => self.pending_ends -= 1,
            }
        }
        self.finish()?;
        Ok(None)
    }

    /// Waits for the local send task and gives the tag back.
    fn finish(&mut self) -> Result<()> {
        if let Some(task) = self.sender.take() {
            match task.join() {
                Err(_) => return Err(Error::Contract(String::from("send task panicked"))),
                Ok(r) => r?,
            }
        }
        self.lease = None;
        Ok(())
    }
}

impl<T: Data> Iterator for PullSource<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.pull() {
            Err(e) => fatal("receiving collective data", e),
            Ok(r) => r,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

impl<T> Drop for PullSource<T> {
    /// A collective cannot be abandoned halfway: peers still send to this tag. Drain what is
    /// left so the tag is quiet before it is released.
    fn drop(&mut self) {
        if thread::panicking() || self.lease.is_none() {
            return;
        }
        let tag = match self.lease {
            Some(ref l) => l.tag(),
            None => return,
        };
        while self.pending_ends > 0 {
            match self.cluster.transport().recv_object(tag) {
                Err(e) => {
                    tracing::error!(error = %e, tag = tag, "could not drain collective");
                    return;
                }
                Ok((_, buf)) => {
                    // Only the variant matters here; `End` carries no payload.
                    if let Ok(Packet::End) = bincode::deserialize::<Packet<()>>(&buf) {
                        self.pending_ends -= 1;
                    }
                }
            }
        }
        if let Some(task) = self.sender.take() {
            if let Ok(Err(e)) = task.join() {
                tracing::error!(error = %e, tag = tag, "send task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_batches() {
        let mut it = 0..10;
        assert_eq!(it.split(4).unwrap().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(it.split(4).unwrap().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
        assert_eq!(it.split(4).unwrap().collect::<Vec<_>>(), vec![8, 9]);
        assert!(it.split(4).is_none());
    }

    #[test]
    fn test_split_boxed() {
        let mut it: Box<dyn Iterator<Item = u8> + Send> = Box::new(vec![1, 2, 3].into_iter());
        assert_eq!(it.split(256).unwrap().len(), 3);
        assert!(it.split(256).is_none());
    }
}
