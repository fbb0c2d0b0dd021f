//! Distributed sorting.
//!
//! Both strategies produce a range partition over the group: every member's output is sorted,
//! and everything member i holds compares less or equal to everything member i+1 holds. Order
//! among equal elements is not preserved.

pub mod compare;
pub mod merge;
pub mod presorted;
pub mod sampling;
pub mod spill;

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::info;

use crate::cluster::Cluster;
use crate::error::Result;
use crate::group::Group;
use crate::parameters::SortStrategy;
use crate::pipeline::LocalSource;
use crate::transport::Data;

/// A shareable comparison function. It has to be a total order.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Sorts the data of all members of `group`; returns this member's range.
pub fn sorted<T: Data + Clone>(cluster: &Arc<Cluster>,
                               group: &Group,
                               source: LocalSource<T>,
                               cmp: Comparator<T>,
                               strategy: SortStrategy)
                               -> Result<LocalSource<T>> {
    info!(node = cluster.me().name(), strategy = ?strategy, group = ?group, "sorting");
    match strategy {
        SortStrategy::Sampling => Ok(Box::new(sampling::sort(cluster, group, source, cmp)?)),
        SortStrategy::Presorted => Ok(Box::new(presorted::sort(cluster, group, source, cmp)?)),
    }
}
