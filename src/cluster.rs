//! Cluster membership and the tag protocol.
//!
//! Every process builds the same table of nodes at bootstrap: rank and size come from the
//! transport, host names are exchanged all-to-all exactly once. After that the table is
//! read-only; the only mutable piece of process state is the tag counter.
//!
//! Collectives agree on a tag like this: the first member of the group (its root) computes
//! `(rank + cluster_size * counter) mod wrap + min_tag`, sends it to every other member and
//! uses it. All other members block until they get it from the root. No consensus round is
//! needed, but every member must run the collectives of a group in the same program order.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::System;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::group::Group;
use crate::memory::{MemoryMonitor, MemoryPressure};
use crate::parameters::Parameters;
use crate::pool::WorkerPool;
use crate::transport::{self, Tag, Transport, CONTROL_TAG};

/// A process in the cluster.
#[derive(Debug)]
pub struct Node {
    rank: usize,
    hostname: String,
    name: String,
    is_self: bool,
}

impl Node {
    fn new(rank: usize, hostname: String, is_self: bool) -> Node {
        Node {
            rank: rank,
            hostname: hostname,
            name: format!("node{}", rank),
            is_self: is_self,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// `node<rank>`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True on the node that is executing this code.
    pub fn is_self(&self) -> bool {
        self.is_self
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        self.rank == other.rank
    }
}

impl Eq for Node {}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.hostname)
    }
}

/// Hands out tags and remembers which ones belong to collectives that are still running.
struct TagAllocator {
    counter: AtomicU64,
    live: Mutex<HashSet<Tag>>,
    min: i64,
    wrap: i64,
}

impl TagAllocator {
    fn new(params: &Parameters) -> TagAllocator {
        TagAllocator {
            counter: AtomicU64::new(0),
            live: Mutex::new(HashSet::new()),
            min: params.min_tag as i64,
            wrap: params.tag_wrap(),
        }
    }

    /// The tag a root with `rank` computes for its next collective.
    fn compute(&self, rank: usize, cluster_size: usize) -> Tag {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        let raw = rank as u128 + cluster_size as u128 * count as u128;
        ((raw % self.wrap as u128) as i64 + self.min) as Tag
    }

    fn register(&self, tag: Tag) -> Result<()> {
        if !self.live.lock().insert(tag) {
            return Err(Error::TagInFlight { tag: tag });
        }
        Ok(())
    }

    fn release(&self, tag: Tag) {
        self.live.lock().remove(&tag);
    }
}

/// A tag owned by one running collective. Dropping it marks the tag as free again.
pub struct TagLease {
    tag: Tag,
    cluster: Arc<Cluster>,
}

impl TagLease {
    pub fn tag(&self) -> Tag {
        self.tag
    }
}

impl Drop for TagLease {
    fn drop(&mut self) {
        self.cluster.tags.release(self.tag);
    }
}

impl fmt::Debug for TagLease {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TagLease({})", self.tag)
    }
}

/// The per-process view of the cluster; created once by `bootstrap()`.
pub struct Cluster {
    transport: Arc<dyn Transport>,
    nodes: Vec<Arc<Node>>,
    by_name: HashMap<String, Arc<Node>>,
    me: usize,
    tags: TagAllocator,
    params: Parameters,
    pool: WorkerPool,
    memory: Arc<dyn MemoryPressure>,
}

fn short_hostname() -> Result<String> {
    let name = System::host_name().ok_or_else(|| Error::Identity(String::from("no host name")))?;
    Ok(name.split('.').next().unwrap_or("").to_string())
}

impl Cluster {
    /// Learns rank and size from the transport, exchanges host names with every other rank and
    /// builds the node table. Starts the memory monitor.
    pub fn bootstrap(transport: Arc<dyn Transport>, params: Parameters) -> Result<Arc<Cluster>> {
        let monitor = MemoryMonitor::start(params.memory_safety_margin, params.memory_interval)?;
        Cluster::bootstrap_with_memory(transport, params, Arc::new(monitor))
    }

    /// Like `bootstrap()`, with a caller-supplied memory pressure signal.
    pub fn bootstrap_with_memory(transport: Arc<dyn Transport>,
                                 params: Parameters,
                                 memory: Arc<dyn MemoryPressure>)
                                 -> Result<Arc<Cluster>> {
        let rank = transport.rank();
        let size = transport.size();
        if rank >= size {
            return Err(Error::Contract(format!("transport reports rank {} of {}", rank, size)));
        }

        let mut hostnames = vec![String::new(); size];
        hostnames[rank] = short_hostname()?;
        for i in 0..size {
            if i != rank {
                transport::send_value(transport.as_ref(), &hostnames[rank], i, CONTROL_TAG)?;
            }
        }
        for _ in 1..size {
            let (src, host) = transport::recv_value::<String>(transport.as_ref(), CONTROL_TAG)?;
            hostnames[src] = host;
        }

        let nodes: Vec<Arc<Node>> = hostnames
            .into_iter()
            .enumerate()
            .map(|(i, host)| Arc::new(Node::new(i, host, i == rank)))
            .collect();
        let by_name = nodes.iter().map(|n| (n.name().to_string(), n.clone())).collect();

        info!(node = %nodes[rank], size = size, "joined cluster");

        Ok(Arc::new(Cluster {
            transport: transport,
            nodes: nodes,
            by_name: by_name,
            me: rank,
            tags: TagAllocator::new(&params),
            pool: WorkerPool::new(params.workers),
            params: params,
            memory: memory,
        }))
    }

    pub fn rank(&self) -> usize {
        self.me
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// The node executing this code.
    pub fn me(&self) -> &Arc<Node> {
        &self.nodes[self.me]
    }

    pub fn node(&self, rank: usize) -> Option<&Arc<Node>> {
        self.nodes.get(rank)
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Arc<Node>> {
        self.by_name.get(name)
    }

    /// A fresh group made of every node in the cluster.
    pub fn group(&self) -> Group {
        Group::from_nodes(self.nodes.iter().cloned())
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn memory(&self) -> &dyn MemoryPressure {
        self.memory.as_ref()
    }

    /// Agrees on a tag for the next collective over `group`. Every member of the group must
    /// call this, in the same order relative to other collectives on overlapping groups.
    pub fn next_tag(self: &Arc<Self>, group: &Group) -> Result<TagLease> {
        let me = self.me();
        if !group.contains(me) {
            return Err(Error::NotInGroup {
                rank: me.rank(),
                group: group.id(),
            });
        }
        let root = group.root().ok_or(Error::EmptyGroup)?;

        let tag = if root.rank() == me.rank() {
            let tag = self.tags.compute(me.rank(), self.size());
            for node in group.iter().skip(1) {
                self.transport.send_int(tag, node.rank(), CONTROL_TAG)?;
            }
            tag
        } else {
            self.transport.recv_int(root.rank(), CONTROL_TAG)?
        };

        self.tags.register(tag)?;
        debug!(node = me.name(), group = group.id(), tag = tag, "allocated tag");
        Ok(TagLease {
            tag: tag,
            cluster: self.clone(),
        })
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("me", &self.me)
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// Entry point of an SPMD program: initializes the transport, bootstraps the cluster, runs
/// `main` with the remaining arguments and shuts the transport down.
pub fn run_node<R, F>(transport: Arc<dyn Transport>, args: Vec<String>, params: Parameters, main: F) -> Result<R>
    where F: FnOnce(Arc<Cluster>, Vec<String>) -> Result<R>
{
    let args = transport.init(args)?;
    let cluster = Cluster::bootstrap(transport.clone(), params)?;
    let result = main(cluster, args);
    transport.cleanup()?;
    result
}
