//! An in-process transport: every rank is a thread, every mailbox a locked queue.
//!
//! Used for tests and for running jobs on a single machine without a message-passing
//! runtime. Sends never block; receives block until a matching message is queued.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::memory::MemoryPressure;
use crate::parameters::Parameters;
use crate::transport::{Tag, Transport};

enum Body {
    Object(Vec<u8>),
    Int(i32),
}

struct Envelope {
    src: usize,
    tag: Tag,
    body: Body,
}

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    ready: Condvar,
}

pub struct LocalTransport {
    rank: usize,
    boxes: Arc<Vec<Mailbox>>,
}

impl LocalTransport {
    /// Creates `n` connected endpoints; endpoint i has rank i.
    pub fn mesh(n: usize) -> Vec<LocalTransport> {
        let boxes: Arc<Vec<Mailbox>> = Arc::new((0..n).map(|_| Mailbox::default()).collect());
        (0..n)
            .map(|rank| LocalTransport {
                rank: rank,
                boxes: boxes.clone(),
            })
            .collect()
    }

    fn deliver(&self, dst: usize, tag: Tag, body: Body) -> Result<()> {
        let mailbox = self
            .boxes
            .get(dst)
            .ok_or_else(|| Error::Transport(format!("no rank {} in a mesh of {}", dst, self.boxes.len())))?;
        mailbox.queue.lock().push_back(Envelope {
            src: self.rank,
            tag: tag,
            body: body,
        });
        mailbox.ready.notify_all();
        Ok(())
    }

    /// Blocks until the first queued envelope accepted by `want` arrives and removes it.
    fn take<F: Fn(&Envelope) -> bool>(&self, want: F) -> Envelope {
        let mailbox = &self.boxes[self.rank];
        let mut queue = mailbox.queue.lock();
        loop {
            if let Some(pos) = queue.iter().position(|e| want(e)) {
                if let Some(env) = queue.remove(pos) {
                    return env;
                }
            }
            mailbox.ready.wait(&mut queue);
        }
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.boxes.len()
    }

    fn send_object(&self, payload: Vec<u8>, dst: usize, tag: Tag) -> Result<()> {
        self.deliver(dst, tag, Body::Object(payload))
    }

    fn recv_object(&self, tag: Tag) -> Result<(usize, Vec<u8>)> {
        let env = self.take(|e| e.tag == tag && matches!(e.body, Body::Object(_)));
        match env.body {
            Body::Object(buf) => Ok((env.src, buf)),
            Body::Int(_) => Err(Error::Transport(String::from("integer delivered on object channel"))),
        }
    }

    fn send_int(&self, n: i32, dst: usize, tag: Tag) -> Result<()> {
        self.deliver(dst, tag, Body::Int(n))
    }

    fn recv_int(&self, src: usize, tag: Tag) -> Result<i32> {
        let env = self.take(|e| e.src == src && e.tag == tag && matches!(e.body, Body::Int(_)));
        match env.body {
            Body::Int(n) => Ok(n),
            Body::Object(_) => Err(Error::Transport(String::from("object delivered on integer channel"))),
        }
    }
}

/// Runs `f` on `n` ranks, each a thread with its own bootstrapped `Cluster`, and returns the
/// results in rank order. This is the SPMD model on one machine: every rank executes the same
/// closure.
pub fn run_local<R, F>(n: usize, params: Parameters, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(Arc<Cluster>) -> Result<R> + Sync,
{
    launch(n, params, None, f)
}

/// Like `run_local()`, but every rank gets the memory pressure signal `memory(rank)` instead of
/// a memory monitor. Lets tests force spilling.
pub fn run_local_with_memory<R, M, F>(n: usize, params: Parameters, memory: M, f: F) -> Result<Vec<R>>
where
    R: Send,
    M: Fn(usize) -> Arc<dyn MemoryPressure> + Sync,
    F: Fn(Arc<Cluster>) -> Result<R> + Sync,
{
    launch(n, params, Some(&memory), f)
}

type MemoryFactory<'a> = &'a (dyn Fn(usize) -> Arc<dyn MemoryPressure> + Sync);

fn launch<R, F>(n: usize, params: Parameters, memory: Option<MemoryFactory>, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(Arc<Cluster>) -> Result<R> + Sync,
{
    let mesh = LocalTransport::mesh(n);
    let f = &f;
    let params = &params;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(n);
        for t in mesh {
            let rank = t.rank;
            let handle = thread::Builder::new()
                .name(format!("node{}", rank))
                .spawn_scoped(scope, move || {
                    let cluster = match memory {
                        None => Cluster::bootstrap(Arc::new(t), params.clone())?,
                        Some(m) => Cluster::bootstrap_with_memory(Arc::new(t), params.clone(), m(rank))?,
                    };
                    f(cluster)
                })?;
            handles.push((rank, handle));
        }

        let mut results = Vec::with_capacity(n);
        for (rank, handle) in handles {
            match handle.join() {
                Err(_) => return Err(Error::Contract(format!("node{} panicked", rank))),
                Ok(r) => results.push(r?),
            }
        }
        Ok(results)
    })
}
