//! Mapreduce-style data-parallel streams over a cluster of cooperating processes.
//!
//! Every process runs the same program (SPMD) and owns one partition of the data. A
//! `Pipeline` chains lazy local operations on that partition; global operations (shuffles,
//! reductions, sorting) are collectives that every member of the pipeline's group calls in the
//! same order. Messages travel over a `Transport`; `transport::local` provides an in-process
//! one for running several ranks as threads.
//!

pub mod cluster;
pub mod collective;
pub mod error;
pub mod formats;
pub mod group;
pub mod jobs;
pub mod logging;
pub mod memory;
pub mod numeric;
pub mod parameters;
pub mod pipeline;
pub mod pool;
pub mod sort;
pub mod source;
pub mod transport;

pub use cluster::{run_node, Cluster, Node};
pub use error::{Error, Result};
pub use group::Group;
pub use numeric::Summary;
pub use parameters::{Parameters, SortStrategy};
pub use pipeline::Pipeline;
pub use transport::local::run_local;
pub use transport::Transport;
