//! The message-passing layer underneath the cluster.
//!
//! A transport moves opaque byte payloads and plain integers between ranks. It is blocking,
//! reliable, and keeps messages in order per (source, destination, tag). Everything above it
//! speaks in typed `Packet`s.

pub mod local;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub type Tag = i32;

/// Tag used for bootstrap and tag-allocation traffic. Collectives never use it.
pub const CONTROL_TAG: Tag = 0;

/// Anything that can travel between ranks.
pub trait Data: Serialize + DeserializeOwned + Send + 'static {}

impl<T: Serialize + DeserializeOwned + Send + 'static> Data for T {}

pub trait Transport: Send + Sync {
    /// Initializes the transport; returns the program arguments left over for the program.
    fn init(&self, args: Vec<String>) -> Result<Vec<String>> {
        Ok(args)
    }

    /// Last call made on a transport.
    fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn send_object(&self, payload: Vec<u8>, dst: usize, tag: Tag) -> Result<()>;
    /// Receives an object sent with `tag` by any rank. Returns the source rank and the payload.
    fn recv_object(&self, tag: Tag) -> Result<(usize, Vec<u8>)>;

    fn send_int(&self, n: i32, dst: usize, tag: Tag) -> Result<()>;
    fn recv_int(&self, src: usize, tag: Tag) -> Result<i32>;
}

/// What flows through a collective: elements, then one `End` per sender.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum Packet<T> {
    Item(T),
    End,
}

pub fn send_packet<T: Serialize>(t: &dyn Transport, packet: &Packet<T>, dst: usize, tag: Tag) -> Result<()> {
    let buf = bincode::serialize(packet)?;
    t.send_object(buf, dst, tag)
}

pub fn recv_packet<T: DeserializeOwned>(t: &dyn Transport, tag: Tag) -> Result<(usize, Packet<T>)> {
    let (src, buf) = t.recv_object(tag)?;
    Ok((src, bincode::deserialize(&buf)?))
}

/// Sends a single value (no packet framing).
pub fn send_value<T: Serialize>(t: &dyn Transport, value: &T, dst: usize, tag: Tag) -> Result<()> {
    t.send_object(bincode::serialize(value)?, dst, tag)
}

pub fn recv_value<T: DeserializeOwned>(t: &dyn Transport, tag: Tag) -> Result<(usize, T)> {
    let (src, buf) = t.recv_object(tag)?;
    Ok((src, bincode::deserialize(&buf)?))
}
