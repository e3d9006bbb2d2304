//! Per-host agent library for the Galactic SRv6 overlay.
//!
//! The agent programs Linux kernel forwarding state so that tenant
//! attachments, identified by a (VPC, attachment) pair, can exchange
//! traffic across hosts over an SRv6 underlay:
//!
//! - the [`codec`] maps identifier pairs to SRv6 endpoint addresses and
//!   deterministic kernel device names, reversibly;
//! - the [`local`] service accepts `Register`/`Deregister` calls from the
//!   host-local control plane over a Unix socket;
//! - the [`remote`] client exchanges route state with the remote control
//!   plane over an MQTT bus;
//! - the [`srv6`] programmer issues the netlink operations (End.DT46
//!   ingress, H.Encaps egress, proxy neighbors) through the [`netlink`]
//!   layer;
//! - [`agent`] wires them together under a single shutdown signal.
//!
//! The agent holds no persistent state: collaborators re-register on
//! restart and the broker's session replay restores the route set.

pub mod addr;
pub mod agent;
pub mod codec;
pub mod config;
pub mod error;
pub mod local;
pub mod netlink;
pub mod remote;
pub mod srv6;
pub mod wire;

pub use config::Config;
pub use error::{AgentError, Result};
