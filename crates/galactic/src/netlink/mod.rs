//! Minimal async rtnetlink implementation.
//!
//! Hand-built netlink messages over a raw NETLINK_ROUTE socket: a
//! [`MessageBuilder`] for requests, [`AttrIter`] for response attributes,
//! and a [`Connection`] with sequence-checked ack/dump helpers. The
//! route, neighbor and link operations the agent performs are methods on
//! [`Connection`] in their respective modules.

pub mod attr;
mod builder;
mod connection;
mod error;
pub mod link;
pub mod message;
pub mod neigh;
pub mod route;
pub mod seg6;
mod socket;

pub use attr::{AttrIter, NlAttr};
pub use builder::{MessageBuilder, NestToken};
pub use connection::Connection;
pub use error::{Error, Result};
pub use link::LinkMessage;
pub use message::{MessageIter, NlMsgHdr, NlMsgType, NLMSG_HDRLEN};
pub use socket::NetlinkSocket;
