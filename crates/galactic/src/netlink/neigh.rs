//! Proxy-neighbor (ARP/NDP) programming.
//!
//! The agent installs proxy entries so the host answers ARP/NDP for
//! remote tenant addresses on the tenant-facing device. Entries are
//! permanent and carry the proxy flag; nothing else from the neighbor
//! subsystem is touched.

use std::net::IpAddr;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::builder::MessageBuilder;
use super::connection::Connection;
use super::error::Result;
use super::message::{NlMsgType, NLM_F_ACK, NLM_F_CREATE, NLM_F_REPLACE, NLM_F_REQUEST};

const AF_INET: u8 = libc::AF_INET as u8;
const AF_INET6: u8 = libc::AF_INET6 as u8;

/// Neighbor message (struct ndmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NdMsg {
    /// Address family.
    pub ndm_family: u8,
    /// Padding.
    pub ndm_pad1: u8,
    /// Padding.
    pub ndm_pad2: u16,
    /// Interface index.
    pub ndm_ifindex: i32,
    /// Neighbor state (NUD_*).
    pub ndm_state: u16,
    /// Neighbor flags (NTF_*).
    pub ndm_flags: u8,
    /// Neighbor type.
    pub ndm_type: u8,
}

impl NdMsg {
    /// Size of this structure.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

/// Neighbor attributes (NDA_*).
pub mod nda {
    pub const DST: u16 = 1;
}

/// Neighbor states (NUD_*).
pub mod nud {
    pub const PERMANENT: u16 = 0x80;
}

/// Neighbor flags (NTF_*).
pub mod ntf {
    pub const PROXY: u8 = 0x08;
}

fn family_of(addr: IpAddr) -> u8 {
    if addr.is_ipv4() { AF_INET } else { AF_INET6 }
}

fn append_dst(builder: &mut MessageBuilder, addr: IpAddr) {
    match addr {
        IpAddr::V4(v4) => builder.append_attr(nda::DST, &v4.octets()),
        IpAddr::V6(v6) => builder.append_attr(nda::DST, &v6.octets()),
    }
}

/// Build a permanent proxy-neighbor install for `addr` on `ifindex`.
pub(crate) fn build_proxy_add(ifindex: u32, addr: IpAddr) -> MessageBuilder {
    let mut builder = MessageBuilder::new(
        NlMsgType::RTM_NEWNEIGH,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
    );

    let ndmsg = NdMsg {
        ndm_family: family_of(addr),
        ndm_ifindex: ifindex as i32,
        ndm_state: nud::PERMANENT,
        ndm_flags: ntf::PROXY,
        ..Default::default()
    };
    builder.append_bytes(ndmsg.as_bytes());
    append_dst(&mut builder, addr);

    builder
}

/// Build a proxy-neighbor delete for `addr` on `ifindex`.
pub(crate) fn build_proxy_del(ifindex: u32, addr: IpAddr) -> MessageBuilder {
    let mut builder = MessageBuilder::new(NlMsgType::RTM_DELNEIGH, NLM_F_REQUEST | NLM_F_ACK);

    let ndmsg = NdMsg {
        ndm_family: family_of(addr),
        ndm_ifindex: ifindex as i32,
        ndm_state: nud::PERMANENT,
        ndm_flags: ntf::PROXY,
        ..Default::default()
    };
    builder.append_bytes(ndmsg.as_bytes());
    append_dst(&mut builder, addr);

    builder
}

impl Connection {
    /// Install (or refresh) a permanent proxy-neighbor entry.
    pub async fn replace_proxy_neighbor(&self, ifindex: u32, addr: IpAddr) -> Result<()> {
        self.send_ack(build_proxy_add(ifindex, addr)).await
    }

    /// Remove a proxy-neighbor entry.
    pub async fn del_proxy_neighbor(&self, ifindex: u32, addr: IpAddr) -> Result<()> {
        self.send_ack(build_proxy_del(ifindex, addr)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::AttrIter;
    use crate::netlink::message::{NlMsgHdr, NLMSG_HDRLEN};

    #[test]
    fn proxy_add_v4() {
        let msg = build_proxy_add(5, "192.168.2.5".parse().unwrap()).finish();

        let hdr = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(hdr.nlmsg_type, NlMsgType::RTM_NEWNEIGH);

        let body = &msg[NLMSG_HDRLEN..NLMSG_HDRLEN + NdMsg::SIZE];
        assert_eq!(body[0], AF_INET);
        let state = u16::from_ne_bytes([body[8], body[9]]);
        assert_eq!(state, nud::PERMANENT);
        assert_eq!(body[10], ntf::PROXY);

        let attrs: Vec<_> = AttrIter::new(&msg[NLMSG_HDRLEN + NdMsg::SIZE..]).collect();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].0, nda::DST);
        assert_eq!(attrs[0].1, &[192, 168, 2, 5]);
    }

    #[test]
    fn proxy_add_v6() {
        let addr: IpAddr = "2001:db8::5".parse().unwrap();
        let msg = build_proxy_add(2, addr).finish();

        let body = &msg[NLMSG_HDRLEN..NLMSG_HDRLEN + NdMsg::SIZE];
        assert_eq!(body[0], AF_INET6);

        let attrs: Vec<_> = AttrIter::new(&msg[NLMSG_HDRLEN + NdMsg::SIZE..]).collect();
        assert_eq!(attrs[0].1.len(), 16);
    }

    #[test]
    fn proxy_del_shape() {
        let msg = build_proxy_del(5, "192.168.2.5".parse().unwrap()).finish();
        let hdr = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(hdr.nlmsg_type, NlMsgType::RTM_DELNEIGH);
        assert_eq!(hdr.nlmsg_flags, NLM_F_REQUEST | NLM_F_ACK);
    }
}
