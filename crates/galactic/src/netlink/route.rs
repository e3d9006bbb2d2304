//! SRv6 route programming.
//!
//! The agent issues exactly three route shapes: an End.DT46 decapsulation
//! route bound to a tenant host device, an H.Encaps encapsulation route in
//! a tenant VRF table, and the matching deletions. All installs use replace
//! semantics so redelivered control messages converge instead of failing.

use std::net::{IpAddr, Ipv6Addr};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::builder::MessageBuilder;
use super::connection::Connection;
use super::error::Result;
use super::message::{NlMsgType, NLM_F_ACK, NLM_F_CREATE, NLM_F_REPLACE, NLM_F_REQUEST};
use super::seg6::{self, lwtunnel_encap, seg6_iptunnel, seg6_local, seg6_local_action, seg6_mode};
use crate::addr::Prefix;

const AF_INET: u8 = libc::AF_INET as u8;
const AF_INET6: u8 = libc::AF_INET6 as u8;

/// Route message (struct rtmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RtMsg {
    /// Address family.
    pub rtm_family: u8,
    /// Destination prefix length.
    pub rtm_dst_len: u8,
    /// Source prefix length.
    pub rtm_src_len: u8,
    /// TOS filter.
    pub rtm_tos: u8,
    /// Routing table ID.
    pub rtm_table: u8,
    /// Routing protocol (RTPROT_*).
    pub rtm_protocol: u8,
    /// Route scope (RT_SCOPE_*).
    pub rtm_scope: u8,
    /// Route type (RTN_*).
    pub rtm_type: u8,
    /// Route flags.
    pub rtm_flags: u32,
}

impl RtMsg {
    /// Size of this structure.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Create a new route message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address family.
    pub fn with_family(mut self, family: u8) -> Self {
        self.rtm_family = family;
        self
    }

    /// Set the destination prefix length.
    pub fn with_dst_len(mut self, len: u8) -> Self {
        self.rtm_dst_len = len;
        self
    }

    /// Set the routing table.
    pub fn with_table(mut self, table: u8) -> Self {
        self.rtm_table = table;
        self
    }

    /// Set the protocol.
    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.rtm_protocol = protocol;
        self
    }

    /// Set the route type.
    pub fn with_type(mut self, rtype: u8) -> Self {
        self.rtm_type = rtype;
        self
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

/// Route attributes (RTA_*) used by the agent.
pub mod rta {
    pub const DST: u16 = 1;
    pub const OIF: u16 = 4;
    pub const TABLE: u16 = 15;
    pub const ENCAP_TYPE: u16 = 21;
    pub const ENCAP: u16 = 22;
}

/// Routing table IDs (RT_TABLE_*).
pub mod rt_table {
    pub const UNSPEC: u8 = 0;
    pub const MAIN: u8 = 254;
}

/// RTPROT_BOOT: route installed during boot / by administrative action.
const RTPROT_BOOT: u8 = 3;
/// RTN_UNICAST.
const RTN_UNICAST: u8 = 1;

/// Write the destination attribute for either address family.
fn append_dst(builder: &mut MessageBuilder, addr: IpAddr) {
    match addr {
        IpAddr::V4(v4) => builder.append_attr(rta::DST, &v4.octets()),
        IpAddr::V6(v6) => builder.append_attr(rta::DST, &v6.octets()),
    }
}

/// Write the table, either in the fixed header (<= 255) or as RTA_TABLE.
fn rtmsg_table(table: u32) -> u8 {
    if table > 255 {
        rt_table::UNSPEC
    } else {
        table as u8
    }
}

fn append_table(builder: &mut MessageBuilder, table: u32) {
    if table > 255 {
        builder.append_attr_u32(rta::TABLE, table);
    }
}

/// Build an End.DT46 local-SID route: decapsulate packets addressed to
/// `sid` on the given device and look the inner packet up in `vrf_table`.
pub(crate) fn build_end_dt46(sid: Ipv6Addr, oif: u32, vrf_table: u32) -> MessageBuilder {
    let mut builder = MessageBuilder::new(
        NlMsgType::RTM_NEWROUTE,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
    );

    let rtmsg = RtMsg::new()
        .with_family(AF_INET6)
        .with_dst_len(128)
        .with_table(rt_table::MAIN)
        .with_protocol(RTPROT_BOOT)
        .with_type(RTN_UNICAST);
    builder.append_bytes(rtmsg.as_bytes());

    builder.append_attr(rta::DST, &sid.octets());
    builder.append_attr_u32(rta::OIF, oif);

    builder.append_attr_u16(rta::ENCAP_TYPE, lwtunnel_encap::SEG6_LOCAL);
    let nest = builder.nest_start(rta::ENCAP);
    builder.append_attr_u32(seg6_local::ACTION, seg6_local_action::END_DT46);
    builder.append_attr_u32(seg6_local::VRFTABLE, vrf_table);
    builder.nest_end(nest);

    builder
}

/// Build the deletion of a local-SID route. The kernel keys SRv6-local
/// routes by destination, so destination + device is a sufficient match.
pub(crate) fn build_del_seg6_local(sid: Ipv6Addr, oif: u32) -> MessageBuilder {
    let mut builder = MessageBuilder::new(NlMsgType::RTM_DELROUTE, NLM_F_REQUEST | NLM_F_ACK);

    let rtmsg = RtMsg::new()
        .with_family(AF_INET6)
        .with_dst_len(128)
        .with_table(rt_table::MAIN);
    builder.append_bytes(rtmsg.as_bytes());

    builder.append_attr(rta::DST, &sid.octets());
    builder.append_attr_u32(rta::OIF, oif);

    builder
}

/// Build an H.Encaps route: packets matching `dst` in `table` are
/// encapsulated in an outer IPv6 header carrying `segments` and emitted
/// through `oif`.
pub(crate) fn build_seg6_encap(
    dst: &Prefix,
    table: u32,
    oif: u32,
    segments: &[Ipv6Addr],
) -> MessageBuilder {
    let mut builder = MessageBuilder::new(
        NlMsgType::RTM_NEWROUTE,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
    );

    let family = if dst.addr().is_ipv4() { AF_INET } else { AF_INET6 };
    let rtmsg = RtMsg::new()
        .with_family(family)
        .with_dst_len(dst.len())
        .with_table(rtmsg_table(table))
        .with_protocol(RTPROT_BOOT)
        .with_type(RTN_UNICAST);
    builder.append_bytes(rtmsg.as_bytes());

    if dst.len() > 0 {
        append_dst(&mut builder, dst.addr());
    }
    builder.append_attr_u32(rta::OIF, oif);
    append_table(&mut builder, table);

    builder.append_attr_u16(rta::ENCAP_TYPE, lwtunnel_encap::SEG6);
    let nest = builder.nest_start(rta::ENCAP);
    // SEG6_IPTUNNEL_SRH payload: mode word followed by the SRH.
    let mut srh_data = Vec::new();
    srh_data.extend_from_slice(&seg6_mode::ENCAP.to_ne_bytes());
    srh_data.extend_from_slice(&seg6::build_srh(segments));
    builder.append_attr(seg6_iptunnel::SRH, &srh_data);
    builder.nest_end(nest);

    builder
}

/// Build the deletion of a route in a specific table.
pub(crate) fn build_del_table_route(dst: &Prefix, table: u32, oif: u32) -> MessageBuilder {
    let mut builder = MessageBuilder::new(NlMsgType::RTM_DELROUTE, NLM_F_REQUEST | NLM_F_ACK);

    let family = if dst.addr().is_ipv4() { AF_INET } else { AF_INET6 };
    let rtmsg = RtMsg::new()
        .with_family(family)
        .with_dst_len(dst.len())
        .with_table(rtmsg_table(table));
    builder.append_bytes(rtmsg.as_bytes());

    if dst.len() > 0 {
        append_dst(&mut builder, dst.addr());
    }
    builder.append_attr_u32(rta::OIF, oif);
    append_table(&mut builder, table);

    builder
}

impl Connection {
    /// Install (or replace) an End.DT46 decapsulation route.
    pub async fn replace_end_dt46(&self, sid: Ipv6Addr, oif: u32, vrf_table: u32) -> Result<()> {
        self.send_ack(build_end_dt46(sid, oif, vrf_table)).await
    }

    /// Remove a local-SID route.
    pub async fn del_seg6_local(&self, sid: Ipv6Addr, oif: u32) -> Result<()> {
        self.send_ack(build_del_seg6_local(sid, oif)).await
    }

    /// Install (or replace) an H.Encaps route in a VRF table.
    pub async fn replace_seg6_encap(
        &self,
        dst: &Prefix,
        table: u32,
        oif: u32,
        segments: &[Ipv6Addr],
    ) -> Result<()> {
        self.send_ack(build_seg6_encap(dst, table, oif, segments))
            .await
    }

    /// Remove a route from a VRF table.
    pub async fn del_table_route(&self, dst: &Prefix, table: u32, oif: u32) -> Result<()> {
        self.send_ack(build_del_table_route(dst, table, oif)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{get, AttrIter};
    use crate::netlink::message::{NlMsgHdr, NLMSG_HDRLEN};
    use crate::netlink::seg6::Ipv6SrHdr;

    fn attrs_of(msg: &[u8]) -> Vec<(u16, Vec<u8>)> {
        AttrIter::new(&msg[NLMSG_HDRLEN + RtMsg::SIZE..])
            .map(|(t, p)| (t, p.to_vec()))
            .collect()
    }

    fn find<'a>(attrs: &'a [(u16, Vec<u8>)], kind: u16) -> &'a [u8] {
        &attrs
            .iter()
            .find(|(t, _)| *t == kind)
            .unwrap_or_else(|| panic!("attribute {} missing", kind))
            .1
    }

    #[test]
    fn end_dt46_message_shape() {
        let sid: Ipv6Addr = "fc00::1:1".parse().unwrap();
        let msg = build_end_dt46(sid, 7, 100).finish();

        let hdr = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(hdr.nlmsg_type, NlMsgType::RTM_NEWROUTE);
        assert_eq!(
            hdr.nlmsg_flags,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE
        );

        let rtm = &msg[NLMSG_HDRLEN..NLMSG_HDRLEN + RtMsg::SIZE];
        assert_eq!(rtm[0], AF_INET6);
        assert_eq!(rtm[1], 128); // dst_len

        let attrs = attrs_of(&msg);
        assert_eq!(find(&attrs, rta::DST), &sid.octets());
        assert_eq!(get::u32_ne(find(&attrs, rta::OIF)).unwrap(), 7);
        assert_eq!(
            get::u16_ne(find(&attrs, rta::ENCAP_TYPE)).unwrap(),
            lwtunnel_encap::SEG6_LOCAL
        );

        let encap: Vec<_> = AttrIter::new(find(&attrs, rta::ENCAP))
            .map(|(t, p)| (t, p.to_vec()))
            .collect();
        assert_eq!(
            get::u32_ne(find(&encap, seg6_local::ACTION)).unwrap(),
            seg6_local_action::END_DT46
        );
        assert_eq!(get::u32_ne(find(&encap, seg6_local::VRFTABLE)).unwrap(), 100);
    }

    #[test]
    fn seg6_encap_v4_prefix() {
        let dst: Prefix = "192.168.2.0/24".parse().unwrap();
        let seg: Ipv6Addr = "fc00:0:3::".parse().unwrap();
        let msg = build_seg6_encap(&dst, 100, 3, &[seg]).finish();

        let rtm = &msg[NLMSG_HDRLEN..NLMSG_HDRLEN + RtMsg::SIZE];
        assert_eq!(rtm[0], AF_INET);
        assert_eq!(rtm[1], 24);
        assert_eq!(rtm[4], 100); // table fits the header field

        let attrs = attrs_of(&msg);
        assert_eq!(find(&attrs, rta::DST), &[192, 168, 2, 0]);
        assert_eq!(get::u32_ne(find(&attrs, rta::OIF)).unwrap(), 3);
        assert_eq!(
            get::u16_ne(find(&attrs, rta::ENCAP_TYPE)).unwrap(),
            lwtunnel_encap::SEG6
        );

        let encap: Vec<_> = AttrIter::new(find(&attrs, rta::ENCAP))
            .map(|(t, p)| (t, p.to_vec()))
            .collect();
        let srh = find(&encap, seg6_iptunnel::SRH);
        // mode word + SRH header + one segment
        assert_eq!(srh.len(), 4 + Ipv6SrHdr::SIZE + 16);
        assert_eq!(&srh[..4], &seg6_mode::ENCAP.to_ne_bytes());
        assert_eq!(&srh[4 + Ipv6SrHdr::SIZE..], &seg.octets());
    }

    #[test]
    fn large_table_goes_to_attribute() {
        let dst: Prefix = "10.0.0.0/8".parse().unwrap();
        let msg = build_seg6_encap(&dst, 4000, 3, &["fc00::1".parse().unwrap()]).finish();

        let rtm = &msg[NLMSG_HDRLEN..NLMSG_HDRLEN + RtMsg::SIZE];
        assert_eq!(rtm[4], rt_table::UNSPEC);

        let attrs = attrs_of(&msg);
        assert_eq!(get::u32_ne(find(&attrs, rta::TABLE)).unwrap(), 4000);
    }

    #[test]
    fn delete_omits_encap() {
        let sid: Ipv6Addr = "fc00::1:1".parse().unwrap();
        let msg = build_del_seg6_local(sid, 7).finish();

        let hdr = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(hdr.nlmsg_type, NlMsgType::RTM_DELROUTE);

        let attrs = attrs_of(&msg);
        assert!(attrs.iter().all(|(t, _)| *t != rta::ENCAP));
        assert_eq!(find(&attrs, rta::DST), &sid.octets());
    }

    #[test]
    fn table_route_delete_matches_table() {
        let dst: Prefix = "192.168.2.5/32".parse().unwrap();
        let msg = build_del_table_route(&dst, 100, 3).finish();

        let rtm = &msg[NLMSG_HDRLEN..NLMSG_HDRLEN + RtMsg::SIZE];
        assert_eq!(rtm[1], 32);
        assert_eq!(rtm[4], 100);

        let attrs = attrs_of(&msg);
        assert_eq!(find(&attrs, rta::DST), &[192, 168, 2, 5]);
    }
}
