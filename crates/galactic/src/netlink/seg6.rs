//! SRv6 kernel ABI: segment routing header layout and lightweight-tunnel
//! attribute constants.

use std::net::Ipv6Addr;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Segment Routing Header (RFC 8754).
///
/// Fixed 8-byte prefix of the IPv6 routing extension header; followed in
/// memory by `first_segment + 1` segments of 16 bytes each, last segment
/// first.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Ipv6SrHdr {
    /// Next header type.
    pub nexthdr: u8,
    /// Header length in 8-byte units (not including first 8 bytes).
    pub hdrlen: u8,
    /// Routing type (4 for SRH).
    pub sr_type: u8,
    /// Number of segments remaining.
    pub segments_left: u8,
    /// Index of the first segment (last segment in memory order).
    pub first_segment: u8,
    /// Flags.
    pub flags: u8,
    /// Tag for grouping packets.
    pub tag: u16,
}

impl Ipv6SrHdr {
    /// Size of the header (not including segments).
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// SRH routing type value.
    pub const SR_TYPE: u8 = 4;

    /// Create a new SRH header for `num_segments` segments.
    pub fn new(num_segments: u8) -> Self {
        // hdrlen = (8 + 16*n - 8) / 8 = 2*n for n segments
        let hdrlen = num_segments.saturating_mul(2);
        Self {
            nexthdr: 0,
            hdrlen,
            sr_type: Self::SR_TYPE,
            segments_left: num_segments.saturating_sub(1),
            first_segment: num_segments.saturating_sub(1),
            flags: 0,
            tag: 0,
        }
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

/// Build the SRH byte image for a segment list.
///
/// Segments are stored in reverse order (last segment first in memory),
/// per the kernel's seg6 iptunnel expectations.
pub fn build_srh(segments: &[Ipv6Addr]) -> Vec<u8> {
    if segments.is_empty() {
        return Vec::new();
    }

    let hdr = Ipv6SrHdr::new(segments.len() as u8);

    let mut data = Vec::with_capacity(Ipv6SrHdr::SIZE + segments.len() * 16);
    data.extend_from_slice(hdr.as_bytes());

    for seg in segments.iter().rev() {
        data.extend_from_slice(&seg.octets());
    }

    data
}

/// Lightweight tunnel encapsulation types (LWTUNNEL_ENCAP_*).
pub mod lwtunnel_encap {
    /// SRv6 iptunnel encapsulation (H.Encaps).
    pub const SEG6: u16 = 5;
    /// SRv6 local segment processing (End.* behaviors).
    pub const SEG6_LOCAL: u16 = 7;
}

/// SRv6 encapsulation modes (SEG6_IPTUN_MODE_*).
pub mod seg6_mode {
    /// Inline mode: insert SRH into existing IPv6 packet.
    pub const INLINE: u32 = 0;
    /// Encap mode: encapsulate in new IPv6 header with SRH.
    pub const ENCAP: u32 = 1;
}

/// Seg6 iptunnel attributes (SEG6_IPTUNNEL_*).
pub mod seg6_iptunnel {
    /// Segment Routing Header (mode word + SRH).
    pub const SRH: u16 = 1;
}

/// Seg6 local action types (SEG6_LOCAL_ACTION_*).
pub mod seg6_local_action {
    /// End.DT46: decap and lookup IPv4 or IPv6 in a VRF table.
    pub const END_DT46: u32 = 16;
}

/// Seg6 local attributes (SEG6_LOCAL_*).
pub mod seg6_local {
    /// Action type.
    pub const ACTION: u16 = 1;
    /// VRF table (End.DT4/DT6/DT46 with VRF lookup).
    pub const VRFTABLE: u16 = 9;
}
