//! Link lookup.
//!
//! The agent never creates devices; it only resolves the tenant host
//! device, the tenant VRF device (for its routing-table id), and the
//! egress loopback. Resolution goes through a full RTM_GETLINK dump so
//! lookups see exactly what rtnetlink reports rather than a sysfs
//! snapshot.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::{get, AttrIter};
use super::builder::MessageBuilder;
use super::connection::{dump_payload, Connection};
use super::error::Result;
use super::message::{NlMsgType, NLM_F_DUMP, NLM_F_REQUEST};

/// Interface info message (struct ifinfomsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IfInfoMsg {
    /// Address family (AF_UNSPEC for dumps).
    pub ifi_family: u8,
    /// Padding.
    pub ifi_pad: u8,
    /// Device type (ARPHRD_*).
    pub ifi_type: u16,
    /// Interface index.
    pub ifi_index: i32,
    /// Device flags (IFF_*).
    pub ifi_flags: u32,
    /// Flag change mask.
    pub ifi_change: u32,
}

impl IfInfoMsg {
    /// Size of this structure.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| super::error::Error::Truncated {
                expected: Self::SIZE,
                actual: data.len(),
            })
    }
}

/// Link attributes (IFLA_*) used by the agent.
mod ifla {
    pub const IFNAME: u16 = 3;
    pub const LINKINFO: u16 = 18;
}

/// Nested IFLA_INFO_* attributes.
mod ifla_info {
    pub const KIND: u16 = 1;
    pub const DATA: u16 = 2;
}

/// Nested IFLA_VRF_* attributes.
mod ifla_vrf {
    pub const TABLE: u16 = 1;
}

/// IFF_UP flag.
pub const IFF_UP: u32 = 0x1;

/// A network device as reported by RTM_GETLINK, reduced to what the
/// agent needs: identity, state, and VRF binding.
#[derive(Debug, Clone, Default)]
pub struct LinkMessage {
    /// Fixed-size header.
    pub header: IfInfoMsg,
    /// Interface name (IFLA_IFNAME).
    pub name: Option<String>,
    /// Link type kind from IFLA_LINKINFO (e.g. "vrf", "veth").
    pub kind: Option<String>,
    /// Raw type-specific data from IFLA_INFO_DATA.
    info_data: Option<Vec<u8>>,
}

impl LinkMessage {
    /// Get the interface index.
    pub fn ifindex(&self) -> u32 {
        self.header.ifi_index as u32
    }

    /// Check if the interface is administratively up.
    pub fn is_up(&self) -> bool {
        self.header.ifi_flags & IFF_UP != 0
    }

    /// The routing table bound to this device, when it is a VRF.
    pub fn vrf_table(&self) -> Option<u32> {
        if self.kind.as_deref() != Some("vrf") {
            return None;
        }
        let data = self.info_data.as_deref()?;
        for (attr_type, payload) in AttrIter::new(data) {
            if attr_type == ifla_vrf::TABLE {
                return get::u32_ne(payload).ok();
            }
        }
        None
    }

    /// Parse a link message from a netlink payload (after the nlmsghdr).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = *IfInfoMsg::from_bytes(data)?;

        let mut msg = LinkMessage {
            header,
            ..Default::default()
        };

        for (attr_type, payload) in AttrIter::new(&data[IfInfoMsg::SIZE..]) {
            match attr_type {
                ifla::IFNAME => {
                    msg.name = get::string(payload).ok().map(|s| s.to_string());
                }
                ifla::LINKINFO => {
                    for (info_type, info_payload) in AttrIter::new(payload) {
                        match info_type {
                            ifla_info::KIND => {
                                msg.kind =
                                    get::string(info_payload).ok().map(|s| s.to_string());
                            }
                            ifla_info::DATA => {
                                msg.info_data = Some(info_payload.to_vec());
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(msg)
    }
}

impl Connection {
    /// Dump all network interfaces.
    pub async fn links(&self) -> Result<Vec<LinkMessage>> {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP);
        builder.append_bytes(IfInfoMsg::default().as_bytes());

        let responses = self.send_dump(builder).await?;

        let mut links = Vec::with_capacity(responses.len());
        for response in responses {
            if let Some(payload) = dump_payload(&response) {
                if let Ok(link) = LinkMessage::parse(payload) {
                    links.push(link);
                }
            }
        }

        Ok(links)
    }

    /// Look up an interface by name. Returns `None` when absent.
    pub async fn link_by_name(&self, name: &str) -> Result<Option<LinkMessage>> {
        let links = self.links().await?;
        Ok(links.into_iter().find(|l| l.name.as_deref() == Some(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::NlAttr;

    fn push_attr(buf: &mut Vec<u8>, attr_type: u16, payload: &[u8]) {
        buf.extend_from_slice(NlAttr::new(attr_type, payload.len()).as_bytes());
        buf.extend_from_slice(payload);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    fn vrf_link_payload(name: &str, ifindex: i32, table: u32) -> Vec<u8> {
        let header = IfInfoMsg {
            ifi_index: ifindex,
            ifi_flags: IFF_UP,
            ..Default::default()
        };

        let mut buf = header.as_bytes().to_vec();

        let mut name_z = name.as_bytes().to_vec();
        name_z.push(0);
        push_attr(&mut buf, ifla::IFNAME, &name_z);

        let mut info_data = Vec::new();
        push_attr(&mut info_data, ifla_vrf::TABLE, &table.to_ne_bytes());

        let mut linkinfo = Vec::new();
        push_attr(&mut linkinfo, ifla_info::KIND, b"vrf\0");
        push_attr(&mut linkinfo, ifla_info::DATA, &info_data);

        push_attr(&mut buf, ifla::LINKINFO, &linkinfo);
        buf
    }

    #[test]
    fn parse_vrf_link() {
        let payload = vrf_link_payload("G000000001001V", 9, 100);
        let link = LinkMessage::parse(&payload).unwrap();

        assert_eq!(link.name.as_deref(), Some("G000000001001V"));
        assert_eq!(link.ifindex(), 9);
        assert!(link.is_up());
        assert_eq!(link.kind.as_deref(), Some("vrf"));
        assert_eq!(link.vrf_table(), Some(100));
    }

    #[test]
    fn non_vrf_link_has_no_table() {
        let header = IfInfoMsg {
            ifi_index: 2,
            ..Default::default()
        };
        let mut buf = header.as_bytes().to_vec();
        push_attr(&mut buf, ifla::IFNAME, b"eth0\0");

        let link = LinkMessage::parse(&buf).unwrap();
        assert_eq!(link.name.as_deref(), Some("eth0"));
        assert_eq!(link.kind, None);
        assert_eq!(link.vrf_table(), None);
        assert!(!link.is_up());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        assert!(LinkMessage::parse(&[0u8; 4]).is_err());
    }
}
