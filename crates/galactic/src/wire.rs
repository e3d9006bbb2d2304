//! Wire schemas.
//!
//! Two surfaces share one encoding stack:
//!
//! - the broker envelope, a protobuf message whose field tags are a
//!   compatibility contract with the remote control plane (`Register` = 1,
//!   `Deregister` = 2, `Route` = 3 in the envelope oneof);
//! - the local RPC frames on the Unix socket, length-prefixed protobuf
//!   request/reply messages.
//!
//! Messages are hand-derived with prost so the crate carries no build-time
//! codegen.

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a local RPC frame. Anything larger is malformed.
pub const MAX_FRAME_LEN: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Broker envelope
// ---------------------------------------------------------------------------

/// Announces a local network reachable through an SRv6 endpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Register {
    #[prost(string, tag = "1")]
    pub network: String,
    #[prost(string, tag = "2")]
    pub srv6_endpoint: String,
}

/// Withdraws a previously announced network.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Deregister {
    #[prost(string, tag = "1")]
    pub network: String,
    #[prost(string, tag = "2")]
    pub srv6_endpoint: String,
}

/// A cross-host route computed by the remote control plane.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Route {
    #[prost(string, tag = "1")]
    pub network: String,
    #[prost(string, tag = "2")]
    pub srv6_endpoint: String,
    #[prost(string, repeated, tag = "3")]
    pub srv6_segments: Vec<String>,
    #[prost(enumeration = "RouteStatus", tag = "4")]
    pub status: i32,
}

/// Route message status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum RouteStatus {
    Add = 0,
    Delete = 1,
}

/// Discriminated union carried on both broker topics. Only `Route` is
/// ever received; only `Register` and `Deregister` are ever sent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(oneof = "envelope::Kind", tags = "1, 2, 3")]
    pub kind: Option<envelope::Kind>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Register(super::Register),
        #[prost(message, tag = "2")]
        Deregister(super::Deregister),
        #[prost(message, tag = "3")]
        Route(super::Route),
    }
}

/// Encode a `Register` envelope for the send topic.
pub fn register_envelope(network: &str, srv6_endpoint: &str) -> Vec<u8> {
    Envelope {
        kind: Some(envelope::Kind::Register(Register {
            network: network.to_string(),
            srv6_endpoint: srv6_endpoint.to_string(),
        })),
    }
    .encode_to_vec()
}

/// Encode a `Deregister` envelope for the send topic.
pub fn deregister_envelope(network: &str, srv6_endpoint: &str) -> Vec<u8> {
    Envelope {
        kind: Some(envelope::Kind::Deregister(Deregister {
            network: network.to_string(),
            srv6_endpoint: srv6_endpoint.to_string(),
        })),
    }
    .encode_to_vec()
}

// ---------------------------------------------------------------------------
// Local RPC
// ---------------------------------------------------------------------------

/// A (vpc, attachment, networks) tuple as sent by the local control plane.
/// Identifiers are in their base-62 textual form.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Attachment {
    #[prost(string, tag = "1")]
    pub vpc: String,
    #[prost(string, tag = "2")]
    pub vpcattachment: String,
    #[prost(string, repeated, tag = "3")]
    pub networks: Vec<String>,
}

/// Local request: one of the two methods.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocalRequest {
    #[prost(oneof = "local_request::Call", tags = "1, 2")]
    pub call: Option<local_request::Call>,
}

pub mod local_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Call {
        #[prost(message, tag = "1")]
        Register(super::Attachment),
        #[prost(message, tag = "2")]
        Deregister(super::Attachment),
    }
}

/// Local reply. `error` carries the diagnostic when not confirmed.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocalReply {
    #[prost(bool, tag = "1")]
    pub confirmed: bool,
    #[prost(string, tag = "2")]
    pub error: String,
}

/// Write one length-prefixed message frame.
pub async fn write_frame<W, M>(writer: &mut W, msg: &M) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    let body = msg.encode_to_vec();
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Read one length-prefixed frame. Returns `None` on a cleanly closed
/// stream; oversized frames are an error.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-encode a length-delimited protobuf string field, the way the
    /// collaborator's publish harness builds envelopes byte by byte.
    fn pb_string(field: u32, value: &str) -> Vec<u8> {
        let mut out = vec![(field << 3 | 2) as u8, value.len() as u8];
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn pb_varint(field: u32, value: u8) -> Vec<u8> {
        vec![(field << 3) as u8, value]
    }

    #[test]
    fn route_envelope_matches_manual_encoding() {
        let mut route = Vec::new();
        route.extend(pb_string(1, "192.168.2.0/24"));
        route.extend(pb_string(2, "fc00::1:1"));
        route.extend(pb_string(3, "fc00:0:3::"));
        route.extend(pb_varint(4, 1)); // DELETE

        let mut expected = vec![(3 << 3 | 2) as u8, route.len() as u8];
        expected.extend(route);

        let envelope = Envelope {
            kind: Some(envelope::Kind::Route(Route {
                network: "192.168.2.0/24".into(),
                srv6_endpoint: "fc00::1:1".into(),
                srv6_segments: vec!["fc00:0:3::".into()],
                status: RouteStatus::Delete as i32,
            })),
        };

        assert_eq!(envelope.encode_to_vec(), expected);
    }

    #[test]
    fn add_status_is_omitted_as_default() {
        let envelope = Envelope {
            kind: Some(envelope::Kind::Route(Route {
                network: "10.0.0.0/8".into(),
                srv6_endpoint: "fc00::1:1".into(),
                srv6_segments: vec![],
                status: RouteStatus::Add as i32,
            })),
        };
        let bytes = envelope.encode_to_vec();

        // Field 4 must not appear for the zero-valued ADD status.
        let decoded = Envelope::decode(bytes.as_slice()).unwrap();
        match decoded.kind.unwrap() {
            envelope::Kind::Route(r) => {
                assert_eq!(r.status, RouteStatus::Add as i32);
                assert!(!bytes.contains(&((4 << 3) as u8)));
            }
            _ => panic!("expected route"),
        }
    }

    #[test]
    fn register_envelope_roundtrip() {
        let bytes = register_envelope("10.1.1.0/24", "fc00::1:1");
        let decoded = Envelope::decode(bytes.as_slice()).unwrap();
        match decoded.kind.unwrap() {
            envelope::Kind::Register(r) => {
                assert_eq!(r.network, "10.1.1.0/24");
                assert_eq!(r.srv6_endpoint, "fc00::1:1");
            }
            _ => panic!("expected register"),
        }
        // Oneof tag 1.
        assert_eq!(bytes[0], (1 << 3 | 2) as u8);
    }

    #[test]
    fn deregister_envelope_uses_tag_two() {
        let bytes = deregister_envelope("10.1.1.0/24", "fc00::1:1");
        assert_eq!(bytes[0], (2 << 3 | 2) as u8);
    }

    #[test]
    fn truncated_envelope_fails_decode() {
        let mut bytes = register_envelope("10.1.1.0/24", "fc00::1:1");
        bytes.truncate(bytes.len() - 3);
        assert!(Envelope::decode(bytes.as_slice()).is_err());
    }

    #[test]
    fn route_status_try_from() {
        assert_eq!(RouteStatus::try_from(0).unwrap(), RouteStatus::Add);
        assert_eq!(RouteStatus::try_from(1).unwrap(), RouteStatus::Delete);
        assert!(RouteStatus::try_from(7).is_err());
    }

    #[tokio::test]
    async fn frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(256);

        let request = LocalRequest {
            call: Some(local_request::Call::Register(Attachment {
                vpc: "1".into(),
                vpcattachment: "1".into(),
                networks: vec!["10.1.1.0/24".into()],
            })),
        };

        write_frame(&mut a, &request).await.unwrap();
        drop(a);

        let frame = read_frame(&mut b).await.unwrap().unwrap();
        let decoded = LocalRequest::decode(frame.as_slice()).unwrap();
        assert_eq!(decoded, request);

        // Stream closed: next read reports a clean end.
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &len).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
