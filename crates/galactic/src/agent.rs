//! Agent wiring and lifecycle.
//!
//! Composes the codec, kernel programmer, local service and remote
//! client, and runs the two long-lived tasks under one shutdown signal.

use std::net::Ipv6Addr;
use std::sync::Arc;

use prost::Message;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::addr::{self, Prefix};
use crate::codec;
use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::local::{AttachmentHandler, LocalService};
use crate::remote::{MessageHandler, RemoteClient, RemoteSender};
use crate::srv6::Srv6Programmer;
use crate::wire::{self, envelope::Kind, Envelope, RouteStatus};

/// Local-service handler: encode the endpoint, program ingress, announce
/// each network on the bus.
pub struct AgentHandler {
    base: Prefix,
    programmer: Arc<Srv6Programmer>,
    sender: RemoteSender,
}

impl AgentHandler {
    fn endpoint(&self, vpc: &str, attachment: &str) -> Result<Ipv6Addr> {
        let vpc_hex = codec::base62_to_hex(vpc, codec::VPC_HEX_WIDTH)?;
        let attach_hex = codec::base62_to_hex(attachment, codec::ATTACHMENT_HEX_WIDTH)?;
        Ok(codec::encode_endpoint(&self.base, &vpc_hex, &attach_hex)?)
    }
}

impl AttachmentHandler for AgentHandler {
    async fn register(&self, vpc: &str, attachment: &str, networks: &[String]) -> Result<()> {
        let endpoint = self.endpoint(vpc, attachment)?;
        self.programmer.ingress_add(endpoint).await?;

        let endpoint_text = endpoint.to_string();
        for network in networks {
            info!(network = %network, endpoint = %endpoint_text, "register");
            self.sender
                .send(wire::register_envelope(network, &endpoint_text))
                .await;
        }
        Ok(())
    }

    async fn deregister(&self, vpc: &str, attachment: &str, networks: &[String]) -> Result<()> {
        let endpoint = self.endpoint(vpc, attachment)?;
        self.programmer.ingress_delete(endpoint).await?;

        let endpoint_text = endpoint.to_string();
        for network in networks {
            info!(network = %network, endpoint = %endpoint_text, "deregister");
            self.sender
                .send(wire::deregister_envelope(network, &endpoint_text))
                .await;
        }
        Ok(())
    }
}

/// Remote-receive handler: decode the envelope, apply `Route` messages
/// to the kernel.
pub struct RouteDispatcher {
    programmer: Arc<Srv6Programmer>,
}

impl MessageHandler for RouteDispatcher {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let envelope = Envelope::decode(payload)?;

        let route = match envelope.kind {
            Some(Kind::Route(route)) => route,
            Some(_) => {
                warn!("ignoring non-route envelope on receive topic");
                return Ok(());
            }
            None => {
                return Err(AgentError::InvalidWire("empty envelope".to_string()));
            }
        };

        let status = RouteStatus::try_from(route.status)
            .map_err(|_| AgentError::InvalidWire(format!("route status {}", route.status)))?;
        info!(
            status = ?status,
            network = %route.network,
            endpoint = %route.srv6_endpoint,
            segments = ?route.srv6_segments,
            "route"
        );

        let prefix: Prefix = route.network.parse()?;
        let endpoint: Ipv6Addr = route
            .srv6_endpoint
            .parse()
            .map_err(|_| AgentError::InvalidWire(format!("endpoint '{}'", route.srv6_endpoint)))?;
        let segments = addr::parse_segments(&route.srv6_segments)?;

        match status {
            RouteStatus::Add => {
                self.programmer
                    .egress_add(&prefix, endpoint, &segments)
                    .await
            }
            RouteStatus::Delete => {
                self.programmer
                    .egress_delete(&prefix, endpoint, &segments)
                    .await
            }
        }
    }
}

/// Run the agent until the shutdown signal fires or a task fails.
///
/// A task error cancels the sibling task and is returned to the caller;
/// a clean shutdown returns `Ok(())`.
pub async fn run(config: Config, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let base = config.base_prefix()?;
    // Fail fast on an unusable base prefix before opening any sockets.
    codec::encode_endpoint(&base, "ffffffffffff", "ffff")?;

    let programmer = Arc::new(Srv6Programmer::new()?);

    let dispatcher = RouteDispatcher {
        programmer: Arc::clone(&programmer),
    };
    let (remote, sender) = RemoteClient::new(&config, dispatcher)?;

    let handler = AgentHandler {
        base,
        programmer,
        sender,
    };
    let local = LocalService::new(&config.socket_path, handler);

    let (stop_tx, stop_rx) = watch::channel(false);

    let mut local_task = tokio::spawn(local.serve(stop_rx.clone()));
    let mut remote_task = tokio::spawn(remote.run(stop_rx));

    let result = tokio::select! {
        res = &mut local_task => {
            let _ = stop_tx.send(true);
            let _ = remote_task.await;
            task_result(res)
        }
        res = &mut remote_task => {
            let _ = stop_tx.send(true);
            let _ = local_task.await;
            task_result(res)
        }
        _ = shutdown.changed() => {
            let _ = stop_tx.send(true);
            let (local_res, remote_res) = tokio::join!(local_task, remote_task);
            task_result(local_res).and(task_result(remote_res))
        }
    };

    info!("agent stopped");
    result
}

fn task_result(res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match res {
        Ok(inner) => inner,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Ok(()),
    }
}
