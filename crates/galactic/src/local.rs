//! Local service.
//!
//! Request/reply endpoint for the host-local control plane over a
//! Unix-domain stream socket. Requests are length-prefixed protobuf
//! frames (see `wire`); each carries a `Register` or `Deregister` call.
//!
//! Handlers are serialized per (vpc, attachment) so two calls for the
//! same pair never race netlink programming of the same kernel objects;
//! calls on distinct pairs proceed in parallel.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use prost::Message;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::wire::{self, local_request::Call, LocalReply, LocalRequest};

/// Handler for attachment lifecycle calls. Identifiers arrive in their
/// base-62 textual form, exactly as the local control plane sends them.
pub trait AttachmentHandler: Send + Sync + 'static {
    /// Bring an attachment up and announce its networks.
    fn register(
        &self,
        vpc: &str,
        attachment: &str,
        networks: &[String],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Tear an attachment down and withdraw its networks.
    fn deregister(
        &self,
        vpc: &str,
        attachment: &str,
        networks: &[String],
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Per-(vpc, attachment) lock registry.
#[derive(Clone, Default)]
struct PairLocks(Arc<Mutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>>);

impl PairLocks {
    async fn lock(&self, vpc: &str, attachment: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.0.lock().unwrap();
            map.entry((vpc.to_string(), attachment.to_string()))
                .or_default()
                .clone()
        };
        entry.lock_owned().await
    }
}

/// The local request/reply service.
pub struct LocalService<H> {
    socket_path: PathBuf,
    handler: Arc<H>,
    locks: PairLocks,
}

impl<H: AttachmentHandler> LocalService<H> {
    /// Create a service bound to `socket_path` once served.
    pub fn new(socket_path: impl Into<PathBuf>, handler: H) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler: Arc::new(handler),
            locks: PairLocks::default(),
        }
    }

    /// Serve until the shutdown signal fires, then stop accepting and
    /// drain in-flight connections.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        // A previous run may have left its socket file behind.
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AgentError::InvalidConfig(format!(
                    "cannot unlink stale socket {}: {}",
                    self.socket_path.display(),
                    e
                )));
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            AgentError::InvalidConfig(format!(
                "cannot bind {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;
        info!(socket = %self.socket_path.display(), "local service listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let handler = Arc::clone(&self.handler);
                            let locks = self.locks.clone();
                            let shutdown = shutdown.clone();
                            connections.spawn(handle_connection(
                                stream, handler, locks, shutdown,
                            ));
                        }
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                        }
                    }
                }
            }
        }

        drop(listener);
        while connections.join_next().await.is_some() {}
        info!("local service stopped");
        Ok(())
    }
}

/// Process one connection: requests in order, one reply per request.
/// Framing or decode errors are transport-level and close the connection.
async fn handle_connection<H: AttachmentHandler>(
    mut stream: UnixStream,
    handler: Arc<H>,
    locks: PairLocks,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => return,
            frame = wire::read_frame(&mut stream) => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "local connection read failed");
                return;
            }
        };

        let request = match LocalRequest::decode(frame.as_slice()) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "undecodable local request, closing connection");
                return;
            }
        };

        let reply = dispatch(&*handler, &locks, request).await;

        if let Err(err) = wire::write_frame(&mut stream, &reply).await {
            warn!(error = %err, "local connection write failed");
            return;
        }
    }
}

async fn dispatch<H: AttachmentHandler>(
    handler: &H,
    locks: &PairLocks,
    request: LocalRequest,
) -> LocalReply {
    let (attachment, is_register) = match request.call {
        Some(Call::Register(a)) => (a, true),
        Some(Call::Deregister(a)) => (a, false),
        None => {
            return LocalReply {
                confirmed: false,
                error: "empty request".to_string(),
            };
        }
    };

    let _guard = locks.lock(&attachment.vpc, &attachment.vpcattachment).await;

    debug!(
        vpc = %attachment.vpc,
        attachment = %attachment.vpcattachment,
        register = is_register,
        "dispatching local call"
    );

    let outcome = if is_register {
        handler
            .register(
                &attachment.vpc,
                &attachment.vpcattachment,
                &attachment.networks,
            )
            .await
    } else {
        handler
            .deregister(
                &attachment.vpc,
                &attachment.vpcattachment,
                &attachment.networks,
            )
            .await
    };

    match outcome {
        Ok(()) => LocalReply {
            confirmed: true,
            error: String::new(),
        },
        Err(err) => {
            warn!(
                vpc = %attachment.vpc,
                attachment = %attachment.vpcattachment,
                error = %err,
                "local call failed"
            );
            LocalReply {
                confirmed: false,
                error: err.to_string(),
            }
        }
    }
}
