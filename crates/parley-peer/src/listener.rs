//! Inbound listener. Accepts peer links until the overlay stops.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::handshake;
use crate::overlay::Shared;

pub(crate) struct InboundListener {
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: broadcast::Receiver<()>,
}

impl InboundListener {
    pub(crate) fn new(listener: TcpListener, shared: Arc<Shared>) -> Self {
        let shutdown = shared.shutdown.subscribe();
        Self {
            listener,
            shared,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = self.shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };
            if !self.shared.is_running() {
                break;
            }
            tracing::debug!(%remote_addr, "inbound connection");
            tokio::spawn(handshake::accept(self.shared.clone(), stream, remote_addr));
        }
        tracing::debug!("inbound listener stopped");
    }
}
