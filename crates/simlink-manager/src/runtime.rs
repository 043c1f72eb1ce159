//! Executes one lifecycle machine over real endpoints.

use std::{collections::VecDeque, net::SocketAddr};

use bytes::Bytes;
use simlink_core::{
    Environment, FederateLifecycle, FederateOutcome, LifecycleAction, Peer, RequestEndpoint,
    TransportError,
};
use simlink_proto::Envelope;

/// Request connections of one machine: one to the starter, one to the
/// federate once its port is known. Federates are reached on the starter's
/// host.
pub struct Connections {
    starter: SocketAddr,
    to_starter: Option<RequestEndpoint>,
    to_federate: Option<RequestEndpoint>,
}

impl Connections {
    /// No connection is opened until the first request.
    pub fn new(starter: SocketAddr) -> Self {
        Self { starter, to_starter: None, to_federate: None }
    }

    fn address(&self, peer: Peer) -> SocketAddr {
        match peer {
            Peer::Starter => self.starter,
            Peer::Federate { port } => SocketAddr::new(self.starter.ip(), port),
        }
    }

    /// Send a request and wait for the reply frame, connecting on first use.
    ///
    /// A failed exchange drops the connection so the next request to the
    /// same peer reconnects.
    pub async fn request(&mut self, peer: Peer, envelope: &Envelope) -> Result<Bytes, TransportError> {
        let addr = self.address(peer);
        let slot = match peer {
            Peer::Starter => &mut self.to_starter,
            Peer::Federate { .. } => &mut self.to_federate,
        };

        let mut endpoint = match slot.take() {
            Some(endpoint) if endpoint.peer_addr() == addr => endpoint,
            _ => RequestEndpoint::connect(addr).await?,
        };

        let result = endpoint.request(envelope).await;
        if result.is_ok() {
            *slot = Some(endpoint);
        }
        result
    }

    /// Shut down both connections.
    pub async fn close(self) {
        for endpoint in [self.to_starter, self.to_federate].into_iter().flatten() {
            let peer = endpoint.peer_addr();
            if let Err(e) = endpoint.close().await {
                tracing::debug!(%peer, "Close failed: {}", e);
            }
        }
    }
}

/// Drive `machine` to completion.
///
/// Requests block until the reply arrives; there is no timeout. Sleeps go
/// through `env`.
pub async fn run_lifecycle<E: Environment>(
    mut machine: FederateLifecycle,
    starter: SocketAddr,
    env: &E,
) -> FederateOutcome {
    let mut connections = Connections::new(starter);
    let mut queue: VecDeque<LifecycleAction> = machine.start().into();
    let mut finished = None;

    while let Some(action) = queue.pop_front() {
        match action {
            LifecycleAction::Request { peer, envelope } => {
                let next = match connections.request(peer, &envelope).await {
                    Ok(frame) => machine.handle_reply(&frame),
                    Err(e) => machine.handle_transport_failure(e),
                };
                queue.extend(next);
            },
            LifecycleAction::Sleep(duration) => {
                env.sleep(duration).await;
                queue.extend(machine.handle_wake());
            },
            LifecycleAction::Log { level, message } => level.emit(&message),
            LifecycleAction::Finished(outcome) => finished = Some(outcome),
        }
    }

    connections.close().await;
    finished.unwrap_or_else(|| machine.outcome())
}
