//! Receive loop binding a [`Starter`] to a router endpoint.

use simlink_core::{Environment, RouterEndpoint, TransportError};

use crate::starter::Starter;

/// Answer requests until the endpoint is closed.
///
/// Transport failures on one request are logged and the loop continues.
pub async fn serve<E: Environment>(router: &mut RouterEndpoint, starter: &mut Starter<E>) {
    tracing::info!("Starter listening on {}", router.local_addr());

    loop {
        let inbound = match router.recv().await {
            Ok(inbound) => inbound,
            Err(TransportError::Closed) => {
                tracing::info!("Router closed, stopping receive loop");
                return;
            },
            Err(e) => {
                tracing::error!("Receive failed: {}", e);
                continue;
            },
        };

        let Some(reply) = starter.dispatch(&inbound.frame).await else {
            continue;
        };
        if let Err(e) = router.reply(inbound.client, &reply).await {
            tracing::warn!(client = %inbound.client, "Reply not delivered: {}", e);
        }
    }
}
