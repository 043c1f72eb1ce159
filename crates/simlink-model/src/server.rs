//! Runtime executing [`ControllerAction`]s over a router endpoint.

use std::time::Duration;

use simlink_core::{ClientIdentity, Environment, RouterEndpoint, TransportError};

use crate::{
    controller::{ControllerAction, ModelController},
    model::SimulationModel,
};

/// Why the serve loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// A terminate notice arrived
    Terminated,
    /// The endpoint was closed
    Closed,
}

enum Event {
    Frame(ClientIdentity, bytes::Bytes),
    Elapsed,
    Closed,
}

/// Answer requests until a terminate notice arrives or the endpoint closes.
pub async fn serve<M, E>(
    router: &mut RouterEndpoint,
    controller: &mut ModelController<M>,
    env: &E,
) -> Shutdown
where
    M: SimulationModel,
    E: Environment,
{
    tracing::info!("{} listening on {}", controller.instance_id(), router.local_addr());
    let mut pacing: Option<(E::Instant, Duration)> = None;

    loop {
        let remaining = pacing.map(|(since, length)| length.saturating_sub(env.now() - since));
        let event = tokio::select! {
            () = wait(env, remaining), if remaining.is_some() => Event::Elapsed,
            inbound = router.recv() => match inbound {
                Ok(inbound) => Event::Frame(inbound.client, inbound.frame),
                Err(TransportError::Closed) => Event::Closed,
                Err(e) => {
                    tracing::error!("Receive failed: {}", e);
                    continue;
                },
            },
        };

        let (client, mut actions) = match event {
            Event::Frame(client, frame) => (Some(client), controller.handle_frame(&frame)),
            Event::Elapsed => {
                pacing = None;
                (None, controller.handle_elapsed())
            },
            Event::Closed => {
                tracing::info!("Router closed");
                return Shutdown::Closed;
            },
        };

        while !actions.is_empty() {
            let mut follow_up = Vec::new();
            for action in actions {
                match action {
                    ControllerAction::Reply(envelope) => {
                        let Some(client) = client else { continue };
                        if let Err(e) = router.reply(client, &envelope).await {
                            tracing::warn!(%client, "Reply not delivered: {}", e);
                        }
                    },
                    ControllerAction::Schedule(delay) if delay.is_zero() => {
                        follow_up.extend(controller.handle_elapsed());
                    },
                    ControllerAction::Schedule(delay) => pacing = Some((env.now(), delay)),
                    ControllerAction::Log { level, message } => level.emit(&message),
                    ControllerAction::Exit => return Shutdown::Terminated,
                }
            }
            actions = follow_up;
        }
    }
}

async fn wait<E: Environment>(env: &E, remaining: Option<Duration>) {
    if let Some(remaining) = remaining {
        env.sleep(remaining).await;
    }
}
