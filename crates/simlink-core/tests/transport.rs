//! Router / request endpoint tests over loopback TCP.

use std::net::SocketAddr;

use simlink_core::{RequestEndpoint, RouterEndpoint, TransportError, send_one_way};
use simlink_proto::{
    AckNak, Envelope, Identifier, Message, MessageBody, Route, TerminateFederate,
};

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn envelope(sender: &str, receiver: &str, message_id: u64, body: MessageBody) -> Envelope {
    Message::new(
        Route {
            run_id: Identifier::from("run"),
            sender_id: Identifier::from(sender),
            receiver_id: Identifier::from(receiver),
            message_id,
        },
        body,
    )
    .unwrap()
    .to_envelope()
    .unwrap()
}

#[tokio::test]
async fn replies_route_to_requesting_client() {
    let mut router = RouterEndpoint::bind(loopback()).await.unwrap();
    let addr = router.local_addr();

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let inbound = router.recv().await.unwrap();
            let request = Message::decode(&inbound.frame, &Identifier::from("FS")).unwrap();
            let answer = envelope(
                "FS",
                &request.route().sender_id.to_string(),
                100 + request.message_id(),
                MessageBody::AckNak(AckNak::ok(request.message_id())),
            );
            router.reply(inbound.client, &answer).await.unwrap();
        }
        router
    });

    let mut a = RequestEndpoint::connect(addr).await.unwrap();
    let mut b = RequestEndpoint::connect(addr).await.unwrap();

    let reply_a = a.request(&envelope("A", "FS", 1, MessageBody::Heartbeat)).await.unwrap();
    let reply_b = b.request(&envelope("B", "FS", 2, MessageBody::Heartbeat)).await.unwrap();

    let reply_a = Message::decode(&reply_a, &Identifier::from("A")).unwrap();
    let reply_b = Message::decode(&reply_b, &Identifier::from("B")).unwrap();
    assert_eq!(reply_a.reply_to(), Some(1));
    assert_eq!(reply_b.reply_to(), Some(2));

    server.await.unwrap();
}

#[tokio::test]
async fn one_way_send_arrives() {
    let mut router = RouterEndpoint::bind(loopback()).await.unwrap();
    let terminate = envelope(
        "FS",
        "MM1.0",
        9,
        MessageBody::TerminateFederate(TerminateFederate { instance_id: "MM1.0".to_string() }),
    );

    send_one_way(router.local_addr(), &terminate).await.unwrap();

    let inbound = router.recv().await.unwrap();
    assert_eq!(Envelope::decode(&inbound.frame).unwrap(), terminate);
}

#[tokio::test]
async fn closed_router_stops_receiving() {
    let mut router = RouterEndpoint::bind(loopback()).await.unwrap();
    router.close();

    assert!(matches!(router.recv().await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn connect_to_unbound_port_is_refused() {
    let listener = std::net::TcpListener::bind(loopback()).unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = RequestEndpoint::connect(addr).await;

    let error = result.err().expect("connect must fail");
    assert!(error.is_connection_refused(), "{error}");
}

#[tokio::test]
async fn peer_hangup_before_reply() {
    let mut router = RouterEndpoint::bind(loopback()).await.unwrap();
    let addr = router.local_addr();

    let server = tokio::spawn(async move {
        let _ = router.recv().await;
        router.close();
        drop(router);
    });

    let mut client = RequestEndpoint::connect(addr).await.unwrap();
    let result = client.request(&envelope("FM", "FS", 1, MessageBody::RequestStatus)).await;
    server.await.unwrap();

    assert!(matches!(result, Err(TransportError::PeerClosed | TransportError::Io(_))));
}
