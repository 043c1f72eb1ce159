//! Starter tests against real child processes.
//!
//! `sleep` stands in for a federate in bare mode; model-controller readiness
//! is exercised through processes that never become ready.

use std::{
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    time::Duration,
};

use simlink_core::{RouterEndpoint, SystemEnv};
use simlink_proto::{
    Envelope, Identifier, Message, MessageBody, Route, SimulationStatus, StartFederate,
    StartStatus, StatusReply,
};
use simlink_starter::{LaunchMode, Starter, StarterConfig};

/// First port of a range the OS just handed out as free.
fn free_base() -> u16 {
    let listener = TcpListener::bind("0.0.0.0:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config(mode: LaunchMode) -> StarterConfig {
    let base = free_base();
    StarterConfig {
        start_port: base,
        end_port: base.saturating_add(50),
        mode,
        poll_interval: Duration::from_millis(20),
        kill_grace: Duration::from_millis(50),
        startup_timeout: Duration::from_millis(300),
        ..StarterConfig::default()
    }
    .with_software("sleep", "sleep")
    .with_software("true", "true")
    .with_software("ghost", "/nonexistent/simlink-ghost")
}

fn sleeper(id: &str) -> StartFederate {
    StartFederate { args_after: "30".to_string(), ..StartFederate::new(id, "sleep") }
}

fn run() -> Identifier {
    Identifier::from("run-1")
}

#[tokio::test]
async fn sequential_starts_get_distinct_ports() {
    let config = config(LaunchMode::Bare);
    let range = config.start_port..=config.end_port;
    let mut starter = Starter::new(config, SystemEnv::new());

    let a = starter.start_federate(&run(), 1, &sleeper("A.0")).await;
    let b = starter.start_federate(&run(), 2, &sleeper("B.0")).await;

    assert_eq!(a.status, StartStatus::Started, "{}", a.message);
    assert_eq!(b.status, StartStatus::Started, "{}", b.message);
    assert_eq!(a.reply_to, 1);
    assert!(a.message.is_empty());
    assert_ne!(a.model_port, b.model_port);
    assert!(range.contains(&a.model_port) && range.contains(&b.model_port));
    assert_eq!(starter.instances().await, vec!["A.0", "B.0"]);

    assert!(starter.kill_all(3).await.status);
}

#[tokio::test]
async fn exhausted_range_reports_no_free_port() {
    let held = TcpListener::bind("0.0.0.0:0").unwrap();
    let port = held.local_addr().unwrap().port();
    let config = StarterConfig { start_port: port, end_port: port, ..config(LaunchMode::Bare) };
    let mut starter = Starter::new(config, SystemEnv::new());

    let reply = starter.start_federate(&run(), 1, &sleeper("A.0")).await;

    assert_eq!(reply.status, StartStatus::Error);
    assert!(reply.message.contains("no free port"), "{}", reply.message);
    assert!(starter.instances().await.is_empty());
}

#[tokio::test]
async fn three_port_range_allocates_then_exhausts() {
    let base = free_base();
    let config = StarterConfig {
        start_port: base,
        end_port: base + 2,
        ..config(LaunchMode::Bare)
    };
    let range = config.start_port..=config.end_port;
    let mut starter = Starter::new(config, SystemEnv::new());

    let a = starter.start_federate(&run(), 1, &sleeper("A.0")).await;
    let b = starter.start_federate(&run(), 2, &sleeper("B.0")).await;

    assert_eq!(a.status, StartStatus::Started, "{}", a.message);
    assert_eq!(b.status, StartStatus::Started, "{}", b.message);
    assert_ne!(a.model_port, b.model_port);
    assert!(range.contains(&a.model_port) && range.contains(&b.model_port));
    assert!(starter.kill_all(3).await.status);

    let _held: Vec<TcpListener> =
        range.clone().map(|port| TcpListener::bind(("0.0.0.0", port)).unwrap()).collect();

    let c = starter.start_federate(&run(), 4, &sleeper("C.0")).await;

    assert_eq!(c.status, StartStatus::Error);
    assert_eq!(c.model_port, 0);
    assert_eq!(c.message, format!("no free port in range {}..={}", base, base + 2));
    assert!(starter.instances().await.is_empty());
}

#[tokio::test]
async fn kill_of_unknown_instance() {
    let mut starter = Starter::new(config(LaunchMode::Bare), SystemEnv::new());

    let reply = starter.kill_federate(4, "nobody").await;

    assert!(!reply.status);
    assert!(reply.error.contains("unknown"), "{}", reply.error);
    assert_eq!(reply.instance_id, "nobody");
    assert_eq!(reply.reply_to, 4);
}

#[tokio::test]
async fn unknown_software_is_rejected() {
    let mut starter = Starter::new(config(LaunchMode::Bare), SystemEnv::new());

    let reply = starter.start_federate(&run(), 1, &StartFederate::new("X.0", "nope")).await;

    assert_eq!(reply.status, StartStatus::Error);
    assert!(reply.message.contains("unknown software code: nope"), "{}", reply.message);
    assert!(starter.instances().await.is_empty());
}

#[tokio::test]
async fn duplicate_instance_is_rejected() {
    let mut starter = Starter::new(config(LaunchMode::Bare), SystemEnv::new());
    starter.start_federate(&run(), 1, &sleeper("A.0")).await;

    let reply = starter.start_federate(&run(), 2, &sleeper("A.0")).await;

    assert_eq!(reply.status, StartStatus::Error);
    assert!(reply.message.contains("already registered"), "{}", reply.message);
    assert!(starter.kill_federate(3, "A.0").await.status);
}

#[tokio::test]
async fn kill_deletes_requested_files() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let request = StartFederate {
        working_directory: work.display().to_string(),
        redirect_stdout: "out.txt".to_string(),
        redirect_stderr: "err.txt".to_string(),
        delete_stdout: true,
        ..sleeper("A.0")
    };
    let mut starter = Starter::new(config(LaunchMode::Bare), SystemEnv::new());

    let started = starter.start_federate(&run(), 1, &request).await;
    assert_eq!(started.status, StartStatus::Started, "{}", started.message);

    let killed = starter.kill_federate(2, "A.0").await;

    assert!(killed.status, "{}", killed.error);
    assert!(killed.error.is_empty());
    assert!(!work.join("out.txt").exists());
    assert!(work.join("err.txt").exists());
    assert!(starter.instances().await.is_empty());
}

#[tokio::test]
async fn kill_deletes_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let work: PathBuf = dir.path().join("scratch");
    let request = StartFederate {
        working_directory: work.display().to_string(),
        delete_working_directory: true,
        ..sleeper("A.0")
    };
    let mut starter = Starter::new(config(LaunchMode::Bare), SystemEnv::new());
    starter.start_federate(&run(), 1, &request).await;

    let killed = starter.kill_federate(2, "A.0").await;

    assert!(killed.status, "{}", killed.error);
    assert!(!work.exists());
}

#[tokio::test]
async fn kill_all_reclaims_everything() {
    let mut starter = Starter::new(config(LaunchMode::Bare), SystemEnv::new());
    for (n, id) in ["A.0", "B.0", "C.0"].iter().enumerate() {
        starter.start_federate(&run(), n as u64 + 1, &sleeper(id)).await;
    }

    let reply = starter.kill_all(9).await;

    assert!(reply.status, "{}", reply.error);
    assert_eq!(reply.reply_to, 9);
    assert!(starter.instances().await.is_empty());
}

#[tokio::test]
async fn silent_federate_times_out() {
    let mut starter = Starter::new(config(LaunchMode::ModelController), SystemEnv::new());

    let reply = starter.start_federate(&run(), 1, &sleeper("A.0")).await;

    assert_eq!(reply.status, StartStatus::Error);
    assert!(reply.message.contains("not ready"), "{}", reply.message);
    assert_ne!(reply.model_port, 0);
    // Registration survives so the manager's kill reclaims the process
    assert_eq!(starter.port_of("A.0").await, Some(reply.model_port));
    assert!(starter.kill_federate(2, "A.0").await.status);
}

/// Bind `port` after a delay and answer status polls with `statuses`, in
/// order, addressed back to the starter.
async fn scripted_federate(port: u16, statuses: Vec<SimulationStatus>) -> usize {
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut router = RouterEndpoint::bind(SocketAddr::from(([127, 0, 0, 1], port))).await.unwrap();

    let mut polls = 0;
    for (n, status) in statuses.into_iter().enumerate() {
        let inbound = router.recv().await.unwrap();
        let request = Message::decode(&inbound.frame, &Identifier::from("A.0")).unwrap();
        assert!(matches!(request.body(), MessageBody::RequestStatus));
        polls += 1;

        let route = Route {
            run_id: run(),
            sender_id: Identifier::from("A.0"),
            receiver_id: Identifier::from("FS"),
            message_id: 100 + n as u64,
        };
        let body = MessageBody::Status(StatusReply::new(request.message_id(), status));
        let reply = Message::new(route, body).unwrap().to_envelope().unwrap();
        router.reply(inbound.client, &reply).await.unwrap();
    }
    polls
}

#[tokio::test]
async fn readiness_polls_until_started() {
    let base = free_base();
    let config = StarterConfig {
        start_port: base,
        end_port: base,
        startup_timeout: Duration::from_secs(5),
        ..config(LaunchMode::ModelController)
    };
    let mut starter = Starter::new(config, SystemEnv::new());
    let statuses = vec![SimulationStatus::Running, SimulationStatus::Running, SimulationStatus::Started];

    let run_id = run();
    let request = sleeper("A.0");
    let (reply, polls) = tokio::join!(
        starter.start_federate(&run_id, 1, &request),
        scripted_federate(base, statuses),
    );

    assert_eq!(reply.status, StartStatus::Started, "{}", reply.message);
    assert_eq!(reply.model_port, base);
    assert_eq!(polls, 3);
    assert!(starter.kill_federate(2, "A.0").await.status);
}

#[tokio::test]
async fn readiness_error_status_fails_start() {
    let base = free_base();
    let config = StarterConfig {
        start_port: base,
        end_port: base,
        startup_timeout: Duration::from_secs(5),
        ..config(LaunchMode::ModelController)
    };
    let mut starter = Starter::new(config, SystemEnv::new());

    let run_id = run();
    let request = sleeper("A.0");
    let (reply, _) = tokio::join!(
        starter.start_federate(&run_id, 1, &request),
        scripted_federate(base, vec![SimulationStatus::Running, SimulationStatus::Error]),
    );

    assert_eq!(reply.status, StartStatus::Error);
    assert!(reply.message.contains("federate reported error"), "{}", reply.message);
    assert!(starter.kill_federate(2, "A.0").await.status);
}

#[tokio::test]
async fn early_exit_fails_start() {
    let mut starter = Starter::new(config(LaunchMode::ModelController), SystemEnv::new());

    let reply = starter.start_federate(&run(), 1, &StartFederate::new("T.0", "true")).await;

    assert_eq!(reply.status, StartStatus::Error);
    assert!(reply.message.contains("exited"), "{}", reply.message);
}

#[tokio::test]
async fn spawn_failure_counts_as_gone() {
    let mut starter = Starter::new(config(LaunchMode::ModelController), SystemEnv::new());

    let reply = starter.start_federate(&run(), 1, &StartFederate::new("G.0", "ghost")).await;
    assert_eq!(reply.status, StartStatus::Error);
    assert!(reply.message.contains("launch failure"), "{}", reply.message);

    let killed = starter.kill_federate(2, "G.0").await;
    assert!(killed.status);
}

fn frame(receiver: &str, body: MessageBody) -> Vec<u8> {
    let route = Route {
        run_id: run(),
        sender_id: Identifier::from("FM"),
        receiver_id: Identifier::from(receiver),
        message_id: 7,
    };
    Message::new(route, body).unwrap().to_envelope().unwrap().to_bytes().unwrap().to_vec()
}

#[tokio::test]
async fn heartbeat_is_acknowledged() {
    let mut starter = Starter::new(config(LaunchMode::Bare), SystemEnv::new());

    let reply = starter.dispatch(&frame("FS", MessageBody::Heartbeat)).await.unwrap();

    let reply = Message::from_envelope(&reply, &Identifier::from("FM")).unwrap();
    let MessageBody::AckNak(ack) = reply.body() else { panic!("expected ack, got {reply:?}") };
    assert!(ack.status);
    assert_eq!(ack.reply_to, 7);
}

#[tokio::test]
async fn misaddressed_request_is_nacked() {
    let mut starter = Starter::new(config(LaunchMode::Bare), SystemEnv::new());

    let reply = starter.dispatch(&frame("someone-else", MessageBody::KillAllFederates)).await;

    let reply = Message::from_envelope(&reply.unwrap(), &Identifier::from("FM")).unwrap();
    let MessageBody::AckNak(nak) = reply.body() else { panic!("expected nak, got {reply:?}") };
    assert!(!nak.status);
    insta::assert_snapshot!(nak.message, @"protocol violation: receiver id expected FS, got someone-else");
}

#[tokio::test]
async fn garbage_is_dropped() {
    let mut starter = Starter::new(config(LaunchMode::Bare), SystemEnv::new());

    assert_eq!(starter.dispatch(b"not an envelope").await, None::<Envelope>);
}
