//! Full federation: manager, in-process starter, real `simlink-mm1`
//! processes.

use std::{net::SocketAddr, time::Duration};

use simlink_core::{LifecycleConfig, LifecycleState, RouterEndpoint, SystemEnv};
use simlink_manager::{
    DEFAULT_ARGS_AFTER, FederateTemplate, FederationConfig, FederationReport, random_run_id,
    run_federation,
};
use simlink_proto::{RunControl, SetParameter, SimTime, Value};
use simlink_starter::{LaunchMode, Starter, StarterConfig, serve};

const MM1: &str = env!("CARGO_BIN_EXE_simlink-mm1");

async fn run(federates: usize, statistics: &[&str]) -> FederationReport {
    let base = std::net::TcpListener::bind("0.0.0.0:0").unwrap().local_addr().unwrap().port();
    let config = StarterConfig {
        start_port: base,
        end_port: base.saturating_add(50),
        mode: LaunchMode::ModelController,
        poll_interval: Duration::from_millis(20),
        kill_grace: Duration::from_secs(2),
        startup_timeout: Duration::from_secs(10),
        ..StarterConfig::default()
    }
    .with_software("mm1", MM1);

    let mut router = RouterEndpoint::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let starter_addr = router.local_addr();
    let server = tokio::spawn(async move {
        let mut starter = Starter::new(config, SystemEnv::new());
        serve(&mut router, &mut starter).await;
    });

    let template = FederateTemplate {
        software: "mm1".to_string(),
        model_path: String::new(),
        args_after: DEFAULT_ARGS_AFTER.to_string(),
        working_directory: String::new(),
        run_control: RunControl::new(SimTime::seconds(100.0), SimTime::seconds(0.0)),
        parameters: vec![
            SetParameter::new("iat", 1.0),
            SetParameter::new("servicetime", 0.85),
            SetParameter::new("seed", Value::Int32(42)),
        ],
        statistics: statistics.iter().map(|s| (*s).to_string()).collect(),
    };
    let env = SystemEnv::new();
    let config = FederationConfig {
        starter: starter_addr,
        lifecycle: LifecycleConfig {
            run_id: random_run_id(&env),
            poll_interval: Duration::from_millis(20),
            ..LifecycleConfig::default()
        },
        federates: template.specs(federates),
    };

    let report = run_federation(config, env).await.unwrap();
    server.abort();
    report
}

#[tokio::test(flavor = "multi_thread")]
async fn mm1_federates_run_to_completion() {
    let report = run(2, &["qN.max", "served"]).await;

    assert!(report.is_success(), "{:?}", report.failures().collect::<Vec<_>>());
    for outcome in report.outcomes.values() {
        assert_eq!(outcome.state, LifecycleState::Terminated);
        assert!(matches!(outcome.statistics.get("qN.max"), Some(Value::Int32(_))));
        assert!(matches!(outcome.statistics.get("served"), Some(Value::Int64(n)) if *n > 0));
    }
    // Same seed, same model: identical results
    assert_eq!(report.outcomes[&0].statistics, report.outcomes[&1].statistics);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_statistic_ends_in_error() {
    let report = run(1, &["qN.max", "zzz"]).await;

    let outcome = &report.outcomes[&0];
    assert_eq!(outcome.state, LifecycleState::Error);
    assert!(outcome.statistics.contains_key("qN.max"));
    let error = outcome.error.as_ref().unwrap().to_string();
    assert!(error.contains("zzz"), "{error}");
    assert!(!report.is_success());
}
