use crate::error::SimError;
use crate::sim::{EventKind, PlatformSpec, SimConfig, WorkflowSpec, WorkloadSpec};

#[test]
fn parse_workload_with_optional_walltime() {
    let raw = r#"
{
    "name": "w0",
    "jobs": [
        { "id": "1", "subtime": 0, "res": 2, "runtime": 10 },
        { "id": "2", "subtime": 3.5, "res": 1, "runtime": 1, "walltime": 0.5 }
    ]
}
    "#;
    let spec: WorkloadSpec = serde_json::from_str(raw).expect("parse workload");
    assert_eq!(spec.name, "w0");
    assert_eq!(spec.jobs.len(), 2);
    assert_eq!(spec.jobs[0].walltime, None);
    assert_eq!(spec.jobs[1].walltime, Some(0.5));
}

#[test]
fn parse_workflow_defaults() {
    let raw = r#"{ "name": "f", "tasks": [ { "id": "a", "res": 1, "runtime": 2 },
                   { "id": "b", "res": 1, "runtime": 2, "after": ["a"] } ] }"#;
    let spec: WorkflowSpec = serde_json::from_str(raw).expect("parse workflow");
    assert_eq!(spec.start_time, 0.0);
    assert_eq!(spec.max_concurrent, 0);
    assert_eq!(spec.tasks[1].after, ["a"]);
}

#[test]
fn platform_machines_from_count_or_list() {
    let p: PlatformSpec = serde_json::from_str(r#"{ "nb_machines": 3 }"#).expect("parse");
    assert_eq!(p.machine_names().expect("names"), ["m0", "m1", "m2"]);

    let p: PlatformSpec = serde_json::from_str(
        r#"{ "machines": [ { "name": "a" }, { "name": "b" } ],
             "pstates": [ { "id": 0, "watts_idle": 95, "watts_busy": 190 }, { "id": 3 } ],
             "initial_pstate": 3 }"#,
    )
    .expect("parse");
    p.validate().expect("valid platform");
    assert_eq!(p.machine_names().expect("names"), ["a", "b"]);
    assert_eq!(p.pstates[1].watts_busy, 0.0);
}

#[test]
fn invalid_platforms_are_configuration_errors() {
    let empty = PlatformSpec::default();
    assert!(matches!(empty.validate(), Err(SimError::Config(_))));

    let p: PlatformSpec = serde_json::from_str(
        r#"{ "nb_machines": 2, "pstates": [ { "id": 0 } ], "initial_pstate": 1 }"#,
    )
    .expect("parse");
    assert!(p.validate().is_err());

    let p: PlatformSpec =
        serde_json::from_str(r#"{ "nb_machines": 3, "machines": [ { "name": "a" } ] }"#)
            .expect("parse");
    assert!(p.validate().is_err());
}

#[test]
fn config_defaults_and_overrides() {
    let c: SimConfig = serde_json::from_str("{}").expect("parse");
    assert_eq!(c.reply_timeout_ms, 30_000);
    assert_eq!(c.event_order.kinds(), &EventKind::ALL);
    c.validate().expect("default config is valid");

    let c: SimConfig = serde_json::from_str(
        r#"{ "allow_time_sharing": true, "limit_machines": 2, "max_simulated_time_s": 100 }"#,
    )
    .expect("parse");
    assert!(c.allow_time_sharing);
    assert_eq!(c.limit_machines, Some(2));
    assert!(c.max_simulated_time().expect("limit").is_some());

    let bad = SimConfig {
        reply_timeout_ms: 0,
        ..SimConfig::default()
    };
    assert!(bad.validate().is_err());
    let bad = SimConfig {
        max_simulated_time_s: Some(-1.0),
        ..SimConfig::default()
    };
    assert!(matches!(bad.validate(), Err(SimError::Config(_))));
}
