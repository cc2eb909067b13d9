use serde_json::{Value, json};
use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "rjmsim-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

fn spawn_rjmsim(args: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_rjmsim"))
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn rjmsim")
}

fn run_rjmsim(args: &[&str]) -> Output {
    spawn_rjmsim(args).wait_with_output().expect("run rjmsim")
}

fn connect(socket: &Path) -> UnixStream {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match UnixStream::connect(socket) {
            Ok(stream) => return stream,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            Err(err) => panic!("cannot connect to {}: {err}", socket.display()),
        }
    }
}

fn read_msg(stream: &mut UnixStream) -> Option<Value> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).ok()?;
    let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
    stream.read_exact(&mut payload).ok()?;
    Some(serde_json::from_slice(&payload).expect("kernel sends json"))
}

fn write_msg(stream: &mut UnixStream, msg: &Value) {
    let payload = serde_json::to_vec(msg).expect("encode");
    stream
        .write_all(&(payload.len() as u32).to_le_bytes())
        .expect("write len");
    stream.write_all(&payload).expect("write payload");
}

fn event_types(msg: &Value) -> Vec<String> {
    msg["events"]
        .as_array()
        .map(|events| {
            events
                .iter()
                .filter_map(|e| e["type"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

const WORKLOAD: &str = r#"
{
    "name": "w0",
    "jobs": [ { "id": "1", "subtime": 0, "res": 2, "runtime": 10 } ]
}
"#;

#[test]
fn missing_platform_is_a_configuration_error() {
    let dir = unique_temp_dir("cli-no-platform");
    let workload = write_file(&dir, "workload.json", WORKLOAD);
    let output = run_rjmsim(&["--workload", workload.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error reason=CONFIG_INVALID"),
        "stderr={stderr}"
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn malformed_workload_exits_before_waiting_for_a_decision_maker() {
    let dir = unique_temp_dir("cli-bad-workload");
    let workload = write_file(&dir, "workload.json", r#"{ "name": "w0", "jobs": [ { "id": 1 } ] }"#);
    let socket = dir.join("dm.sock");
    let output = run_rjmsim(&[
        "--nb-machines",
        "4",
        "--workload",
        workload.to_str().unwrap(),
        "--socket",
        socket.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error reason=CONFIG_INVALID"), "stderr={stderr}");
    assert!(!socket.exists(), "socket must not be created on bad input");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cyclic_workflow_is_rejected() {
    let dir = unique_temp_dir("cli-cycle");
    let workflow = write_file(
        &dir,
        "wf.json",
        r#"{ "name": "f", "tasks": [
            { "id": "a", "res": 1, "runtime": 1, "after": ["b"] },
            { "id": "b", "res": 1, "runtime": 1, "after": ["a"] } ] }"#,
    );
    let socket = dir.join("dm.sock");
    let arg = format!("{}:5", workflow.display());
    let output = run_rjmsim(&[
        "--nb-machines",
        "2",
        "--workflow",
        &arg,
        "--socket",
        socket.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cycle"), "stderr={stderr}");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn end_to_end_over_unix_socket() {
    let dir = unique_temp_dir("cli-uds");
    let workload = write_file(&dir, "workload.json", WORKLOAD);
    let platform = write_file(
        &dir,
        "platform.json",
        r#"{ "nb_machines": 4, "pstates": [ { "id": 0, "watts_idle": 100, "watts_busy": 200 }, { "id": 1, "watts_idle": 10, "watts_busy": 20 } ] }"#,
    );
    let socket = dir.join("dm.sock");
    let prefix = dir.join("out_");
    let kv = dir.join("kv.json");

    let child = spawn_rjmsim(&[
        "--platform",
        platform.to_str().unwrap(),
        "--workload",
        workload.to_str().unwrap(),
        "--socket",
        socket.to_str().unwrap(),
        "--export-prefix",
        prefix.to_str().unwrap(),
        "--kv-file",
        kv.to_str().unwrap(),
        "--timeout-ms",
        "10000",
    ]);

    let mut stream = connect(&socket);
    let mut seen = Vec::new();
    while let Some(msg) = read_msg(&mut stream) {
        let now = msg["now"].as_f64().expect("now");
        let types = event_types(&msg);
        let events = if types.iter().any(|t| t == "SIMULATION_BEGINS") {
            json!([{ "type": "HELLO", "data": { "protocol_version": "rjmsim/1" } }])
        } else if types.iter().any(|t| t == "JOB_SUBMITTED") {
            json!([
                { "type": "EXECUTE_JOB", "data": { "job_id": "w0!1", "alloc": "0-1" } },
                { "type": "SET_PSTATE", "data": { "machines": "0-1", "pstate": 1 } }
            ])
        } else if types.iter().any(|t| t == "JOB_COMPLETED") {
            json!([
                { "type": "SET_PSTATE", "data": { "machines": "0-1", "pstate": 0 } },
                { "type": "FINISHED" }
            ])
        } else {
            json!([])
        };
        seen.push((now, types));
        write_msg(&mut stream, &json!({ "now": now, "events": events }));
    }

    let output = child.wait_with_output().expect("wait rjmsim");
    assert!(
        output.status.success(),
        "rjmsim failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(seen.len(), 3, "messages: {seen:?}");
    assert_eq!(seen[2], (10.0, vec!["JOB_COMPLETED".to_string()]));

    let trace = fs::read_to_string(dir.join("out_pstate_changes.csv")).expect("trace");
    assert_eq!(
        trace,
        "time,machine_id,new_pstate\n0.000000000,0-1,1\n10.000000000,0-1,0\n"
    );
    let schedule: Value = serde_json::from_str(
        &fs::read_to_string(dir.join("out_schedule.json")).expect("schedule"),
    )
    .expect("schedule json");
    assert_eq!(schedule["nb_jobs_completed"], 1);
    let stored: Value =
        serde_json::from_str(&fs::read_to_string(&kv).expect("kv")).expect("kv json");
    assert_eq!(stored["nb_res"], "4");
    assert!(stored.get("job_w0!1").is_some());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("summary makespan_s=10.000000000 jobs=1 completed=1"),
        "stdout={stdout}"
    );
    assert!(!socket.exists(), "socket file is removed at exit");
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn version_mismatch_exits_with_protocol_error() {
    let dir = unique_temp_dir("cli-version");
    let socket = dir.join("dm.sock");
    let child = spawn_rjmsim(&[
        "--nb-machines",
        "2",
        "--socket",
        socket.to_str().unwrap(),
    ]);

    let mut stream = connect(&socket);
    let begins = read_msg(&mut stream).expect("SIMULATION_BEGINS");
    assert_eq!(event_types(&begins), ["SIMULATION_BEGINS"]);
    assert_eq!(begins["events"][0]["data"]["nb_resources"], 2);
    write_msg(
        &mut stream,
        &json!({ "now": 0.0, "events": [ { "type": "HELLO", "data": { "protocol_version": "other/9" } } ] }),
    );

    let output = child.wait_with_output().expect("wait rjmsim");
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error reason=PROTOCOL_VERSION_MISMATCH"),
        "stderr={stderr}"
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn absent_decision_maker_times_out() {
    let dir = unique_temp_dir("cli-no-dm");
    let socket = dir.join("dm.sock");
    let output = run_rjmsim(&[
        "--nb-machines",
        "2",
        "--socket",
        socket.to_str().unwrap(),
        "--timeout-ms",
        "200",
    ]);

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error reason=PROTOCOL_CONNECT_TIMEOUT"),
        "stderr={stderr}"
    );
    assert!(!socket.exists(), "socket file is removed at exit");
    let _ = fs::remove_dir_all(&dir);
}
