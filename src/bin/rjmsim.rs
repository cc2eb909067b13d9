use clap::Parser;
use rjmsim_rs::error::{Result, SimError};
use rjmsim_rs::protocol::UnixSocketTransport;
use rjmsim_rs::sim::{Orchestrator, PlatformSpec, SimConfig, WorkflowSpec, WorkloadSpec};
use rjmsim_rs::storage::JsonFileStore;
use rjmsim_rs::trace::SimulationReport;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "rjmsim",
    about = "Simulate jobs on a cluster scheduled by an external decision-maker"
)]
struct Args {
    /// Platform description (JSON)
    #[arg(long)]
    platform: Option<PathBuf>,

    /// Homogeneous platform of N machines, used when --platform is absent
    #[arg(long)]
    nb_machines: Option<u32>,

    /// Workload file (JSON); repeatable
    #[arg(long = "workload")]
    workloads: Vec<PathBuf>,

    /// Workflow file, optionally with a start time in seconds: FILE[:START]; repeatable
    #[arg(long = "workflow")]
    workflows: Vec<String>,

    /// Simulation config (JSON); the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unix socket the decision-maker connects to
    #[arg(long, default_value = "/tmp/rjmsim")]
    socket: PathBuf,

    /// Wall-clock timeout for each decision-maker reply (ms)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Output prefix, e.g. out/run1_ (writes pstate_changes.csv, jobs.csv, schedule.json)
    #[arg(long)]
    export_prefix: Option<PathBuf>,

    #[arg(long)]
    allow_time_sharing: bool,

    /// Only the first N machines can run jobs
    #[arg(long)]
    limit_machines: Option<u32>,

    /// Ignore job submissions once every workflow is finished
    #[arg(long)]
    terminate_with_last_workflow: bool,

    /// Stop the simulation at this simulated time (seconds)
    #[arg(long)]
    until_s: Option<f64>,

    /// Persist job metadata to this JSON file
    #[arg(long)]
    kv_file: Option<PathBuf>,
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .map_err(|e| SimError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| SimError::Config(format!("cannot parse {}: {e}", path.display())))
}

/// `FILE[:START]`; a suffix that is not a number belongs to the file name.
fn parse_workflow_arg(arg: &str) -> (PathBuf, Option<f64>) {
    if let Some((file, start)) = arg.rsplit_once(':') {
        if let Ok(start) = start.parse::<f64>() {
            return (PathBuf::from(file), Some(start));
        }
    }
    (PathBuf::from(arg), None)
}

fn build_config(args: &Args) -> Result<SimConfig> {
    let mut config = match &args.config {
        Some(path) => load_json::<SimConfig>(path)?,
        None => SimConfig::default(),
    };
    if let Some(ms) = args.timeout_ms {
        config.reply_timeout_ms = ms;
    }
    if args.export_prefix.is_some() {
        config.export_prefix = args.export_prefix.clone();
    }
    config.allow_time_sharing |= args.allow_time_sharing;
    config.terminate_with_last_workflow |= args.terminate_with_last_workflow;
    if args.limit_machines.is_some() {
        config.limit_machines = args.limit_machines;
    }
    if args.until_s.is_some() {
        config.max_simulated_time_s = args.until_s;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<SimulationReport> {
    let config = build_config(args)?;
    let platform = match (&args.platform, args.nb_machines) {
        (Some(path), _) => load_json::<PlatformSpec>(path)?,
        (None, Some(n)) => PlatformSpec::homogeneous(n),
        (None, None) => {
            return Err(SimError::Config(
                "either --platform or --nb-machines is required".into(),
            ));
        }
    };
    platform.validate()?;

    let workloads = args
        .workloads
        .iter()
        .map(|p| load_json::<WorkloadSpec>(p))
        .collect::<Result<Vec<_>>>()?;
    let workflows = args
        .workflows
        .iter()
        .map(|arg| {
            let (path, start) = parse_workflow_arg(arg);
            load_json::<WorkflowSpec>(&path).map(|spec| (spec, start))
        })
        .collect::<Result<Vec<_>>>()?;
    if workloads.is_empty() && workflows.is_empty() {
        tracing::warn!("no workload nor workflow given, the simulation only runs the handshake");
    }

    // 连接在第一次发送时才 accept：输入文件有错时不必等待决策者
    let transport = UnixSocketTransport::bind(&args.socket, config.reply_timeout())?;
    let mut orchestrator = Orchestrator::new(config, &platform, transport)?;
    if let Some(kv) = &args.kv_file {
        orchestrator = orchestrator.with_store(Box::new(JsonFileStore::open(kv)?));
    }
    for workload in &workloads {
        orchestrator.add_workload(workload)?;
    }
    for (workflow, start) in &workflows {
        orchestrator.add_workflow(workflow, *start)?;
    }
    orchestrator.run()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(report) => {
            println!(
                "summary makespan_s={:.9} jobs={} completed={} killed={} rejected={} unfinished={} energy_j={:.3} pstate_changes={} messages={}",
                report.makespan_s,
                report.nb_jobs,
                report.nb_jobs_completed,
                report.nb_jobs_killed,
                report.nb_jobs_rejected,
                report.nb_jobs_unfinished,
                report.consumed_joules,
                report.nb_pstate_changes,
                report.nb_protocol_messages,
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error reason={}: {err}", err.reason_code());
            ExitCode::from(err.exit_code())
        }
    }
}
