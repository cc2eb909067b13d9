//! 测试用的脚本化决策者
//!
//! 在独立线程里运行，通过 `ChannelPeer` 与内核交换消息；每收到一条消息就调用一次策略闭包。

use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::protocol::codec::{decode, encode};
use crate::protocol::{ChannelPeer, ChannelTransport, Decision, Envelope, PROTOCOL_VERSION, SimEvent};
use crate::registry::{JobId, JobState};
use crate::sim::{
    JobSpec, Orchestrator, PStateSpec, PlatformSpec, SimConfig, WorkflowSpec, WorkloadSpec,
};
use crate::trace::{SimulationReport, write_jobs_csv};

pub type Inbound = Envelope<SimEvent>;

pub fn reply(now: f64, events: Vec<Decision>) -> Envelope<Decision> {
    Envelope { now, events }
}

pub fn hello() -> Decision {
    Decision::Hello {
        protocol_version: PROTOCOL_VERSION.to_string(),
    }
}

pub fn execute(job: &str, alloc: &str) -> Decision {
    Decision::ExecuteJob {
        job_id: JobId::from(job),
        alloc: alloc.parse().expect("alloc"),
    }
}

pub fn set_pstate(machines: &str, pstate: u32) -> Decision {
    Decision::SetPstate {
        machines: machines.parse().expect("machines"),
        pstate,
    }
}

pub fn is_begins(msg: &Inbound) -> bool {
    matches!(msg.events.first(), Some(SimEvent::SimulationBegins { .. }))
}

/// 消息中 JOB_SUBMITTED 的作业 id
pub fn submitted(msg: &Inbound) -> Vec<String> {
    msg.events
        .iter()
        .filter_map(|e| match e {
            SimEvent::JobSubmitted { job_id, .. } => Some(job_id.to_string()),
            _ => None,
        })
        .collect()
}

pub fn completed(msg: &Inbound) -> Vec<String> {
    msg.events
        .iter()
        .filter_map(|e| match e {
            SimEvent::JobCompleted { job_id, .. } => Some(job_id.to_string()),
            _ => None,
        })
        .collect()
}

/// 启动决策者线程。内核关闭通道或收到 SIMULATION_ENDS 后线程结束，返回收到的全部消息。
pub fn spawn_dm<F>(peer: ChannelPeer, mut policy: F) -> JoinHandle<Vec<Inbound>>
where
    F: FnMut(&Inbound) -> Envelope<Decision> + Send + 'static,
{
    thread::spawn(move || {
        let mut seen = Vec::new();
        while let Some(frame) = peer.recv() {
            let msg: Inbound = decode(&frame).expect("decode kernel message");
            let ends = msg
                .events
                .iter()
                .any(|e| matches!(e, SimEvent::SimulationEnds));
            let answer = policy(&msg);
            seen.push(msg);
            if peer.send(encode(&answer).expect("encode reply")).is_err() || ends {
                break;
            }
        }
        seen
    })
}

pub fn platform(nb_machines: u32) -> PlatformSpec {
    PlatformSpec {
        pstates: vec![
            PStateSpec {
                id: 0,
                watts_idle: 100.0,
                watts_busy: 200.0,
            },
            PStateSpec {
                id: 1,
                watts_idle: 10.0,
                watts_busy: 20.0,
            },
        ],
        ..PlatformSpec::homogeneous(nb_machines)
    }
}

pub fn job(id: &str, subtime: f64, res: u32, runtime: f64) -> JobSpec {
    JobSpec {
        id: id.to_string(),
        subtime,
        res,
        runtime,
        walltime: None,
    }
}

pub fn workload(name: &str, jobs: Vec<JobSpec>) -> WorkloadSpec {
    WorkloadSpec {
        name: name.to_string(),
        jobs,
    }
}

/// 一次完整仿真的可观察结果
pub struct Outcome {
    pub result: Result<SimulationReport>,
    pub trace_csv: String,
    pub jobs_csv: String,
    pub states: Vec<(String, JobState)>,
    pub seen: Vec<Inbound>,
}

impl Outcome {
    pub fn state_of(&self, id: &str) -> Option<JobState> {
        self.states
            .iter()
            .find(|(j, _)| j == id)
            .map(|(_, state)| *state)
    }

    /// 除握手外收到的消息
    pub fn exchanges(&self) -> impl Iterator<Item = &Inbound> {
        self.seen.iter().filter(|m| !is_begins(m))
    }
}

pub fn simulate<F>(
    config: SimConfig,
    platform: &PlatformSpec,
    workloads: &[WorkloadSpec],
    workflows: &[WorkflowSpec],
    policy: F,
) -> Outcome
where
    F: FnMut(&Inbound) -> Envelope<Decision> + Send + 'static,
{
    let (transport, peer) = ChannelTransport::pair();
    let dm = spawn_dm(peer, policy);

    let mut orchestrator = Orchestrator::new(config, platform, transport).expect("orchestrator");
    for w in workloads {
        orchestrator.add_workload(w).expect("add workload");
    }
    for wf in workflows {
        orchestrator.add_workflow(wf, None).expect("add workflow");
    }
    let result = orchestrator.run();

    let trace_csv = orchestrator.tracer().to_csv();
    let mut jobs = Vec::new();
    write_jobs_csv(orchestrator.registry(), &mut jobs).expect("jobs csv");
    let states = orchestrator
        .registry()
        .jobs()
        .map(|j| (j.id.to_string(), j.state))
        .collect();
    drop(orchestrator);

    let seen = dm.join().expect("decision-maker thread");
    Outcome {
        result,
        trace_csv,
        jobs_csv: String::from_utf8(jobs).expect("utf8"),
        states,
        seen,
    }
}
