//! 仿真内核（Orchestrator）
//!
//! 单线程离散事件循环。独占 Registry、机器清单和 pstate tracer；
//! 唯一的挂起点是等待决策者应答。
//!
//! 状态：Initializing → Running → Draining → Terminated

use std::ffi::OsString;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, trace, warn};

use super::config::SimConfig;
use super::event::{Event, EventKind};
use super::queue::EventQueue;
use super::time::SimTime;
use super::workload::{PlatformSpec, WorkflowSpec, WorkloadSpec};
use crate::error::{Result, SimError};
use crate::platform::{HostModel, Machines, ProfileModel};
use crate::protocol::{
    CompletionState, Decision, JobDescription, ProtocolSession, ResourceInfo, SimEvent, Transport,
};
use crate::range::MachineRange;
use crate::registry::{
    Admission, JobId, JobOutcome, JobState, JobSubmission, KillReason, Registry, Workflow,
};
use crate::storage::{KeyValueStore, MemoryStore};
use crate::trace::{PStateTracer, SimulationReport, write_jobs_csv};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Running,
    Draining,
    Terminated,
}

/// `prefix` 直接拼接文件名，例如 `out/run1_` + `jobs.csv`
pub fn output_path(prefix: &Path, name: &str) -> PathBuf {
    let mut s = OsString::from(prefix.as_os_str());
    s.push(name);
    PathBuf::from(s)
}

fn secs(what: &str, s: f64) -> Result<SimTime> {
    SimTime::try_from_secs_f64(s).ok_or_else(|| SimError::Config(format!("invalid {what} {s}")))
}

fn completion_state(outcome: JobOutcome) -> CompletionState {
    match outcome {
        JobOutcome::Killed(KillReason::Walltime) => CompletionState::CompletedWalltimeReached,
        JobOutcome::Killed(KillReason::Decision) => CompletionState::CompletedKilled,
        _ => CompletionState::CompletedSuccessfully,
    }
}

pub struct Orchestrator<T> {
    config: SimConfig,
    phase: Phase,
    queue: EventQueue,
    registry: Registry,
    machines: Machines,
    tracer: PStateTracer,
    session: ProtocolSession<T>,
    model: Box<dyn HostModel>,
    store: Box<dyn KeyValueStore>,
    /// 自上次发送以来累积、等待报告给决策者的事件
    outbox: Vec<SimEvent>,
    force_send: bool,
    /// 上一条应答的决策尚未执行；此期间只收集事件，不发新请求
    awaiting_decisions: bool,
    dm_finished: bool,
    pending_calls: usize,
    arrivals_purged: bool,
    /// 时间上限事件仍在队列中
    limit_queued: bool,
    report: Option<SimulationReport>,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(config: SimConfig, platform: &PlatformSpec, transport: T) -> Result<Self> {
        config.validate()?;
        let machines = Machines::new(platform, config.limit_machines, config.allow_time_sharing)?;
        let registry = Registry::new(
            machines.usable().size() as u32,
            config.terminate_with_last_workflow,
        );
        let tracer = match &config.export_prefix {
            Some(prefix) => {
                let file = File::create(output_path(prefix, "pstate_changes.csv"))?;
                PStateTracer::with_sink(Box::new(BufWriter::new(file)), config.trace_flush_every)
            }
            None => PStateTracer::new(),
        };
        info!(
            machines = machines.len(),
            usable = %machines.usable(),
            allow_time_sharing = config.allow_time_sharing,
            "platform ready"
        );
        Ok(Self {
            queue: EventQueue::new(config.event_order.clone()),
            session: ProtocolSession::new(transport, config.reply_timeout()),
            model: Box::new(ProfileModel::from_platform(platform)),
            store: Box::new(MemoryStore::default()),
            phase: Phase::Initializing,
            registry,
            machines,
            tracer,
            config,
            outbox: Vec::new(),
            force_send: false,
            awaiting_decisions: false,
            dm_finished: false,
            pending_calls: 0,
            arrivals_purged: false,
            limit_queued: false,
            report: None,
        })
    }

    pub fn with_model(mut self, model: Box<dyn HostModel>) -> Self {
        self.model = model;
        self
    }

    pub fn with_store(mut self, store: Box<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn machines(&self) -> &Machines {
        &self.machines
    }

    pub fn tracer(&self) -> &PStateTracer {
        &self.tracer
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// 最近一次 `run` 的汇总（失败时也有）
    pub fn report(&self) -> Option<&SimulationReport> {
        self.report.as_ref()
    }

    fn ensure_initializing(&self) -> Result<()> {
        if self.phase != Phase::Initializing {
            return Err(SimError::Config(
                "inputs can only be added before the simulation starts".into(),
            ));
        }
        Ok(())
    }

    pub fn add_workload(&mut self, spec: &WorkloadSpec) -> Result<()> {
        self.ensure_initializing()?;
        if spec.name.is_empty() || spec.name.contains('!') {
            return Err(SimError::Config(format!("invalid workload name {:?}", spec.name)));
        }
        for job in &spec.jobs {
            if job.res == 0 {
                return Err(SimError::Config(format!(
                    "job {}!{} requests no machine",
                    spec.name, job.id
                )));
            }
            let sub = JobSubmission {
                id: JobId::new(&spec.name, &job.id),
                requested: job.res,
                runtime: secs("runtime", job.runtime)?,
                walltime: job.walltime.map(|w| secs("walltime", w)).transpose()?,
            };
            let at = secs("submission time", job.subtime)?;
            self.registry.declare_arrival(&sub.id)?;
            self.queue.schedule(at, Event::JobArrival(sub));
        }
        info!(workload = %spec.name, jobs = spec.jobs.len(), "workload loaded");
        Ok(())
    }

    pub fn add_workflow(&mut self, spec: &WorkflowSpec, start_override: Option<f64>) -> Result<()> {
        self.ensure_initializing()?;
        let workflow = Workflow::from_spec(spec, start_override)?;
        let (name, start) = (workflow.name.clone(), workflow.start_time);
        let tasks = workflow.tasks().len();
        self.registry.add_workflow(workflow)?;
        self.queue.schedule(start, Event::WorkflowTrigger { workflow: name.clone() });
        info!(workflow = %name, tasks, start = %start, "workflow loaded");
        Ok(())
    }

    /// 运行到结束。失败时仍然写出 trace 和已收集的统计，然后返回错误。
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) -> Result<SimulationReport> {
        info!("▶️  开始运行仿真");
        let outcome = self.run_loop();
        if let Err(err) = &outcome {
            error!(reason = err.reason_code(), now = %self.now(), "simulation aborted: {err}");
        }
        self.phase = Phase::Terminated;

        let mut report = self.collect_report();
        if let Err(err) = &outcome {
            report.error_reason = Some(err.reason_code().to_string());
        }
        let written = self.write_outputs(&report);
        self.report = Some(report.clone());

        match (outcome, written) {
            (Err(err), written) => {
                if let Err(w) = written {
                    warn!("could not write outputs after abort: {w}");
                }
                Err(err)
            }
            (Ok(()), Err(w)) => Err(w),
            (Ok(()), Ok(())) => {
                info!(
                    makespan_s = report.makespan_s,
                    jobs = report.nb_jobs,
                    messages = report.nb_protocol_messages,
                    "✅ 仿真完成"
                );
                Ok(report)
            }
        }
    }

    fn run_loop(&mut self) -> Result<()> {
        self.initialize()?;
        self.phase = Phase::Running;
        self.check_draining();

        let mut event_count = 0u64;
        while self.has_pending_events() {
            let Some(item) = self.queue.pop() else {
                break;
            };
            event_count += 1;
            let kind = item.ev.kind();
            trace!(
                event_num = event_count,
                now = %item.at,
                seq = item.seq,
                ?kind,
                remaining_queue = self.queue.len(),
                "执行事件"
            );

            if kind == EventKind::SimulationEnd {
                info!(now = %item.at, dropped = self.queue.len(), "simulated time limit reached");
                self.limit_queued = false;
                self.queue.clear();
                break;
            }

            match self.phase {
                Phase::Running => {
                    self.dispatch(item.ev)?;
                    self.purge_ignored_arrivals();
                    self.check_draining();
                    if self.phase == Phase::Running
                        && !self.awaiting_decisions
                        && (self.force_send
                            || (!self.outbox.is_empty() && !self.queue.has_event_at_now()))
                    {
                        self.exchange()?;
                    }
                }
                Phase::Draining if kind == EventKind::JobCompletion => self.dispatch(item.ev)?,
                _ => debug!(?kind, "event ignored while draining"),
            }
        }

        self.queue.clear();
        if self.phase == Phase::Running {
            self.end_simulation()?;
        }
        Ok(())
    }

    /// 只剩时间上限事件时视为队列已空
    fn has_pending_events(&self) -> bool {
        match self.queue.len() {
            0 => false,
            1 => !self.limit_queued,
            _ => true,
        }
    }

    fn initialize(&mut self) -> Result<()> {
        let usable = self.machines.usable().size() as u32;
        self.put_metadata("nb_res", usable.to_string());
        if let Some(limit) = self.config.max_simulated_time()? {
            self.queue.schedule(limit, Event::SimulationEnd);
            self.limit_queued = true;
        }

        let resources = self
            .machines
            .iter()
            .map(|m| ResourceInfo {
                id: m.id,
                name: m.name.clone(),
                pstate: m.pstate,
            })
            .collect();
        let reply = self
            .session
            .handshake(resources, usable, self.machines.allow_time_sharing())?;
        info!(queued_events = self.queue.len(), "handshake with the decision-maker done");
        self.schedule_decisions(reply.at, reply.decisions);
        Ok(())
    }

    /// 应答在 `at` 生效。空应答若早于等于当前时间则无事可做；
    /// 否则在它被执行之前决策者不会收到新请求
    fn schedule_decisions(&mut self, at: SimTime, decisions: Vec<Decision>) {
        if decisions.is_empty() && at <= self.now() {
            return;
        }
        trace!(at = %at, nb_decisions = decisions.len(), "decision-maker busy until its reply is applied");
        self.queue.schedule(at, Event::DecisionMakerReply { decisions });
        self.awaiting_decisions = true;
    }

    fn check_draining(&mut self) {
        if self.phase == Phase::Running
            && self.dm_finished
            && self.pending_calls == 0
            && !self.registry.has_pending_work()
        {
            info!(
                now = %self.now(),
                running = self.registry.running_jobs(),
                "decision-maker finished, draining"
            );
            self.phase = Phase::Draining;
            self.outbox.clear();
            self.force_send = false;
        }
    }

    fn purge_ignored_arrivals(&mut self) {
        if self.registry.arrivals_ignored() && !self.arrivals_purged {
            let dropped = self.queue.discard(EventKind::JobArrival);
            debug!(dropped, "pending arrivals discarded");
            self.arrivals_purged = true;
        }
    }

    /// 发送累积的事件并阻塞等待应答；应答中的决策在应答时间点执行
    fn exchange(&mut self) -> Result<()> {
        let now = self.now();
        let events = std::mem::take(&mut self.outbox);
        self.force_send = false;
        let reply = self.session.request(now, events)?;
        self.schedule_decisions(reply.at, reply.decisions);
        Ok(())
    }

    fn end_simulation(&mut self) -> Result<()> {
        let unfinished = self.registry.count_in(JobState::Submitted);
        if unfinished > 0 {
            warn!(unfinished, "simulation ends with jobs that were never allocated");
        }
        self.outbox.push(SimEvent::SimulationEnds);
        let events = std::mem::take(&mut self.outbox);
        // 时间上限可能早于决策者最后一条应答的时间
        let at = self.now().max(self.session.horizon());
        let reply = self.session.request(at, events)?;
        if !reply.decisions.is_empty() {
            warn!(
                ignored = reply.decisions.len(),
                "decisions sent after SIMULATION_ENDS are ignored"
            );
        }
        Ok(())
    }

    fn report_event(&mut self, ev: SimEvent) {
        if self.phase == Phase::Running {
            self.outbox.push(ev);
        }
    }

    fn put_metadata(&mut self, key: &str, value: String) {
        if let Err(err) = self.store.put(key, value) {
            warn!(key, "kv store put failed: {err}");
        }
    }

    fn dispatch(&mut self, ev: Event) -> Result<()> {
        let now = self.now();
        match ev {
            Event::JobArrival(sub) => {
                let admission = self.registry.arrive(&sub, now);
                self.admit(sub, admission);
            }
            Event::JobCompletion { job_id, outcome } => {
                match self.registry.get(&job_id).map(|j| j.state) {
                    Some(JobState::Running) => self.finish_job(&job_id, outcome)?,
                    state => trace!(job = %job_id, ?state, "stale completion ignored"),
                }
            }
            Event::WorkflowTrigger { workflow } => {
                let released = self.registry.start_workflow(&workflow, now)?;
                self.admit_all(released);
            }
            Event::RequestedCall => {
                self.pending_calls = self.pending_calls.saturating_sub(1);
                self.report_event(SimEvent::RequestedCall);
                self.force_send = true;
            }
            Event::DecisionMakerReply { decisions } => {
                self.awaiting_decisions = false;
                for decision in decisions {
                    self.apply(decision)?;
                }
            }
            Event::SimulationEnd => {
                self.limit_queued = false;
                self.queue.clear();
            }
        }
        Ok(())
    }

    fn admit(&mut self, sub: JobSubmission, admission: Admission) {
        if admission != Admission::Submitted {
            return;
        }
        let now = self.now();
        let job = JobDescription {
            id: sub.id.clone(),
            res: sub.requested,
            subtime: now.as_secs_f64(),
            walltime: sub.walltime.map(SimTime::as_secs_f64),
        };
        match serde_json::to_string(&job) {
            Ok(raw) => self.put_metadata(&format!("job_{}", sub.id), raw),
            Err(err) => warn!(job = %sub.id, "could not serialize job metadata: {err}"),
        }
        debug!(job = %sub.id, res = sub.requested, "job submitted");
        self.report_event(SimEvent::JobSubmitted {
            job_id: sub.id,
            job,
        });
    }

    fn admit_all(&mut self, released: Vec<(JobSubmission, Admission)>) {
        for (sub, admission) in released {
            self.admit(sub, admission);
        }
    }

    fn finish_job(&mut self, id: &JobId, outcome: JobOutcome) -> Result<()> {
        let now = self.now();
        let alloc = self
            .registry
            .get(id)
            .map(|j| j.allocation.clone())
            .ok_or_else(|| SimError::UnknownJob(id.to_string()))?;
        let released = self.registry.finish(id, outcome, now)?;
        self.machines.release(id, &alloc, now, self.model.as_ref());
        info!(job = %id, outcome = outcome.as_str(), alloc = %alloc, now = %now, "job finished");
        self.report_event(SimEvent::JobCompleted {
            job_id: id.clone(),
            job_state: completion_state(outcome),
            alloc,
        });
        self.admit_all(released);
        Ok(())
    }

    fn apply(&mut self, decision: Decision) -> Result<()> {
        let now = self.now();
        trace!(now = %now, ?decision, "applying decision");
        match decision {
            Decision::Hello { .. } => Err(SimError::InvalidDecision(
                "HELLO is only valid in the handshake reply".into(),
            )),
            Decision::ExecuteJob { job_id, alloc } => self.execute_job(job_id, alloc),
            Decision::RejectJob { job_id } => {
                let released = self.registry.reject(&job_id, now)?;
                info!(job = %job_id, "job rejected by the decision-maker");
                self.admit_all(released);
                Ok(())
            }
            Decision::KillJob { job_ids } => self.kill_jobs(job_ids),
            Decision::SetPstate { machines, pstate } => {
                self.machines.check_pstate(&machines, pstate)?;
                self.tracer.record(now, &machines, pstate)?;
                self.machines
                    .set_pstate(&machines, pstate, now, self.model.as_ref());
                Ok(())
            }
            Decision::CallMeLater { timestamp } => {
                let at = SimTime::try_from_secs_f64(timestamp).ok_or_else(|| {
                    SimError::MalformedMessage(format!("invalid CALL_ME_LATER time {timestamp}"))
                })?;
                if at < now {
                    return Err(SimError::BackwardTime { got: at, min: now });
                }
                self.pending_calls += 1;
                self.queue.schedule(at, Event::RequestedCall);
                Ok(())
            }
            Decision::Finished => {
                debug!(now = %now, "decision-maker signalled it is finished");
                self.dm_finished = true;
                Ok(())
            }
        }
    }

    fn execute_job(&mut self, job_id: JobId, alloc: MachineRange) -> Result<()> {
        let now = self.now();
        let job = self
            .registry
            .get(&job_id)
            .ok_or_else(|| SimError::UnknownJob(job_id.to_string()))?;
        if job.state != JobState::Submitted {
            error!(job = %job_id, state = job.state.as_str(), alloc = %alloc, "job cannot be allocated");
            return Err(SimError::IllegalTransition {
                job: job_id.to_string(),
                from: job.state.as_str(),
                to: JobState::Allocated.as_str(),
            });
        }
        if alloc.size() != job.requested as usize {
            return Err(SimError::InvalidDecision(format!(
                "job {job_id} requests {} machines but was allocated {alloc} ({} machines)",
                job.requested,
                alloc.size()
            )));
        }
        self.machines.check_allocation(&job_id, &alloc)?;

        self.registry.allocate(&job_id, &alloc)?;
        self.machines.occupy(&job_id, &alloc, now, self.model.as_ref());
        self.registry.start(&job_id, now)?;

        let job = self
            .registry
            .get(&job_id)
            .ok_or_else(|| SimError::UnknownJob(job_id.to_string()))?;
        let runtime = self.model.execution_time(job, &alloc);
        let (duration, outcome) = match job.walltime {
            Some(walltime) if runtime > walltime => {
                (walltime, JobOutcome::Killed(KillReason::Walltime))
            }
            _ => (runtime, JobOutcome::Success),
        };
        info!(job = %job_id, alloc = %alloc, now = %now, runtime = %duration, "job started");
        self.queue.schedule(
            now.saturating_add(duration),
            Event::JobCompletion { job_id, outcome },
        );
        Ok(())
    }

    fn kill_jobs(&mut self, job_ids: Vec<JobId>) -> Result<()> {
        let mut to_kill: Vec<JobId> = Vec::new();
        for id in job_ids {
            let state = self
                .registry
                .get(&id)
                .map(|j| j.state)
                .ok_or_else(|| SimError::UnknownJob(id.to_string()))?;
            match state {
                JobState::Running => {
                    if !to_kill.contains(&id) {
                        to_kill.push(id);
                    }
                }
                s if s.is_terminal() => {
                    warn!(job = %id, state = s.as_str(), "kill of a finished job ignored");
                }
                s => {
                    return Err(SimError::InvalidDecision(format!(
                        "cannot kill job {id}: it is {}",
                        s.as_str()
                    )));
                }
            }
        }
        if to_kill.is_empty() {
            return Ok(());
        }
        self.report_event(SimEvent::JobKilled {
            job_ids: to_kill.clone(),
        });
        for id in &to_kill {
            self.finish_job(id, JobOutcome::Killed(KillReason::Decision))?;
            self.queue.cancel_completion(id);
        }
        Ok(())
    }

    fn collect_report(&mut self) -> SimulationReport {
        let now = self.now();
        let joules = self.machines.settle_energy(now, self.model.as_ref());
        SimulationReport::collect(
            &self.registry,
            now,
            joules,
            self.tracer.len(),
            self.session.messages(),
        )
    }

    fn write_outputs(&mut self, report: &SimulationReport) -> Result<()> {
        self.tracer.flush()?;
        self.store.flush()?;
        let Some(prefix) = self.config.export_prefix.clone() else {
            return Ok(());
        };
        let mut jobs = BufWriter::new(File::create(output_path(&prefix, "jobs.csv"))?);
        write_jobs_csv(&self.registry, &mut jobs)?;
        let schedule = File::create(output_path(&prefix, "schedule.json"))?;
        serde_json::to_writer_pretty(schedule, report)?;
        debug!(prefix = %prefix.display(), "outputs written");
        Ok(())
    }
}
