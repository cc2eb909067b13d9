use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Platform description: the machine inventory and its power states.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformSpec {
    /// Shortcut for homogeneous platforms; machines are named `m<i>`.
    #[serde(default)]
    pub nb_machines: Option<u32>,
    #[serde(default)]
    pub machines: Vec<MachineSpec>,
    /// Known power states. Empty means any pstate id is accepted and draws no power.
    #[serde(default)]
    pub pstates: Vec<PStateSpec>,
    #[serde(default)]
    pub initial_pstate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PStateSpec {
    pub id: u32,
    #[serde(default)]
    pub watts_idle: f64,
    #[serde(default)]
    pub watts_busy: f64,
}

impl PlatformSpec {
    pub fn homogeneous(nb_machines: u32) -> Self {
        Self {
            nb_machines: Some(nb_machines),
            ..Self::default()
        }
    }

    pub fn machine_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> = match (self.nb_machines, self.machines.is_empty()) {
            (Some(n), true) => (0..n).map(|i| format!("m{i}")).collect(),
            (None, false) => self.machines.iter().map(|m| m.name.clone()).collect(),
            (Some(n), false) if n as usize == self.machines.len() => {
                self.machines.iter().map(|m| m.name.clone()).collect()
            }
            (Some(n), false) => {
                return Err(SimError::Config(format!(
                    "platform declares nb_machines={n} but lists {} machines",
                    self.machines.len()
                )));
            }
            (None, true) => {
                return Err(SimError::Config("platform has no machines".into()));
            }
        };
        if names.is_empty() {
            return Err(SimError::Config("platform has no machines".into()));
        }
        Ok(names)
    }

    pub fn validate(&self) -> Result<()> {
        self.machine_names()?;
        let mut ids: Vec<u32> = self.pstates.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(SimError::Config("duplicate pstate id in platform".into()));
        }
        if !ids.is_empty() && ids.binary_search(&self.initial_pstate).is_err() {
            return Err(SimError::Config(format!(
                "initial pstate {} is not declared",
                self.initial_pstate
            )));
        }
        Ok(())
    }
}

/// A static workload: jobs with submission times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    /// Submission time (s)
    pub subtime: f64,
    /// Requested number of machines
    pub res: u32,
    /// Simulated execution time (s)
    pub runtime: f64,
    #[serde(default)]
    pub walltime: Option<f64>,
}

/// A workflow: a DAG of tasks released as their predecessors complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub start_time: f64,
    /// 0 means no cap
    #[serde(default)]
    pub max_concurrent: usize,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub res: u32,
    pub runtime: f64,
    #[serde(default)]
    pub walltime: Option<f64>,
    /// Ids of the tasks that must complete first
    #[serde(default)]
    pub after: Vec<String>,
}
