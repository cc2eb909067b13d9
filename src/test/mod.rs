mod protocol;
mod sim_time;
mod support;
mod workload_spec;
