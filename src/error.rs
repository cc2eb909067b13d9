//! 错误类型
//!
//! 仿真内核的致命错误分类。作业被 kill / reject 属于正常结果，不在这里。

use std::time::Duration;

use thiserror::Error;

use crate::range::MachineRange;
use crate::sim::SimTime;

pub type Result<T> = std::result::Result<T, SimError>;

/// 错误大类，决定退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Protocol,
    ResourceInvariant,
    Io,
}

impl ErrorCategory {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorCategory::Configuration => 2,
            ErrorCategory::Protocol => 3,
            ErrorCategory::ResourceInvariant => 4,
            ErrorCategory::Io => 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid machine range {text:?}: {reason}")]
    RangeParse { text: String, reason: String },

    #[error("malformed protocol message: {0}")]
    MalformedMessage(String),

    #[error("protocol version mismatch: expected {expected}, decision-maker speaks {got}")]
    VersionMismatch { expected: String, got: String },

    #[error("decision-maker did not answer the handshake with HELLO")]
    HandshakeMissing,

    #[error("decision-maker did not reply within {0:?}")]
    ReplyTimeout(Duration),

    #[error("decision-maker did not connect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("decision-maker closed the connection")]
    Disconnected,

    #[error("backward time: got {got}, expected at least {min}")]
    BackwardTime { got: SimTime, min: SimTime },

    #[error("a request is already waiting for its reply")]
    RequestPending,

    #[error("no request is waiting for a reply")]
    NoPendingRequest,

    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    #[error("allocation conflict for job {job}: machines {machines} are busy")]
    AllocationConflict { job: String, machines: MachineRange },

    #[error("pstate ordering violated at {at} on machines {machines}")]
    PStateOrdering { at: SimTime, machines: MachineRange },

    #[error("illegal job transition for {job}: {from} -> {to}")]
    IllegalTransition {
        job: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("unknown job {0}")]
    UnknownJob(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SimError::Config(_) | SimError::RangeParse { .. } => ErrorCategory::Configuration,
            SimError::MalformedMessage(_)
            | SimError::VersionMismatch { .. }
            | SimError::HandshakeMissing
            | SimError::ReplyTimeout(_)
            | SimError::ConnectTimeout(_)
            | SimError::Disconnected
            | SimError::BackwardTime { .. }
            | SimError::RequestPending
            | SimError::NoPendingRequest
            | SimError::InvalidDecision(_)
            | SimError::UnknownJob(_) => ErrorCategory::Protocol,
            SimError::AllocationConflict { .. }
            | SimError::PStateOrdering { .. }
            | SimError::IllegalTransition { .. } => ErrorCategory::ResourceInvariant,
            SimError::Io(_) => ErrorCategory::Io,
            // serde 错误只会出现在读输入文件阶段；协议层会自行转换成 MalformedMessage
            SimError::Json(_) => ErrorCategory::Configuration,
        }
    }

    /// Machine-readable reason code printed next to the exit status.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SimError::Config(_) => "CONFIG_INVALID",
            SimError::RangeParse { .. } => "CONFIG_BAD_RANGE",
            SimError::Json(_) => "CONFIG_BAD_JSON",
            SimError::MalformedMessage(_) => "PROTOCOL_MALFORMED",
            SimError::VersionMismatch { .. } => "PROTOCOL_VERSION_MISMATCH",
            SimError::HandshakeMissing => "PROTOCOL_HANDSHAKE_MISSING",
            SimError::ReplyTimeout(_) => "PROTOCOL_TIMEOUT",
            SimError::ConnectTimeout(_) => "PROTOCOL_CONNECT_TIMEOUT",
            SimError::Disconnected => "PROTOCOL_DISCONNECTED",
            SimError::BackwardTime { .. } => "PROTOCOL_BACKWARD_TIME",
            SimError::RequestPending => "PROTOCOL_REQUEST_PENDING",
            SimError::NoPendingRequest => "PROTOCOL_NO_PENDING_REQUEST",
            SimError::InvalidDecision(_) => "PROTOCOL_INVALID_DECISION",
            SimError::UnknownJob(_) => "PROTOCOL_UNKNOWN_JOB",
            SimError::AllocationConflict { .. } => "RESOURCE_ALLOCATION_CONFLICT",
            SimError::PStateOrdering { .. } => "RESOURCE_PSTATE_ORDERING",
            SimError::IllegalTransition { .. } => "RESOURCE_ILLEGAL_TRANSITION",
            SimError::Io(_) => "IO_ERROR",
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.category().exit_code()
    }
}
