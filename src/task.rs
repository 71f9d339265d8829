//! # Task entity
//!
//! The unit of work tracked by the graph: identity, description
//! (method or service, parameter vector, scheduling flags), the state
//! machine, and the dependency bookkeeping the analyser maintains.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::data_info::RecordedAccess;
use crate::error::{AnalyserFault, SubmissionError};
use crate::types::{AppId, DataRef, Direction, TaskId};

// ============================================================================
// TASK STATE
// ============================================================================

/// Task lifecycle. Transitions only move forward:
/// `ToAnalyse -> ToExecute -> {Finished, Failed}`, with the direct
/// `ToAnalyse -> Failed` edge used by cascade failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    ToAnalyse,
    ToExecute,
    Finished,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed)
    }

    /// Legal forward transitions of the state machine.
    pub fn can_transition(self, to: TaskState) -> bool {
        matches!(
            (self, to),
            (TaskState::ToAnalyse, TaskState::ToExecute)
                | (TaskState::ToAnalyse, TaskState::Failed)
                | (TaskState::ToExecute, TaskState::Finished)
                | (TaskState::ToExecute, TaskState::Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::ToAnalyse => write!(f, "to_analyse"),
            TaskState::ToExecute => write!(f, "to_execute"),
            TaskState::Finished => write!(f, "finished"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// One element of a task's parameter vector.
///
/// Primitives travel by value and are never tracked; every other kind
/// names a datum the registry resolves to a [`crate::types::DataId`].
#[derive(Debug, Clone)]
pub enum Parameter {
    /// Immediate value, passed through untouched.
    Primitive { value: serde_json::Value },

    /// A file on shared storage.
    File { path: PathBuf, direction: Direction },

    /// An in-memory object, identified by an application-chosen key.
    Object { key: u64, direction: Direction },

    /// A stream endpoint.
    Stream { key: u64, direction: Direction },

    /// A collection of objects, tracked as one datum.
    Collection { key: u64, direction: Direction },
}

impl Parameter {
    pub fn primitive(value: impl Into<serde_json::Value>) -> Self {
        Parameter::Primitive {
            value: value.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, direction: Direction) -> Self {
        Parameter::File {
            path: path.into(),
            direction,
        }
    }

    pub fn object(key: u64, direction: Direction) -> Self {
        Parameter::Object { key, direction }
    }

    pub fn stream(key: u64, direction: Direction) -> Self {
        Parameter::Stream { key, direction }
    }

    pub fn collection(key: u64, direction: Direction) -> Self {
        Parameter::Collection { key, direction }
    }

    /// Access direction; primitives are read-only by definition.
    pub fn direction(&self) -> Direction {
        match self {
            Parameter::Primitive { .. } => Direction::In,
            Parameter::File { direction, .. }
            | Parameter::Object { direction, .. }
            | Parameter::Stream { direction, .. }
            | Parameter::Collection { direction, .. } => *direction,
        }
    }

    /// The datum this parameter names, if it is tracked at all.
    pub fn data_ref(&self) -> Option<DataRef> {
        match self {
            Parameter::Primitive { .. } => None,
            Parameter::File { path, .. } => Some(DataRef::File(path.clone())),
            Parameter::Object { key, .. }
            | Parameter::Stream { key, .. }
            | Parameter::Collection { key, .. } => Some(DataRef::Object(*key)),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Parameter::Primitive { .. } => "primitive",
            Parameter::File { .. } => "file",
            Parameter::Object { .. } => "object",
            Parameter::Stream { .. } => "stream",
            Parameter::Collection { .. } => "collection",
        }
    }
}

// ============================================================================
// TASK DESCRIPTION
// ============================================================================

/// What the task invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskIdentity {
    /// A method implementation, resolved by name on the workers.
    Method { name: String },
    /// An external service operation.
    Service {
        namespace: String,
        name: String,
        operation: String,
    },
}

impl TaskIdentity {
    pub fn name(&self) -> &str {
        match self {
            TaskIdentity::Method { name } => name,
            TaskIdentity::Service { name, .. } => name,
        }
    }
}

/// Scheduling flags carried on the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFlags {
    /// Head-of-queue dispatch among equally ready tasks.
    pub prioritary: bool,
    /// Run on multiple workers; completion requires all copies.
    pub replicated: bool,
    /// Spread executions round-robin across workers.
    pub distributed: bool,
    /// The invocation has a target object (callee).
    pub has_target: bool,
    /// Workers reserved for one execution.
    pub num_nodes: u32,
}

impl Default for TaskFlags {
    fn default() -> Self {
        Self {
            prioritary: false,
            replicated: false,
            distributed: false,
            has_target: false,
            num_nodes: 1,
        }
    }
}

/// A submitted work item: identity, parameters and flags.
#[derive(Debug, Clone)]
pub struct TaskDescription {
    pub identity: TaskIdentity,
    pub parameters: Vec<Parameter>,
    pub flags: TaskFlags,
    /// Scheduling hint: force ordering after this task regardless of
    /// data flow.
    pub enforcing: Option<TaskId>,
}

impl TaskDescription {
    pub fn method(name: impl Into<String>) -> Self {
        Self {
            identity: TaskIdentity::Method { name: name.into() },
            parameters: Vec::new(),
            flags: TaskFlags::default(),
            enforcing: None,
        }
    }

    pub fn service(
        namespace: impl Into<String>,
        name: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            identity: TaskIdentity::Service {
                namespace: namespace.into(),
                name: name.into(),
                operation: operation.into(),
            },
            parameters: Vec::new(),
            flags: TaskFlags::default(),
            enforcing: None,
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Parameter>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn prioritary(mut self) -> Self {
        self.flags.prioritary = true;
        self
    }

    pub fn replicated(mut self) -> Self {
        self.flags.replicated = true;
        self
    }

    pub fn distributed(mut self) -> Self {
        self.flags.distributed = true;
        self
    }

    pub fn with_target(mut self) -> Self {
        self.flags.has_target = true;
        self
    }

    pub fn on_nodes(mut self, num_nodes: u32) -> Self {
        self.flags.num_nodes = num_nodes;
        self
    }

    pub fn enforced_by(mut self, task: TaskId) -> Self {
        self.enforcing = Some(task);
        self
    }

    pub fn is_service(&self) -> bool {
        matches!(self.identity, TaskIdentity::Service { .. })
    }

    /// Reject descriptions the analyser could not act on.
    pub fn validate(&self) -> Result<(), SubmissionError> {
        match &self.identity {
            TaskIdentity::Method { name } if name.is_empty() => {
                return Err(SubmissionError::InvalidDescription(
                    "method name is empty".into(),
                ));
            }
            TaskIdentity::Service {
                name, operation, ..
            } if name.is_empty() || operation.is_empty() => {
                return Err(SubmissionError::InvalidDescription(
                    "service name or operation is empty".into(),
                ));
            }
            _ => {}
        }
        if self.flags.num_nodes == 0 {
            return Err(SubmissionError::InvalidDescription(
                "num_nodes must be at least 1".into(),
            ));
        }
        for parameter in &self.parameters {
            if let Parameter::File { path, .. } = parameter {
                if path.as_os_str().is_empty() {
                    return Err(SubmissionError::InvalidDescription(
                        "file parameter has an empty path".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// EXECUTION HANDLE
// ============================================================================

/// Opaque reference into the dispatcher for one execution of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionHandle(pub u64);

// ============================================================================
// TASK
// ============================================================================

/// A task in the graph.
///
/// Predecessor and successor sets are maintained by the graph container
/// so that edge symmetry holds after every mutation; the analyser never
/// touches them directly.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    app_id: AppId,
    description: TaskDescription,
    state: TaskState,
    pub(crate) predecessors: BTreeSet<TaskId>,
    pub(crate) successors: BTreeSet<TaskId>,
    /// Outstanding executions; the task is free once this reaches zero.
    pub(crate) pending_executions: u32,
    pub(crate) execution_handles: Vec<ExecutionHandle>,
    /// Registry accesses to release when the task ends.
    pub(crate) accesses: Vec<RecordedAccess>,
}

impl Task {
    pub fn new(id: TaskId, app_id: AppId, description: TaskDescription) -> Self {
        Self {
            id,
            app_id,
            description,
            state: TaskState::ToAnalyse,
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
            pending_executions: 0,
            execution_handles: Vec::new(),
            accesses: Vec::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    pub fn description(&self) -> &TaskDescription {
        &self.description
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn enforcing(&self) -> Option<TaskId> {
        self.description.enforcing
    }

    pub fn predecessors(&self) -> &BTreeSet<TaskId> {
        &self.predecessors
    }

    pub fn successors(&self) -> &BTreeSet<TaskId> {
        &self.successors
    }

    /// Ready for dispatch: analysed, with every predecessor satisfied.
    pub fn is_ready(&self) -> bool {
        self.state == TaskState::ToAnalyse && self.predecessors.is_empty()
    }

    /// Advance the state machine, rejecting backward or repeated
    /// transitions.
    pub fn set_state(&mut self, to: TaskState) -> Result<(), AnalyserFault> {
        if !self.state.can_transition(to) {
            return Err(AnalyserFault::StateViolation {
                task: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn attach_handle(&mut self, handle: ExecutionHandle) {
        self.execution_handles.push(handle);
    }

    pub fn execution_handles(&self) -> &[ExecutionHandle] {
        &self.execution_handles
    }
}

// ============================================================================
// TESTS
// ============================================================================
