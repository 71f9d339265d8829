//! NewType wrappers for the scheduler's domain identifiers
//!
//! Zero-cost id types that prevent mixing task, application and data
//! identifiers, plus the access-direction vocabulary shared by the
//! analyser and the data registry.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// TASK ID
// ============================================================================

/// Strongly-typed task identifier.
///
/// Ids are allocated by the runtime's atomic counter, are unique for the
/// process lifetime and start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// First id handed out by a fresh runtime.
    pub const FIRST: TaskId = TaskId(1);

    pub fn from_raw(id: u64) -> Self {
        TaskId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('t').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(TaskId)
            .map_err(|_| IdParseError::new("task id", s))
    }
}

// ============================================================================
// APPLICATION ID
// ============================================================================

/// Identifier of one submitting application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(u64);

impl AppId {
    pub fn from_raw(id: u64) -> Self {
        AppId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app{}", self.0)
    }
}

// ============================================================================
// DATA ID & VERSION
// ============================================================================

/// Identifier of one logical datum tracked by the data registry.
///
/// Assigned by the registry on first observation of a file path or
/// object key; opaque to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataId(u64);

impl DataId {
    pub fn from_raw(id: u64) -> Self {
        DataId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

/// Version counter on a [`DataId`]. Strictly monotonic per datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataVersion(u32);

impl DataVersion {
    /// Version of a datum that has never been written by a task.
    pub const INITIAL: DataVersion = DataVersion(1);

    pub fn from_raw(v: u32) -> Self {
        DataVersion(v)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// The version a new writer will produce.
    pub fn next(self) -> DataVersion {
        DataVersion(self.0 + 1)
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// ACCESS DIRECTION
// ============================================================================

/// How a parameter accesses its datum.
///
/// The direction drives edge creation in the analyser: reads order after
/// the current producer, writes additionally order after the current
/// readers and bump the version. `Concurrent` and `Commutative` peers
/// share one access group and get no edges among one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    InOut,
    Concurrent,
    Commutative,
}

impl Direction {
    /// Does the access observe the current version?
    pub fn reads(self) -> bool {
        !matches!(self, Direction::Out)
    }

    /// Does the access produce a new version?
    pub fn writes(self) -> bool {
        !matches!(self, Direction::In)
    }

    /// Group accesses join an open access group instead of ordering
    /// against their peers.
    pub fn is_grouped(self) -> bool {
        matches!(self, Direction::Concurrent | Direction::Commutative)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
            Direction::InOut => write!(f, "inout"),
            Direction::Concurrent => write!(f, "concurrent"),
            Direction::Commutative => write!(f, "commutative"),
        }
    }
}

// ============================================================================
// DATA REFERENCE
// ============================================================================

/// Application-side reference to a logical datum.
///
/// Files are identified by path (compared canonicalized by the
/// registry); everything else by an opaque key chosen by the
/// application, stable across accesses to the same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataRef {
    /// An object, stream or collection known to the application by key.
    Object(u64),
    /// A file on shared storage.
    File(PathBuf),
}

impl DataRef {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        DataRef::File(path.into())
    }

    pub fn object(key: u64) -> Self {
        DataRef::Object(key)
    }
}

impl fmt::Display for DataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRef::Object(key) => write!(f, "obj:{key}"),
            DataRef::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

// ============================================================================
// ID PARSE ERROR
// ============================================================================

#[derive(Debug, thiserror::Error)]
#[error("invalid {kind}: {input}")]
pub struct IdParseError {
    kind: &'static str,
    input: String,
}

impl IdParseError {
    fn new(kind: &'static str, input: &str) -> Self {
        Self {
            kind,
            input: input.to_string(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
