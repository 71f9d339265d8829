//! # Sluice
//!
//! Dependency-tracking scheduler core for a distributed task runtime.
//!
//! ## Overview
//!
//! Applications submit a stream of task invocations; sluice discovers
//! the data dependencies among them by analyzing parameter access modes
//! against a running history of data versions, builds the task graph
//! incrementally, and releases ready tasks to a downstream dispatcher.
//! Completion notifications flow back and unlock dependents, barriers
//! and end-of-application waits.
//!
//! ## Components
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | `AccessProcessor` | [`access`] | Thread-safe front door; serializes requests |
//! | `TaskAnalyser` | [`analyser`] | Single consumer; owns graph and registry |
//! | `DataInfoProvider` | [`data_info`] | Versioned data registry |
//! | `TaskDispatcher` | [`dispatcher`] | Downstream sink (trait + test mock) |
//!
//! Data flows left to right, control flows back through
//! `task_ended`. All graph state is confined to the analyser task, so
//! the graph itself needs no locks.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sluice::{
//!     AppId, Direction, Parameter, RecordingDispatcher, Runtime, TaskDescription, TaskOutcome,
//! };
//!
//! let dispatcher = Arc::new(RecordingDispatcher::new());
//! let runtime = Runtime::new(dispatcher.clone());
//! let ap = runtime.access();
//!
//! let app = AppId::from_raw(1);
//! let producer = ap.submit_task(
//!     app,
//!     TaskDescription::method("render")
//!         .with_parameter(Parameter::file("/data/frame.raw", Direction::Out)),
//! )?;
//! let consumer = ap.submit_task(
//!     app,
//!     TaskDescription::method("encode")
//!         .with_parameter(Parameter::file("/data/frame.raw", Direction::In)),
//! )?;
//!
//! // The dispatcher receives `producer` now and `consumer` only after
//! // its completion is reported:
//! ap.task_ended(producer, TaskOutcome::Success)?;
//! ap.task_ended(consumer, TaskOutcome::Success)?;
//!
//! let summary = ap.end_of_app(app).await?;
//! assert_eq!(summary.finished, 2);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Ordering guarantees
//!
//! - Requests enqueued by one thread are processed in submission order.
//! - A task's dependents never execute before the task is finished.
//! - A barrier completes exactly when every task its application
//!   submitted before the barrier is terminal.
//! - A failed task cascades `failed` to its transitive dependents; the
//!   failure surfaces in the next barrier or end-of-app aggregate.

pub mod access;
pub mod analyser;
pub mod app;
pub mod data_info;
pub mod dispatcher;
pub mod error;
pub mod graph;
pub mod request;
pub mod runtime;
pub mod task;
pub mod types;

// Re-export the submission surface
pub use access::AccessProcessor;
pub use analyser::TaskAnalyser;
pub use app::{AppStatus, AppSummary};
pub use data_info::{DataAccessGrant, DataInfoProvider};
pub use dispatcher::{DispatchTicket, RecordingDispatcher, TaskDispatcher, TaskOutcome};
pub use error::{AnalyserFault, SluiceError, SubmissionError, TaskException, WaitError};
pub use graph::{GraphSnapshot, TaskGraph, TaskSnapshot};
pub use request::Request;
pub use runtime::Runtime;
pub use task::{
    ExecutionHandle, Parameter, Task, TaskDescription, TaskFlags, TaskIdentity, TaskState,
};
pub use types::{AppId, DataId, DataRef, DataVersion, Direction, TaskId};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn producer_consumer_round_trip() {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let runtime = Runtime::new(dispatcher.clone());
        let ap = runtime.access();
        let app = AppId::from_raw(1);

        let producer = ap
            .submit_task(
                app,
                TaskDescription::method("render")
                    .with_parameter(Parameter::object(1, Direction::Out)),
            )
            .unwrap();
        let consumer = ap
            .submit_task(
                app,
                TaskDescription::method("encode")
                    .with_parameter(Parameter::object(1, Direction::In)),
            )
            .unwrap();

        let snapshot = runtime.snapshot().await.unwrap();
        assert!(snapshot.has_edge(producer, consumer));

        // Only the producer is ready before its completion arrives.
        assert_eq!(dispatcher.arrivals(), vec![producer]);

        ap.task_ended(producer, TaskOutcome::Success).unwrap();
        ap.task_ended(consumer, TaskOutcome::Success).unwrap();

        let summary = ap.end_of_app(app).await.unwrap();
        assert_eq!(summary.finished, 2);
        assert!(summary.is_clean());

        runtime.shutdown().await.unwrap();
    }
}
