//! Stress tests for deep chains and wide fan-out
//!
//! Exercises the analyser at task counts where quadratic bookkeeping or
//! leaked graph entries would show up.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use sluice::{
    AccessProcessor, AppId, Direction, Parameter, RecordingDispatcher, Runtime, TaskDescription,
    TaskOutcome,
};

fn app() -> AppId {
    AppId::from_raw(1)
}

async fn drive_all(ap: &AccessProcessor, dispatcher: &RecordingDispatcher, app: AppId) -> u64 {
    let mut barrier = pin!(ap.barrier(app));
    loop {
        tokio::select! {
            summary = &mut barrier => {
                let summary = summary.expect("barrier");
                assert_eq!(summary.failed, 0);
                return summary.finished;
            }
            _ = tokio::time::sleep(Duration::from_millis(1)) => {
                while let Some(ticket) = dispatcher.next_ready() {
                    ap.task_ended(ticket.task, TaskOutcome::Success).expect("task_ended");
                }
            }
        }
    }
}

#[tokio::test]
async fn long_inout_chain_completes_in_order() {
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let runtime = Runtime::new(dispatcher.clone());
    let ap = runtime.access();

    const CHAIN: usize = 300;
    let mut ids = Vec::with_capacity(CHAIN);
    for i in 0..CHAIN {
        let id = ap
            .submit_task(
                app(),
                TaskDescription::method(format!("link-{i}"))
                    .with_parameter(Parameter::object(1, Direction::InOut)),
            )
            .unwrap();
        ids.push(id);
    }

    let finished = drive_all(&ap, &dispatcher, app()).await;
    assert_eq!(finished as usize, CHAIN);

    // Each link unlocked the next: arrival order is submission order.
    assert_eq!(dispatcher.arrivals(), ids);

    // Nothing lingers in the graph.
    assert!(runtime.snapshot().await.unwrap().is_empty());
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn wide_fan_out_and_join() {
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let runtime = Runtime::new(dispatcher.clone());
    let ap = runtime.access();

    const READERS: usize = 200;
    let producer = ap
        .submit_task(
            app(),
            TaskDescription::method("produce")
                .with_parameter(Parameter::object(1, Direction::Out)),
        )
        .unwrap();
    for i in 0..READERS {
        ap.submit_task(
            app(),
            TaskDescription::method(format!("read-{i}"))
                .with_parameter(Parameter::object(1, Direction::In)),
        )
        .unwrap();
    }
    let join = ap
        .submit_task(
            app(),
            TaskDescription::method("join")
                .with_parameter(Parameter::object(1, Direction::InOut)),
        )
        .unwrap();

    let snapshot = runtime.snapshot().await.unwrap();
    // The join waits on the producer and every reader.
    assert_eq!(
        snapshot.task(join).unwrap().predecessors.len(),
        READERS + 1
    );
    // Only the producer was ready at submission time.
    assert_eq!(dispatcher.arrivals(), vec![producer]);

    let finished = drive_all(&ap, &dispatcher, app()).await;
    assert_eq!(finished as usize, READERS + 2);
    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn many_independent_data_streams() {
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let runtime = Runtime::new(dispatcher.clone());
    let ap = runtime.access();

    // 100 disjoint producer/consumer pairs; no cross-stream edges.
    const STREAMS: u64 = 100;
    for key in 0..STREAMS {
        ap.submit_task(
            app(),
            TaskDescription::method(format!("produce-{key}"))
                .with_parameter(Parameter::object(key, Direction::Out)),
        )
        .unwrap();
        ap.submit_task(
            app(),
            TaskDescription::method(format!("consume-{key}"))
                .with_parameter(Parameter::object(key, Direction::In)),
        )
        .unwrap();
    }

    let snapshot = runtime.snapshot().await.unwrap();
    let ready = snapshot
        .tasks
        .iter()
        .filter(|t| t.predecessors.is_empty())
        .count();
    assert_eq!(ready as u64, STREAMS);

    let finished = drive_all(&ap, &dispatcher, app()).await;
    assert_eq!(finished, STREAMS * 2);
    runtime.shutdown().await.unwrap();
}
