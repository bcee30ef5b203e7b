//! Tests for the tokio bridge

use std::time::Duration;

use threadweaver::runtime::TokioBridge;
use threadweaver::{JobHandle, Weaver, WeaverConfig, WeaverEvent};

fn sleeper(ms: u64) -> JobHandle {
    JobHandle::from_fn(move |_| {
        std::thread::sleep(Duration::from_millis(ms));
        Ok(())
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_finish_async_waits_for_jobs() {
    let weaver = Weaver::new(WeaverConfig::new().with_worker_count(2)).unwrap();
    let jobs: Vec<_> = (0..4).map(|_| sleeper(20)).collect();
    weaver.enqueue_all(&jobs).unwrap();

    weaver.finish_async().await;
    assert!(weaver.is_idle());
    assert!(jobs.iter().all(JobHandle::is_finished));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bridge_forwards_events() {
    let bridge = TokioBridge::current().expect("inside a tokio runtime");
    let weaver = Weaver::new(WeaverConfig::new().with_worker_count(1)).unwrap();
    let mut events = bridge.forward_events(weaver.subscribe());

    weaver.enqueue(&sleeper(1)).unwrap();
    bridge.finish(&weaver).await;

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if matches!(event, WeaverEvent::Finished) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(finished);
}

#[test]
fn test_bridge_requires_runtime() {
    assert!(TokioBridge::current().is_none());
}
