//! Readiness waits
//!
//! Replica set elections, process starts and router startup are awaited by
//! polling the real readiness probe instead of sleeping a fixed time.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Poll `probe` every `poll` until it returns true or `timeout` elapses
///
/// The probe always runs at least once. Returns whether it succeeded.
pub async fn wait_until<F, Fut>(timeout: Duration, poll: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(poll.min(deadline - now)).await;
    }
}
