//! Component C's active-reconciliation half (spec §4.3.2): a ticker that
//! nudges the manager toward ground truth between unsolicited transitions.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use prusalink_serial::{Dispatcher, Pattern};

use crate::{
    expectation::Expectation,
    manager::StateManager,
    state::{PrintingState, Source, State},
};

fn progress_pattern() -> Pattern {
    Pattern::prefix("SD printing byte ")
}

/// Matches either branch of `^(Not SD printing)$|^(\d+:\d+)$`, returning a
/// marker capture so the caller can tell which one fired.
fn sd_status_pattern() -> Pattern {
    Pattern::new(|line| {
        let line = line.trim();
        if line == "Not SD printing" {
            return Some(vec!["not_sd_printing".to_owned()]);
        }
        let (left, right) = line.split_once(':')?;
        (!left.is_empty() && !right.is_empty() && left.bytes().all(|b| b.is_ascii_digit()) && right.bytes().all(|b| b.is_ascii_digit()))
            .then(|| vec!["printing".to_owned()])
    })
}

fn parse_progress(captured: &str) -> Option<u32> {
    let (current, total) = captured.split_once('/')?;
    let current: u64 = current.trim().parse().ok()?;
    let total: u64 = total.trim().parse().ok()?;
    if total == 0 {
        return None;
    }
    Some(((current * 100) / total) as u32)
}

/// Handle for the background poller. Dropping it does not stop the loop;
/// call [`Poller::stop`] and await [`Poller::join`] for an orderly shutdown.
pub struct Poller {
    running: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl Poller {
    /// Spawn the poller context, ticking every `status_update_interval` and
    /// observing cancellation at `quit_interval` granularity (spec §5).
    pub fn spawn(
        dispatcher: Dispatcher,
        manager: Arc<StateManager>,
        status_update_interval: Duration,
        quit_interval: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run(dispatcher, manager, status_update_interval, quit_interval, running.clone()));
        Self { running, task }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

async fn run(
    dispatcher: Dispatcher,
    manager: Arc<StateManager>,
    status_update_interval: Duration,
    quit_interval: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = tokio::time::sleep(status_update_interval) => {
                tick(&dispatcher, &manager).await;
            }
            _ = tokio::time::sleep(quit_interval) => {}
        }
    }
}

async fn tick(dispatcher: &Dispatcher, manager: &StateManager) {
    if manager.is_busy() {
        tracing::debug!("poller skipping reconciliation while busy, sending a liveness ping instead");
        let _ = dispatcher.write(Bytes::from_static(b"PRUSA PING\n")).await;
        return;
    }

    if manager.printing_state() == Some(PrintingState::Printing) {
        match dispatcher
            .write_match(Bytes::from_static(b"M27\n"), progress_pattern(), Duration::from_secs(2))
            .await
        {
            Ok(captures) => {
                if let Some(percent) = captures.first().and_then(|c| parse_progress(c)) {
                    if percent >= 100 {
                        manager.expect(Expectation::new().to(State::Finished, Source::Marlin));
                        manager.finished();
                    }
                }
            }
            Err(_) => tracing::debug!("printer did not report progress in time"),
        }
    }

    match dispatcher
        .write_match(Bytes::from_static(b"M27\n"), sd_status_pattern(), Duration::from_secs(2))
        .await
    {
        Ok(captures) => {
            let not_sd_printing = captures.first().map(String::as_str) == Some("not_sd_printing");
            // Paused SD prints report "Not SD printing" too; do not exit the
            // printing lifecycle on that exception (spec §4.3.2 step 3).
            if not_sd_printing && manager.printing_state() != Some(PrintingState::Paused) {
                manager.not_printing();
            } else {
                manager.printing();
            }
        }
        Err(_) => tracing::debug!("printer did not report SD status in time"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manager::StateManager;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[test]
    fn progress_is_a_percentage_of_bytes() {
        assert_eq!(parse_progress("123/456"), Some(26));
        assert_eq!(parse_progress("456/456"), Some(100));
        assert_eq!(parse_progress("junk"), None);
    }

    #[test]
    fn sd_status_pattern_distinguishes_branches() {
        let pattern = sd_status_pattern();
        assert_eq!(pattern.matches("Not SD printing"), Some(vec!["not_sd_printing".to_owned()]));
        assert_eq!(pattern.matches("12:34"), Some(vec!["printing".to_owned()]));
        assert_eq!(pattern.matches("garbage"), None);
    }

    /// Scenario (f): a paused SD print reports "Not SD printing" too; the
    /// paused exception must keep the manager from leaving the printing
    /// lifecycle on that reply.
    #[tokio::test]
    async fn sd_poll_while_paused_does_not_leave_printing_lifecycle() {
        let (mut printer_side, host_side) = duplex(1024);
        let dispatcher = Dispatcher::spawn(host_side);
        let manager = Arc::new(StateManager::new());

        manager.printing();
        manager.paused();
        let mut rx = manager.subscribe();

        let tick_task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let manager = manager.clone();
            async move { tick(&dispatcher, &manager).await }
        });

        let mut buf = [0u8; 64];
        let n = printer_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"M27\n");
        printer_side.write_all(b"Not SD printing\n").await.unwrap();
        tick_task.await.unwrap();

        assert_eq!(manager.printing_state(), Some(PrintingState::Paused));
        assert!(rx.try_recv().is_err());
    }
}
