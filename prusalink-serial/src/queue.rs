//! Component B — Serial Queue.
//!
//! Orders outgoing instructions, transmits the head one at a time, and
//! resolves each instruction's handle once the printer's `ok` arrives (or
//! the confirmation deadline passes, or the link fails). Built on top of
//! [`Dispatcher`] rather than owning the link itself — the queue is simply
//! the disciplined writer that the dispatcher's write primitive and line
//! broadcast exist to support.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    sync::{broadcast, oneshot, Notify},
    task::JoinHandle,
};

use prusalink_gcode::{frame_checksummed, frame_plain, SequenceCounter};

use crate::{
    dispatcher::Dispatcher,
    instruction::{CapturedOutput, Instruction, InstructionOutcome, Variant},
    pattern::ok_terminator,
};

struct Running {
    message: String,
    to_checksum: bool,
    variant: Variant,
    outcome_tx: oneshot::Sender<InstructionOutcome>,
}

/// Resolves to the instruction's final outcome once it retires.
pub struct InstructionHandle(oneshot::Receiver<InstructionOutcome>);

impl InstructionHandle {
    pub async fn wait(self) -> InstructionOutcome {
        self.0.await.unwrap_or(InstructionOutcome::LinkFailure)
    }
}

#[derive(Clone)]
pub struct SerialQueue {
    queue: Arc<Mutex<VecDeque<Running>>>,
    notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SerialQueue {
    /// Spawn the transmitter loop (the writer context) driving `dispatcher`.
    pub fn spawn(dispatcher: Dispatcher, confirm_timeout: Duration) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());
        let running = Arc::new(AtomicBool::new(true));
        let stop_notify = Arc::new(Notify::new());
        let sequence = Arc::new(SequenceCounter::new());

        let task = tokio::spawn(transmitter_loop(
            dispatcher,
            queue.clone(),
            notify.clone(),
            sequence,
            confirm_timeout,
            running.clone(),
            stop_notify.clone(),
        ));

        Self {
            queue,
            notify,
            running,
            stop_notify,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Request the transmitter loop to stop (spec §5's cancellation token,
    /// applied to the writer context). Idempotent; does not affect
    /// instructions already confirmed or already retired.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();
        self.stop_notify.notify_waiters();
    }

    /// Await the transmitter loop exiting after [`SerialQueue::stop`].
    pub async fn join(&self) {
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Append (or push-front) a single instruction.
    pub fn enqueue_one(&self, instruction: Instruction, front: bool) -> InstructionHandle {
        let (tx, rx) = oneshot::channel();
        let running = Running {
            message: instruction.message,
            to_checksum: instruction.to_checksum,
            variant: instruction.variant,
            outcome_tx: tx,
        };
        {
            let mut queue = self.queue.lock().unwrap();
            if front {
                queue.push_front(running);
            } else {
                queue.push_back(running);
            }
        }
        self.notify.notify_one();
        InstructionHandle(rx)
    }

    /// Atomic batch insertion preserving relative order. With `front=true`
    /// the first element of `instructions` ends up earliest in the queue.
    pub fn enqueue_list(&self, instructions: Vec<Instruction>, front: bool) -> Vec<InstructionHandle> {
        let mut handles = Vec::with_capacity(instructions.len());
        let mut running_batch = VecDeque::with_capacity(instructions.len());
        for instruction in instructions {
            let (tx, rx) = oneshot::channel();
            running_batch.push_back(Running {
                message: instruction.message,
                to_checksum: instruction.to_checksum,
                variant: instruction.variant,
                outcome_tx: tx,
            });
            handles.push(InstructionHandle(rx));
        }

        {
            let mut queue = self.queue.lock().unwrap();
            if front {
                for running in running_batch.into_iter().rev() {
                    queue.push_front(running);
                }
            } else {
                queue.extend(running_batch);
            }
        }
        self.notify.notify_one();
        handles
    }
}

async fn transmitter_loop(
    dispatcher: Dispatcher,
    queue: Arc<Mutex<VecDeque<Running>>>,
    notify: Arc<Notify>,
    sequence: Arc<SequenceCounter>,
    confirm_timeout: Duration,
    running_flag: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
) {
    while running_flag.load(Ordering::SeqCst) {
        let head = queue.lock().unwrap().pop_front();
        let head = match head {
            Some(head) => head,
            None => {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = stop_notify.notified() => break,
                }
                continue;
            }
        };

        let frame = if head.to_checksum {
            frame_checksummed(&head.message, sequence.next())
        } else {
            frame_plain(&head.message)
        };

        let mut lines_rx = dispatcher.subscribe_lines();
        if dispatcher.write(frame).await.is_err() {
            let _ = head.outcome_tx.send(InstructionOutcome::LinkFailure);
            drain_with_link_failure(&queue);
            return;
        }

        let outcome = tokio::select! {
            outcome = await_confirmation(&mut lines_rx, &head.variant) => outcome,
            _ = tokio::time::sleep(confirm_timeout) => InstructionOutcome::Timeout,
            _ = dispatcher.closed() => {
                let _ = head.outcome_tx.send(InstructionOutcome::LinkFailure);
                drain_with_link_failure(&queue);
                return;
            }
            _ = stop_notify.notified() => {
                let _ = head.outcome_tx.send(InstructionOutcome::Timeout);
                break;
            }
        };
        let _ = head.outcome_tx.send(outcome);
    }
}

async fn await_confirmation(
    lines_rx: &mut broadcast::Receiver<bytes::Bytes>,
    variant: &Variant,
) -> InstructionOutcome {
    let ok_pattern = ok_terminator();
    let mut matched: Option<crate::pattern::Captures> = None;
    let mut collecting = false;
    let mut collected: Vec<String> = Vec::new();

    loop {
        let line = match lines_rx.recv().await {
            Ok(line) => line,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return InstructionOutcome::LinkFailure,
        };
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();

        match variant {
            Variant::Plain => {}
            Variant::Matchable(pattern) => {
                if matched.is_none() {
                    if let Some(captures) = pattern.matches(text) {
                        matched = Some(captures);
                    }
                }
            }
            Variant::Collecting { begin, end } => {
                if !collecting {
                    if begin.matches(text).is_some() {
                        collecting = true;
                    }
                } else if end.matches(text).is_some() {
                    collecting = false;
                } else {
                    collected.push(text.to_owned());
                }
            }
        }

        if ok_pattern.matches(text).is_some() {
            let captured = match variant {
                Variant::Plain => CapturedOutput::None,
                Variant::Matchable(_) => matched
                    .take()
                    .map(CapturedOutput::Matched)
                    .unwrap_or(CapturedOutput::None),
                Variant::Collecting { .. } => CapturedOutput::Collected(std::mem::take(&mut collected)),
            };
            return InstructionOutcome::Confirmed(captured);
        }
    }
}

fn drain_with_link_failure(queue: &Arc<Mutex<VecDeque<Running>>>) {
    let mut queue = queue.lock().unwrap();
    while let Some(running) = queue.pop_front() {
        let _ = running.outcome_tx.send(InstructionOutcome::LinkFailure);
    }
}
