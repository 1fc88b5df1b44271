//! Component D — Command Handlers, all built on the same "try until state"
//! shape (spec §4.4): install an expectation, enqueue gcode, wait for the
//! manager to reach the target composed state before a deadline.

use std::time::Duration;

use prusalink_serial::{Instruction, InstructionOutcome, SerialQueue};
use prusalink_state::{CommandId, Expectation, Source, State, StateManager};
use tokio::sync::broadcast;

use crate::{
    command::{CommandKind, CommandOutcome, CommandRequest},
    info::InfoCache,
};

/// How long a try-until-state handler waits before giving up and rejecting.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Dispatch one request to its handler, driven by `manager`, `queue` and the
/// cached printer identification in `info`.
#[tracing::instrument(skip(manager, queue, info), fields(command_id = request.command_id))]
pub async fn handle(request: CommandRequest, manager: &StateManager, queue: &SerialQueue, info: &InfoCache) -> CommandOutcome {
    let CommandRequest { command_id, kind } = request;
    match kind {
        CommandKind::StartPrint { path, job_id } => {
            manager.set_next_job_id(job_id.unwrap_or(command_id));
            try_until_state(
                manager,
                queue,
                command_id,
                vec![Instruction::plain(format!("M23 {path}")), Instruction::plain("M24")],
                State::Printing,
                DEFAULT_DEADLINE,
            )
            .await
        }
        CommandKind::StopPrint => {
            try_until_state(manager, queue, command_id, vec![Instruction::plain("M524")], State::Ready, DEFAULT_DEADLINE).await
        }
        CommandKind::PausePrint => {
            try_until_state(manager, queue, command_id, vec![Instruction::plain("M601")], State::Paused, DEFAULT_DEADLINE).await
        }
        CommandKind::ResumePrint => {
            try_until_state(manager, queue, command_id, vec![Instruction::plain("M602")], State::Printing, DEFAULT_DEADLINE).await
        }
        CommandKind::ResetPrinter => {
            try_until_state(manager, queue, command_id, vec![Instruction::plain("M999")], State::Ready, DEFAULT_DEADLINE).await
        }
        CommandKind::ExecuteGcode { gcode } => execute_gcode(queue, command_id, gcode).await,
        CommandKind::RespondWithInfo => respond_with_info(manager, info, command_id),
    }
}

/// Installs an expectation tagged with `command_id` and `default_source =
/// Connect`, enqueues `gcodes`, then polls the manager's composed state
/// until it reaches `target` or `deadline` elapses.
async fn try_until_state(
    manager: &StateManager,
    queue: &SerialQueue,
    command_id: CommandId,
    gcodes: Vec<Instruction>,
    target: State,
    deadline: Duration,
) -> CommandOutcome {
    let mut changes = manager.subscribe();
    manager.expect(Expectation::new().default_source(Source::Connect).correlation(command_id));
    queue.enqueue_list(gcodes, false);

    let reached = tokio::time::timeout(deadline, wait_for_state(&mut changes, manager, target)).await;

    match reached {
        Ok(()) => CommandOutcome::Finished { command_id },
        Err(_) => {
            tracing::debug!(command_id, ?target, "try-until-state deadline elapsed");
            CommandOutcome::Rejected {
                command_id,
                reason: "timeout".to_owned(),
            }
        }
    }
}

async fn wait_for_state(changes: &mut broadcast::Receiver<prusalink_state::StateChanged>, manager: &StateManager, target: State) {
    if manager.state() == target {
        return;
    }
    loop {
        match changes.recv().await {
            Ok(changed) if changed.state == target => return,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Runs each of `gcode`'s non-blank lines in turn, without touching the
/// state machine. Resolves to `Data` with the per-line confirmations
/// concatenated once every line is confirmed; a line that times out or hits
/// a dead link rejects immediately rather than running the remainder.
async fn execute_gcode(queue: &SerialQueue, command_id: CommandId, gcode: String) -> CommandOutcome {
    let mut confirmations = Vec::new();
    for line in gcode.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let handle = queue.enqueue_one(Instruction::plain(line.to_owned()), false);
        match handle.wait().await {
            InstructionOutcome::Confirmed(_) => confirmations.push("ok".to_owned()),
            InstructionOutcome::Timeout => {
                tracing::debug!(command_id, line, "gcode line was not confirmed in time");
                return CommandOutcome::Rejected {
                    command_id,
                    reason: "timeout".to_owned(),
                };
            }
            InstructionOutcome::LinkFailure => {
                tracing::debug!(command_id, line, "link failed while running gcode");
                return CommandOutcome::Rejected {
                    command_id,
                    reason: "link failure".to_owned(),
                };
            }
        }
    }
    CommandOutcome::Data {
        command_id,
        payload: confirmations.join("\n"),
    }
}

/// Reports the printer's last-observed firmware identification and current
/// composed state; never touches the Serial Queue or installs a state
/// expectation, since both are already known without asking the printer
/// again.
fn respond_with_info(manager: &StateManager, info: &InfoCache, command_id: CommandId) -> CommandOutcome {
    let firmware = info.firmware().unwrap_or_else(|| "unknown".to_owned());
    let state = manager.state();
    tracing::debug!(command_id, firmware = %firmware, ?state, "responding with printer info");
    CommandOutcome::Data {
        command_id,
        payload: format!("firmware={firmware} state={state:?}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use prusalink_serial::Dispatcher;
    use std::time::Duration as StdDuration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn remote_resume_from_paused_finishes_on_firmware_confirmation() {
        let (mut printer_side, host_side) = duplex(1024);
        let dispatcher = Dispatcher::spawn(host_side);
        let manager = std::sync::Arc::new(StateManager::new());
        prusalink_state::register_observers(&dispatcher, manager.clone());
        let queue = SerialQueue::spawn(dispatcher, StdDuration::from_secs(2));
        let info = InfoCache::new();

        manager.printing();
        manager.paused();

        let handler = tokio::spawn({
            let manager = manager.clone();
            let queue = queue.clone();
            async move {
                handle(
                    CommandRequest { command_id: 7, kind: CommandKind::ResumePrint },
                    &manager,
                    &queue,
                    &info,
                )
                .await
            }
        });

        let mut buf = [0u8; 64];
        let n = printer_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"M602\n");
        printer_side.write_all(b"// action:resumed\n").await.unwrap();
        printer_side.write_all(b"ok\n").await.unwrap();

        let outcome = handler.await.unwrap();
        assert_eq!(outcome, CommandOutcome::Finished { command_id: 7 });
    }

    #[tokio::test]
    async fn handler_rejects_on_timeout() {
        let (_printer_side, host_side) = duplex(1024);
        let dispatcher = Dispatcher::spawn(host_side);
        let manager = StateManager::new();
        let queue = SerialQueue::spawn(dispatcher, StdDuration::from_millis(20));

        let outcome = try_until_state(
            &manager,
            &queue,
            9,
            vec![Instruction::plain("M601")],
            State::Paused,
            StdDuration::from_millis(50),
        )
        .await;

        assert_eq!(
            outcome,
            CommandOutcome::Rejected {
                command_id: 9,
                reason: "timeout".to_owned()
            }
        );
    }
}
