//! Converts between the wire shapes of `prusalink-connect` (what the remote
//! collaborator sends and receives) and the shapes `prusalink-commands` and
//! `prusalink-state` operate on internally.

use prusalink_commands::{CommandKind, CommandOutcome, CommandRequest};
use prusalink_connect::{CommandEnvelope, Event, EventKind, RemoteCommand};
use prusalink_state::{Source, StateChanged, State};

/// A malformed command body is reported upstream as a rejection rather than
/// silently dropped (spec §7: "no command is silently dropped").
pub fn request_from_envelope(envelope: CommandEnvelope) -> Result<CommandRequest, Event> {
    let kind = match envelope.command {
        RemoteCommand::StartPrint => {
            let path = envelope
                .body
                .as_ref()
                .and_then(|body| body.get("path"))
                .and_then(|path| path.as_str())
                .map(str::to_owned);
            let job_id = envelope.body.as_ref().and_then(|body| body.get("job_id")).and_then(|id| id.as_u64());
            match path {
                Some(path) => CommandKind::StartPrint { path, job_id },
                None => {
                    return Err(Event::new(EventKind::Rejected)
                        .command_id(envelope.command_id)
                        .reason("missing path"))
                }
            }
        }
        RemoteCommand::StopPrint => CommandKind::StopPrint,
        RemoteCommand::PausePrint => CommandKind::PausePrint,
        RemoteCommand::ResumePrint => CommandKind::ResumePrint,
        RemoteCommand::ResetPrinter => CommandKind::ResetPrinter,
        RemoteCommand::SendInfo => CommandKind::RespondWithInfo,
        RemoteCommand::ExecuteGcode => {
            let gcode = envelope
                .body
                .as_ref()
                .and_then(|body| body.get("gcode"))
                .and_then(|gcode| gcode.as_str())
                .map(str::to_owned);
            match gcode {
                Some(gcode) => CommandKind::ExecuteGcode { gcode },
                None => {
                    return Err(Event::new(EventKind::Rejected)
                        .command_id(envelope.command_id)
                        .reason("missing gcode"))
                }
            }
        }
    };
    Ok(CommandRequest { command_id: envelope.command_id, kind })
}

pub fn event_from_outcome(outcome: CommandOutcome) -> Event {
    match outcome {
        CommandOutcome::Finished { command_id } => Event::new(EventKind::Finished).command_id(command_id),
        CommandOutcome::Rejected { command_id, reason } => {
            Event::new(EventKind::Rejected).command_id(command_id).reason(reason)
        }
        CommandOutcome::Data { command_id, payload } => {
            Event::new(EventKind::Finished).command_id(command_id).reason(payload)
        }
    }
}

pub fn event_from_state_changed(changed: StateChanged, job_id: Option<u64>) -> Event {
    let mut event = Event::new(EventKind::StateChanged).state(state_name(changed.state));
    if let Some(source) = changed.source {
        event = event.source(source_name(source));
    }
    if let Some(command_id) = changed.command_id {
        event = event.command_id(command_id);
    }
    if let Some(job_id) = job_id {
        event = event.job_id(job_id);
    }
    event
}

pub fn state_name_owned(state: State) -> String {
    state_name(state).to_owned()
}

fn state_name(state: State) -> &'static str {
    match state {
        State::Ready => "READY",
        State::Busy => "BUSY",
        State::Printing => "PRINTING",
        State::Paused => "PAUSED",
        State::Finished => "FINISHED",
        State::Attention => "ATTENTION",
        State::Error => "ERROR",
    }
}

fn source_name(source: Source) -> &'static str {
    match source {
        Source::User => "USER",
        Source::Marlin => "MARLIN",
        Source::Connect => "CONNECT",
        Source::Wui => "WUI",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_print_without_a_path_is_rejected_up_front() {
        let envelope = CommandEnvelope { command: RemoteCommand::StartPrint, command_id: 1, body: None };
        assert!(request_from_envelope(envelope).is_err());
    }

    #[test]
    fn start_print_with_a_path_translates() {
        let envelope = CommandEnvelope {
            command: RemoteCommand::StartPrint,
            command_id: 2,
            body: Some(json!({"path": "/usb/benchy.gcode"})),
        };
        let request = request_from_envelope(envelope).unwrap();
        match request.kind {
            CommandKind::StartPrint { path, .. } => assert_eq!(path, "/usb/benchy.gcode"),
            _ => panic!("wrong kind"),
        }
    }
}
