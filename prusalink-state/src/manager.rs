//! Component C — the State Manager.

use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::{
    expectation::{attribute, CommandId, Expectation},
    state::{compose, BaseState, OverrideState, PrintingState, Source, State},
};

/// Emitted once per composed-state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChanged {
    pub state: State,
    pub source: Option<Source>,
    pub command_id: Option<CommandId>,
}

struct Inner {
    base: BaseState,
    printing: Option<PrintingState>,
    override_state: Option<OverrideState>,
    internal_busy: bool,
    expectation: Option<Expectation>,
    last_composed: State,
    job_id: Option<u64>,
}

impl Inner {
    fn composed(&self) -> State {
        compose(self.base, self.printing, self.override_state)
    }
}

/// Holds the three layered state slots and emits `state_changed` for every
/// composed-state transition, attributing each to a [`Source`].
///
/// The three slots, the composed-state derivation, and expectation
/// consumption are all guarded by a single mutex taken for one short
/// critical section per mutation, matching the single-writer reader context
/// this type is driven from.
pub struct StateManager {
    inner: Mutex<Inner>,
    state_changed_tx: broadcast::Sender<StateChanged>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let (state_changed_tx, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner {
                base: BaseState::Ready,
                printing: None,
                override_state: None,
                internal_busy: false,
                expectation: None,
                last_composed: State::Ready,
                job_id: None,
            }),
            state_changed_tx,
        }
    }

    /// Current composed state.
    pub fn state(&self) -> State {
        self.inner.lock().unwrap().composed()
    }

    /// Current `printing` slot, for components that need to distinguish
    /// "not tracking a print" from the composed state alone.
    pub fn printing_state(&self) -> Option<PrintingState> {
        self.inner.lock().unwrap().printing
    }

    /// True while the base state is busy or a component has asserted the
    /// internal busy flag (spec §4.3.2 step 1) -- used by the poller to
    /// suppress polling that would otherwise confuse the firmware.
    pub fn is_busy(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.internal_busy || inner.base == BaseState::Busy
    }

    /// Assert or clear the internal busy flag (e.g. while streaming a file).
    pub fn set_internal_busy(&self, busy: bool) {
        self.inner.lock().unwrap().internal_busy = busy;
    }

    /// The job id of the print currently tracked, if any. Set when a print
    /// starts and cleared once it stops being tracked (spec §4.3
    /// SUPPLEMENT); surfaced read-only for the outbound event's `job_id`
    /// field.
    pub fn job_id(&self) -> Option<u64> {
        self.inner.lock().unwrap().job_id
    }

    /// Assign the job id a forthcoming `printing()` call should pick up.
    /// Called by the start-print handler before enqueueing `M24`.
    pub fn set_next_job_id(&self, job_id: u64) {
        self.inner.lock().unwrap().job_id = Some(job_id);
    }

    /// A fresh view of every composed-state change from here on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.state_changed_tx.subscribe()
    }

    /// Install an expectation ahead of a remote command, overriding whatever
    /// default the next mutator would otherwise install.
    pub fn expect(&self, expectation: Expectation) {
        let mut inner = self.inner.lock().unwrap();
        if inner.expectation.is_some() {
            tracing::debug!("overriding an already-installed state expectation");
        }
        inner.expectation = Some(expectation);
    }

    fn with_expectation(&self, default: Option<Expectation>, mutate: impl FnOnce(&mut Inner)) {
        let mut inner = self.inner.lock().unwrap();

        let installed_default = if inner.expectation.is_none() {
            if let Some(default) = default {
                inner.expectation = Some(default);
                true
            } else {
                false
            }
        } else {
            tracing::debug!("default expected state change overridden by an already-installed expectation");
            false
        };

        let before = inner.last_composed;
        mutate(&mut inner);
        let after = inner.composed();

        if after == before {
            if installed_default {
                inner.expectation = None;
            }
            return;
        }

        let (source, command_id) = attribute(inner.expectation.as_ref(), before, after);
        if source.is_none() {
            tracing::debug!("unexpected composed state transition {before:?} -> {after:?}");
        }
        inner.expectation = None;
        inner.last_composed = after;
        let changed = StateChanged { state: after, source, command_id };
        drop(inner);
        let _ = self.state_changed_tx.send(changed);
    }

    /// `^echo:enqueing "M24"$` / start-print command: begin tracking a print.
    pub fn printing(&self) {
        self.with_expectation(Some(Expectation::new().to(State::Printing, Source::User)), |inner| {
            if inner.printing.is_none() {
                inner.printing = Some(PrintingState::Printing);
            }
        });
    }

    /// `^// action:cancel$`: stop tracking a print, whatever state it was in.
    pub fn not_printing(&self) {
        self.with_expectation(
            Some(
                Expectation::new()
                    .from(State::Printing, Source::Marlin)
                    .from(State::Paused, Source::Marlin)
                    .from(State::Finished, Source::Marlin),
            ),
            |inner| {
                if inner.printing.is_some() {
                    inner.printing = None;
                    inner.job_id = None;
                }
            },
        );
    }

    /// `Done printing file`, or the poller observing 100% progress.
    pub fn finished(&self) {
        self.with_expectation(Some(Expectation::new().to(State::Finished, Source::Marlin)), |inner| {
            if inner.printing == Some(PrintingState::Printing) {
                inner.printing = Some(PrintingState::Finished);
            }
        });
    }

    /// `^echo:busy: processing$`: firmware reports busy.
    pub fn busy(&self) {
        self.with_expectation(Some(Expectation::new().to(State::Busy, Source::Marlin)), |inner| {
            if inner.base == BaseState::Ready {
                inner.base = BaseState::Busy;
            }
        });
    }

    /// `^// action:paused$`.
    ///
    /// Embedded `M601`-induced pauses are indistinguishable on the wire from
    /// a physical-button pause; both attribute to `User`.
    pub fn paused(&self) {
        self.with_expectation(Some(Expectation::new().to(State::Paused, Source::User)), |inner| {
            if inner.printing == Some(PrintingState::Printing) {
                inner.printing = Some(PrintingState::Paused);
            }
        });
    }

    /// `^// action:resumed$`.
    pub fn resumed(&self) {
        self.with_expectation(Some(Expectation::new().to(State::Printing, Source::User)), |inner| {
            if inner.printing == Some(PrintingState::Paused) {
                inner.printing = Some(PrintingState::Printing);
            }
        });
    }

    /// `^ok$`: clears an override or a latched `Finished`, and base busy.
    pub fn ok(&self) {
        self.with_expectation(
            Some(
                Expectation::new()
                    .to(State::Ready, Source::Marlin)
                    .from(State::Attention, Source::User)
                    .from(State::Error, Source::User),
            ),
            |inner| {
                if inner.override_state.is_some() {
                    inner.override_state = None;
                }
                if inner.printing == Some(PrintingState::Finished) {
                    inner.printing = None;
                }
                if inner.base == BaseState::Busy {
                    inner.base = BaseState::Ready;
                }
            },
        );
    }

    /// `^echo:busy: paused for user$`: the printer needs a human.
    pub fn attention(&self) {
        self.with_expectation(Some(Expectation::new().to(State::Attention, Source::User)), |inner| {
            inner.override_state = Some(OverrideState::Attention);
        });
    }

    /// `^Error:Printer stopped due to errors\..*`.
    pub fn error(&self) {
        self.with_expectation(Some(Expectation::new().to(State::Error, Source::Wui)), |inner| {
            inner.override_state = Some(OverrideState::Error);
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn recv_one(rx: &mut broadcast::Receiver<StateChanged>) -> StateChanged {
        rx.try_recv().expect("expected a state_changed emission")
    }

    #[test]
    fn local_pause_while_printing_attributes_to_user() {
        let manager = StateManager::new();
        manager.printing();
        let mut rx = manager.subscribe();

        manager.paused();
        let changed = recv_one(&mut rx);
        assert_eq!(changed.state, State::Paused);
        assert_eq!(changed.source, Some(Source::User));
        assert_eq!(changed.command_id, None);
    }

    #[test]
    fn remote_resume_from_paused_attributes_to_connect_with_correlation() {
        let manager = StateManager::new();
        manager.printing();
        manager.paused();
        let mut rx = manager.subscribe();

        manager.expect(Expectation::new().to(State::Printing, Source::Connect).correlation(7));
        manager.resumed();

        let changed = recv_one(&mut rx);
        assert_eq!(changed.state, State::Printing);
        assert_eq!(changed.source, Some(Source::Connect));
        assert_eq!(changed.command_id, Some(7));
    }

    #[test]
    fn firmware_finish_then_ok_clears_to_ready() {
        let manager = StateManager::new();
        manager.printing();
        let mut rx = manager.subscribe();

        manager.finished();
        let first = recv_one(&mut rx);
        assert_eq!(first.state, State::Finished);
        assert_eq!(first.source, Some(Source::Marlin));

        manager.ok();
        let second = recv_one(&mut rx);
        assert_eq!(second.state, State::Ready);
        assert_eq!(second.source, Some(Source::Marlin));
    }

    #[test]
    fn attention_then_recovery() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        manager.attention();
        let first = recv_one(&mut rx);
        assert_eq!(first.state, State::Attention);
        assert_eq!(first.source, Some(Source::User));

        manager.ok();
        let second = recv_one(&mut rx);
        assert_eq!(second.state, State::Ready);
        assert_eq!(second.source, Some(Source::User));
    }

    #[test]
    fn poll_driven_finish_without_firmware_line() {
        let manager = StateManager::new();
        manager.printing();
        let mut rx = manager.subscribe();

        manager.expect(Expectation::new().to(State::Finished, Source::Marlin));
        manager.finished();

        let changed = recv_one(&mut rx);
        assert_eq!(changed.state, State::Finished);
        assert_eq!(changed.source, Some(Source::Marlin));
    }

    #[test]
    fn no_spurious_emission_when_mutator_is_a_no_op() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();
        manager.resumed(); // nothing was paused
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.state(), State::Ready);
    }

    #[test]
    fn job_id_is_cleared_once_printing_stops() {
        let manager = StateManager::new();
        manager.set_next_job_id(42);
        manager.printing();
        assert_eq!(manager.job_id(), Some(42));

        manager.not_printing();
        assert_eq!(manager.job_id(), None);
    }

    #[test]
    fn expectation_slot_is_single_shot() {
        let manager = StateManager::new();
        manager.expect(Expectation::new().to(State::Busy, Source::Connect).correlation(3));
        manager.busy();
        // A second, unrelated transition with no fresh expectation is unattributed.
        let mut rx = manager.subscribe();
        manager.ok();
        let changed = recv_one(&mut rx);
        assert_eq!(changed.source, Some(Source::Marlin)); // ok()'s own default applies
    }
}
