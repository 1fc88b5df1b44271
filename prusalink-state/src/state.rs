//! The state data model (spec §3): three independent slots composed by
//! precedence into a single externally-visible state.

/// The composed, externally-visible printer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Ready,
    Busy,
    Printing,
    Paused,
    Finished,
    Attention,
    Error,
}

/// Who caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    User,
    Marlin,
    Connect,
    Wui,
}

/// The `base` slot: always present, default `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseState {
    Ready,
    Busy,
}

impl Default for BaseState {
    fn default() -> Self {
        BaseState::Ready
    }
}

/// The `printing` slot: present only while a print job is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintingState {
    Printing,
    Paused,
    Finished,
}

/// The `override` slot: present only while the printer demands attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideState {
    Attention,
    Error,
}

impl From<BaseState> for State {
    fn from(value: BaseState) -> Self {
        match value {
            BaseState::Ready => State::Ready,
            BaseState::Busy => State::Busy,
        }
    }
}

impl From<PrintingState> for State {
    fn from(value: PrintingState) -> Self {
        match value {
            PrintingState::Printing => State::Printing,
            PrintingState::Paused => State::Paused,
            PrintingState::Finished => State::Finished,
        }
    }
}

impl From<OverrideState> for State {
    fn from(value: OverrideState) -> Self {
        match value {
            OverrideState::Attention => State::Attention,
            OverrideState::Error => State::Error,
        }
    }
}

/// Derives the composed state by precedence: override, then printing, then base.
/// The composed state is always a pure function of the three slots; nothing here
/// is ever cached separately from this derivation except for change detection.
pub(crate) fn compose(base: BaseState, printing: Option<PrintingState>, ovr: Option<OverrideState>) -> State {
    if let Some(ovr) = ovr {
        return ovr.into();
    }
    if let Some(printing) = printing {
        return printing.into();
    }
    base.into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn precedence_is_override_then_printing_then_base() {
        assert_eq!(compose(BaseState::Ready, None, None), State::Ready);
        assert_eq!(compose(BaseState::Busy, None, None), State::Busy);
        assert_eq!(
            compose(BaseState::Busy, Some(PrintingState::Printing), None),
            State::Printing
        );
        assert_eq!(
            compose(BaseState::Ready, Some(PrintingState::Printing), Some(OverrideState::Error)),
            State::Error
        );
    }
}
