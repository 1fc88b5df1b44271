//! The expectation record (spec §3/§4.3.3) used to attribute a composed-state
//! transition to whoever caused it.

use std::collections::HashMap;

use crate::state::{Source, State};

/// Opaque command identifier from the remote service, echoed back on the
/// resulting outbound event.
pub type CommandId = u64;

/// Declares, ahead of time, what a forthcoming state transition is expected
/// to look like and who should be credited for it.
#[derive(Debug, Clone, Default)]
pub struct Expectation {
    pub(crate) to_states: HashMap<State, Source>,
    pub(crate) from_states: HashMap<State, Source>,
    pub(crate) default_source: Option<Source>,
    pub(crate) correlation: Option<CommandId>,
}

impl Expectation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect the composed state to become `state`, crediting `source`.
    pub fn to(mut self, state: State, source: Source) -> Self {
        self.to_states.insert(state, source);
        self
    }

    /// Expect the composed state to leave `state`, crediting `source`.
    pub fn from(mut self, state: State, source: Source) -> Self {
        self.from_states.insert(state, source);
        self
    }

    /// Fallback source if neither `to` nor `from` matched.
    pub fn default_source(mut self, source: Source) -> Self {
        self.default_source = Some(source);
        self
    }

    /// Tag the change with a remote command's correlation id.
    pub fn correlation(mut self, id: CommandId) -> Self {
        self.correlation = Some(id);
        self
    }

    /// True if this expectation has any bearing on the `last -> curr` pair:
    /// `curr` is a key of `to_states`, `last` is a key of `from_states`, or a
    /// default source is set.
    pub(crate) fn covers(&self, last: State, curr: State) -> bool {
        self.to_states.contains_key(&curr) || self.from_states.contains_key(&last) || self.default_source.is_some()
    }
}

/// Resolves the source and command id to attach to a `last -> curr` change,
/// given whatever expectation (if any) was outstanding (spec §4.3.3).
pub(crate) fn attribute(
    expectation: Option<&Expectation>,
    last: State,
    curr: State,
) -> (Option<Source>, Option<CommandId>) {
    let Some(expectation) = expectation else {
        return (None, None);
    };
    if !expectation.covers(last, curr) {
        return (None, None);
    }

    let src_from = expectation.from_states.get(&last).copied();
    let src_to = expectation.to_states.get(&curr).copied();

    let source = match (src_from, src_to) {
        (Some(from), Some(to)) if from != to => Some(from),
        (Some(from), _) => Some(from),
        (None, Some(to)) => Some(to),
        (None, None) => expectation.default_source,
    };
    (source, expectation.correlation)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prefers_from_source_on_conflict() {
        let expectation = Expectation::new()
            .from(State::Attention, Source::User)
            .to(State::Ready, Source::Marlin);
        let (source, _) = attribute(Some(&expectation), State::Attention, State::Ready);
        assert_eq!(source, Some(Source::User));
    }

    #[test]
    fn falls_back_to_default_source() {
        let expectation = Expectation::new().default_source(Source::Connect);
        let (source, _) = attribute(Some(&expectation), State::Ready, State::Busy);
        assert_eq!(source, Some(Source::Connect));
    }

    #[test]
    fn no_expectation_is_unspecified() {
        let (source, command_id) = attribute(None, State::Ready, State::Busy);
        assert_eq!(source, None);
        assert_eq!(command_id, None);
    }

    #[test]
    fn unrelated_expectation_does_not_apply() {
        let expectation = Expectation::new().to(State::Error, Source::Wui);
        let (source, _) = attribute(Some(&expectation), State::Ready, State::Busy);
        assert_eq!(source, None);
    }
}
