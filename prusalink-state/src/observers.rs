//! Wires the manager's mutators up to the canonical wire patterns (spec
//! §4.3.1). The dispatcher owns the callbacks; the manager never needs a
//! reference back to the dispatcher, breaking the cyclic ownership the
//! original design had (spec §9).

use std::sync::Arc;

use prusalink_serial::{Dispatcher, Pattern};

use crate::manager::StateManager;

fn error_pattern() -> Pattern {
    Pattern::new(|line| line.trim().starts_with("Error:Printer stopped due to errors.").then(Vec::new))
}

/// Registers every unsolicited-transition handler in the canonical table.
pub fn register_observers(dispatcher: &Dispatcher, manager: Arc<StateManager>) {
    macro_rules! on {
        ($pattern:expr, $mutator:ident) => {{
            let manager = manager.clone();
            dispatcher.register_handler($pattern, move |_| manager.$mutator());
        }};
    }

    on!(Pattern::literal("ok"), ok);
    on!(Pattern::literal("echo:busy: processing"), busy);
    on!(Pattern::literal("echo:busy: paused for user"), attention);
    on!(Pattern::literal("// action:paused"), paused);
    on!(Pattern::literal("// action:resumed"), resumed);
    on!(Pattern::literal("// action:cancel"), not_printing);
    on!(Pattern::literal("echo:enqueing \"M24\""), printing);
    on!(Pattern::literal("Done printing file"), finished);
    on!(error_pattern(), error);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::{Source, State};
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn observed_line_drives_the_manager() {
        let (mut printer_side, host_side) = duplex(256);
        let dispatcher = Dispatcher::spawn(host_side);
        let manager = Arc::new(StateManager::new());
        register_observers(&dispatcher, manager.clone());

        let mut rx = manager.subscribe();
        printer_side.write_all(b"echo:busy: processing\n").await.unwrap();

        let changed = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(changed.state, State::Busy);
        assert_eq!(changed.source, Some(Source::Marlin));
    }
}
