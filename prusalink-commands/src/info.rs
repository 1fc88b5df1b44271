//! Cached printer identification for the respond-with-info handler.
//!
//! Firmware identification is captured opportunistically from whatever
//! `FIRMWARE_NAME:` reply crosses the wire (in answer to an `M115` sent by
//! anyone — the poller's liveness traffic, an operator's own query, or a
//! one-off probe at startup), so answering an info request never needs to
//! enqueue anything on the Serial Queue itself. Grounded in the same shape as
//! `print3rs-core::info::InfoMap`/`Capability`: a small cache of
//! last-observed printer facts, kept fresh by passive observation rather than
//! a live round trip per query.

use std::sync::{Arc, Mutex};

use prusalink_serial::{Dispatcher, Pattern};

/// Last-seen printer identification line.
#[derive(Default)]
pub struct InfoCache {
    firmware: Mutex<Option<String>>,
}

impl InfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last `FIRMWARE_NAME:` line observed, if any arrived yet.
    pub fn firmware(&self) -> Option<String> {
        self.firmware.lock().unwrap().clone()
    }

    fn set_firmware(&self, firmware: String) {
        *self.firmware.lock().unwrap() = Some(firmware);
    }
}

/// Registers a passive observer on `dispatcher` that updates `cache`
/// whenever a `FIRMWARE_NAME:` line crosses the wire.
pub fn register_info_observer(dispatcher: &Dispatcher, cache: Arc<InfoCache>) {
    dispatcher.register_handler(Pattern::prefix("FIRMWARE_NAME:"), move |captures| {
        if let Some(firmware) = captures.into_iter().next() {
            tracing::debug!(%firmware, "observed printer identification");
            cache.set_firmware(firmware);
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn firmware_line_populates_the_cache() {
        let (mut printer_side, host_side) = duplex(256);
        let dispatcher = Dispatcher::spawn(host_side);
        let cache = Arc::new(InfoCache::new());
        register_info_observer(&dispatcher, cache.clone());

        assert_eq!(cache.firmware(), None);

        printer_side.write_all(b"FIRMWARE_NAME:Marlin 2.0.0\n").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(cache.firmware(), Some("Marlin 2.0.0".to_owned()));
    }
}
