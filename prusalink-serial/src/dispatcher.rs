//! Component A — Serial Line Dispatcher.
//!
//! Owns the reader and writer contexts for a single link (serial port or
//! TCP stream, anything implementing `AsyncRead + AsyncWrite`). Reads are
//! split into lines and fanned out, in wire order, to every registered
//! handler whose pattern matches, then broadcast to anyone subscribed via
//! [`Dispatcher::subscribe_lines`] (this is how [`Dispatcher::write_match`]
//! and the serial queue observe printer output without the dispatcher
//! needing to know about them). Writes are serialized through a single
//! mpsc channel drained by one writer task, so issue order is preserved
//! (teacher pattern: `print3rs_core::printer_com_task`).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{broadcast, mpsc, Notify},
    task::JoinHandle,
};

use crate::{
    error::Error,
    pattern::{Captures, Pattern},
};

pub type Handler = Arc<dyn Fn(Captures) + Send + Sync>;

struct HandlerEntry {
    pattern: Pattern,
    callback: Handler,
}

struct Shared {
    alive: AtomicBool,
    running: AtomicBool,
    death_notify: Notify,
    stop_notify: Notify,
}

/// Handle for the line dispatcher. Cheaply cloneable; clones share the same
/// underlying link tasks.
#[derive(Clone)]
pub struct Dispatcher {
    write_tx: mpsc::Sender<Bytes>,
    lines_tx: broadcast::Sender<Bytes>,
    handlers: Arc<Mutex<Vec<HandlerEntry>>>,
    shared: Arc<Shared>,
    reader_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    writer_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Reads lines until the link closes, a read fails, or [`Dispatcher::stop`]
/// fires the stop notification (spec §5's cancellation token, applied to the
/// reader context). `AsyncReadExt::read` is cancel-safe, so racing it against
/// the stop notification in a `select!` cannot drop already-read bytes.
async fn reader_loop<R>(mut reader: R, handlers: Arc<Mutex<Vec<HandlerEntry>>>, lines_tx: broadcast::Sender<Bytes>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        let mut chunk = [0u8; 512];
        tokio::select! {
            result = reader.read(&mut chunk) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(err) => {
                        tracing::error!("serial link read failed: {err}");
                        break;
                    }
                }
            }
            _ = shared.stop_notify.notified() => break,
        }
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line = buf.split_to(pos + 1).freeze();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end();
            tracing::debug!("<- {text}");

            {
                let handlers = handlers.lock().unwrap();
                for entry in handlers.iter() {
                    if let Some(captures) = entry.pattern.matches(text) {
                        (entry.callback)(captures);
                    }
                }
            }
            let _ = lines_tx.send(line);
        }
    }
    shared.alive.store(false, Ordering::SeqCst);
    shared.death_notify.notify_waiters();
}

/// Drains queued writes until the channel closes, a write fails, or
/// [`Dispatcher::stop`] fires. `mpsc::Receiver::recv` is cancel-safe.
async fn writer_loop<W>(mut writer: W, mut write_rx: mpsc::Receiver<Bytes>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        let line = tokio::select! {
            line = write_rx.recv() => line,
            _ = shared.stop_notify.notified() => break,
        };
        let Some(line) = line else { break };

        let text = String::from_utf8_lossy(&line);
        tracing::debug!("-> {}", text.trim_end());
        if let Err(err) = writer.write_all(&line).await {
            tracing::error!("serial link write failed: {err}");
            break;
        }
        if let Err(err) = writer.flush().await {
            tracing::error!("serial link flush failed: {err}");
            break;
        }
    }
    shared.alive.store(false, Ordering::SeqCst);
    shared.death_notify.notify_waiters();
}

impl Dispatcher {
    /// Spawn the reader and writer contexts over `link`, splitting it into
    /// halves with `tokio::io::split`.
    pub fn spawn<T>(link: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(link);
        let (write_tx, write_rx) = mpsc::channel(32);
        let (lines_tx, _) = broadcast::channel(256);
        let handlers = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::new(Shared {
            alive: AtomicBool::new(true),
            running: AtomicBool::new(true),
            death_notify: Notify::new(),
            stop_notify: Notify::new(),
        });

        let reader_task = tokio::spawn(reader_loop(
            read_half,
            handlers.clone(),
            lines_tx.clone(),
            shared.clone(),
        ));
        let writer_task = tokio::spawn(writer_loop(write_half, write_rx, shared.clone()));

        Self {
            write_tx,
            lines_tx,
            handlers,
            shared,
            reader_task: Arc::new(Mutex::new(Some(reader_task))),
            writer_task: Arc::new(Mutex::new(Some(writer_task))),
        }
    }

    /// Request the reader and writer contexts to stop (spec §5's cancellation
    /// token, applied to this component). Idempotent.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.stop_notify.notify_waiters();
    }

    /// Await the reader and writer contexts exiting after [`Dispatcher::stop`].
    /// Joins the writer first, then the reader — the writer context is the
    /// one still driving outbound traffic for the serial queue sitting on top
    /// of it, so it is reclaimed before the link's read side.
    pub async fn join(&self) {
        let writer = self.writer_task.lock().unwrap().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        let reader = self.reader_task.lock().unwrap().take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
    }

    /// Install a handler for `pattern`. Multiple registrations on the same
    /// pattern are permitted and all fire, in registration order.
    pub fn register_handler(&self, pattern: Pattern, callback: impl Fn(Captures) + Send + Sync + 'static) {
        self.handlers.lock().unwrap().push(HandlerEntry {
            pattern,
            callback: Arc::new(callback),
        });
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Resolves once the underlying link has failed or been closed.
    pub async fn closed(&self) {
        if !self.is_alive() {
            return;
        }
        self.shared.death_notify.notified().await;
    }

    /// A fresh view of every line received from here on.
    pub fn subscribe_lines(&self) -> broadcast::Receiver<Bytes> {
        self.lines_tx.subscribe()
    }

    /// Transmit a line, no response expected.
    pub async fn write(&self, line: Bytes) -> Result<(), Error> {
        self.write_tx.send(line).await.map_err(|_| Error::LinkFault)
    }

    /// Transmit `line` and synchronously wait for the next received line
    /// matching `pattern`, within `timeout`.
    pub async fn write_match(
        &self,
        line: Bytes,
        pattern: Pattern,
        timeout: std::time::Duration,
    ) -> Result<Captures, Error> {
        let mut rx = self.subscribe_lines();
        self.write(line).await?;
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(received) => {
                        let text = String::from_utf8_lossy(&received);
                        if let Some(captures) = pattern.matches(text.trim_end()) {
                            return Ok(captures);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::LinkFault),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Timeout)?
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::duplex;

    #[tokio::test]
    async fn handlers_fire_in_registration_order_for_matching_lines() {
        let (printer_side, host_side) = duplex(256);
        let dispatcher = Dispatcher::spawn(host_side);

        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = order.clone();
            dispatcher.register_handler(Pattern::literal("ok"), move |_| {
                order.lock().unwrap().push(1);
            });
        }
        {
            let order = order.clone();
            dispatcher.register_handler(Pattern::literal("ok"), move |_| {
                order.lock().unwrap().push(2);
            });
        }

        let mut printer_side = printer_side;
        printer_side.write_all(b"ok\n").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn write_match_returns_captures_from_matching_reply() {
        let (mut printer_side, host_side) = duplex(256);
        let dispatcher = Dispatcher::spawn(host_side);

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = printer_side.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"M27\n");
            printer_side.write_all(b"SD printing byte 123/456\n").await.unwrap();
        });

        let captures = dispatcher
            .write_match(
                Bytes::from_static(b"M27\n"),
                Pattern::prefix("SD printing byte "),
                std::time::Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(captures, vec!["123/456".to_owned()]);
    }

    #[tokio::test]
    async fn write_match_times_out_when_nothing_matches() {
        let (_printer_side, host_side) = duplex(256);
        let dispatcher = Dispatcher::spawn(host_side);
        let result = dispatcher
            .write_match(
                Bytes::from_static(b"M114\n"),
                Pattern::literal("never"),
                std::time::Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn counts_lines_only_once_per_handler() {
        let (mut printer_side, host_side) = duplex(256);
        let dispatcher = Dispatcher::spawn(host_side);
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            dispatcher.register_handler(Pattern::literal("ok"), move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        printer_side.write_all(b"ok\n").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_joins_reader_and_writer_without_closing_the_link() {
        let (_printer_side, host_side) = duplex(256);
        let dispatcher = Dispatcher::spawn(host_side);
        dispatcher.stop();
        tokio::time::timeout(std::time::Duration::from_millis(200), dispatcher.join())
            .await
            .expect("reader and writer should exit promptly once stopped");
    }
}
