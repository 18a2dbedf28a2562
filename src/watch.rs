//! Watcher backend plurality and cooperative cancellation for
//! `Load`/`Save`.
//!
//! The supervisor that multiplexes several layers' watchers with debounced
//! re-materialization lives on `Store::watch` (store.rs), since it needs
//! the Store's lock and decoder; this module only provides the shared
//! per-layer primitives: the `LayerWatcher` trait, the two concrete
//! implementations every layer in this crate actually uses, and the
//! cancellation token threaded through blocking Store operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::LayerError;
use crate::value::Value;

/// One frame delivered by a `LayerWatcher`: either a freshly observed
/// document, or an error from the underlying fetch.
pub struct WatchFrame {
    pub data: Result<Value, LayerError>,
}

/// The harness every layer's `watch()` returns. `try_recv` is non-blocking
/// so the debounce loop in
/// `Store::watch` can poll every registered watcher without dedicating a
/// thread per layer to the multiplex itself.
pub trait LayerWatcher: Send {
    /// Begin delivering frames. Called once, before the first `try_recv`.
    fn start(&mut self) -> Result<(), LayerError>;

    /// Non-blocking poll for the next frame, if one has arrived.
    fn try_recv(&self) -> Option<WatchFrame>;

    /// Stop delivering frames and release any background resources.
    fn stop(&mut self);
}

/// The default watcher for layers with no change notification of their own.
/// Used by `EnvLayer` (env vars aren't watchable) and any layer that never
/// overrides `watch()`.
pub struct NoopWatcher;

impl LayerWatcher for NoopWatcher {
    fn start(&mut self) -> Result<(), LayerError> {
        Ok(())
    }

    fn try_recv(&self) -> Option<WatchFrame> {
        None
    }

    fn stop(&mut self) {}
}

/// A generic, reusable watcher that polls a `fetch` closure on an interval
/// and only delivers a frame when the fetched document actually changed.
/// Backs `FileLayer::watch`, whose backing source exposes no native
/// subscription mechanism.
pub struct PollingWatcher {
    fetch: Arc<dyn Fn() -> Result<Value, LayerError> + Send + Sync>,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    rx: Receiver<WatchFrame>,
    tx: Option<Sender<WatchFrame>>,
}

impl PollingWatcher {
    pub fn new(fetch: impl Fn() -> Result<Value, LayerError> + Send + Sync + 'static) -> Self {
        Self::with_interval(fetch, Duration::from_millis(500))
    }

    pub fn with_interval(
        fetch: impl Fn() -> Result<Value, LayerError> + Send + Sync + 'static,
        interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            fetch: Arc::new(fetch),
            interval,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
            rx,
            tx: Some(tx),
        }
    }
}

impl LayerWatcher for PollingWatcher {
    fn start(&mut self) -> Result<(), LayerError> {
        let Some(tx) = self.tx.take() else {
            return Ok(()); // already started
        };
        let fetch = self.fetch.clone();
        let interval = self.interval;
        let stop_flag = self.stop_flag.clone();
        self.handle = Some(std::thread::spawn(move || {
            let mut last: Option<Value> = None;
            while !stop_flag.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                match fetch() {
                    Ok(data) => {
                        if last.as_ref() != Some(&data) {
                            last = Some(data.clone());
                            if tx.send(WatchFrame { data: Ok(data) }).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        if tx.send(WatchFrame { data: Err(e) }).is_err() {
                            break;
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    fn try_recv(&self) -> Option<WatchFrame> {
        self.rx.try_recv().ok()
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A cooperative cancellation token threaded through `Store::watch`'s
/// background loop. Layer I/O checks it between layers; this crate's
/// in-memory and test layers don't have mid-operation suspension points of
/// their own, so cancellation is checked at layer granularity, not inside a
/// single layer's `load`/`save` call.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn noop_watcher_never_delivers() {
        let mut w = NoopWatcher;
        w.start().unwrap();
        assert!(w.try_recv().is_none());
        w.stop();
    }

    #[test]
    fn cancel_token_starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn polling_watcher_delivers_only_on_change() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut w = PollingWatcher::with_interval(
            move || {
                let n = calls2.fetch_add(1, Ordering::SeqCst);
                // first two polls return the same value (no frame expected
                // for the second); the third changes.
                Ok(if n < 2 { Value::Int(1) } else { Value::Int(2) })
            },
            Duration::from_millis(10),
        );
        w.start().unwrap();
        let mut seen = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while seen.len() < 2 && std::time::Instant::now() < deadline {
            if let Some(frame) = w.try_recv() {
                seen.push(frame.data.unwrap());
            }
        }
        w.stop();
        assert_eq!(seen, vec![Value::Int(1), Value::Int(2)]);
    }
}
