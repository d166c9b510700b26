//! Event pump
//!
//! Drives the runtime's event loop while holding a temporary reference and
//! lock on the module, so an unload on another thread cannot free the code
//! underneath a running pump. When the pump's own release turns out to be
//! the last interest, the pump performs the deferred teardown itself, the
//! way the last unload asked for it.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::session::{deferred_teardown, CancelHandle};
use super::{TclRuntime, UnloadOutcome};
use crate::error::TclResult;
use crate::ffi::{NativeModule, TclApi, TCL_ALL_EVENTS, TCL_DONT_WAIT};

/// How long and how hard to pump.
#[derive(Debug, Clone, Default)]
pub struct PumpOptions {
    /// Stop once this much time has passed
    pub timeout: Option<Duration>,
    /// Block in the runtime until an event arrives
    pub wait: bool,
    /// Keep going while events are being processed
    pub drain_all: bool,
    /// Stop when this handle is canceled
    pub cancel: Option<CancelHandle>,
}

/// What one pump did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpStats {
    pub event_count: usize,
    pub yield_count: usize,
    pub canceled: bool,
    pub timed_out: bool,
    /// The pump released the last interest and unloaded the module
    pub unloaded: bool,
}

impl TclRuntime {
    /// Process pending events for the module loaded from `path`.
    pub fn pump_events(&self, path: &Path, options: &PumpOptions) -> TclResult<PumpStats> {
        let module = self.registry.acquire_locked(path)?;
        let handle = module.handle();

        let mut stats = PumpStats::default();
        let api = match TclApi::bootstrap(module.as_ref()) {
            Ok(api) => api,
            Err(err) => {
                self.finish_pump(path, module, None, &mut stats);
                return Err(err);
            }
        };
        self.pump_loop(&api, path, handle, options, &mut stats);
        self.finish_pump(path, module, Some(&api), &mut stats);
        tracing::debug!(
            path = %path.display(),
            events = stats.event_count,
            yields = stats.yield_count,
            "event pump finished"
        );
        Ok(stats)
    }

    fn pump_loop(
        &self,
        api: &TclApi,
        path: &Path,
        handle: usize,
        options: &PumpOptions,
        stats: &mut PumpStats,
    ) {
        let started = Instant::now();
        let flags = if options.wait {
            TCL_ALL_EVENTS
        } else {
            TCL_ALL_EVENTS | TCL_DONT_WAIT
        };

        loop {
            if options.cancel.as_ref().is_some_and(|c| c.is_canceled()) {
                stats.canceled = true;
                break;
            }
            if !self.registry.verify(path, handle) {
                break;
            }
            if options.timeout.is_some_and(|t| started.elapsed() >= t) {
                stats.timed_out = true;
                break;
            }

            let processed = api.do_one_event(flags);
            if processed {
                stats.event_count += 1;
            }
            if !(options.drain_all && processed) {
                break;
            }

            std::thread::yield_now();
            stats.yield_count += 1;
        }
    }

    fn finish_pump(
        &self,
        path: &Path,
        module: Arc<dyn NativeModule>,
        api: Option<&TclApi>,
        stats: &mut PumpStats,
    ) {
        // Reference and lock go together so no acquire can slip in between
        let outcome = self.registry.release(path, true, true);
        drop(module);

        if let Some(result) = deferred_teardown(api, outcome) {
            stats.unloaded = matches!(result, UnloadOutcome::Unloaded { .. });
        }
    }
}
