//! Background status monitor.
//!
//! A single long-lived thread samples GPS-lock and reference-lock state once
//! per period and mirrors them onto the back-panel indicators. The wait is
//! interruptible: teardown signals a channel the loop checks during its timed
//! wait, so the thread exits within one period of being asked to.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::clocking::Daughterboard;
use crate::error::Result;
use crate::gpio::{BackpanelLeds, GpioExpander, Led, Pin};

/// Poll period of the status monitor.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Everything one monitor iteration needs to read and write.
pub struct StatusSources {
    /// Port expander carrying the GPS lock pin.
    pub gpio: Arc<GpioExpander>,
    /// Back-panel indicators.
    pub leds: Arc<BackpanelLeds>,
    /// Daughter devices contributing reference-lock state.
    pub dboards: Vec<Arc<dyn Daughterboard>>,
}

impl StatusSources {
    /// One sampling iteration: GPS lock → GPS LED, combined daughterboard
    /// reference lock → REF LED.
    ///
    /// Sensor failures are logged and skipped — status reporting must not
    /// take down an otherwise healthy device.
    fn tick(&self) {
        match self.gpio.get(Pin::GpsLockOk) {
            Ok(level) => {
                if let Err(e) = self.leds.set(Led::Gps, level != 0) {
                    tracing::warn!("Failed to update GPS indicator: {e}");
                }
            }
            Err(e) => tracing::warn!("Failed to read GPS lock pin: {e}"),
        }

        // Devices without a lock sensor count as locked.
        let ref_locked = self
            .dboards
            .iter()
            .all(|db| db.ref_lock().unwrap_or(true));
        if let Err(e) = self.leds.set(Led::Ref, ref_locked) {
            tracing::warn!("Failed to update REF indicator: {e}");
        }
    }
}

/// Handle to the running status-monitor thread.
pub struct StatusMonitor {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    period: Duration,
}

impl std::fmt::Debug for StatusMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusMonitor")
            .field("running", &self.is_running())
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl StatusMonitor {
    /// Spawn the monitor with the nominal [`MONITOR_INTERVAL`].
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn(sources: StatusSources) -> Result<Self> {
        Self::spawn_with_period(sources, MONITOR_INTERVAL)
    }

    /// Spawn the monitor with an explicit period.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn_with_period(sources: StatusSources, period: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("kestrel-status-monitor".into())
            .spawn(move || {
                tracing::trace!("Launching monitor loop...");
                loop {
                    sources.tick();
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // Signaled, or the owner vanished: either way, exit.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::trace!("Terminating monitor loop.");
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            stop_tx,
            done_rx,
            handle: Some(handle),
            period,
        })
    }

    /// Whether the monitor thread is still owned and presumed running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the loop to stop and wait up to three periods for it to exit.
    ///
    /// Failing to observe the exit within the bound is reported as a
    /// resource-leak diagnostic; teardown continues regardless.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.stop_tx.try_send(());
        match self.done_rx.recv_timeout(3 * self.period) {
            Ok(()) => {
                let _ = handle.join();
            }
            Err(_) => {
                tracing::error!(
                    "Could not terminate monitor thread! This could result in resource leaks."
                );
            }
        }
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
