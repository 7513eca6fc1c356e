//! Transport-manager seam.
//!
//! Sessions reach the device either over the network (UDP) or through the
//! on-chip DMA engine. Both managers sit behind one trait; the board picks
//! one per request based on how the session is connected. The managers here
//! are deliberately thin — address programming and buffer plumbing live in
//! their own layers — but they own the lifecycle (`init`/`deinit`) and the
//! handle bookkeeping.

use std::collections::HashMap;

use crate::endpoint::Sid;
use crate::error::{Error, Result};

/// Flavor of traffic a transport will carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Control/command traffic.
    Ctrl,
    /// Asynchronous messages.
    AsyncMsg,
    /// Transmit sample data.
    TxData,
    /// Receive sample data.
    RxData,
}

/// How the requesting session is connected to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Session runs on a remote host; traffic goes over UDP.
    Remote,
    /// Session runs on the device itself; traffic goes over local DMA.
    Local,
}

/// A transport granted to a session, pending commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHandle {
    /// Session transport identifier (source endpoint already allocated).
    pub sid: Sid,
    /// Traffic flavor.
    pub kind: TransportKind,
}

/// Parameters a session supplies when committing a transport.
#[derive(Debug, Clone, Default)]
pub struct TransportInfo {
    /// Packed SID of the flow being committed.
    pub send_sid: u32,
    /// Manager-specific parameters (addresses, ports, buffer sizes).
    pub params: HashMap<String, String>,
}

/// Lifecycle and flow management for one transport flavor.
pub trait TransportManager: Send {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Prepare the manager for a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying fabric cannot be configured.
    fn init(&mut self, args: &HashMap<String, String>) -> Result<()>;

    /// Tear the manager down at session end.
    ///
    /// # Errors
    ///
    /// Returns an error if teardown fails.
    fn deinit(&mut self) -> Result<()>;

    /// Reserve a flow for `sid`.
    ///
    /// # Errors
    ///
    /// Returns an error if no flow can be reserved.
    fn request(&mut self, sid: Sid, kind: TransportKind) -> Result<TransportHandle>;

    /// Commit a previously requested flow.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow was never requested.
    fn commit(&mut self, sid: Sid, info: &TransportInfo) -> Result<()>;
}

// ── UDP manager ──────────────────────────────────────────────────────────────

/// Transport manager for sessions on remote hosts.
#[derive(Debug, Default)]
pub struct UdpTransportMgr {
    pending: Vec<Sid>,
}

impl UdpTransportMgr {
    /// Create an idle manager.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportManager for UdpTransportMgr {
    fn name(&self) -> &'static str {
        "UDP"
    }

    fn init(&mut self, _args: &HashMap<String, String>) -> Result<()> {
        tracing::debug!("Initializing UDP transport manager");
        self.pending.clear();
        Ok(())
    }

    fn deinit(&mut self) -> Result<()> {
        tracing::debug!("Deinitializing UDP transport manager");
        self.pending.clear();
        Ok(())
    }

    fn request(&mut self, sid: Sid, kind: TransportKind) -> Result<TransportHandle> {
        tracing::trace!("UDP transport requested for SID {sid} ({kind:?})");
        self.pending.push(sid);
        Ok(TransportHandle { sid, kind })
    }

    fn commit(&mut self, sid: Sid, _info: &TransportInfo) -> Result<()> {
        let idx = self
            .pending
            .iter()
            .position(|&p| p == sid)
            .ok_or_else(|| {
                Error::invalid_state(format!("SID {sid} was never requested on UDP"))
            })?;
        self.pending.swap_remove(idx);
        tracing::debug!("Committed UDP transport for SID {sid}");
        Ok(())
    }
}

// ── Local DMA manager ────────────────────────────────────────────────────────

/// Transport manager for sessions running on the device itself.
#[derive(Debug)]
pub struct DmaTransportMgr {
    pending: Vec<Sid>,
    active: usize,
    max_chan: usize,
}

impl DmaTransportMgr {
    /// DMA channels available to local sessions.
    pub const MAX_CHAN: usize = 10;

    /// Create an idle manager.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            active: 0,
            max_chan: Self::MAX_CHAN,
        }
    }
}

impl Default for DmaTransportMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportManager for DmaTransportMgr {
    fn name(&self) -> &'static str {
        "DMA"
    }

    fn init(&mut self, _args: &HashMap<String, String>) -> Result<()> {
        tracing::debug!("Initializing DMA transport manager");
        self.pending.clear();
        self.active = 0;
        Ok(())
    }

    fn deinit(&mut self) -> Result<()> {
        tracing::debug!("Deinitializing DMA transport manager");
        self.pending.clear();
        self.active = 0;
        Ok(())
    }

    fn request(&mut self, sid: Sid, kind: TransportKind) -> Result<TransportHandle> {
        if self.pending.len() + self.active >= self.max_chan {
            return Err(Error::resource_exhausted("local DMA channels"));
        }
        tracing::trace!("DMA transport requested for SID {sid} ({kind:?})");
        self.pending.push(sid);
        Ok(TransportHandle { sid, kind })
    }

    fn commit(&mut self, sid: Sid, _info: &TransportInfo) -> Result<()> {
        let idx = self
            .pending
            .iter()
            .position(|&p| p == sid)
            .ok_or_else(|| {
                Error::invalid_state(format!("SID {sid} was never requested on DMA"))
            })?;
        self.pending.swap_remove(idx);
        self.active += 1;
        tracing::debug!("Committed DMA transport for SID {sid}");
        Ok(())
    }
}
