//! Board object and bring-up sequencer.
//!
//! [`Board`] owns every peripheral handle and the authoritative clock/time
//! state. Bring-up runs a fixed sequence ordered by ascending likelihood of
//! failure; the first error marks the device failed, keeps the reason, and
//! aborts the remaining steps. A failed device refuses all operational calls
//! with a logged "not initialized" error instead of attempting deeper work.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clocking::{ClockSource, ClockingControl, Daughterboard, TimeSource};
use crate::endpoint::{EndpointPool, Sid};
use crate::error::{Error, Result};
use crate::gpio::{BackpanelLeds, GpioExpander, GpioPins, Led, Pin, SysfsGpioBank};
use crate::monitor::{StatusMonitor, StatusSources};
use crate::regmap::{check_compat, MbRegs, RegisterBackend, UioRegisters};
use crate::sensors::{self, GpsClient, GpsdClient, SensorValue};
use crate::transport::{
    ConnectionKind, DmaTransportMgr, TransportHandle, TransportInfo, TransportKind,
    TransportManager, UdpTransportMgr,
};

use kestrel_regs::codec::{BoardVariant, LinkType};
use kestrel_regs::regs::EXPECTED_COMPAT;

/// Sysfs label of the motherboard register UIO node.
pub const MBOARD_REGS_LABEL: &str = "mboard-regs";

/// Sysfs label of the port-expander GPIO chip.
const EXPANDER_CHIP_LABEL: &str = "tca6424";
/// Expander bits that are wired (bit 11 is unconnected).
const EXPANDER_USE_MASK: u32 = 0xFF_F7FF;
/// Expander output bits.
const EXPANDER_DDR: u32 = 0x86_F7FF;
/// Expander power-on defaults: GPS powered, GPS out of reset/init-survey,
/// 156.25 MHz clock on.
const EXPANDER_DEFAULT_REV_C: u32 = 0x86_0101;
const EXPANDER_DEFAULT_REV_D: u32 = 0x86_0780;

/// Sysfs label of the SoC GPIO chip carrying the back-panel LEDs.
const SOC_GPIO_CHIP_LABEL: &str = "zynq_gpio";
/// First EMIO line on the SoC GPIO chip.
const SOC_EMIO_BASE: u32 = 54;
/// Back-panel LED offset within the EMIO lines.
const BP_LED_OFFSET: u32 = 45;

const DEFAULT_EXT_CLOCK_FREQ: f64 = 10e6;
const DEFAULT_CLOCK_SOURCE: ClockSource = ClockSource::Internal;
const DEFAULT_TIME_SOURCE: TimeSource = TimeSource::Internal;
const DEFAULT_ENABLE_GPS: bool = true;
const DEFAULT_ENABLE_FP_GPIO: bool = true;
const DEFAULT_PPS_EXPORT: bool = true;

// ── Configuration ────────────────────────────────────────────────────────────

/// Bring-up options, parsed from the string option map.
#[derive(Debug, Clone)]
pub struct DeviceArgs {
    /// Frequency of the external reference input.
    pub ext_clock_freq: f64,
    /// Reference clock source selected at bring-up.
    pub clock_source: ClockSource,
    /// Time source selected at bring-up.
    pub time_source: TimeSource,
    /// Power up the GPS receiver.
    pub enable_gps: bool,
    /// Power up the front-panel GPIO bank.
    pub enable_fp_gpio: bool,
    /// Export the PPS/trigger signal on the back panel.
    pub pps_export: bool,
}

impl DeviceArgs {
    /// Parse the option map, applying defaults for absent keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for unparseable values.
    pub fn from_map(args: &HashMap<String, String>) -> Result<Self> {
        let ext_clock_freq = match args.get("ext_clock_freq") {
            Some(raw) => raw.parse().map_err(|e| {
                Error::invalid_argument(format!("bad ext_clock_freq `{raw}': {e}"))
            })?,
            None => DEFAULT_EXT_CLOCK_FREQ,
        };
        let clock_source = match args.get("clock_source") {
            Some(raw) => raw.parse()?,
            None => DEFAULT_CLOCK_SOURCE,
        };
        let time_source = match args.get("time_source") {
            Some(raw) => raw.parse()?,
            None => DEFAULT_TIME_SOURCE,
        };
        Ok(Self {
            ext_clock_freq,
            clock_source,
            time_source,
            enable_gps: args
                .get("enable_gps")
                .map_or(DEFAULT_ENABLE_GPS, |s| str2bool(s)),
            enable_fp_gpio: args
                .get("enable_fp_gpio")
                .map_or(DEFAULT_ENABLE_FP_GPIO, |s| str2bool(s)),
            pps_export: args
                .get("pps_export")
                .map_or(DEFAULT_PPS_EXPORT, |s| str2bool(s)),
        })
    }
}

/// Permissive boolean parsing for option-map values.
pub(crate) fn str2bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "true" | "t" | "1" | "on"
    )
}

// ── Hardware handles ─────────────────────────────────────────────────────────

/// The hardware access points a board is built from.
///
/// Production code wires in sysfs/UIO backends; tests wire in mocks.
pub struct BoardHardware {
    /// Board hardware revision (selects the expander pin table).
    pub hw_rev: u8,
    /// GPIO bank behind the port expander.
    pub expander_pins: Box<dyn GpioPins>,
    /// GPIO bank behind the back-panel LEDs.
    pub led_pins: Box<dyn GpioPins>,
    /// Motherboard register backend.
    pub regs: Box<dyn RegisterBackend>,
    /// GPS daemon client.
    pub gps: Box<dyn GpsClient>,
    /// Attached daughter devices.
    pub dboards: Vec<Arc<dyn Daughterboard>>,
}

// ── Init state ───────────────────────────────────────────────────────────────

/// Bring-up state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Bring-up has not started.
    Uninitialized,
    /// Bring-up is in progress.
    PartiallyInitialized,
    /// Bring-up completed; the device serves operational calls.
    Ready,
    /// Bring-up failed; operational calls are refused.
    Failed,
}

/// Static and probed device identity.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfo {
    /// Product family description.
    pub description: String,
    /// FPGA compat version, `major.minor`.
    pub fpga_version: String,
    /// Detected board variant tag.
    pub fpga_variant: String,
    /// Link types of the two uplink ports.
    pub link_types: (String, String),
}

// ── Board ────────────────────────────────────────────────────────────────────

/// The motherboard instance.
pub struct Board {
    state: InitState,
    init_error: Option<String>,
    args: DeviceArgs,
    connection: ConnectionKind,

    gpio: Option<Arc<GpioExpander>>,
    leds: Option<Arc<BackpanelLeds>>,
    regs: Option<Arc<MbRegs>>,
    clocking: Option<ClockingControl>,
    dboards: Vec<Arc<dyn Daughterboard>>,
    gps: Option<Box<dyn GpsClient>>,
    xport_udp: UdpTransportMgr,
    xport_dma: DmaTransportMgr,
    monitor: Option<StatusMonitor>,

    endpoints: EndpointPool,
    link_types: (LinkType, LinkType),
    variant: BoardVariant,
    compat: (u8, u8),
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("state", &self.state)
            .field("variant", &self.variant)
            .field("compat", &self.compat)
            .finish_non_exhaustive()
    }
}

impl Board {
    /// Product family description.
    pub const DESCRIPTION: &'static str = "K300-Series Device";

    /// Build a board and run bring-up.
    ///
    /// Bring-up failure does not return an error: the board comes back in the
    /// [`InitState::Failed`] state with the reason retained, and every
    /// operational call is refused from then on.
    pub fn new(option_map: &HashMap<String, String>, hw: BoardHardware) -> Self {
        let mut board = Self {
            state: InitState::Uninitialized,
            init_error: None,
            args: DeviceArgs {
                ext_clock_freq: DEFAULT_EXT_CLOCK_FREQ,
                clock_source: DEFAULT_CLOCK_SOURCE,
                time_source: DEFAULT_TIME_SOURCE,
                enable_gps: DEFAULT_ENABLE_GPS,
                enable_fp_gpio: DEFAULT_ENABLE_FP_GPIO,
                pps_export: DEFAULT_PPS_EXPORT,
            },
            connection: ConnectionKind::Remote,
            gpio: None,
            leds: None,
            regs: None,
            clocking: None,
            dboards: Vec::new(),
            gps: None,
            xport_udp: UdpTransportMgr::new(),
            xport_dma: DmaTransportMgr::new(),
            monitor: None,
            endpoints: EndpointPool::new(),
            link_types: (LinkType::None, LinkType::None),
            variant: BoardVariant::Unknown,
            compat: (0, 0),
        };

        board.state = InitState::PartiallyInitialized;
        match board.init_peripherals(option_map, hw) {
            Ok(()) => {
                board.state = InitState::Ready;
                tracing::debug!("Board bring-up complete: {board:?}");
            }
            Err(e) => {
                tracing::error!("Failed to initialize motherboard: {e}");
                board.init_error = Some(e.to_string());
                board.state = InitState::Failed;
            }
        }
        board
    }

    /// Build a board over the real sysfs/UIO hardware and run bring-up.
    ///
    /// `hw_rev` comes from the EEPROM layer, which is outside this core.
    ///
    /// # Errors
    ///
    /// Returns an error if a hardware access point cannot be opened at all;
    /// bring-up failures past that point are reported through
    /// [`Board::init_state`] instead.
    pub fn discover(hw_rev: u8, option_map: &HashMap<String, String>) -> Result<Self> {
        let default_val = if hw_rev == crate::gpio::MIN_HW_REV {
            EXPANDER_DEFAULT_REV_C
        } else {
            EXPANDER_DEFAULT_REV_D
        };
        let expander_pins = SysfsGpioBank::open(
            EXPANDER_CHIP_LABEL,
            0,
            EXPANDER_USE_MASK,
            EXPANDER_DDR,
            default_val,
        )?;
        let led_pins = SysfsGpioBank::open(
            SOC_GPIO_CHIP_LABEL,
            SOC_EMIO_BASE + BP_LED_OFFSET,
            0x7,
            0x7,
            0x0,
        )?;
        let regs = UioRegisters::open(MBOARD_REGS_LABEL)?;
        Ok(Self::new(
            option_map,
            BoardHardware {
                hw_rev,
                expander_pins: Box::new(expander_pins),
                led_pins: Box::new(led_pins),
                regs: Box::new(regs),
                gps: Box::new(GpsdClient::new()),
                dboards: Vec::new(),
            },
        ))
    }

    /// Current bring-up state.
    pub fn init_state(&self) -> InitState {
        self.state
    }

    /// Failure reason captured at bring-up, if any.
    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }

    /// Declare how the current session is connected (selects the transport
    /// manager used for its requests).
    pub fn set_connection(&mut self, connection: ConnectionKind) {
        self.connection = connection;
    }

    // ── Bring-up sequence ────────────────────────────────────────────────

    /// Turn on all peripherals, in the order of least likely to fail to most
    /// likely.
    fn init_peripherals(
        &mut self,
        option_map: &HashMap<String, String>,
        hw: BoardHardware,
    ) -> Result<()> {
        let args = DeviceArgs::from_map(option_map)?;

        tracing::trace!("Initializing port expander controls...");
        let gpio = Arc::new(GpioExpander::new(hw.hw_rev, hw.expander_pins)?);
        tracing::trace!("Initializing back panel LED controls...");
        let leds = Arc::new(BackpanelLeds::new(hw.led_pins));

        tracing::trace!("Enabling power of MGT 156.25 MHz clock");
        gpio.set(Pin::PwrenClkMgt156M)?;
        Self::enable_1g_ref_clock(&gpio)?;
        Self::enable_gps_power(&gpio, args.enable_gps)?;
        Self::enable_fp_gpio_power(&gpio, args.enable_fp_gpio)?;

        let regs = Arc::new(MbRegs::new(hw.regs));
        regs.git_hash()?;
        regs.build_timestamp()?;

        let compat = regs.compat_number()?;
        tracing::debug!("Actual FPGA compat number: {}.{}", compat.0, compat.1);
        check_compat("FPGA", EXPECTED_COMPAT, compat)?;
        self.compat = compat;

        let (link0, link1, variant) = regs.board_variant()?;
        tracing::debug!("Updating mboard FPGA type info to `{}'", variant.label());
        self.link_types = (link0, link1);
        self.variant = variant;

        Self::enable_ref_clock_power(&gpio, true)?;

        let mut clocking =
            ClockingControl::new(Arc::clone(&gpio), Arc::clone(&regs), hw.dboards.clone());
        Self::init_ref_clock_and_time(&mut clocking, &args)?;
        Self::init_meas_clock(&clocking)?;

        tracing::trace!("Spawning status monitor thread...");
        let monitor = StatusMonitor::spawn(StatusSources {
            gpio: Arc::clone(&gpio),
            leds: Arc::clone(&leds),
            dboards: hw.dboards.clone(),
        })?;

        self.args = args;
        self.gpio = Some(gpio);
        self.leds = Some(leds);
        self.regs = Some(regs);
        self.clocking = Some(clocking);
        self.dboards = hw.dboards;
        self.gps = Some(hw.gps);
        self.monitor = Some(monitor);
        Ok(())
    }

    /// Initialize clock and time sources. After this returns, the reference
    /// signals going to the FPGA are valid.
    fn init_ref_clock_and_time(clocking: &mut ClockingControl, args: &DeviceArgs) -> Result<()> {
        clocking.set_ref_clock_freq(args.ext_clock_freq)?;
        clocking.set_clock_source(args.clock_source)?;
        clocking.set_time_source(args.time_source)?;
        clocking.enable_pps_out(args.pps_export)
    }

    /// Bring the TDC measurement clock out of reset and confirm lock.
    ///
    /// A missing lock leaves the measurement subsystem degraded but the
    /// device usable; it is logged, not fatal.
    fn init_meas_clock(clocking: &ClockingControl) -> Result<()> {
        // No need to toggle reset here, simply confirm it is out of reset.
        clocking.reset_meas_clk_mmcm(false)?;
        if !clocking.meas_clk_mmcm_locked()? {
            let fault = Error::hardware_fault("measurement clock failed to lock");
            tracing::warn!("{fault}; measurement subsystem degraded");
        }
        Ok(())
    }

    /// Program the network-clock synthesizer for the 1G uplink's 125 MHz
    /// reference and take it out of reset.
    fn enable_1g_ref_clock(gpio: &GpioExpander) -> Result<()> {
        tracing::trace!("Enabling 125 MHz clock for the 1G uplink interface.");
        gpio.set(Pin::NetclkCe)?;
        gpio.set_to(Pin::NetclkResetN, 0)?;
        gpio.set_to(Pin::NetclkPr0, 1)?;
        gpio.set_to(Pin::NetclkPr1, 1)?;
        gpio.set_to(Pin::NetclkOd0, 1)?;
        gpio.set_to(Pin::NetclkOd1, 1)?;
        gpio.set_to(Pin::NetclkOd2, 0)?;
        gpio.set_to(Pin::PwrenClkWb25M, 1)?;
        tracing::trace!("Finished configuring the network clock synthesizer.");
        gpio.set_to(Pin::NetclkResetN, 1)
    }

    fn enable_gps_power(gpio: &GpioExpander, enable: bool) -> Result<()> {
        tracing::trace!(
            "{} power to GPS",
            if enable { "Enabling" } else { "Disabling" }
        );
        gpio.set_to(Pin::PwrenGps, u8::from(enable))
    }

    fn enable_fp_gpio_power(gpio: &GpioExpander, enable: bool) -> Result<()> {
        tracing::trace!(
            "{} power to front-panel GPIO",
            if enable { "Enabling" } else { "Disabling" }
        );
        gpio.set_to(Pin::FpgaGpioEn, u8::from(enable))
    }

    /// Enable the main reference clock supply. Without this, *no* reference
    /// clock works.
    fn enable_ref_clock_power(gpio: &GpioExpander, enable: bool) -> Result<()> {
        tracing::trace!(
            "{} power to reference clocks",
            if enable { "Enabling" } else { "Disabling" }
        );
        gpio.set_to(Pin::PwrenClkMainref, u8::from(enable))
    }

    // ── Usability guard ──────────────────────────────────────────────────

    fn check_usable(&self, operation: &str) -> Result<()> {
        if self.state == InitState::Ready {
            return Ok(());
        }
        let reason = self
            .init_error
            .clone()
            .unwrap_or_else(|| "device was never fully initialized".into());
        tracing::error!("Cannot run {operation}(): {reason}");
        Err(Error::not_initialized(reason))
    }

    // ── Session surface ──────────────────────────────────────────────────

    /// Prepare the device for a new session, applying per-session overrides.
    ///
    /// PPS output is disabled across any clock/time reconfiguration and
    /// restored afterwards so no glitch reaches the back-panel trigger
    /// output.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device, or any reconfiguration
    /// error.
    pub fn init(&mut self, overrides: &HashMap<String, String>) -> Result<()> {
        self.check_usable("init")?;
        let pps_out_state = overrides
            .get("pps_export")
            .map_or(self.args.pps_export, |s| str2bool(s));

        // Keep the back panel quiet while the clocks move.
        self.enable_pps_out(false)?;
        if let Some(raw) = overrides.get("clock_source") {
            self.set_clock_source(raw.parse()?)?;
        }
        if overrides.contains_key("clock_source") || overrides.contains_key("time_source") {
            let time_source = match overrides.get("time_source") {
                Some(raw) => raw.parse()?,
                None => self.time_source().unwrap_or(self.args.time_source),
            };
            self.set_time_source(time_source)?;
        }
        // Now the clocks are settled, the PPS export can go live again.
        self.enable_pps_out(pps_out_state)?;

        self.xport_udp.init(overrides)?;
        self.xport_dma.init(overrides)?;
        Ok(())
    }

    /// Clean up after a session terminates.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device.
    pub fn deinit(&mut self) -> Result<()> {
        if self.state != InitState::Ready {
            tracing::warn!("Cannot run deinit(), device was never fully initialized!");
            return Err(Error::not_initialized(
                self.init_error
                    .clone()
                    .unwrap_or_else(|| "device was never fully initialized".into()),
            ));
        }
        self.xport_udp.deinit()?;
        self.xport_dma.deinit()?;
        tracing::trace!("Resetting SID pool...");
        self.endpoints.reset();
        Ok(())
    }

    /// Tear down members that need special handling before destruction.
    pub fn tear_down(&mut self) {
        tracing::trace!("Tearing down device...");
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
    }

    // ── Transport API ────────────────────────────────────────────────────

    /// Request a transport to `dst_address`, preferring
    /// `suggested_src_address` as the source endpoint.
    ///
    /// The source endpoint is claimed from the pool here; it stays owned by
    /// the session until release or session teardown.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` when the endpoint pool is empty, or any
    /// transport-manager error (the claimed endpoint is returned on failure).
    pub fn request_xport(
        &mut self,
        dst_address: u16,
        suggested_src_address: u8,
        xport_type: TransportKind,
    ) -> Result<TransportHandle> {
        self.check_usable("request_xport")?;
        let src = self.endpoints.allocate(suggested_src_address)?;
        let sid = Sid::new(src.into(), dst_address);
        tracing::trace!(
            "request_xport(dst={dst_address:#06X}, suggested_src_address={suggested_src_address:#04X}, \
             xport_type={xport_type:?}): operating on SID {sid}"
        );
        let result = match self.connection {
            ConnectionKind::Remote => self.xport_udp.request(sid, xport_type),
            ConnectionKind::Local => self.xport_dma.request(sid, xport_type),
        };
        if result.is_err() {
            // Failed reservations must not leak the endpoint.
            let _ = self.endpoints.release(src);
        }
        result
    }

    /// Commit a previously requested transport.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the SID's source endpoint was never
    /// allocated, or any transport-manager error.
    pub fn commit_xport(&mut self, info: &TransportInfo) -> Result<()> {
        self.check_usable("commit_xport")?;
        let sid = Sid::from_raw(info.send_sid);
        let src = sid.src();
        if src > u16::from(u8::MAX) || !self.endpoints.is_allocated(src as u8) {
            return Err(Error::invalid_state(format!(
                "SID {sid} carries an unallocated source endpoint"
            )));
        }
        tracing::debug!("Committing transport for SID {sid}");
        match self.connection {
            ConnectionKind::Remote => self.xport_udp.commit(sid, info),
            ConnectionKind::Local => self.xport_dma.commit(sid, info),
        }
    }

    // ── Clock/Time API ───────────────────────────────────────────────────

    /// All selectable clock sources.
    pub fn clock_sources(&self) -> &'static [ClockSource] {
        &ClockSource::ALL
    }

    /// Currently selected clock source.
    pub fn clock_source(&self) -> Option<ClockSource> {
        self.clocking.as_ref().and_then(ClockingControl::clock_source)
    }

    /// Switch the reference clock.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device, or any state-machine
    /// error.
    pub fn set_clock_source(&mut self, source: ClockSource) -> Result<()> {
        self.check_usable("set_clock_source")?;
        self.clocking_mut()?.set_clock_source(source)
    }

    /// All selectable time sources.
    pub fn time_sources(&self) -> &'static [TimeSource] {
        &TimeSource::ALL
    }

    /// Currently selected time source.
    pub fn time_source(&self) -> Option<TimeSource> {
        self.clocking.as_ref().and_then(ClockingControl::time_source)
    }

    /// Switch the time source.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device, or any state-machine
    /// error.
    pub fn set_time_source(&mut self, source: TimeSource) -> Result<()> {
        self.check_usable("set_time_source")?;
        self.clocking_mut()?.set_time_source(source)
    }

    /// Record the external reference frequency.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device or `InvalidArgument`
    /// for an unsupported frequency.
    pub fn set_ref_clock_freq(&mut self, freq: f64) -> Result<()> {
        self.check_usable("set_ref_clock_freq")?;
        self.clocking_mut()?.set_ref_clock_freq(freq)
    }

    /// Currently active reference clock frequency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before clock initialization.
    pub fn ref_clock_freq(&self) -> Result<f64> {
        self.clocking
            .as_ref()
            .ok_or_else(|| Error::invalid_state("clocking not initialized"))?
            .ref_clock_freq()
    }

    /// Export or withhold the back-panel PPS/trigger output.
    ///
    /// # Errors
    ///
    /// Returns an error if the register block cannot be mapped.
    pub fn enable_pps_out(&self, enable: bool) -> Result<()> {
        self.clocking
            .as_ref()
            .ok_or_else(|| Error::invalid_state("clocking not initialized"))?
            .enable_pps_out(enable)
    }

    fn clocking_mut(&mut self) -> Result<&mut ClockingControl> {
        self.clocking
            .as_mut()
            .ok_or_else(|| Error::invalid_state("clocking not initialized"))
    }

    // ── Front-panel GPIO ownership ───────────────────────────────────────

    /// Set the front-panel GPIO master select (one bit per pin).
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device.
    pub fn set_fp_gpio_master(&self, value: u32) -> Result<()> {
        self.check_usable("set_fp_gpio_master")?;
        self.mb_regs()?.set_fp_gpio_master(value)
    }

    /// Read who drives the front-panel GPIO pins.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device.
    pub fn fp_gpio_master(&self) -> Result<u32> {
        self.check_usable("fp_gpio_master")?;
        self.mb_regs()?.fp_gpio_master()
    }

    /// Set which radio drives each front-panel GPIO pin.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device.
    pub fn set_fp_gpio_radio_src(&self, value: u32) -> Result<()> {
        self.check_usable("set_fp_gpio_radio_src")?;
        self.mb_regs()?.set_fp_gpio_radio_src(value)
    }

    /// Read which radio drives each front-panel GPIO pin.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device.
    pub fn fp_gpio_radio_src(&self) -> Result<u32> {
        self.check_usable("fp_gpio_radio_src")?;
        self.mb_regs()?.fp_gpio_radio_src()
    }

    fn mb_regs(&self) -> Result<&MbRegs> {
        self.regs
            .as_deref()
            .ok_or_else(|| Error::invalid_state("register block not initialized"))
    }

    // ── Device info ──────────────────────────────────────────────────────

    /// Identity of the device as probed at bring-up.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` on an unusable device.
    pub fn device_info(&self) -> Result<DeviceInfo> {
        self.check_usable("device_info")?;
        Ok(DeviceInfo {
            description: Self::DESCRIPTION.into(),
            fpga_version: format!("{}.{}", self.compat.0, self.compat.1),
            fpga_variant: self.variant.label().into(),
            link_types: (
                self.link_types.0.label().into(),
                self.link_types.1.label().into(),
            ),
        })
    }

    // ── Sensors ──────────────────────────────────────────────────────────

    /// Combined daughterboard reference-lock status.
    pub fn ref_lock_sensor(&self) -> SensorValue {
        sensors::ref_lock_sensor(&self.dboards)
    }

    /// GPS lock status from the port expander.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before the expander is initialized.
    pub fn gps_lock_sensor(&self) -> Result<SensorValue> {
        let gpio = self
            .gpio
            .as_ref()
            .ok_or_else(|| Error::invalid_state("port expander not initialized"))?;
        Ok(sensors::gps_lock_sensor(gpio))
    }

    /// FPGA temperature (sentinel `-1` when unavailable).
    pub fn temp_sensor(&self) -> SensorValue {
        sensors::temp_sensor()
    }

    /// Cooling-fan state (sentinel `-1` when unavailable).
    pub fn fan_sensor(&self) -> SensorValue {
        sensors::fan_sensor()
    }

    /// GPS time from the GPS daemon.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the daemon does not answer in time.
    pub fn gps_time_sensor(&mut self) -> Result<SensorValue> {
        sensors::gps_time_sensor(self.gps_client()?)
    }

    /// Raw TPV report from the GPS daemon.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the daemon does not answer in time.
    pub fn gps_tpv_sensor(&mut self) -> Result<SensorValue> {
        sensors::gps_tpv_sensor(self.gps_client()?)
    }

    /// Raw SKY report from the GPS daemon.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the daemon does not answer in time.
    pub fn gps_sky_sensor(&mut self) -> Result<SensorValue> {
        sensors::gps_sky_sensor(self.gps_client()?)
    }

    fn gps_client(&mut self) -> Result<&mut (dyn GpsClient + 'static)> {
        self.gps
            .as_deref_mut()
            .ok_or_else(|| Error::invalid_state("GPS client not initialized"))
    }

    // ── Claimer API ──────────────────────────────────────────────────────

    /// Called when a session claims the device: light the LINK indicator.
    ///
    /// # Errors
    ///
    /// Returns an error if the indicator cannot be driven.
    pub fn claim(&self) -> Result<()> {
        match &self.leds {
            Some(leds) => leds.set(Led::Link, true),
            None => Ok(()),
        }
    }

    /// Called when the session releases the device: LINK indicator off.
    ///
    /// # Errors
    ///
    /// Returns an error if the indicator cannot be driven.
    pub fn unclaim(&self) -> Result<()> {
        match &self.leds {
            Some(leds) => leds.set(Led::Link, false),
            None => Ok(()),
        }
    }

    /// Whether the status monitor is still running.
    pub fn monitor_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(StatusMonitor::is_running)
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        self.tear_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhw::{MockBench, ScriptedGps};
    use kestrel_regs::codec::encode_compat;
    use kestrel_regs::regs::{clock_ctrl, MB_CLOCK_CTRL, MB_COMPAT_NUM};

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn bring_up_reaches_ready() {
        let bench = MockBench::new();
        let board = Board::new(&HashMap::new(), bench.hardware());
        assert_eq!(board.init_state(), InitState::Ready);
        assert!(board.init_error().is_none());
        assert!(board.monitor_running());
        // Defaults applied.
        assert_eq!(board.clock_source(), Some(ClockSource::Internal));
        assert_eq!(board.time_source(), Some(TimeSource::Internal));
    }

    #[test]
    fn gpsdo_bring_up_without_ext_freq() {
        let bench = MockBench::new();
        let board = Board::new(&opts(&[("clock_source", "gpsdo")]), bench.hardware());
        assert_eq!(board.init_state(), InitState::Ready);
        let freq = board.ref_clock_freq().unwrap();
        assert!((freq - 20e6).abs() < f64::EPSILON);
    }

    #[test]
    fn old_minor_compat_fails_bring_up() {
        let bench = MockBench::new();
        bench.regs.write(MB_COMPAT_NUM, encode_compat(5, 1));
        let mut board = Board::new(&HashMap::new(), bench.hardware());
        assert_eq!(board.init_state(), InitState::Failed);
        assert!(board.init_error().unwrap().contains("compat"));

        // Operational calls are refused, not attempted.
        assert!(matches!(
            board.request_xport(0x20, 0, TransportKind::Ctrl),
            Err(Error::NotInitialized { .. })
        ));
        assert!(board.init(&HashMap::new()).is_err());
    }

    #[test]
    fn newer_minor_compat_is_accepted() {
        let bench = MockBench::new();
        bench.regs.write(MB_COMPAT_NUM, encode_compat(5, 3));
        let board = Board::new(&HashMap::new(), bench.hardware());
        assert_eq!(board.init_state(), InitState::Ready);
    }

    #[test]
    fn unlocked_meas_clock_degrades_but_does_not_fail() {
        let bench = MockBench::new();
        bench.regs.write(MB_COMPAT_NUM, encode_compat(5, 2));
        bench.clear_mmcm_lock();
        let board = Board::new(&HashMap::new(), bench.hardware());
        assert_eq!(board.init_state(), InitState::Ready);
    }

    #[test]
    fn variant_detection() {
        let bench = MockBench::new();
        let board = Board::new(&HashMap::new(), bench.hardware());
        let info = board.device_info().unwrap();
        assert_eq!(info.fpga_variant, "HG");
        assert_eq!(info.fpga_version, "5.2");
        assert_eq!(info.link_types, ("1G".into(), "10G".into()));
    }

    #[test]
    fn endpoint_lifecycle_through_transport_api() {
        let bench = MockBench::new();
        let mut board = Board::new(&HashMap::new(), bench.hardware());

        let h1 = board.request_xport(0x0220, 5, TransportKind::RxData).unwrap();
        assert_eq!(h1.sid.src(), 5);
        assert_eq!(h1.sid.dst(), 0x0220);

        // Preferred endpoint taken: smallest available instead.
        let h2 = board.request_xport(0x0221, 5, TransportKind::TxData).unwrap();
        assert_eq!(h2.sid.src(), 0);

        board
            .commit_xport(&TransportInfo {
                send_sid: h1.sid.raw(),
                ..Default::default()
            })
            .unwrap();

        // Committing an unallocated SID is rejected.
        assert!(board
            .commit_xport(&TransportInfo {
                send_sid: Sid::new(200, 0).raw(),
                ..Default::default()
            })
            .is_err());

        // Session teardown returns everything.
        board.deinit().unwrap();
        let h3 = board.request_xport(0x0222, 5, TransportKind::RxData).unwrap();
        assert_eq!(h3.sid.src(), 5);
    }

    #[test]
    fn session_init_wraps_clock_changes_in_pps_quiet_window() {
        let bench = MockBench::new();
        let mut board = Board::new(&opts(&[("pps_export", "1")]), bench.hardware());

        bench.regs.clear_write_log();
        board
            .init(&opts(&[("clock_source", "gpsdo"), ("time_source", "gpsdo")]))
            .unwrap();

        let pps_writes: Vec<bool> = bench
            .regs
            .write_log()
            .into_iter()
            .filter(|(offset, _)| *offset == MB_CLOCK_CTRL)
            .map(|(_, value)| value & (1 << clock_ctrl::PPS_OUT_EN) != 0)
            .collect();
        // First clock-control write of the session disables the PPS export,
        // the last one restores it.
        assert_eq!(pps_writes.first(), Some(&false));
        assert_eq!(pps_writes.last(), Some(&true));
    }

    #[test]
    fn tear_down_stops_monitor() {
        let bench = MockBench::new();
        let mut board = Board::new(&HashMap::new(), bench.hardware());
        assert!(board.monitor_running());
        board.tear_down();
        assert!(!board.monitor_running());
        // Idempotent.
        board.tear_down();
    }

    #[test]
    fn claim_lights_link_led() {
        let bench = MockBench::new();
        let board = Board::new(&HashMap::new(), bench.hardware());
        board.claim().unwrap();
        assert_eq!(bench.led_pins.level(Led::Link as usize), 1);
        board.unclaim().unwrap();
        assert_eq!(bench.led_pins.level(Led::Link as usize), 0);
    }

    #[test]
    fn bad_config_value_fails_bring_up() {
        let bench = MockBench::new();
        let board = Board::new(&opts(&[("clock_source", "atomic")]), bench.hardware());
        assert_eq!(board.init_state(), InitState::Failed);
    }

    #[test]
    fn local_connection_uses_dma_manager() {
        let bench = MockBench::new();
        let mut board = Board::new(&HashMap::new(), bench.hardware());
        board.set_connection(ConnectionKind::Local);
        // The DMA manager has a finite channel budget; exhaust it.
        for _ in 0..DmaTransportMgr::MAX_CHAN {
            board.request_xport(0, 0, TransportKind::RxData).unwrap();
        }
        assert!(matches!(
            board.request_xport(0, 0, TransportKind::RxData),
            Err(Error::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn gps_sensors_flow_through_client() {
        let bench = MockBench::new().with_gps(ScriptedGps::new(vec![serde_json::json!({
            "class": "SKY", "satellites": []
        })]));
        let mut board = Board::new(&HashMap::new(), bench.hardware());
        let sky = board.gps_sky_sensor().unwrap();
        assert!(sky.value.contains("satellites"));
    }
}
