//! Board sensor reporting.
//!
//! Sensors answer "how is the hardware doing" queries: lock states, FPGA
//! temperature, fan speed, GPS fixes. Thermal readings degrade to a sentinel
//! value instead of failing — sensor reporting must not crash an otherwise
//! healthy device. GPS queries go to the local GPS daemon over its JSON
//! protocol with a request-level timeout, never an indefinite block.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use crate::clocking::Daughterboard;
use crate::error::{Error, Result};
use crate::gpio::{GpioExpander, Pin};

/// Sentinel reported when a sensor value cannot be read or converted.
const SENSOR_UNAVAILABLE: &str = "-1";

/// Default timeout for one GPS daemon request.
pub const GPS_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// ── Sensor records ───────────────────────────────────────────────────────────

/// Data type of a sensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorKind {
    /// True/false state.
    Boolean,
    /// Whole-number reading.
    Integer,
    /// Real-valued reading.
    Realnum,
    /// Free-form string payload.
    String,
}

/// One sensor reading, as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorValue {
    /// Sensor name.
    pub name: String,
    /// Data type of `value`.
    #[serde(rename = "type")]
    pub kind: SensorKind,
    /// Unit or state label.
    pub unit: String,
    /// Reading, stringified.
    pub value: String,
}

impl SensorValue {
    fn boolean(name: &str, state: bool, on: &str, off: &str) -> Self {
        Self {
            name: name.into(),
            kind: SensorKind::Boolean,
            unit: (if state { on } else { off }).into(),
            value: state.to_string(),
        }
    }
}

// ── Lock sensors ─────────────────────────────────────────────────────────────

/// Combined reference-lock status of all daughterboards.
///
/// The motherboard has no reference-lock detector of its own; a device
/// without a lock sensor counts as locked, so an empty slot list reads
/// `true`.
pub fn ref_lock_sensor(dboards: &[Arc<dyn Daughterboard>]) -> SensorValue {
    tracing::trace!("Querying ref lock status from {} dboards.", dboards.len());
    let locked = dboards.iter().all(|db| db.ref_lock().unwrap_or(true));
    SensorValue::boolean("ref_locked", locked, "locked", "unlocked")
}

/// GPS lock status, read from the port expander.
pub fn gps_lock_sensor(gpio: &GpioExpander) -> SensorValue {
    tracing::trace!("Reading GPS lock pin from port expander");
    let locked = gpio.get(Pin::GpsLockOk).map(|v| v != 0).unwrap_or_else(|e| {
        tracing::warn!("Failed to read GPS lock pin: {e}");
        false
    });
    SensorValue::boolean("gps_lock", locked, "locked", "unlocked")
}

// ── Thermal sensors ──────────────────────────────────────────────────────────

/// FPGA die temperature in degrees Celsius.
///
/// Read failures degrade to the `-1` sentinel with a warning.
pub fn temp_sensor() -> SensorValue {
    tracing::trace!("Reading FPGA temperature.");
    let value = match read_thermal_zone("fpga-thermal-zone", "temp") {
        // Reported in millidegrees Celsius.
        Ok(millic) => (millic as f64 / 1000.0).to_string(),
        Err(e) => {
            tracing::warn!("Can't read temp on fpga-thermal-zone: {e}");
            SENSOR_UNAVAILABLE.into()
        }
    };
    SensorValue {
        name: "temperature".into(),
        kind: SensorKind::Realnum,
        unit: "C".into(),
        value,
    }
}

/// Cooling-fan state.
///
/// Read failures degrade to the `-1` sentinel with a warning.
pub fn fan_sensor() -> SensorValue {
    tracing::trace!("Reading FPGA cooling device.");
    let value = match read_cooling_device("ec-fan0", "cur_state") {
        Ok(raw) => raw.to_string(),
        Err(e) => {
            tracing::warn!("Can't read cur_state on ec-fan0: {e}");
            SENSOR_UNAVAILABLE.into()
        }
    };
    SensorValue {
        name: "cooling fan".into(),
        kind: SensorKind::Integer,
        unit: "rpm".into(),
        value,
    }
}

/// Find the thermal zone whose `type` matches and read one of its items.
fn read_thermal_zone(zone_type: &str, item: &str) -> Result<i64> {
    read_sysfs_class("/sys/class/thermal", "thermal_zone", zone_type, item)
}

/// Find the cooling device whose `type` matches and read one of its items.
fn read_cooling_device(dev_type: &str, item: &str) -> Result<i64> {
    read_sysfs_class("/sys/class/thermal", "cooling_device", dev_type, item)
}

fn read_sysfs_class(root: &str, prefix: &str, type_name: &str, item: &str) -> Result<i64> {
    for entry in std::fs::read_dir(root)?.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        let path = entry.path();
        let Ok(ty) = std::fs::read_to_string(path.join("type")) else {
            continue;
        };
        if ty.trim() != type_name {
            continue;
        }
        let raw = std::fs::read_to_string(path.join(item))?;
        return raw
            .trim()
            .parse()
            .map_err(|e| Error::invalid_state(format!("bad {item} value: {e}")));
    }
    Err(Error::invalid_state(format!(
        "no {prefix} of type `{type_name}' found"
    )))
}

// ── GPS daemon client ────────────────────────────────────────────────────────

/// Client interface to the GPS daemon. Acquired per call; every request
/// carries its own timeout.
pub trait GpsClient: Send {
    /// Fetch the next report of class `resp_class` (`"tpv"`, `"sky"`, …).
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if no matching report arrives in time, or an I/O
    /// error if the daemon is unreachable.
    fn get_info(&mut self, resp_class: &str, timeout: Duration) -> Result<Value>;
}

/// GPS daemon client over the local JSON socket.
#[derive(Debug)]
pub struct GpsdClient {
    addr: SocketAddr,
}

impl GpsdClient {
    /// Client for the daemon's default local endpoint.
    pub fn new() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 2947)),
        }
    }
}

impl Default for GpsdClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GpsClient for GpsdClient {
    fn get_info(&mut self, resp_class: &str, timeout: Duration) -> Result<Value> {
        let stream = TcpStream::connect_timeout(&self.addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        let mut writer = stream.try_clone()?;
        writeln!(writer, r#"?WATCH={{"enable":true,"json":true}}"#)?;

        let deadline = Instant::now() + timeout;
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let line = line.map_err(|e| match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => timeout_error(timeout),
                _ => Error::from(e),
            })?;
            // The daemon interleaves report classes; skip anything that isn't
            // valid JSON of the class we asked for.
            let Ok(value) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            if value
                .get("class")
                .and_then(Value::as_str)
                .is_some_and(|c| c.eq_ignore_ascii_case(resp_class))
            {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Err(timeout_error(timeout))
    }
}

fn timeout_error(timeout: Duration) -> Error {
    Error::Timeout {
        duration_ms: timeout.as_millis() as u64,
    }
}

/// GPS time in seconds since the Unix epoch, from a TPV report.
///
/// Polls until the daemon reports a non-trivial fix mode. This time is not
/// high accuracy.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable, times out, or reports an
/// unparseable time string.
pub fn gps_time_sensor(client: &mut dyn GpsClient) -> Result<SensorValue> {
    tracing::trace!("Polling GPS time results from the GPS daemon");
    let info = poll_with_fix(client)?;
    let time_str = info.get("time").and_then(Value::as_str).unwrap_or("");
    tracing::trace!("GPS time string: {time_str}");
    let time = NaiveDateTime::parse_from_str(time_str, "%Y-%m-%dT%H:%M:%S%.fZ")
        .map_err(|e| Error::invalid_state(format!("unparseable GPS time `{time_str}': {e}")))?;
    Ok(SensorValue {
        name: "gps_time".into(),
        kind: SensorKind::Integer,
        unit: "seconds".into(),
        value: time.and_utc().timestamp().to_string(),
    })
}

/// Raw TPV report from the GPS daemon, JSON-encoded.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable or times out.
pub fn gps_tpv_sensor(client: &mut dyn GpsClient) -> Result<SensorValue> {
    tracing::trace!("Polling GPS TPV results from the GPS daemon");
    let info = poll_with_fix(client)?;
    Ok(SensorValue {
        name: "gps_tpv".into(),
        kind: SensorKind::String,
        unit: String::new(),
        value: info.to_string(),
    })
}

/// Raw SKY report from the GPS daemon, JSON-encoded.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable or times out.
pub fn gps_sky_sensor(client: &mut dyn GpsClient) -> Result<SensorValue> {
    tracing::trace!("Polling GPS SKY results from the GPS daemon");
    // Just take the first SKY report.
    let info = client.get_info("sky", GPS_REQUEST_TIMEOUT)?;
    Ok(SensorValue {
        name: "gps_sky".into(),
        kind: SensorKind::String,
        unit: String::new(),
        value: info.to_string(),
    })
}

/// Read TPV reports until the fix mode is non-trivial.
fn poll_with_fix(client: &mut dyn GpsClient) -> Result<Value> {
    loop {
        let info = client.get_info("tpv", GPS_REQUEST_TIMEOUT)?;
        tracing::trace!("GPS info: {info}");
        if info.get("mode").and_then(Value::as_i64).unwrap_or(0) > 0 {
            return Ok(info);
        }
    }
}
