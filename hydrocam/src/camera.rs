//! HydroCAM camera driver.
//!
//! [`HydroCam`] owns a [`Port`] and exposes every camera operation as a
//! method. Control commands return `bool` (accepted or not) or a
//! [`Status`]; getters return `Option`, `None` meaning the field could not be
//! read. `Err` is reserved for transport failures and interruption.

use crate::error::{Error, Result};
use crate::is_interrupted_requested;
use crate::port::Port;
use crate::protocol::command::Command;
use crate::protocol::info::{self, InfoQuery, InfoTiming};
use crate::protocol::reader::{find, parse_leading_int, read_until, wait_available};
use crate::protocol::response::{self, Terminators};
use crate::protocol::status::Status;
use crate::transfer::{self, ChunkTiming, TransferConfig, TransferReport};
use log::{debug, info, trace, warn};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};

/// Banner printed by the camera once it has rebooted.
pub const BOOT_BANNER: &str = "Geolux HydroCAM";

/// Timing knobs of the camera driver.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Deadline for the reply to a control command.
    pub command_timeout: Duration,
    /// Deadline for the boot banner after `#reset`.
    pub restart_timeout: Duration,
    /// Per-byte wait when skipping to the end of a status line.
    pub line_timeout: Duration,
    /// Pause between two `get_status` polls while waiting for ready.
    pub poll_interval: Duration,
    /// Pause between lines while dumping `#get_info`.
    pub info_line_spacing: Duration,
    /// Info-block scanner timing.
    pub info: InfoTiming,
    /// Chunk fetcher timing.
    pub chunk: ChunkTiming,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command_timeout: response::DEFAULT_RESPONSE_TIMEOUT,
            restart_timeout: Duration::from_secs(10),
            line_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
            info_line_spacing: Duration::from_millis(2),
            info: InfoTiming::default(),
            chunk: ChunkTiming::default(),
        }
    }
}

impl CameraConfig {
    /// Set the control command deadline.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the boot banner deadline.
    #[must_use]
    pub fn with_restart_timeout(mut self, timeout: Duration) -> Self {
        self.restart_timeout = timeout;
        self
    }

    /// Set the per-byte wait used when skipping to the end of a line.
    #[must_use]
    pub fn with_line_timeout(mut self, timeout: Duration) -> Self {
        self.line_timeout = timeout;
        self
    }

    /// Set the readiness poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the info scanner timing.
    #[must_use]
    pub fn with_info_timing(mut self, timing: InfoTiming) -> Self {
        self.info = timing;
        self
    }

    /// Set the chunk fetcher timing.
    #[must_use]
    pub fn with_chunk_timing(mut self, timing: ChunkTiming) -> Self {
        self.chunk = timing;
        self
    }
}

/// IR filter mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum NightMode {
    /// IR filter always active, color image.
    Day,
    /// IR filter disabled, monochrome image.
    Night,
    /// Filter follows the ambient light.
    Auto,
}

impl NightMode {
    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Night => "night",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for NightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NightMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "day" => Ok(Self::Day),
            "night" => Ok(Self::Night),
            "auto" => Ok(Self::Auto),
            other => Err(Error::Config(format!("unknown night mode: {other}"))),
        }
    }
}

/// IR LED mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum IrLedMode {
    /// LEDs on at night, off during the day.
    On,
    /// LEDs always off.
    Off,
    /// LEDs on only when the scene is too dark.
    Auto,
}

impl IrLedMode {
    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for IrLedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IrLedMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "auto" => Ok(Self::Auto),
            other => Err(Error::Config(format!("unknown IR LED mode: {other}"))),
        }
    }
}

/// Autoexposure region, in percent of the frame relative to its center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    /// Horizontal position.
    pub x: i8,
    /// Vertical position.
    pub y: i8,
    /// Width.
    pub width: i8,
    /// Height.
    pub height: i8,
}

/// White balance offsets per color channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WhiteBalance {
    /// Red offset.
    pub red: i8,
    /// Green offset.
    pub green: i8,
    /// Blue offset.
    pub blue: i8,
}

/// A HydroCAM on a serial port.
pub struct HydroCam<P: Port> {
    port: P,
    config: CameraConfig,
}

#[cfg(feature = "native")]
impl HydroCam<NativePort> {
    /// Open the camera on `port_name` at 115200 8N1.
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with(&SerialConfig::new(port_name), CameraConfig::default())
    }

    /// Open the camera with explicit serial and timing settings.
    pub fn open_with(serial: &SerialConfig, config: CameraConfig) -> Result<Self> {
        const MAX_OPEN_PORT_ATTEMPTS: usize = 3;
        const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

        let mut last_error = None;

        for attempt in 1..=MAX_OPEN_PORT_ATTEMPTS {
            match NativePort::open(serial) {
                Ok(port) => {
                    if attempt > 1 {
                        debug!("Port opened on attempt {attempt}");
                    }
                    return Ok(Self::with_config(port, config));
                },
                Err(e) => {
                    warn!(
                        "Failed to open port {} (attempt {attempt}/{MAX_OPEN_PORT_ATTEMPTS}): {e}",
                        serial.port_name
                    );
                    last_error = Some(e);

                    if attempt < MAX_OPEN_PORT_ATTEMPTS {
                        thread::sleep(OPEN_RETRY_DELAY);
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Config(format!("cannot open {}", serial.port_name))))
    }
}

impl<P: Port> HydroCam<P> {
    /// Wrap an open port with default timing.
    pub fn new(port: P) -> Self {
        Self::with_config(port, CameraConfig::default())
    }

    /// Wrap an open port.
    pub fn with_config(port: P, config: CameraConfig) -> Self {
        Self { port, config }
    }

    /// Timing in use.
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// The underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The underlying port, mutably.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Release the port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Write one command line.
    pub fn send_command(&mut self, command: &Command) -> Result<()> {
        command.send(&mut self.port)
    }

    /// Wait for a reply ending in one of `terminators`, see
    /// [`response::wait_response`].
    pub fn wait_response(
        &mut self,
        timeout: Duration,
        terminators: &Terminators<'_>,
        data: &mut String,
    ) -> Result<Option<usize>> {
        response::wait_response(&mut self.port, timeout, terminators, data)
    }

    /// Send a control command and classify the reply.
    fn control(&mut self, command: &Command) -> Result<Status> {
        self.send_command(command)?;
        let mut data = String::new();
        let index = self.wait_response(self.config.command_timeout, &Terminators::COMMAND, &mut data)?;
        let status = Status::from_match(index);
        trace!("{} -> {status}", command.name());
        Ok(status)
    }

    /// Send a control command; `true` when the camera answered OK.
    fn control_ok(&mut self, command: &Command) -> Result<bool> {
        let status = self.control(command)?;
        if status != Status::Ok {
            debug!("Camera rejected {}: {status}", command.name());
        }
        Ok(status == Status::Ok)
    }

    fn skip_line(&mut self) -> Result<bool> {
        find(&mut self.port, b"\n", self.config.line_timeout)
    }

    // ---- snapshots and images ----

    /// Capture a new image into the camera's buffer.
    pub fn take_snapshot(&mut self) -> Result<Status> {
        self.control(&Command::take_snapshot())
    }

    /// Query the camera state.
    pub fn status(&mut self) -> Result<Status> {
        self.send_command(&Command::get_status())?;
        let mut data = String::new();
        let index = self.wait_response(self.config.command_timeout, &Terminators::STATUS, &mut data)?;
        if index.is_some() {
            self.skip_line()?;
        }
        Ok(Status::from_match(index))
    }

    /// Size in bytes of the last snapshot, as reported by `#get_status`.
    pub fn image_size(&mut self) -> Result<Option<usize>> {
        self.send_command(&Command::get_status())?;
        let mut data = String::new();
        let index = self.wait_response(self.config.command_timeout, &Terminators::STATUS, &mut data)?;
        if index.is_none() {
            debug!("No reply to get_status");
            return Ok(None);
        }
        if !find(&mut self.port, b",", self.config.line_timeout)? {
            debug!("Status line carries no image size");
            return Ok(None);
        }

        let value = read_until(&mut self.port, b'\r', None, self.config.line_timeout)?;
        self.skip_line()?;
        let size = parse_leading_int(&value).and_then(|v| usize::try_from(v).ok());
        debug!("Image size: {size:?}");
        Ok(size)
    }

    /// Fetch `buf.len()` image bytes at `offset`. Returns the bytes copied.
    pub fn image_chunk(&mut self, buf: &mut [u8], offset: usize) -> Result<usize> {
        transfer::fetch_chunk(&mut self.port, buf, offset, &self.config.chunk)
    }

    /// Stream the last snapshot into `sink`.
    ///
    /// When `image_size` is `None` or 0 it is queried first. A size that is
    /// still unknown fails with [`Error::Protocol`] before any image request.
    pub fn transfer_image<W, F>(
        &mut self,
        sink: &mut W,
        image_size: Option<usize>,
        config: &TransferConfig,
        progress: F,
    ) -> Result<TransferReport>
    where
        W: Write + ?Sized,
        F: FnMut(usize, usize),
    {
        let size = match image_size.filter(|&size| size > 0) {
            Some(size) => size,
            None => self
                .image_size()?
                .filter(|&size| size > 0)
                .ok_or_else(|| Error::Protocol("camera did not report an image size".into()))?,
        };
        transfer::transfer_image(&mut self.port, sink, size, config, progress)
    }

    // ---- lifecycle ----

    /// Reboot the camera and wait for its banner.
    ///
    /// Returns `true` when the reset was accepted.
    pub fn restart(&mut self) -> Result<bool> {
        if !self.control_ok(&Command::reset())? {
            return Ok(false);
        }

        let mut data = String::new();
        let banner = self.wait_response(
            self.config.restart_timeout,
            &Terminators::single(BOOT_BANNER),
            &mut data,
        )?;
        if banner.is_some() {
            self.skip_line()?;
            info!("Camera restarted");
        } else {
            warn!("No boot banner within {:?}", self.config.restart_timeout);
        }
        Ok(true)
    }

    /// Put the camera to sleep for `timeout_s` seconds.
    pub fn sleep(&mut self, timeout_s: u32) -> Result<bool> {
        self.control_ok(&Command::new("sleep").arg(timeout_s))
    }

    /// Poll until the camera reports ready (OK or NONE).
    ///
    /// Sleeps `initial_delay` first. Returns the time since the call started
    /// once ready, or `None` if `timeout` (which includes the initial delay)
    /// passed first.
    pub fn wait_for_ready(&mut self, initial_delay: Duration, timeout: Duration) -> Result<Option<Duration>> {
        let start = Instant::now();
        thread::sleep(initial_delay);

        let mut status = Status::NoResponse;
        while !status.is_ready() && start.elapsed() < timeout {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            status = self.status()?;
            if !status.is_ready() {
                thread::sleep(self.config.poll_interval);
            }
        }

        if status.is_ready() {
            let elapsed = start.elapsed();
            debug!("Camera ready after {elapsed:?}");
            Ok(Some(elapsed))
        } else {
            warn!("Camera not ready after {timeout:?}, last status {status}");
            Ok(None)
        }
    }

    // ---- info block ----

    /// Raw `#get_info` dump, one entry per line without line endings.
    pub fn camera_info(&mut self) -> Result<Vec<String>> {
        self.send_command(&Command::get_info())?;
        wait_available(&mut self.port, 1, self.config.info.response_timeout)?;

        let mut lines = Vec::new();
        while self.port.bytes_available()? > 0 {
            let line = read_until(&mut self.port, b'\n', None, self.config.info.settle_timeout)?;
            let line = String::from_utf8_lossy(&line);
            lines.push(line.trim_end_matches('\r').to_string());
            thread::sleep(self.config.info_line_spacing);
        }
        Ok(lines)
    }

    /// Write the `#get_info` dump to `out`. Returns the number of lines.
    pub fn write_camera_info<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<usize> {
        let lines = self.camera_info()?;
        for line in &lines {
            writeln!(out, "{line}")?;
        }
        Ok(lines.len())
    }

    /// Text field from the info dump.
    pub fn info_string(&mut self, query: &InfoQuery<'_>) -> Result<Option<String>> {
        info::query_string(&mut self.port, query, &self.config.info)
    }

    /// Integer field from the info dump.
    pub fn info_int(&mut self, query: &InfoQuery<'_>) -> Result<Option<i64>> {
        info::query_int(&mut self.port, query, &self.config.info)
    }

    fn info_number<T: TryFrom<i64>>(&mut self, query: &InfoQuery<'_>) -> Result<Option<T>> {
        let value = self.info_int(query)?;
        let converted = value.and_then(|v| T::try_from(v).ok());
        if value.is_some() && converted.is_none() {
            debug!("Info {:?} out of range: {value:?}", query.label);
        }
        Ok(converted)
    }

    fn info_parsed<T: FromStr>(&mut self, label: &str) -> Result<Option<T>> {
        Ok(self
            .info_string(&InfoQuery::new(label))?
            .and_then(|value| value.parse().ok()))
    }

    /// Camera model.
    pub fn device_type(&mut self) -> Result<Option<String>> {
        self.info_string(&InfoQuery::new("#device_type:"))
    }

    /// Firmware version.
    pub fn firmware(&mut self) -> Result<Option<String>> {
        self.info_string(&InfoQuery::new("#firmware:"))
    }

    /// Serial number.
    pub fn serial_number(&mut self) -> Result<Option<u64>> {
        self.info_number(&InfoQuery::new("#serial_id:"))
    }

    // ---- optics ----

    /// Run a single autofocus pass.
    pub fn run_autofocus(&mut self) -> Result<bool> {
        self.control_ok(&Command::new("run_autofocus"))
    }

    /// Point the autofocus at `(x, y)`.
    pub fn set_autofocus_point(&mut self, x: i8, y: i8) -> Result<bool> {
        self.control_ok(&Command::new("set_autofocus_point").args([x, y]))
    }

    /// Autofocus point as `(x, y)`.
    pub fn autofocus_point(&mut self) -> Result<Option<(i8, i8)>> {
        const LABEL: &str = "#autofocus_point:";
        let Some(x) = self.info_number(&InfoQuery::field(LABEL, 0, 2))? else {
            return Ok(None);
        };
        let y = self.info_number(&InfoQuery::field(LABEL, 1, 2))?;
        Ok(y.map(|y| (x, y)))
    }

    /// Move the focus motor by `offset` steps.
    pub fn move_focus(&mut self, offset: i8) -> Result<bool> {
        self.control_ok(&Command::new("move_focus").arg(offset))
    }

    /// Focus motor position.
    pub fn focus_position(&mut self) -> Result<Option<i16>> {
        self.info_number(&InfoQuery::new("#focus_position:"))
    }

    /// Move the zoom motor by `offset` steps.
    pub fn move_zoom(&mut self, offset: i8) -> Result<bool> {
        self.control_ok(&Command::new("move_zoom").arg(offset))
    }

    /// Zoom motor position.
    pub fn zoom_position(&mut self) -> Result<Option<i8>> {
        self.info_number(&InfoQuery::new("#zoom_position:"))
    }

    // ---- image settings ----

    /// Set the resolution, e.g. `1280x720`.
    pub fn set_resolution(&mut self, resolution: &str) -> Result<bool> {
        self.control_ok(&Command::new("set_resolution").arg(resolution))
    }

    /// Current resolution.
    pub fn resolution(&mut self) -> Result<Option<String>> {
        self.info_string(&InfoQuery::new("#resolution:"))
    }

    /// Set the JPEG quality.
    pub fn set_quality(&mut self, quality: u8) -> Result<bool> {
        self.control_ok(&Command::new("set_quality").arg(quality))
    }

    /// JPEG quality.
    pub fn quality(&mut self) -> Result<Option<u8>> {
        self.info_number(&InfoQuery::new("#quality:"))
    }

    /// Cap the JPEG size (in KiB). The camera lowers the quality to fit.
    pub fn set_jpeg_maximum_size(&mut self, size: u16) -> Result<bool> {
        self.control_ok(&Command::new("set_jpeg_maximum_size").arg(size))
    }

    /// JPEG size cap (in KiB).
    pub fn jpeg_maximum_size(&mut self) -> Result<Option<u32>> {
        self.info_number(&InfoQuery::new("#jpeg_maximum_size:"))
    }

    /// Set the IR filter mode.
    pub fn set_night_mode(&mut self, mode: NightMode) -> Result<bool> {
        self.control_ok(&Command::new("set_night_mode").arg(mode))
    }

    /// IR filter mode setting.
    pub fn night_mode(&mut self) -> Result<Option<NightMode>> {
        self.info_parsed("#night_mode:")
    }

    /// Whether the IR filter is currently in night position.
    pub fn ir_filter_night(&mut self) -> Result<Option<bool>> {
        Ok(self
            .info_string(&InfoQuery::new("#ir_filter:"))?
            .map(|value| value == "night"))
    }

    /// Set the IR LED mode.
    pub fn set_ir_led_mode(&mut self, mode: IrLedMode) -> Result<bool> {
        self.control_ok(&Command::new("set_ir_led_mode").arg(mode))
    }

    /// IR LED mode setting.
    pub fn ir_led_mode(&mut self) -> Result<Option<IrLedMode>> {
        self.info_parsed("#ir_led_mode:")
    }

    /// Set the autoexposure region.
    pub fn set_autoexposure_region(&mut self, region: Region) -> Result<bool> {
        self.control_ok(
            &Command::new("set_autoexposure_region").args([region.x, region.y, region.width, region.height]),
        )
    }

    /// Autoexposure region.
    pub fn autoexposure_region(&mut self) -> Result<Option<Region>> {
        const LABEL: &str = "#autoexposure_region:";
        let mut fields = [0i8; 4];
        for (n, field) in fields
            .iter_mut()
            .enumerate()
        {
            let Some(value) = self.info_number(&InfoQuery::field(LABEL, n, 4))? else {
                return Ok(None);
            };
            *field = value;
        }
        let [x, y, width, height] = fields;
        Ok(Some(Region { x, y, width, height }))
    }

    /// Current exposure time.
    pub fn exposure_time(&mut self) -> Result<Option<u32>> {
        self.info_number(&InfoQuery::new("#exposure:"))
    }

    /// Current image brightness.
    pub fn image_brightness(&mut self) -> Result<Option<u32>> {
        self.info_number(&InfoQuery::new("#image_brightness:"))
    }

    /// Set the white balance offsets.
    pub fn set_white_balance_offset(&mut self, offset: WhiteBalance) -> Result<bool> {
        self.control_ok(&Command::new("set_wb_offset").args([offset.red, offset.green, offset.blue]))
    }

    /// White balance offsets.
    pub fn white_balance_offset(&mut self) -> Result<Option<WhiteBalance>> {
        const LABEL: &str = "#wb_offset:";
        let mut fields = [0i8; 3];
        for (n, field) in fields
            .iter_mut()
            .enumerate()
        {
            let Some(value) = self.info_number(&InfoQuery::field(LABEL, n, 3))? else {
                return Ok(None);
            };
            *field = value;
        }
        let [red, green, blue] = fields;
        Ok(Some(WhiteBalance { red, green, blue }))
    }

    /// Enable or disable color correction.
    pub fn set_color_correction(&mut self, enabled: bool) -> Result<bool> {
        self.control_ok(&Command::new("set_color_correction_mod").arg(u8::from(enabled)))
    }

    /// Whether color correction is on.
    pub fn color_correction(&mut self) -> Result<Option<bool>> {
        Ok(self
            .info_string(&InfoQuery::new("#color_correction_mode:"))?
            .map(|value| value == "on"))
    }

    /// Take a snapshot every `interval` seconds; 0 turns it off.
    pub fn set_auto_snapshot_interval(&mut self, interval: u32) -> Result<bool> {
        self.control_ok(&Command::new("set_auto_snapshot_interval").arg(interval))
    }

    /// Automatic snapshot interval in seconds, 0 when off.
    pub fn auto_snapshot_interval(&mut self) -> Result<Option<u32>> {
        let Some(value) = self.info_string(&InfoQuery::new("#auto_snapshot_interval:"))? else {
            return Ok(None);
        };
        if value == "off" {
            return Ok(Some(0));
        }
        Ok(parse_leading_int(value.as_bytes()).and_then(|v| u32::try_from(v).ok()))
    }
}
