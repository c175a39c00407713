//! # hydrocam
//!
//! A driver for Geolux HydroCAM serial cameras.
//!
//! The camera speaks a line-oriented ASCII protocol: the host writes
//! `#command[=args]\r\n`, the camera answers with a status line, and images
//! are pulled in byte ranges with `#get_image=<offset>,<length>,RAW`. This
//! crate provides:
//!
//! - command framing and reply classification
//! - scanning of the `#get_info` configuration dump
//! - chunked JPEG transfer that copes with wrong sizes and stalled cameras
//! - a typed [`HydroCam`] facade over every camera setting
//!
//! All I/O goes through the [`Port`] trait, so the driver runs against a real
//! serial line or against [`FakePort`] in tests.
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: Serialization support for status and transfer reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use hydrocam::{HydroCam, TransferConfig};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let mut camera = HydroCam::open("/dev/ttyUSB0")?;
//!         camera.take_snapshot()?;
//!         camera.wait_for_ready(Duration::from_millis(500), Duration::from_secs(15))?;
//!
//!         let mut file = std::fs::File::create("snapshot.jpg")?;
//!         let report = camera.transfer_image(&mut file, None, &TransferConfig::default(), |current, total| {
//!             println!("{current}/{total}");
//!         })?;
//!         println!("{} bytes, {:?}", report.bytes_written, report.termination);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod camera;
pub mod error;
pub mod port;
pub mod protocol;
pub mod transfer;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
thread_local! {
    static TEST_INTERRUPTED: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Test hook: the flag is per thread, so parallel tests do not see each other.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    set_interrupt_checker(|| TEST_INTERRUPTED.with(std::cell::Cell::get));
    TEST_INTERRUPTED.with(|flag| flag.set(value));
}

#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    camera::{CameraConfig, HydroCam, IrLedMode, NightMode, Region, WhiteBalance},
    error::{Error, Result},
    port::{FakePort, Port, SerialConfig},
    protocol::{Command, InfoQuery, Status, Terminators},
    transfer::{Termination, TransferConfig, TransferReport},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_stops_transfer() {
        let mut port = FakePort::with_responder(|_| vec![0x01, 0x02, 0xFF, 0xD8]);
        let mut sink = Vec::new();

        test_set_interrupted(true);
        let result = transfer::transfer_image(
            &mut port,
            &mut sink,
            1000,
            &TransferConfig::default(),
            |_, _| {},
        );
        test_set_interrupted(false);

        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(port.commands().is_empty());
    }

    #[test]
    fn test_interrupt_stops_ready_poll() {
        let port = FakePort::with_responder(|_| b"BUSY,0\r\n".to_vec());
        let mut camera = HydroCam::new(port);

        test_set_interrupted(true);
        let result = camera.wait_for_ready(
            std::time::Duration::ZERO,
            std::time::Duration::from_secs(5),
        );
        test_set_interrupted(false);

        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(
            camera
                .port()
                .commands()
                .is_empty()
        );
    }
}
