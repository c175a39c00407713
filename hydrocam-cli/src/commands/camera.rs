//! Status, snapshot, readiness, info and restart commands.

use anyhow::{Result, bail};
use console::style;
use hydrocam::{HydroCam, Port, Status};
use std::io;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, open_camera};

/// Poll until ready, mapping a timeout or Ctrl-C to CLI errors.
pub(crate) fn wait_until_ready<P: Port>(
    camera: &mut HydroCam<P>,
    cli: &Cli,
    delay: Duration,
    timeout: Duration,
) -> Result<Duration> {
    if !cli.quiet {
        eprintln!(
            "{} Waiting for the camera (up to {}s)...",
            style("⏳").yellow(),
            timeout.as_secs()
        );
    }

    match camera.wait_for_ready(delay, timeout) {
        Ok(Some(elapsed)) => {
            if !cli.quiet {
                eprintln!(
                    "{} Camera ready after {} ms",
                    style("✓").green(),
                    elapsed.as_millis()
                );
            }
            Ok(elapsed)
        },
        Ok(None) => bail!("camera not ready after {}s", timeout.as_secs()),
        Err(e) if e.is_interrupted() => {
            Err(CliError::Cancelled("interrupted while waiting for the camera".into()).into())
        },
        Err(e) => Err(e.into()),
    }
}

/// Take a snapshot and fail unless the camera accepted it.
pub(crate) fn snapshot<P: Port>(camera: &mut HydroCam<P>, cli: &Cli) -> Result<()> {
    let status = camera.take_snapshot()?;
    if status != Status::Ok {
        bail!("camera refused the snapshot: {status}");
    }
    if !cli.quiet {
        eprintln!("{} Snapshot taken", style("📷").cyan());
    }
    Ok(())
}

/// Status command implementation.
pub(crate) fn cmd_status(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut camera = open_camera(cli, config)?;

    let status = camera.status()?;
    let image_size = if status == Status::NoResponse {
        None
    } else {
        camera.image_size()?
    };

    if json {
        let output = serde_json::json!({
            "status": status,
            "image_size": image_size,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("status: {status}");
        match image_size {
            Some(size) => println!("image size: {size} bytes"),
            None => println!("image size: unknown"),
        }
    }

    if status == Status::NoResponse {
        bail!("no response from camera on {}", camera.port().name());
    }
    Ok(())
}

/// Snapshot command implementation.
pub(crate) fn cmd_snapshot(cli: &Cli, config: &Config, wait: Option<u64>) -> Result<()> {
    let mut camera = open_camera(cli, config)?;
    snapshot(&mut camera, cli)?;

    if let Some(secs) = wait {
        wait_until_ready(&mut camera, cli, Duration::ZERO, Duration::from_secs(secs))?;
    }
    Ok(())
}

/// Wait-ready command implementation.
pub(crate) fn cmd_wait_ready(cli: &Cli, config: &Config, timeout: u64, delay: u64) -> Result<()> {
    let mut camera = open_camera(cli, config)?;
    let elapsed = wait_until_ready(
        &mut camera,
        cli,
        Duration::from_millis(delay),
        Duration::from_secs(timeout),
    )?;
    println!("{}", elapsed.as_millis());
    Ok(())
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut camera = open_camera(cli, config)?;

    if !json {
        let lines = camera.write_camera_info(&mut io::stdout().lock())?;
        if lines == 0 {
            bail!("camera sent no configuration");
        }
        return Ok(());
    }

    if !cli.quiet {
        eprintln!("{} Reading camera configuration...", style("ℹ").blue());
    }
    let output = serde_json::json!({
        "device_type": camera.device_type()?,
        "firmware": camera.firmware()?,
        "serial_number": camera.serial_number()?,
        "resolution": camera.resolution()?,
        "quality": camera.quality()?,
        "jpeg_maximum_size": camera.jpeg_maximum_size()?,
        "night_mode": camera.night_mode()?,
        "ir_led_mode": camera.ir_led_mode()?,
        "ir_filter_night": camera.ir_filter_night()?,
        "autofocus_point": camera.autofocus_point()?,
        "autoexposure_region": camera.autoexposure_region()?,
        "exposure_time": camera.exposure_time()?,
        "image_brightness": camera.image_brightness()?,
        "white_balance_offset": camera.white_balance_offset()?,
        "color_correction": camera.color_correction()?,
        "auto_snapshot_interval": camera.auto_snapshot_interval()?,
        "focus_position": camera.focus_position()?,
        "zoom_position": camera.zoom_position()?,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Restart command implementation.
pub(crate) fn cmd_restart(cli: &Cli, config: &Config) -> Result<()> {
    let mut camera = open_camera(cli, config)?;
    if !cli.quiet {
        eprintln!("{} Restarting camera...", style("🔄").cyan());
    }
    if !camera.restart()? {
        bail!("camera rejected the reset command");
    }
    if !cli.quiet {
        eprintln!("{} Camera restarted", style("✓").green());
    }
    Ok(())
}
