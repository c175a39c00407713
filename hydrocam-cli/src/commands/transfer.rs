//! Download and capture command implementations.

use anyhow::{Context, Result, bail};
use console::style;
use hydrocam::{HydroCam, Port, Termination, TransferConfig, TransferReport};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::commands::camera::{snapshot, wait_until_ready};
use crate::config::Config;
use crate::{Cli, CliError, open_camera, use_fancy_output};

/// Pause between the snapshot and the first status poll.
const SNAPSHOT_SETTLE: Duration = Duration::from_millis(500);

/// Transfer settings from the config file, with the flag override applied.
fn transfer_config(config: &Config, chunk_size: Option<usize>) -> Result<TransferConfig> {
    let mut transfer = config
        .transfer
        .to_transfer_config();
    if let Some(chunk_size) = chunk_size {
        transfer = transfer.with_chunk_size(chunk_size);
    }
    if transfer.chunk_size == 0 {
        return Err(CliError::Usage("chunk size must be at least 1 byte".into()).into());
    }
    Ok(transfer)
}

/// `hydrocam-<unix seconds>.jpg`
fn default_file_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("hydrocam-{secs}.jpg")
}

fn output_path(config: &Config, output: Option<&Path>) -> PathBuf {
    if let Some(path) = output {
        return path.to_path_buf();
    }
    config
        .transfer
        .output_dir
        .clone()
        .unwrap_or_default()
        .join(default_file_name())
}

fn progress_bar(cli: &Cli) -> Result<ProgressBar> {
    if cli.quiet || !use_fancy_output() {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    Ok(pb)
}

/// Stream the last snapshot into `path`.
fn download<P: Port>(
    camera: &mut HydroCam<P>,
    cli: &Cli,
    path: &Path,
    size: Option<usize>,
    transfer: &TransferConfig,
) -> Result<TransferReport> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let pb = progress_bar(cli)?;
    pb.set_message("downloading");
    let result = camera.transfer_image(&mut writer, size, transfer, |current, total| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
    });

    let report = match result {
        Ok(report) => report,
        Err(e) if e.is_interrupted() => {
            pb.abandon();
            writer.flush()?;
            return Err(CliError::Cancelled(format!(
                "download interrupted, partial image left in {}",
                path.display()
            ))
            .into());
        },
        Err(e) => {
            pb.abandon();
            return Err(anyhow::Error::from(e).context("Image transfer failed"));
        },
    };
    writer.flush()?;
    pb.finish_and_clear();

    if !cli.quiet {
        eprintln!(
            "{} Saved {} bytes to {} ({:?}, {} chunks, {:.1?})",
            style("✓").green(),
            report.bytes_written,
            path.display(),
            report.termination,
            report.chunks,
            report.elapsed
        );
        if report.size_difference() != 0 {
            eprintln!(
                "{} Camera announced {} bytes ({:+})",
                style("!").yellow(),
                report.image_size,
                report.size_difference()
            );
        }
    }
    Ok(report)
}

/// Fail on a transfer that ran into the deadline; the partial file stays.
fn ensure_complete(report: &TransferReport, path: &Path) -> Result<()> {
    if report.termination == Termination::Deadline {
        bail!(
            "transfer timed out after {:.1?}: {} of {} bytes saved to {}",
            report.elapsed,
            report.bytes_written,
            report.image_size,
            path.display()
        );
    }
    Ok(())
}

/// Download command implementation.
pub(crate) fn cmd_download(
    cli: &Cli,
    config: &Config,
    output: Option<&Path>,
    size: Option<usize>,
    chunk_size: Option<usize>,
    json: bool,
) -> Result<()> {
    let transfer = transfer_config(config, chunk_size)?;
    let path = output_path(config, output);

    let mut camera = open_camera(cli, config)?;
    let report = download(&mut camera, cli, &path, size, &transfer)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    ensure_complete(&report, &path)
}

/// Capture command implementation.
pub(crate) fn cmd_capture(
    cli: &Cli,
    config: &Config,
    output: Option<&Path>,
    wait: u64,
    chunk_size: Option<usize>,
) -> Result<()> {
    let transfer = transfer_config(config, chunk_size)?;
    let path = output_path(config, output);

    let mut camera = open_camera(cli, config)?;
    snapshot(&mut camera, cli)?;
    wait_until_ready(&mut camera, cli, SNAPSHOT_SETTLE, Duration::from_secs(wait))?;

    let report = download(&mut camera, cli, &path, None, &transfer)?;
    ensure_complete(&report, &path)?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferSection;

    #[test]
    fn test_transfer_config_flag_overrides_file() {
        let mut config = Config::default();
        config.transfer = TransferSection {
            chunk_size: Some(2048),
            timeout_secs: Some(45),
            output_dir: None,
        };

        let transfer = transfer_config(&config, Some(512)).unwrap();
        assert_eq!(transfer.chunk_size, 512);
        assert_eq!(transfer.global_timeout, Duration::from_secs(45));

        let transfer = transfer_config(&config, None).unwrap();
        assert_eq!(transfer.chunk_size, 2048);
    }

    #[test]
    fn test_transfer_config_rejects_zero_chunk() {
        let err = transfer_config(&Config::default(), Some(0)).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
    }

    #[test]
    fn test_output_path() {
        let mut config = Config::default();
        assert_eq!(
            output_path(&config, Some(Path::new("frame.jpg"))),
            PathBuf::from("frame.jpg")
        );

        config.transfer.output_dir = Some(PathBuf::from("images"));
        let path = output_path(&config, None);
        assert!(path.starts_with("images"));
        let name = path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap();
        assert!(name.starts_with("hydrocam-"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn test_ensure_complete() {
        let mut report = TransferReport {
            image_size: 100,
            chunk_size: 64,
            bytes_written: 100,
            bytes_read: 116,
            chunks: 2,
            short_chunks: 0,
            silent_requests: 0,
            termination: Termination::EndMarker,
            elapsed: Duration::from_millis(30),
            max_response_latency: Duration::from_millis(5),
            max_byte_spacing: Duration::from_millis(1),
        };
        assert!(ensure_complete(&report, Path::new("a.jpg")).is_ok());

        report.termination = Termination::Deadline;
        assert!(ensure_complete(&report, Path::new("a.jpg")).is_err());
    }

    #[test]
    fn test_download_from_fake_camera() {
        let mut image = vec![0xFF, 0xD8];
        image.extend((0..500u32).map(|i| (i % 200) as u8 + 1));
        image.extend_from_slice(&[0xFF, 0xD9]);
        let served = image.clone();
        let size = image.len();

        let port = hydrocam::FakePort::with_responder(move |line| {
            if line == "#get_status" {
                return format!("READY,{size}\r\n").into_bytes();
            }
            let args = line
                .strip_prefix("#get_image=")
                .unwrap();
            let mut parts = args.split(',');
            let offset: usize = parts.next().unwrap().parse().unwrap();
            let length: usize = parts.next().unwrap().parse().unwrap();
            let mut reply = vec![0, 0];
            reply.extend((offset..offset + length).map(|i| served.get(i).copied().unwrap_or(0)));
            reply
        });
        let mut camera = HydroCam::new(port);
        let cli = <Cli as clap::Parser>::try_parse_from(["hydrocam", "-q", "download"]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("frame.jpg");

        let report = download(&mut camera, &cli, &path, None, &TransferConfig::default().with_chunk_size(128)).unwrap();

        assert_eq!(report.termination, Termination::EndMarker);
        assert_eq!(std::fs::read(&path).unwrap(), image);
    }
}
