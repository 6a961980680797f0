use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::time::Instant;

use clap::{Parser, Subcommand};
use eyre::{self as anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use calib_upload::{
    DeviceInfo, Notifier, TracingNotifier, Uploader, UploaderConfig, parse_config_file,
};

mod logging;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Uploader configuration file (TOML)
    #[arg(long, short, global = true, env = "CALIB_UPLOAD_CONFIG")]
    config: Option<PathBuf>,
    /// Also write the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Normalize a calibration, queue it and upload the queue
    Submit {
        /// Calibration result (YAML)
        calibration: PathBuf,
    },
    /// Upload everything already in the queue
    Flush,
    /// Show the configuration, including defaults, in TOML format
    ShowConfig,
    /// Print the contents of a camera parameter file
    Inspect {
        /// Parameter file (e.g. `camera_para.dat`)
        param_file: PathBuf,
    },
}

/// A calibration result as written by the calibration tool.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CalibrationInput {
    image_width: i32,
    image_height: i32,
    /// 3x3, row major order
    camera_matrix: Vec<f64>,
    #[serde(default)]
    distortion_coefficients: Vec<f64>,
    #[serde(default)]
    err_min: f64,
    #[serde(default)]
    err_avg: f64,
    #[serde(default)]
    err_max: f64,
}

/// Logs worker events and reports the end of each cycle.
struct CycleWaiter {
    log: TracingNotifier,
    finished: mpsc::Sender<bool>,
}

impl Notifier for CycleWaiter {
    fn on_status(&self, text: &str) {
        self.log.on_status(text);
    }
    fn on_progress(&self, text: &str) {
        self.log.on_progress(text);
    }
    fn on_finished(&self, success: bool) {
        self.log.on_finished(success);
        // The receiver is gone only if we are already exiting.
        let _ = self.finished.send(success);
    }
}

fn load_config(path: Option<&Path>) -> Result<UploaderConfig> {
    let path = path.ok_or_else(|| anyhow::eyre!("no configuration file given (use --config)"))?;
    parse_config_file(path)
        .with_context(|| format!("While parsing configuration file {}", path.display()))
}

/// Start an uploader and wait for one upload cycle to end.
fn run_cycle<F>(mut cfg: UploaderConfig, upload_on_start: bool, queue: F) -> Result<()>
where
    F: FnOnce(&Uploader) -> Result<()>,
{
    cfg.upload_on_start = upload_on_start;
    let device = cfg.device.clone().unwrap_or_else(DeviceInfo::from_host);
    debug!("device: {device:?}");

    let (tx, rx) = mpsc::channel();
    let notifier = Arc::new(CycleWaiter {
        log: TracingNotifier,
        finished: tx,
    });
    let uploader = Uploader::initialize(cfg, device, notifier)?;
    queue(&uploader)?;

    let success = rx
        .recv()
        .context("upload worker exited before finishing")?;
    let report = uploader.poll_status(Instant::now());
    uploader.shutdown()?;

    if !success {
        anyhow::bail!("{}", report.text);
    }
    if !report.text.is_empty() {
        println!("{}", report.text);
    }
    Ok(())
}

fn submit(cfg: UploaderConfig, calibration: &Path) -> Result<()> {
    let rdr = std::fs::File::open(calibration)
        .with_context(|| format!("opening {}", calibration.display()))?;
    let input: CalibrationInput = serde_yaml::from_reader(rdr)
        .with_context(|| format!("parsing {}", calibration.display()))?;

    // Submitting wakes the worker, so it must not also start on its own.
    run_cycle(cfg, false, |uploader| {
        let result = uploader.submit_result(
            &input.camera_matrix,
            &input.distortion_coefficients,
            input.image_width,
            input.image_height,
            input.err_avg,
            input.err_min,
            input.err_max,
        )?;
        info!("scale factor: {}", result.params.scale());
        Ok(())
    })
}

fn show_config(cfg: &UploaderConfig) -> Result<()> {
    // Two steps to avoid the ValueAfterTable error of toml.
    let value = toml::Value::try_from(cfg)?;
    let buf = toml::to_string(&value)?;
    println!("{buf}");
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let rdr = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let params = calib_param::param_file::read(std::io::BufReader::new(rdr))
        .with_context(|| format!("reading {}", path.display()))?;

    println!("size: {}x{}", params.xsize, params.ysize);
    println!("projection matrix:");
    for row in params.mat.iter() {
        println!(
            "  {:12.6} {:12.6} {:12.6} {:12.6}",
            row[0], row[1], row[2], row[3]
        );
    }
    let d = &params.dist_factor;
    println!("distortion: k1={} k2={} p1={} p2={}", d[0], d[1], d[2], d[3]);
    println!("fx={} fy={} x0={} y0={}", d[4], d[5], d[6], d[7]);
    println!("scale factor: {}", params.scale());
    println!("distortion function version: {}", params.dist_function_version);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref())?;
    debug!("{:?}", cli);

    match &cli.command {
        Command::Submit { calibration } => {
            let cfg = load_config(cli.config.as_deref())?;
            submit(cfg, calibration)
        }
        Command::Flush => {
            let cfg = load_config(cli.config.as_deref())?;
            run_cycle(cfg, true, |_| Ok(()))
        }
        Command::ShowConfig => show_config(&load_config(cli.config.as_deref())?),
        Command::Inspect { param_file } => inspect(param_file),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn calibration_yaml_parses() {
        let input: CalibrationInput = serde_yaml::from_str(
            "image_width: 640\n\
             image_height: 480\n\
             camera_matrix: [500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0]\n\
             distortion_coefficients: [-0.1, 0.01]\n\
             err_avg: 0.2\n",
        )
        .unwrap();
        assert_eq!(input.camera_matrix.len(), 9);
        assert_eq!(input.distortion_coefficients, vec![-0.1, 0.01]);
        assert_eq!(input.err_min, 0.0);
        assert_eq!(input.err_avg, 0.2);
    }

    #[test]
    fn config_shows_as_toml() -> Result<()> {
        let tempdir = tempfile::tempdir()?;
        let fname = tempdir.path().join("uploader.toml");
        std::fs::write(
            &fname,
            "queue_dir = \"queue\"\nendpoint_url = \"https://example.com/u\"\n\n[camera]\nindex = 1\n",
        )?;
        let cfg = load_config(Some(&fname))?;
        let value = toml::Value::try_from(&cfg)?;
        let shown: UploaderConfig = value.try_into()?;
        assert_eq!(shown, cfg);
        Ok(())
    }

    #[test]
    fn missing_config_is_an_error() {
        assert!(load_config(None).is_err());
    }

    #[test]
    fn cli_parses_global_config() {
        let cli = Cli::parse_from(["calib-upload", "inspect", "camera_para.dat", "-c", "u.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("u.toml")));
        assert!(matches!(cli.command, Command::Inspect { .. }));
    }
}
