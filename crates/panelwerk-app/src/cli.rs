// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line surface. Flags override the matching `config.json` fields.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use panelwerk_core::AppConfig;
use panelwerk_core::error::{PanelwerkError, Result};
use panelwerk_core::types::ScaleFactor;

#[derive(Debug, Parser)]
#[command(name = "panelwerk", version, about = "Restore scanned comic pages into print-ready PDFs")]
pub struct Cli {
    /// Configuration file. Missing files fall back to defaults.
    #[arg(long, global = true, default_value = "config.json")]
    pub config: PathBuf,

    /// Log filter, e.g. `debug` or `panelwerk_restore=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Restore a single page into a one-page PDF.
    Restore {
        #[arg(long)]
        input: PathBuf,
        /// Damage mask, same size as the input.
        #[arg(long)]
        mask: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
        #[command(flatten)]
        options: OptionFlags,
    },
    /// Restore every image in a directory.
    Batch {
        #[arg(long)]
        input_dir: PathBuf,
        /// Masks are matched to inputs by file name.
        #[arg(long)]
        mask_dir: Option<PathBuf>,
        /// Output directory for PDFs and text sidecars.
        #[arg(long)]
        output: PathBuf,
        /// Assemble all accepted pages into one PDF.
        #[arg(long)]
        combine: bool,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Stop admitting jobs after the first fatal failure.
        #[arg(long)]
        stop_on_error: bool,
        #[command(flatten)]
        options: OptionFlags,
    },
    /// List objects in the configured store.
    Stored {
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

/// Per-run overrides of the default restore options.
#[derive(Debug, Clone, Default, Args)]
pub struct OptionFlags {
    /// Trim width in inches.
    #[arg(long)]
    pub width: Option<f64>,
    /// Trim height in inches.
    #[arg(long)]
    pub height: Option<f64>,
    /// Bleed in inches.
    #[arg(long)]
    pub bleed: Option<f64>,
    #[arg(long)]
    pub dpi: Option<u32>,
    /// Upscale factor: 1, 2 or 4.
    #[arg(long)]
    pub scale: Option<u32>,
    /// Matte paper compensation, 0 to 10.
    #[arg(long)]
    pub matte_compensation: Option<f32>,
    #[arg(long)]
    pub face_restore: bool,
    #[arg(long)]
    pub ocr: bool,
    /// Restoration service endpoint.
    #[arg(long)]
    pub endpoint: Option<String>,
}

impl OptionFlags {
    /// Write the given flags into `config`. Unset flags leave it untouched.
    pub fn apply(&self, config: &mut AppConfig) -> Result<()> {
        let defaults = &mut config.defaults;
        if let Some(width) = self.width {
            defaults.geometry.trim_width_in = width;
        }
        if let Some(height) = self.height {
            defaults.geometry.trim_height_in = height;
        }
        if let Some(bleed) = self.bleed {
            defaults.geometry.bleed_in = bleed;
        }
        if let Some(dpi) = self.dpi {
            defaults.geometry.dpi = dpi;
        }
        if let Some(scale) = self.scale {
            defaults.scale_factor = ScaleFactor::try_from(scale).map_err(PanelwerkError::Config)?;
        }
        if let Some(matte) = self.matte_compensation {
            defaults.matte_compensation = matte;
        }
        defaults.face_restore |= self.face_restore;
        defaults.ocr |= self.ocr;
        if let Some(endpoint) = &self.endpoint {
            config.service.endpoint = endpoint.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_flags_parse() {
        let cli = Cli::try_parse_from([
            "panelwerk",
            "--config",
            "run.json",
            "batch",
            "--input-dir",
            "scans",
            "--output",
            "out",
            "--combine",
            "--concurrency",
            "2",
            "--scale",
            "4",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("run.json"));
        match cli.command {
            Command::Batch {
                input_dir,
                mask_dir,
                combine,
                concurrency,
                stop_on_error,
                options,
                ..
            } => {
                assert_eq!(input_dir, PathBuf::from("scans"));
                assert!(mask_dir.is_none());
                assert!(combine);
                assert_eq!(concurrency, Some(2));
                assert!(!stop_on_error);
                assert_eq!(options.scale, Some(4));
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn restore_requires_output() {
        assert!(Cli::try_parse_from(["panelwerk", "restore", "--input", "p.png"]).is_err());
    }

    #[test]
    fn flags_override_config() {
        let mut config = AppConfig::default();
        let flags = OptionFlags {
            dpi: Some(600),
            bleed: Some(0.0),
            matte_compensation: Some(4.0),
            ocr: true,
            endpoint: Some("http://localhost:9000/restore".into()),
            ..Default::default()
        };
        flags.apply(&mut config).unwrap();

        assert_eq!(config.defaults.geometry.dpi, 600);
        assert_eq!(config.defaults.geometry.bleed_in, 0.0);
        assert_eq!(config.defaults.geometry.trim_width_in, 6.625);
        assert_eq!(config.defaults.matte_compensation, 4.0);
        assert!(config.defaults.ocr);
        assert!(!config.defaults.face_restore);
        assert_eq!(config.service.endpoint, "http://localhost:9000/restore");
    }

    #[test]
    fn bad_scale_is_config_error() {
        let mut config = AppConfig::default();
        let flags = OptionFlags {
            scale: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            flags.apply(&mut config),
            Err(PanelwerkError::Config(_))
        ));
    }
}
