// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parse `run` subcommand arguments into pipeline parameters.


use std::path::PathBuf;

use clap::Parser;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::common::{display_warnings, Warn, ARG_FILE_HELP};
use crate::{
    cli::SelfcalError,
    params::{CalParams, ImageParams, MaskParams, PipelineParams},
    pipeline,
};

const DEFAULT_DATA_COLUMN: &str = "CORRECTED_DATA";
const DEFAULT_IMSIZE: usize = 20000;
const DEFAULT_CELLSIZE: f64 = 1.5;
const DEFAULT_ROBUST: f64 = 0.0;
const DEFAULT_PSF_ARCSEC: f64 = 8.0;
const DEFAULT_FINAL_PSF_ARCSEC: f64 = 6.0;
const DEFAULT_LOW_CELL: f64 = 4.5;
const DEFAULT_LOW_ROBUST: f64 = -0.25;
const DEFAULT_BOOTSTRAP_IMSIZE: usize = 10000;
const DEFAULT_IMAGE_UVMIN: f64 = 0.0;
const DEFAULT_HMP_SIZE: usize = 10;
const DEFAULT_NCPU: usize = 32;
const DEFAULT_DT: u32 = 1;
const DEFAULT_LAMBDA_KF: f64 = 0.5;
const DEFAULT_NCHAN_SOLS: u32 = 1;
const DEFAULT_N_ITER_KF: [u32; 3] = [6, 6, 6];
const DEFAULT_N_DIR: u32 = 45;
const DEFAULT_THRESHOLDS: [f64; 4] = [25.0, 20.0, 10.0, 5.0];
const DEFAULT_BRIGHT_RADIUS: f64 = 8.0;
const DEFAULT_BRIGHT_MIN_FLUX: f64 = 0.3;
const DEFAULT_BRIGHT_POINTLIKE: f64 = 30.0;
const DEFAULT_EXTENDED_RMS: f64 = 3.0;

lazy_static::lazy_static! {
    static ref DATA_COLUMN_HELP: String =
        format!("The visibility column to image and calibrate against. Default: {DEFAULT_DATA_COLUMN}");

    static ref IMSIZE_HELP: String =
        format!("Image size in pixels. Default: {DEFAULT_IMSIZE}");

    static ref CELLSIZE_HELP: String =
        format!("Pixel size in arcseconds. Default: {DEFAULT_CELLSIZE}");

    static ref THRESHOLDS_HELP: String =
        format!("The four masking significance thresholds, one per imaging pass. Default: {DEFAULT_THRESHOLDS:?}");

    static ref N_ITER_KF_HELP: String =
        format!("The three Kalman-filter iteration counts, for the phase, amplitude-phase and full-dataset calibration passes. Default: {DEFAULT_N_ITER_KF:?}");
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
struct DataArgs {
    #[clap(long, help = "File containing the measurement-set list driving self-calibration, one path per line", help_heading = "INPUT DATA", parse(from_os_str))]
    mslist: Option<PathBuf>,

    /// The full-bandwidth measurement-set list. Without one the pipeline
    /// stops after the amplitude-phase cycle.
    #[clap(long, help_heading = "INPUT DATA", parse(from_os_str))]
    full_mslist: Option<PathBuf>,

    #[clap(long, help = DATA_COLUMN_HELP.as_str(), help_heading = "INPUT DATA")]
    data_column: Option<String>,

    /// The directory the imaging tool keeps its caches under. Default: the
    /// working directory.
    #[clap(long, help_heading = "INPUT DATA", parse(from_os_str))]
    cache_dir: Option<PathBuf>,

    /// Write one log file per stage into this directory. Default: no log
    /// files; tool output is inherited.
    #[clap(long, help_heading = "INPUT DATA", parse(from_os_str))]
    log_dir: Option<PathBuf>,
}

impl DataArgs {
    fn merge(self, other: Self) -> Self {
        DataArgs {
            mslist: self.mslist.or(other.mslist),
            full_mslist: self.full_mslist.or(other.full_mslist),
            data_column: self.data_column.or(other.data_column),
            cache_dir: self.cache_dir.or(other.cache_dir),
            log_dir: self.log_dir.or(other.log_dir),
        }
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
struct ImageCliArgs {
    #[clap(long, help = IMSIZE_HELP.as_str(), help_heading = "IMAGING")]
    imsize: Option<usize>,

    #[clap(long, help = CELLSIZE_HELP.as_str(), help_heading = "IMAGING")]
    cellsize: Option<f64>,

    /// Briggs robustness for the self-calibration images. Default: 0.
    #[clap(long, help_heading = "IMAGING", allow_hyphen_values = true)]
    robust: Option<f64>,

    /// Briggs robustness for the full-bandwidth images. Default: 0.
    #[clap(long, help_heading = "IMAGING", allow_hyphen_values = true)]
    final_robust: Option<f64>,

    /// Restoring beam for the self-calibration images [arcsec]. Default: 8.
    #[clap(long, help_heading = "IMAGING")]
    psf_arcsec: Option<f64>,

    /// Restoring beam for the full-bandwidth images [arcsec]. Default: 6.
    #[clap(long, help_heading = "IMAGING")]
    final_psf_arcsec: Option<f64>,

    /// Restoring beam for the low-resolution re-image [arcsec]. Setting this
    /// enables the low-resolution branch.
    #[clap(long, help_heading = "IMAGING")]
    low_psf_arcsec: Option<f64>,

    /// Image-size override for the low-resolution re-image. Derived from the
    /// main image geometry when unset.
    #[clap(long, help_heading = "IMAGING")]
    low_imsize: Option<usize>,

    /// Pixel size for the low-resolution re-image [arcsec]. Default: 4.5.
    #[clap(long, help_heading = "IMAGING")]
    low_cell: Option<f64>,

    /// Briggs robustness for the low-resolution re-image. Default: -0.25.
    #[clap(long, help_heading = "IMAGING", allow_hyphen_values = true)]
    low_robust: Option<f64>,

    /// The image size used by the bootstrap imaging. Default: 10000.
    #[clap(long, help_heading = "IMAGING")]
    bootstrap_imsize: Option<usize>,

    /// Minimum baseline length to image [km]. Default: 0.
    #[clap(long, help_heading = "IMAGING")]
    image_uvmin: Option<f64>,

    /// Minimum island size for the HMP initialisation. Default: 10.
    #[clap(long, help_heading = "IMAGING")]
    hmp_size: Option<usize>,

    /// Enable decorrelation-aware gridding.
    #[clap(long, help_heading = "IMAGING")]
    #[serde(default)]
    do_decorr: bool,

    /// Worker count passed through to the imaging tool. Default: 32.
    #[clap(long, help_heading = "IMAGING")]
    ddf_ncpu: Option<usize>,
}

impl ImageCliArgs {
    fn merge(self, other: Self) -> Self {
        ImageCliArgs {
            imsize: self.imsize.or(other.imsize),
            cellsize: self.cellsize.or(other.cellsize),
            robust: self.robust.or(other.robust),
            final_robust: self.final_robust.or(other.final_robust),
            psf_arcsec: self.psf_arcsec.or(other.psf_arcsec),
            final_psf_arcsec: self.final_psf_arcsec.or(other.final_psf_arcsec),
            low_psf_arcsec: self.low_psf_arcsec.or(other.low_psf_arcsec),
            low_imsize: self.low_imsize.or(other.low_imsize),
            low_cell: self.low_cell.or(other.low_cell),
            low_robust: self.low_robust.or(other.low_robust),
            bootstrap_imsize: self.bootstrap_imsize.or(other.bootstrap_imsize),
            image_uvmin: self.image_uvmin.or(other.image_uvmin),
            hmp_size: self.hmp_size.or(other.hmp_size),
            do_decorr: self.do_decorr || other.do_decorr,
            ddf_ncpu: self.ddf_ncpu.or(other.ddf_ncpu),
        }
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
struct CalCliArgs {
    /// Solution interval in minutes. Default: 1.
    #[clap(long, help_heading = "CALIBRATION")]
    dt: Option<u32>,

    /// Kalman-filter covariance evolution factor. Default: 0.5.
    #[clap(long, help_heading = "CALIBRATION")]
    lambda_kf: Option<f64>,

    /// Frequency blocks per solution. Default: 1.
    #[clap(long, help_heading = "CALIBRATION")]
    nchan_sols: Option<u32>,

    /// Worker count passed through to the calibration tool. Default: 32.
    #[clap(long, help_heading = "CALIBRATION")]
    killms_ncpu: Option<usize>,

    #[clap(long, multiple_values(true), help = N_ITER_KF_HELP.as_str(), help_heading = "CALIBRATION")]
    n_iter_kf: Option<Vec<u32>>,

    /// Minimum baseline length to calibrate on [km]. Default: no lower
    /// bound.
    #[clap(long, help_heading = "CALIBRATION")]
    solutions_uvmin: Option<f64>,

    /// Derive the calibration minimum baseline from the sky model's flux
    /// distribution instead of using --solutions-uvmin.
    #[clap(long, help_heading = "CALIBRATION")]
    #[serde(default)]
    auto_uvmin: bool,

    /// Number of directions the sky model is clustered into. Default: 45.
    #[clap(long, help_heading = "CALIBRATION")]
    n_dir: Option<u32>,

    /// Solution normalisation modes for the phase, amplitude-phase and
    /// full-dataset imaging passes (e.g. Abs, Amp). Up to three values.
    #[clap(long, multiple_values(true), help_heading = "CALIBRATION")]
    normalize: Option<Vec<String>>,
}

impl CalCliArgs {
    fn merge(self, other: Self) -> Self {
        CalCliArgs {
            dt: self.dt.or(other.dt),
            lambda_kf: self.lambda_kf.or(other.lambda_kf),
            nchan_sols: self.nchan_sols.or(other.nchan_sols),
            killms_ncpu: self.killms_ncpu.or(other.killms_ncpu),
            n_iter_kf: self.n_iter_kf.or(other.n_iter_kf),
            solutions_uvmin: self.solutions_uvmin.or(other.solutions_uvmin),
            auto_uvmin: self.auto_uvmin || other.auto_uvmin,
            n_dir: self.n_dir.or(other.n_dir),
            normalize: self.normalize.or(other.normalize),
        }
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
struct MaskCliArgs {
    #[clap(long, multiple_values(true), help = THRESHOLDS_HELP.as_str(), help_heading = "MASKING")]
    thresholds: Option<Vec<f64>>,

    /// Bright-source reference catalogue merged into external masks.
    #[clap(long, help_heading = "MASKING", parse(from_os_str))]
    bright_catalog: Option<PathBuf>,

    /// Matching radius around catalogue sources [arcsec]. Default: 8.
    #[clap(long, help_heading = "MASKING")]
    bright_radius: Option<f64>,

    /// Minimum catalogue flux to mask [Jy]. Default: 0.3.
    #[clap(long, help_heading = "MASKING")]
    bright_min_flux: Option<f64>,

    /// Also mask catalogue sources flagged as extended.
    #[clap(long, help_heading = "MASKING")]
    #[serde(default)]
    bright_extended: bool,

    /// Mask size used for point-like catalogue sources [arcsec]. Default:
    /// 30.
    #[clap(long, help_heading = "MASKING")]
    bright_pointlike: Option<f64>,

    /// A region file merged into external masks.
    #[clap(long, help_heading = "MASKING", parse(from_os_str))]
    region: Option<PathBuf>,

    /// Island size threshold enabling the extended-emission mask branch.
    #[clap(long, help_heading = "MASKING")]
    extended_size: Option<f64>,

    /// RMS threshold for the extended-emission mask. Default: 3.
    #[clap(long, help_heading = "MASKING")]
    extended_rms: Option<f64>,
}

impl MaskCliArgs {
    fn merge(self, other: Self) -> Self {
        MaskCliArgs {
            thresholds: self.thresholds.or(other.thresholds),
            bright_catalog: self.bright_catalog.or(other.bright_catalog),
            bright_radius: self.bright_radius.or(other.bright_radius),
            bright_min_flux: self.bright_min_flux.or(other.bright_min_flux),
            bright_extended: self.bright_extended || other.bright_extended,
            bright_pointlike: self.bright_pointlike.or(other.bright_pointlike),
            region: self.region.or(other.region),
            extended_size: self.extended_size.or(other.extended_size),
            extended_rms: self.extended_rms.or(other.extended_rms),
        }
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
struct ControlArgs {
    /// Rerun every stage even when its output already exists. The default is
    /// to skip stages whose primary output is in place, making interrupted
    /// runs resumable.
    #[clap(long, help_heading = "PIPELINE CONTROL")]
    #[serde(default)]
    no_restart: bool,

    /// Clear all imaging-tool cache directories before the first stage.
    #[clap(long, help_heading = "PIPELINE CONTROL")]
    #[serde(default)]
    clear_cache: bool,

    /// Run the flux-scale bootstrap after the first calibration pass.
    /// Requires the run to be driven by an argument file.
    #[clap(long, help_heading = "PIPELINE CONTROL")]
    #[serde(default)]
    bootstrap: bool,

    /// Suppress the external tools' progress bars.
    #[clap(long, help_heading = "PIPELINE CONTROL")]
    #[serde(default)]
    quiet: bool,
}

impl ControlArgs {
    fn merge(self, other: Self) -> Self {
        ControlArgs {
            no_restart: self.no_restart || other.no_restart,
            clear_cache: self.clear_cache || other.clear_cache,
            bootstrap: self.bootstrap || other.bootstrap,
            quiet: self.quiet || other.quiet,
        }
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct RunArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(rename = "data")]
    #[serde(default)]
    data_args: DataArgs,

    #[clap(flatten)]
    #[serde(rename = "imaging")]
    #[serde(default)]
    image_args: ImageCliArgs,

    #[clap(flatten)]
    #[serde(rename = "calibration")]
    #[serde(default)]
    cal_args: CalCliArgs,

    #[clap(flatten)]
    #[serde(rename = "masking")]
    #[serde(default)]
    mask_args: MaskCliArgs,

    #[clap(flatten)]
    #[serde(rename = "pipeline")]
    #[serde(default)]
    control_args: ControlArgs,
}

impl RunArgs {
    /// Consolidate CLI and argument-file arguments, preferring CLI values.
    /// This function only merges; making sense of the arguments is
    /// [`RunArgs::into_params`]'s job.
    pub(super) fn merge(self) -> Result<RunArgs, SelfcalError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let RunArgs {
                args_file: _,
                data_args,
                image_args,
                cal_args,
                mask_args,
                control_args,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when
            // available. The file path is kept; the bootstrap tool reads the
            // same file.
            Ok(RunArgs {
                args_file: Some(arg_file),
                data_args: cli_args.data_args.merge(data_args),
                image_args: cli_args.image_args.merge(image_args),
                cal_args: cli_args.cal_args.merge(cal_args),
                mask_args: cli_args.mask_args.merge(mask_args),
                control_args: cli_args.control_args.merge(control_args),
            })
        } else {
            Ok(cli_args)
        }
    }

    /// Resolve the merged arguments into immutable pipeline parameters.
    pub(super) fn into_params(self, dry_run: bool) -> Result<PipelineParams, RunArgsError> {
        debug!("{:#?}", self);

        let RunArgs {
            args_file,
            data_args,
            image_args,
            cal_args,
            mask_args,
            control_args,
        } = self;

        let mslist = data_args.mslist.ok_or(RunArgsError::NoMsList)?;

        if control_args.bootstrap && args_file.is_none() {
            return Err(RunArgsError::BootstrapNeedsArgsFile);
        }

        let thresholds = match mask_args.thresholds {
            None => DEFAULT_THRESHOLDS,
            Some(t) => <[f64; 4]>::try_from(t.as_slice())
                .map_err(|_| RunArgsError::ThresholdCount(t.len()))?,
        };
        let n_iter_kf = match cal_args.n_iter_kf {
            None => DEFAULT_N_ITER_KF,
            Some(n) => <[u32; 3]>::try_from(n.as_slice())
                .map_err(|_| RunArgsError::NIterKfCount(n.len()))?,
        };

        let mut normalize: [Option<String>; 3] = [None, None, None];
        if let Some(values) = cal_args.normalize {
            if values.len() > 3 {
                format!(
                    "{} normalisation modes supplied; only the first 3 are used",
                    values.len()
                )
                .warn();
            }
            for (slot, value) in normalize.iter_mut().zip(values) {
                *slot = Some(value);
            }
        }

        if cal_args.auto_uvmin && cal_args.solutions_uvmin.is_some() {
            "Both --auto-uvmin and --solutions-uvmin are set; the optimized value takes precedence"
                .warn();
        }
        if image_args.low_imsize.is_some() && image_args.low_psf_arcsec.is_none() {
            "--low-imsize has no effect without --low-psf-arcsec".warn();
        }

        let params = PipelineParams {
            mslist,
            full_mslist: data_args.full_mslist,
            restart: !control_args.no_restart,
            dry_run,
            clear_cache: control_args.clear_cache,
            quiet: control_args.quiet,
            log_dir: data_args.log_dir,
            cache_dir: data_args.cache_dir,
            data_column: data_args
                .data_column
                .unwrap_or_else(|| DEFAULT_DATA_COLUMN.to_string()),
            bootstrap: control_args.bootstrap,
            args_file,
            image: ImageParams {
                imsize: image_args.imsize.unwrap_or(DEFAULT_IMSIZE),
                cellsize: image_args.cellsize.unwrap_or(DEFAULT_CELLSIZE),
                robust: image_args.robust.unwrap_or(DEFAULT_ROBUST),
                final_robust: image_args.final_robust.unwrap_or(DEFAULT_ROBUST),
                psf_arcsec: image_args.psf_arcsec.unwrap_or(DEFAULT_PSF_ARCSEC),
                final_psf_arcsec: image_args
                    .final_psf_arcsec
                    .unwrap_or(DEFAULT_FINAL_PSF_ARCSEC),
                low_psf_arcsec: image_args.low_psf_arcsec,
                low_imsize: image_args.low_imsize,
                low_cell: image_args.low_cell.unwrap_or(DEFAULT_LOW_CELL),
                low_robust: image_args.low_robust.unwrap_or(DEFAULT_LOW_ROBUST),
                bootstrap_imsize: image_args
                    .bootstrap_imsize
                    .unwrap_or(DEFAULT_BOOTSTRAP_IMSIZE),
                uvmin: image_args.image_uvmin.unwrap_or(DEFAULT_IMAGE_UVMIN),
                hmp_size: Some(image_args.hmp_size.unwrap_or(DEFAULT_HMP_SIZE)),
                do_decorr: image_args.do_decorr,
                ncpu: image_args.ddf_ncpu.unwrap_or(DEFAULT_NCPU),
            },
            cal: CalParams {
                dt: cal_args.dt.unwrap_or(DEFAULT_DT),
                lambda_kf: cal_args.lambda_kf.unwrap_or(DEFAULT_LAMBDA_KF),
                nchan_sols: cal_args.nchan_sols.unwrap_or(DEFAULT_NCHAN_SOLS),
                ncpu: cal_args.killms_ncpu.unwrap_or(DEFAULT_NCPU),
                n_iter_kf,
                uvmin: cal_args.solutions_uvmin,
                auto_uvmin: cal_args.auto_uvmin,
                n_dir: cal_args.n_dir.unwrap_or(DEFAULT_N_DIR),
                normalize,
            },
            mask: MaskParams {
                thresholds,
                bright_catalog: mask_args.bright_catalog,
                bright_radius: mask_args.bright_radius.unwrap_or(DEFAULT_BRIGHT_RADIUS),
                bright_min_flux: mask_args
                    .bright_min_flux
                    .unwrap_or(DEFAULT_BRIGHT_MIN_FLUX),
                bright_extended: mask_args.bright_extended,
                bright_pointlike: mask_args
                    .bright_pointlike
                    .unwrap_or(DEFAULT_BRIGHT_POINTLIKE),
                region: mask_args.region,
                extended_size: mask_args.extended_size,
                extended_rms: mask_args.extended_rms.unwrap_or(DEFAULT_EXTENDED_RMS),
            },
        };

        display_warnings();
        Ok(params)
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), SelfcalError> {
        let args = self.merge()?;
        let params = args.into_params(dry_run)?;
        pipeline::run(&params)?;
        Ok(())
    }
}

#[derive(Error, Debug)]
pub(crate) enum RunArgsError {
    #[error("A measurement-set list must be specified")]
    NoMsList,

    #[error("Exactly 4 masking thresholds are needed, but {0} were given")]
    ThresholdCount(usize),

    #[error("Exactly 3 Kalman-filter iteration counts are needed, but {0} were given")]
    NIterKfCount(usize),

    #[error("The flux-scale bootstrap needs the run to be driven by an argument file")]
    BootstrapNeedsArgsFile,
}
