// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resolved pipeline parameters.
//!
//! Command-line and argument-file inputs are merged once (see
//! [`crate::cli`]) into these structs, which are then passed immutably into
//! every stage; no stage reads configuration from anywhere else.

use std::path::PathBuf;

/// Everything a pipeline run needs to know, resolved up front.
#[derive(Debug, Clone)]
pub(crate) struct PipelineParams {
    /// The measurement-set list file driving the self-calibration subset.
    pub(crate) mslist: PathBuf,

    /// The full-bandwidth measurement-set list; without one the pipeline
    /// stops after the amplitude-phase cycle.
    pub(crate) full_mslist: Option<PathBuf>,

    /// Skip stages whose primary output already exists.
    pub(crate) restart: bool,

    /// Log command lines without spawning anything.
    pub(crate) dry_run: bool,

    /// Clear all DDF cache directories before the first stage.
    pub(crate) clear_cache: bool,

    /// Pass the external tools their progress-bar-suppression flags.
    pub(crate) quiet: bool,

    /// Per-stage log files go here; `None` disables logging.
    pub(crate) log_dir: Option<PathBuf>,

    /// The directory DDF keeps its caches under; `None` means alongside the
    /// data.
    pub(crate) cache_dir: Option<PathBuf>,

    /// The visibility column imaged and calibrated against (until the
    /// bootstrap swaps it).
    pub(crate) data_column: String,

    /// Run the flux-scale bootstrap after the first calibration pass.
    pub(crate) bootstrap: bool,

    /// The argument file this run was configured from, handed on to the
    /// bootstrap tool. Guaranteed present when `bootstrap` is set.
    pub(crate) args_file: Option<PathBuf>,

    pub(crate) image: ImageParams,
    pub(crate) cal: CalParams,
    pub(crate) mask: MaskParams,
}

#[derive(Debug, Clone)]
pub(crate) struct ImageParams {
    /// Image size in pixels.
    pub(crate) imsize: usize,

    /// Pixel size in arcseconds.
    pub(crate) cellsize: f64,

    /// Briggs robustness for the self-calibration images.
    pub(crate) robust: f64,

    /// Briggs robustness for the full-bandwidth images.
    pub(crate) final_robust: f64,

    /// Restoring beam in arcseconds.
    pub(crate) psf_arcsec: f64,

    /// Restoring beam for the full-bandwidth images.
    pub(crate) final_psf_arcsec: f64,

    /// Restoring beam for the optional low-resolution re-image; `None`
    /// disables that branch.
    pub(crate) low_psf_arcsec: Option<f64>,

    /// Image-size override for the low-resolution re-image; derived from
    /// `imsize * cellsize / low_cell` when unset.
    pub(crate) low_imsize: Option<usize>,

    /// Pixel size for the low-resolution re-image.
    pub(crate) low_cell: f64,

    pub(crate) low_robust: f64,

    /// The image size used by the bootstrap imaging; the low-resolution
    /// branch reuses `mask-low.fits` only when the sizes agree.
    pub(crate) bootstrap_imsize: usize,

    /// Minimum baseline length for imaging [km].
    pub(crate) uvmin: f64,

    /// Minimum island size handed to the HMP initialisation.
    pub(crate) hmp_size: Option<usize>,

    /// Enable decorrelation-aware gridding.
    pub(crate) do_decorr: bool,

    /// Worker count passed through to DDF, opaque to the pipeline.
    pub(crate) ncpu: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct CalParams {
    /// Solution interval in minutes.
    pub(crate) dt: u32,

    /// Kalman-filter covariance evolution factor.
    pub(crate) lambda_kf: f64,

    /// Frequency blocks per solution.
    pub(crate) nchan_sols: u32,

    /// Worker count passed through to killMS.
    pub(crate) ncpu: usize,

    /// Kalman-filter iterations for the phase, amplitude-phase and
    /// full-dataset calibration passes.
    pub(crate) n_iter_kf: [u32; 3],

    /// Minimum baseline length for calibration [km].
    pub(crate) uvmin: Option<f64>,

    /// Derive the calibration minimum baseline from the sky model instead.
    pub(crate) auto_uvmin: bool,

    /// Number of directions the sky model is clustered into.
    pub(crate) n_dir: u32,

    /// Solution normalisation modes for the phase, amplitude-phase and
    /// full-dataset imaging passes.
    pub(crate) normalize: [Option<String>; 3],
}

#[derive(Debug, Clone)]
pub(crate) struct MaskParams {
    /// Masking significance thresholds for the four imaging passes.
    pub(crate) thresholds: [f64; 4],

    /// Bright-source reference catalogue merged into external masks.
    pub(crate) bright_catalog: Option<PathBuf>,

    /// Matching radius around catalogue sources [arcsec].
    pub(crate) bright_radius: f64,

    /// Minimum catalogue flux to mask [Jy].
    pub(crate) bright_min_flux: f64,

    /// Also mask catalogue sources flagged as extended.
    pub(crate) bright_extended: bool,

    /// Mask size used for point-like catalogue sources [arcsec].
    pub(crate) bright_pointlike: f64,

    /// User-specified region merged into external masks.
    pub(crate) region: Option<PathBuf>,

    /// Island size threshold enabling the extended-emission mask branch.
    pub(crate) extended_size: Option<f64>,

    /// RMS threshold for the extended-emission mask.
    pub(crate) extended_rms: f64,
}

/// Baseline-length selection bounds in km.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct UvRange {
    pub(crate) min_km: f64,
    pub(crate) max_km: f64,
}
