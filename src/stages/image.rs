// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The imaging stage: one DDF invocation per call.

use std::path::PathBuf;

use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::{
    exec::{Executor, StageOutcome, ToolCommand},
    mslist::MsList,
    params::{PipelineParams, UvRange},
    stages::StageError,
};

/// The deconvolution algorithm to run.
#[derive(Debug, Clone, Copy, Default, Display, EnumString, PartialEq, Eq)]
pub(crate) enum CleanMode {
    #[default]
    #[strum(serialize = "HMP")]
    Hmp,

    #[strum(serialize = "SSD")]
    Ssd,
}

/// Which part of a direction-dependent solution set to apply while gridding.
#[derive(Debug, Clone, Copy, Display, EnumString, PartialEq, Eq)]
pub(crate) enum ApplyMode {
    /// Phases only.
    #[strum(serialize = "P")]
    P,

    /// Amplitudes and phases.
    #[strum(serialize = "AP")]
    Ap,
}

/// One imaging run. Unset optional fields emit no flag at all; the external
/// tool's own defaults then apply.
#[derive(Debug, Clone)]
pub(crate) struct DdfImage {
    /// The base name every output artifact of this run derives from.
    pub(crate) name: String,

    pub(crate) clean_mask: Option<PathBuf>,
    pub(crate) clean_mode: CleanMode,

    /// The solution set to apply while gridding, with the apply mode and
    /// optional global normalisation.
    pub(crate) dd_sols: Option<String>,
    pub(crate) apply_sols: Option<ApplyMode>,
    pub(crate) normalization: Option<String>,

    /// Deconvolution stops below this flux [Jy].
    pub(crate) threshold: Option<f64>,

    pub(crate) major_cycles: u32,
    pub(crate) robust: f64,

    /// Restoring beam override [arcsec]; the configured beam otherwise.
    pub(crate) beam_size: Option<f64>,

    /// Image-size/cell-size overrides; the configured values otherwise.
    pub(crate) im_size: Option<usize>,
    pub(crate) cell_size: Option<f64>,

    pub(crate) uv_range: Option<UvRange>,
    pub(crate) col_name: String,
    pub(crate) peak_factor: f64,

    /// Start deconvolution from a prior dico model. The base must be
    /// supplied whenever the flag is set.
    pub(crate) use_dico_model: bool,
    pub(crate) dico_model_base: Option<String>,

    /// Facet layout from an earlier clustering run.
    pub(crate) cluster_file: Option<PathBuf>,

    pub(crate) automask: bool,
    pub(crate) automask_threshold: f64,

    /// Reuse cached intermediates from an earlier run over the same list.
    /// Honored only when the corresponding cache artifact exists.
    pub(crate) reuse_psf: bool,
    pub(crate) reuse_dirty: bool,
    pub(crate) dirty_from_resid: bool,

    pub(crate) smooth: bool,
    pub(crate) no_weights: bool,
    pub(crate) cube_mode: bool,

    /// Additional image products to write, beyond the stock set.
    pub(crate) save_images: Option<String>,
}

impl Default for DdfImage {
    fn default() -> DdfImage {
        DdfImage {
            name: String::new(),
            clean_mask: None,
            clean_mode: CleanMode::default(),
            dd_sols: None,
            apply_sols: None,
            normalization: None,
            threshold: None,
            major_cycles: 3,
            robust: 0.0,
            beam_size: None,
            im_size: None,
            cell_size: None,
            uv_range: None,
            col_name: "CORRECTED_DATA".to_string(),
            peak_factor: 0.1,
            use_dico_model: false,
            dico_model_base: None,
            cluster_file: None,
            automask: true,
            automask_threshold: 10.0,
            reuse_psf: false,
            reuse_dirty: false,
            dirty_from_resid: false,
            smooth: false,
            no_weights: false,
            cube_mode: false,
            save_images: None,
        }
    }
}

impl DdfImage {
    /// The artifact whose existence satisfies this stage: the restored image
    /// when any cleaning happens, the dirty image otherwise.
    pub(crate) fn primary_output(&self) -> PathBuf {
        if self.major_cycles > 0 {
            PathBuf::from(format!("{}.app.restored.fits", self.name))
        } else {
            PathBuf::from(format!("{}.dirty.fits", self.name))
        }
    }

    /// Reject bad parameter combinations before anything is assembled or
    /// spawned.
    fn validate(&self) -> Result<(), ImageArgsError> {
        if self.use_dico_model && self.dico_model_base.is_none() {
            return Err(ImageArgsError::DicoModelWithoutBase);
        }
        if self.dirty_from_resid && self.reuse_dirty {
            return Err(ImageArgsError::ReuseDirtyConflict);
        }
        Ok(())
    }

    fn command(&self, mslist: &MsList, params: &PipelineParams) -> ToolCommand {
        let mut cmd = ToolCommand::new("DDF.py");
        cmd.arg("--Output-Name", &self.name);
        cmd.arg("--Data-MS", mslist.path().display());
        cmd.arg("--Deconv-PeakFactor", self.peak_factor);
        cmd.arg("--Data-ColName", &self.col_name);
        cmd.arg("--Parallel-NCPU", params.image.ncpu);
        cmd.arg("--Image-Mode", "Clean");
        cmd.arg("--Deconv-CycleFactor", 0);
        cmd.arg("--Deconv-MaxMinorIter", 1_000_000);
        cmd.arg("--Deconv-MaxMajorIter", self.major_cycles);
        cmd.arg("--Deconv-Mode", self.clean_mode);
        cmd.arg("--Beam-Model", "LOFAR");
        cmd.arg("--Beam-LOFARBeamMode", "A");
        cmd.arg("--Weight-Robust", self.robust);
        cmd.arg(
            "--Weight-ColName",
            if self.no_weights {
                "None"
            } else {
                "IMAGING_WEIGHT"
            },
        );
        cmd.arg(
            "--Image-NPix",
            self.im_size.unwrap_or(params.image.imsize),
        );
        cmd.arg("--CF-wmax", 50000);
        cmd.arg("--CF-Nw", 100);
        let mut save_images = self.save_images.clone().unwrap_or_default();
        save_images.push_str("onNeds");
        cmd.arg("--Output-Also", save_images);
        cmd.arg(
            "--Image-Cell",
            self.cell_size.unwrap_or(params.image.cellsize),
        );
        cmd.arg("--Facets-NFacets", 11);
        cmd.arg("--SSDClean-NEnlargeData", 0);
        cmd.arg("--Freq-NDegridBand", 1);
        cmd.arg(
            "--Output-RestoringBeam",
            self.beam_size.unwrap_or(params.image.psf_arcsec),
        );
        cmd.arg("--Beam-NBand", 1);
        cmd.arg("--Facets-DiamMax", 1.5);
        cmd.arg("--Facets-DiamMin", 0.1);
        cmd.arg("--Deconv-RMSFactor", 3.0);
        cmd.arg("--Data-Sort", 1);
        cmd.arg(
            "--Cache-Dir",
            params
                .cache_dir
                .as_deref()
                .unwrap_or_else(|| std::path::Path::new("."))
                .display(),
        );

        if self.cube_mode {
            // One output band per measurement set.
            cmd.arg("--Output-Cubes", "I");
            cmd.arg("--Freq-NBand", mslist.len());
        } else {
            cmd.arg("--Freq-NBand", 2);
        }

        if params.image.do_decorr {
            cmd.arg("--RIME-DecorrMode", "FT");
        }
        if self.clean_mode == CleanMode::Ssd {
            cmd.arg("--SSDClean-SSDSolvePars", "[S,Alpha]");
            cmd.arg("--SSDClean-BICFactor", 0);
        }
        if let Some(cluster_file) = &self.cluster_file {
            cmd.arg("--Facets-CatNodes", cluster_file.display());
        }
        if self.automask {
            cmd.arg("--Mask-Auto", 1);
            cmd.arg("--Mask-SigTh", format!("{:.2}", self.automask_threshold));
        }
        if let Some(clean_mask) = &self.clean_mask {
            cmd.arg("--Mask-External", clean_mask.display());
        }
        if let Some(apply_sols) = self.apply_sols {
            if let Some(normalization) = &self.normalization {
                cmd.arg("--DDESolutions-GlobalNorm", format!("Mean{normalization}"));
            }
            cmd.arg("--DDESolutions-DDModeGrid", apply_sols);
            cmd.arg("--DDESolutions-DDModeDeGrid", apply_sols);
            cmd.arg(
                "--DDESolutions-DDSols",
                self.dd_sols.as_deref().unwrap_or_default(),
            );
        }
        if self.use_dico_model {
            // validate() has established the base is present.
            let base = self.dico_model_base.as_deref().unwrap_or_default();
            cmd.arg("--Predict-InitDicoModel", format!("{base}.DicoModel"));
        }
        if let Some(threshold) = self.threshold {
            cmd.arg("--Deconv-FluxThreshold", threshold);
        }
        if let Some(UvRange { min_km, max_km }) = self.uv_range {
            cmd.arg("--Selection-UVRangeKm", format!("[{min_km},{max_km}]"));
        }

        // Crashes can destroy parts of the cache, so only ask for reuse when
        // the cached artifact is still there; DDF recomputes otherwise.
        let cache_dir = mslist.cache_dir(params.cache_dir.as_deref());
        if self.dirty_from_resid && cache_dir.join("LastResidual").exists() {
            cmd.arg("--Cache-Dirty", "forceresidual");
        }
        if self.reuse_dirty && cache_dir.join("Dirty").exists() {
            cmd.arg("--Cache-Dirty", "forcedirty");
        }
        if self.reuse_psf && cache_dir.join("PSF").exists() {
            cmd.arg("--Cache-PSF", "force");
        }

        if let Some(hmp_size) = params.image.hmp_size {
            cmd.arg("--SSDClean-MinSizeInitHMP", hmp_size);
        }
        if params.quiet {
            cmd.arg("--Log-Boring", 1);
        }
        if self.smooth {
            cmd.arg("--Beam-Smooth", 1);
        }

        cmd
    }

    pub(crate) fn run(
        &self,
        mslist: &MsList,
        params: &PipelineParams,
        exec: &Executor,
    ) -> Result<StageOutcome, StageError> {
        self.validate()?;
        let cmd = self.command(mslist, params);
        let outcome = exec.run_or_skip(
            &self.primary_output(),
            &cmd,
            Some(&format!("DDF-{}.log", self.name)),
        )?;
        Ok(outcome)
    }
}

#[derive(Error, Debug)]
pub(crate) enum ImageArgsError {
    #[error("use_dico_model is set but no dico model base was supplied")]
    DicoModelWithoutBase,

    #[error("Cannot combine reuse_dirty and dirty_from_resid")]
    ReuseDirtyConflict,
}
