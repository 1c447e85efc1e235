// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The self-calibration recipe: the fixed sequence of stages and its
//! conditional branches.
//!
//! Stages hand artifacts to each other by naming convention, not by return
//! value; the filesystem is the only run state. Combined with the skip
//! policy this makes the whole sequence resumable: rerunning in the same
//! working directory with restart mode on picks up wherever the last run
//! stopped.

use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::{
    cache,
    exec::{ExecError, Executor, ToolCommand},
    mslist::{MsList, MsListError},
    params::{PipelineParams, UvRange},
    stages::{
        ApplyMode, CleanMode, DdfImage, ExternalMask, KillMs, MakeMask, MakeModel, MaskDicoModel,
        StageError,
    },
    uvmin::{optimize_uvmin, UvMinError},
};

/// Upper baseline-length bound used everywhere [km].
const UV_MAX_KM: f64 = 1000.0;

/// The column the bootstrap writes its rescaled data into.
const SCALED_COLUMN: &str = "SCALED_DATA";

// The naming-convention backbone: each stage finds its inputs under these
// names.
const IMAGE_INIT: &str = "image_dirin_SSD_init";
const IMAGE_DIRIN: &str = "image_dirin_SSD";
const IMAGE_PHASE1: &str = "image_phase1";
const IMAGE_AMPPHASE1: &str = "image_ampphase1";
const IMAGE_FULL: &str = "image_full_ampphase1";
const IMAGE_FULL_MASKED: &str = "image_full_ampphase1m";
const IMAGE_FULL_LOW: &str = "image_full_low";
const IMAGE_BOOTSTRAP_RESTORED: &str = "image_bootstrap.app.restored.fits";
const EXTERNAL_MASK: &str = "external_mask.fits";
const EXTERNAL_MASK_EXT: &str = "external_mask_ext.fits";
const EXTENDED_MASK: &str = "mask-high.fits";
const LOW_MASK: &str = "mask-low.fits";

pub(crate) fn run(params: &PipelineParams) -> Result<(), PipelineError> {
    let mslist = MsList::read(&params.mslist)?;
    let full_mslist = params.full_mslist.as_ref().map(MsList::read).transpose()?;

    if let Some(log_dir) = &params.log_dir {
        std::fs::create_dir_all(log_dir).map_err(|err| PipelineError::LogDir {
            path: log_dir.clone(),
            err,
        })?;
    }

    let exec = Executor {
        restart: params.restart,
        dry_run: params.dry_run,
        log_dir: params.log_dir.clone(),
    };
    let cache_base = params.cache_dir.as_deref();

    let image_uvrange = UvRange {
        min_km: params.image.uvmin,
        max_km: UV_MAX_KM,
    };
    let mut killms_uvrange = UvRange {
        min_km: params.cal.uvmin.unwrap_or(0.0),
        max_km: UV_MAX_KM,
    };

    // Data column for the first steps; the bootstrap may swap it later.
    let mut col_name = params.data_column.clone();

    // Clear out shared-memory segments a crashed earlier run left behind.
    exec.run(&ToolCommand::new("CleanSHM.py"), None)?;

    if params.clear_cache && !params.dry_run {
        // We don't know what state the cache is in.
        cache::clear(&mslist, cache_base);
        if let Some(full) = &full_mslist {
            cache::clear(full, cache_base);
        }
    }

    check_imaging_weights(&mslist, &exec)?;

    // Image without cleaning, to fix the WCS for the external mask. Weights
    // are disabled: the imaging-weight check may have left zero weights.
    DdfImage {
        name: IMAGE_INIT.to_string(),
        clean_mode: CleanMode::Ssd,
        major_cycles: 0,
        robust: params.image.robust,
        peak_factor: 0.05,
        col_name: col_name.clone(),
        no_weights: true,
        uv_range: Some(image_uvrange),
        ..Default::default()
    }
    .run(&mslist, params, &exec)?;

    let init_dirty = PathBuf::from(format!("{IMAGE_INIT}.dirty.fits"));
    let mut external_mask = PathBuf::from(EXTERNAL_MASK);
    ExternalMask {
        out: external_mask.clone(),
        template: init_dirty.clone(),
        extended: None,
        force: false,
    }
    .run(params, &exec)?;

    // Deep SSD clean with the external mask and automasking.
    DdfImage {
        name: IMAGE_DIRIN.to_string(),
        clean_mask: Some(external_mask.clone()),
        clean_mode: CleanMode::Ssd,
        major_cycles: 4,
        robust: params.image.robust,
        reuse_psf: true,
        reuse_dirty: true,
        peak_factor: 0.05,
        col_name: col_name.clone(),
        automask: true,
        automask_threshold: params.mask.thresholds[0],
        no_weights: true,
        uv_range: Some(image_uvrange),
        ..Default::default()
    }
    .run(&mslist, params, &exec)?;

    let dirin_restored = PathBuf::from(format!("{IMAGE_DIRIN}.app.restored.fits"));
    let dirin_mask = MakeMask {
        image: dirin_restored,
        threshold: params.mask.thresholds[0],
        external_mask: Some(external_mask.clone()),
    };
    let dirin_mask_file = dirin_mask.primary_output();
    dirin_mask.run(&exec)?;

    MaskDicoModel {
        in_dico: PathBuf::from(format!("{IMAGE_DIRIN}.DicoModel")),
        mask_name: dirin_mask_file.clone(),
        out_dico: PathBuf::from(format!("{IMAGE_DIRIN}_masked.DicoModel")),
    }
    .run(&exec)?;

    // The clustering tool reads these under the deep image's name.
    if !params.dry_run {
        symlink_if_missing(
            &format!("{IMAGE_INIT}.Norm.fits"),
            &format!("{IMAGE_DIRIN}.Norm.fits"),
        )?;
        symlink_if_missing(
            &format!("{IMAGE_INIT}.dirty.fits"),
            &format!("{IMAGE_DIRIN}.dirty.fits"),
        )?;
    }

    let clustered = MakeModel {
        mask_name: dirin_mask_file,
        image_name: IMAGE_DIRIN.to_string(),
    }
    .run(params, &exec)?;
    if clustered.ran() && !params.dry_run {
        // The facet layout embedded in the cache is now stale.
        cache::clear(&mslist, cache_base);
    }

    if params.cal.auto_uvmin {
        if let Some(uvmin) = optimize_uvmin(IMAGE_DIRIN, &mslist, &col_name, &exec)? {
            killms_uvrange.min_km = uvmin;
        }
    }

    let cluster_cat = PathBuf::from(format!("{IMAGE_DIRIN}.npy.ClusterCat.npy"));
    KillMs {
        image_name: IMAGE_DIRIN.to_string(),
        out_sols: "killms_p1".to_string(),
        cluster_file: Some(cluster_cat.clone()),
        col_name: col_name.clone(),
        n_iter_kf: params.cal.n_iter_kf[0],
        dico_model: Some(PathBuf::from(format!("{IMAGE_DIRIN}_masked.DicoModel"))),
        uv_range: Some(killms_uvrange),
    }
    .run(&mslist, params, &exec)?;

    // The bootstrap corrects the overall flux scale; everything downstream
    // then reads the rescaled column.
    if params.bootstrap {
        info!("Running the flux-scale bootstrap");
        let mut cmd = ToolCommand::new("bootstrap.py");
        if let Some(args_file) = &params.args_file {
            cmd.flag(args_file.display().to_string());
        }
        exec.run(&cmd, None)?;
        col_name = SCALED_COLUMN.to_string();
    }

    // Build the extended-emission mask if required and possible.
    if Path::new(IMAGE_BOOTSTRAP_RESTORED).is_file() && params.mask.extended_size.is_some() {
        if !Path::new(EXTENDED_MASK).is_file() {
            info!("Making the extended-emission mask");
            let mut cmd = ToolCommand::new("MakeExtendedMask.py");
            cmd.arg("--Image", IMAGE_BOOTSTRAP_RESTORED);
            cmd.arg(
                "--CompareImage",
                format!("{IMAGE_DIRIN}.app.restored.fits"),
            );
            cmd.arg("--RmsThresh", params.mask.extended_rms);
            cmd.arg(
                "--SizeThresh",
                params.mask.extended_size.unwrap_or_default(),
            );
            exec.run(&cmd, Some("MakeExtendedMask.log"))?;
        } else {
            warn!("Extended-emission mask already exists, using the existing version");
        }
        external_mask = PathBuf::from(EXTERNAL_MASK_EXT);
        ExternalMask {
            out: external_mask.clone(),
            template: init_dirty,
            extended: Some(PathBuf::from(EXTENDED_MASK)),
            force: false,
        }
        .run(params, &exec)?;
    }

    // Apply the phase solutions and image again.
    DdfImage {
        name: IMAGE_PHASE1.to_string(),
        clean_mask: Some(external_mask.clone()),
        clean_mode: CleanMode::Ssd,
        dd_sols: Some("killms_p1".to_string()),
        apply_sols: Some(ApplyMode::P),
        normalization: params.cal.normalize[0].clone(),
        major_cycles: 4,
        robust: params.image.robust,
        col_name: col_name.clone(),
        peak_factor: 0.01,
        automask: true,
        automask_threshold: params.mask.thresholds[1],
        uv_range: Some(image_uvrange),
        ..Default::default()
    }
    .run(&mslist, params, &exec)?;

    let phase1_mask = MakeMask {
        image: PathBuf::from(format!("{IMAGE_PHASE1}.app.restored.fits")),
        threshold: params.mask.thresholds[1],
        external_mask: Some(external_mask.clone()),
    };
    let phase1_mask_file = phase1_mask.primary_output();
    phase1_mask.run(&exec)?;

    MaskDicoModel {
        in_dico: PathBuf::from(format!("{IMAGE_PHASE1}.DicoModel")),
        mask_name: phase1_mask_file.clone(),
        out_dico: PathBuf::from(format!("{IMAGE_PHASE1}_masked.DicoModel")),
    }
    .run(&exec)?;

    // Calibrate amplitudes and phases off the phase-corrected model.
    if params.cal.auto_uvmin {
        if let Some(uvmin) = optimize_uvmin(IMAGE_DIRIN, &mslist, &col_name, &exec)? {
            killms_uvrange.min_km = uvmin;
        }
    }

    KillMs {
        image_name: IMAGE_PHASE1.to_string(),
        out_sols: "killms_ap1".to_string(),
        cluster_file: None,
        col_name: col_name.clone(),
        n_iter_kf: params.cal.n_iter_kf[1],
        dico_model: Some(PathBuf::from(format!("{IMAGE_PHASE1}_masked.DicoModel"))),
        uv_range: Some(killms_uvrange),
    }
    .run(&mslist, params, &exec)?;

    // Apply phase and amplitude solutions and image again.
    DdfImage {
        name: IMAGE_AMPPHASE1.to_string(),
        clean_mask: Some(phase1_mask_file),
        clean_mode: CleanMode::Ssd,
        dd_sols: Some("killms_ap1".to_string()),
        apply_sols: Some(ApplyMode::Ap),
        normalization: params.cal.normalize[1].clone(),
        major_cycles: 4,
        robust: params.image.robust,
        col_name: col_name.clone(),
        use_dico_model: true,
        dico_model_base: Some(format!("{IMAGE_PHASE1}_masked")),
        peak_factor: 0.005,
        automask: true,
        automask_threshold: params.mask.thresholds[2],
        uv_range: Some(image_uvrange),
        ..Default::default()
    }
    .run(&mslist, params, &exec)?;

    let ampphase1_mask = MakeMask {
        image: PathBuf::from(format!("{IMAGE_AMPPHASE1}.app.restored.fits")),
        threshold: params.mask.thresholds[2],
        external_mask: Some(external_mask.clone()),
    };
    let ampphase1_mask_file = ampphase1_mask.primary_output();
    ampphase1_mask.run(&exec)?;

    MaskDicoModel {
        in_dico: PathBuf::from(format!("{IMAGE_AMPPHASE1}.DicoModel")),
        mask_name: ampphase1_mask_file.clone(),
        out_dico: PathBuf::from(format!("{IMAGE_AMPPHASE1}_masked.DicoModel")),
    }
    .run(&exec)?;

    // Move on to the full dataset, if there is one.
    let full_mslist = match &full_mslist {
        None => {
            warn!("No full measurement-set list supplied, stopping here");
            return Ok(());
        }
        Some(full) => full,
    };

    check_imaging_weights(full_mslist, &exec)?;

    if params.cal.auto_uvmin {
        if let Some(uvmin) = optimize_uvmin(IMAGE_DIRIN, &mslist, &col_name, &exec)? {
            killms_uvrange.min_km = uvmin;
        }
    }

    KillMs {
        image_name: IMAGE_AMPPHASE1.to_string(),
        out_sols: "killms_f_ap1".to_string(),
        cluster_file: Some(cluster_cat),
        col_name: col_name.clone(),
        n_iter_kf: params.cal.n_iter_kf[2],
        dico_model: Some(PathBuf::from(format!("{IMAGE_AMPPHASE1}_masked.DicoModel"))),
        uv_range: Some(killms_uvrange),
    }
    .run(full_mslist, params, &exec)?;

    DdfImage {
        name: IMAGE_FULL.to_string(),
        clean_mask: Some(ampphase1_mask_file),
        clean_mode: CleanMode::Ssd,
        dd_sols: Some("killms_f_ap1".to_string()),
        apply_sols: Some(ApplyMode::Ap),
        normalization: params.cal.normalize[2].clone(),
        major_cycles: 2,
        beam_size: Some(params.image.final_psf_arcsec),
        robust: params.image.final_robust,
        col_name: col_name.clone(),
        use_dico_model: true,
        dico_model_base: Some(format!("{IMAGE_AMPPHASE1}_masked")),
        peak_factor: 0.001,
        automask: true,
        automask_threshold: params.mask.thresholds[3],
        smooth: true,
        uv_range: Some(image_uvrange),
        ..Default::default()
    }
    .run(full_mslist, params, &exec)?;

    let full_mask = MakeMask {
        image: PathBuf::from(format!("{IMAGE_FULL}.app.restored.fits")),
        threshold: params.mask.thresholds[3],
        external_mask: Some(external_mask),
    };
    let full_mask_file = full_mask.primary_output();
    full_mask.run(&exec)?;

    MaskDicoModel {
        in_dico: PathBuf::from(format!("{IMAGE_FULL}.DicoModel")),
        mask_name: full_mask_file.clone(),
        out_dico: PathBuf::from(format!("{IMAGE_FULL}_masked.DicoModel")),
    }
    .run(&exec)?;

    // Re-image with the deeper mask, reusing the PSF and building the dirty
    // image from the last residual.
    DdfImage {
        name: IMAGE_FULL_MASKED.to_string(),
        clean_mask: Some(full_mask_file),
        clean_mode: CleanMode::Ssd,
        dd_sols: Some("killms_f_ap1".to_string()),
        apply_sols: Some(ApplyMode::Ap),
        normalization: params.cal.normalize[2].clone(),
        major_cycles: 2,
        beam_size: Some(params.image.final_psf_arcsec),
        robust: params.image.final_robust,
        col_name: col_name.clone(),
        use_dico_model: true,
        dico_model_base: Some(format!("{IMAGE_FULL}_masked")),
        peak_factor: 0.001,
        automask: true,
        automask_threshold: params.mask.thresholds[3],
        smooth: true,
        reuse_psf: true,
        dirty_from_resid: true,
        uv_range: Some(image_uvrange),
        ..Default::default()
    }
    .run(full_mslist, params, &exec)?;

    if let Some(low_psf_arcsec) = params.image.low_psf_arcsec {
        // A low-resolution re-image was requested. Baselines longer than
        // the target resolution carry no information at this beam size.
        let low_uvrange = UvRange {
            min_km: params.image.uvmin,
            max_km: 2.5 * 206.0 / low_psf_arcsec,
        };
        let low_imsize = params.image.low_imsize.unwrap_or_else(|| {
            (params.image.imsize as f64 * params.image.cellsize / params.image.low_cell) as usize
        });
        // Reuse the bootstrap's low mask only when the geometry matches it.
        let low_mask = (Path::new(LOW_MASK).is_file()
            && low_imsize == params.image.bootstrap_imsize)
            .then(|| PathBuf::from(LOW_MASK));

        DdfImage {
            name: IMAGE_FULL_LOW.to_string(),
            clean_mask: low_mask,
            clean_mode: CleanMode::Ssd,
            dd_sols: Some("killms_f_ap1".to_string()),
            apply_sols: Some(ApplyMode::Ap),
            normalization: Some("Amp".to_string()),
            major_cycles: 5,
            robust: params.image.low_robust,
            uv_range: Some(low_uvrange),
            beam_size: Some(low_psf_arcsec),
            im_size: Some(low_imsize),
            cell_size: Some(params.image.low_cell),
            col_name: col_name.clone(),
            peak_factor: 0.001,
            smooth: true,
            automask: true,
            automask_threshold: 5.0,
            ..Default::default()
        }
        .run(full_mslist, params, &exec)?;
    }

    Ok(())
}

/// Make sure the measurement sets carry imaging-weight columns; DDF needs
/// them. Table access lives in the helper.
fn check_imaging_weights(mslist: &MsList, exec: &Executor) -> Result<(), ExecError> {
    info!(
        "Checking for imaging weights in {}",
        mslist.path().display()
    );
    let mut cmd = ToolCommand::new("CheckImagingWeights.py");
    cmd.arg("--MSList", mslist.path().display());
    let label = mslist
        .path()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    exec.run(&cmd, Some(&format!("CheckImagingWeights-{label}.log")))
}

fn symlink_if_missing(target: &str, link: &str) -> Result<(), PipelineError> {
    if Path::new(link).exists() {
        return Ok(());
    }
    std::os::unix::fs::symlink(target, link).map_err(|err| PipelineError::Symlink {
        link: PathBuf::from(link),
        err,
    })
}

#[derive(Error, Debug)]
pub(crate) enum PipelineError {
    #[error(transparent)]
    MsList(#[from] MsListError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    UvMin(#[from] UvMinError),

    #[error("Couldn't create logging directory {path}: {err}")]
    LogDir { path: PathBuf, err: std::io::Error },

    #[error("Couldn't create symlink {link}: {err}")]
    Symlink { link: PathBuf, err: std::io::Error },
}
