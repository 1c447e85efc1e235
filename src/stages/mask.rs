// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The two mask-building stages: thresholded masks cut from a restored
//! image, and externally assembled masks built from a template plus
//! catalogue/region/extended-emission contributions.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::{
    exec::{Executor, StageOutcome, ToolCommand},
    masks::{merge_mask, write_blank_mask},
    params::PipelineParams,
    stages::StageError,
};

/// Derive a binary mask from a restored image at a significance threshold,
/// then fold in the external mask so manually masked regions survive.
#[derive(Debug, Clone)]
pub(crate) struct MakeMask {
    /// The restored image to threshold.
    pub(crate) image: PathBuf,

    pub(crate) threshold: f64,

    /// A mask to OR into the fresh one after the tool has run.
    pub(crate) external_mask: Option<PathBuf>,
}

impl MakeMask {
    pub(crate) fn primary_output(&self) -> PathBuf {
        let mut name = self.image.as_os_str().to_os_string();
        name.push(".mask.fits");
        PathBuf::from(name)
    }

    pub(crate) fn run(&self, exec: &Executor) -> Result<StageOutcome, StageError> {
        let mut cmd = ToolCommand::new("MakeMask.py");
        cmd.arg("--RestoredIm", self.image.display());
        cmd.arg("--Th", self.threshold);
        cmd.arg("--Box", "50,2");

        let fname = self.primary_output();
        let log_name = format!("MM-{}.log", file_label(&self.image));
        let outcome = exec.run_or_skip(&fname, &cmd, Some(&log_name))?;

        if outcome.ran() && !exec.dry_run {
            if let Some(external_mask) = &self.external_mask {
                if external_mask.is_file() {
                    merge_mask(&fname, external_mask, &fname)?;
                } else {
                    warn!(
                        "External mask {} not found, not merging it",
                        external_mask.display()
                    );
                }
            }
        }
        Ok(outcome)
    }
}

/// Assemble a mask that doesn't come from our own imaging: start blank with
/// the template's shape, then merge whatever is configured. Each merge step
/// is a no-op when its input isn't set up.
#[derive(Debug, Clone)]
pub(crate) struct ExternalMask {
    pub(crate) out: PathBuf,

    /// The image whose shape and WCS the mask copies.
    pub(crate) template: PathBuf,

    /// An extended-emission mask to fold in, when that branch has run.
    pub(crate) extended: Option<PathBuf>,

    /// Rebuild even when the mask already exists under restart.
    pub(crate) force: bool,
}

impl ExternalMask {
    pub(crate) fn run(
        &self,
        params: &PipelineParams,
        exec: &Executor,
    ) -> Result<StageOutcome, StageError> {
        if exec.restart && self.out.is_file() && !self.force {
            warn!(
                "External mask {} already exists, not creating it",
                self.out.display()
            );
            return Ok(StageOutcome::Skipped);
        }

        info!("Making a blank external mask from {}", self.template.display());
        if !exec.dry_run {
            write_blank_mask(&self.template, &self.out)?;
        }

        if let Some(catalog) = &params.mask.bright_catalog {
            info!("Merging bright catalogue sources into the mask");
            let mut cmd = ToolCommand::new("ModifyMask.py");
            cmd.arg("--InMask", self.out.display());
            cmd.arg("--OutMask", self.out.display());
            cmd.arg("--Catalog", catalog.display());
            cmd.arg("--Radius", params.mask.bright_radius);
            cmd.arg("--MinFlux", params.mask.bright_min_flux);
            cmd.arg(
                "--DoExtended",
                if params.mask.bright_extended { 1 } else { 0 },
            );
            cmd.arg("--CellSize", params.image.cellsize);
            cmd.arg("--PointSize", params.mask.bright_pointlike);
            let log_name = format!("ModifyMask-{}.log", file_label(&self.out));
            exec.run(&cmd, Some(&log_name))?;
        }

        if let Some(region) = &params.mask.region {
            info!("Merging the user-specified region into the mask");
            let mut cmd = ToolCommand::new("MaskRegion.py");
            cmd.arg("--InMask", self.out.display());
            cmd.arg("--Region", region.display());
            cmd.arg("--OutMask", self.out.display());
            let log_name = format!("MaskRegion-{}.log", file_label(&self.out));
            exec.run(&cmd, Some(&log_name))?;
        }

        if params.mask.extended_size.is_some() {
            if let Some(extended) = &self.extended {
                info!("Merging the extended-emission mask into the mask");
                if !exec.dry_run {
                    merge_mask(&self.out, extended, &self.out)?;
                }
            }
        }

        Ok(StageOutcome::Ran)
    }
}

/// A path's final component, for naming log files.
fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use fitsio::{
        images::{ImageDescription, ImageType},
        FitsFile,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::params::tests::test_params;

    fn write_test_image(path: &Path, data: &[f32]) {
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &[2, 2],
        };
        let mut fptr = FitsFile::create(path)
            .with_custom_primary(&description)
            .open()
            .unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        hdu.write_image(&mut fptr, data).unwrap();
    }

    #[test]
    fn mask_output_appends_the_mask_suffix() {
        let stage = MakeMask {
            image: PathBuf::from("image_dirin_SSD.app.restored.fits"),
            threshold: 25.0,
            external_mask: None,
        };
        assert_eq!(
            stage.primary_output(),
            PathBuf::from("image_dirin_SSD.app.restored.fits.mask.fits")
        );
    }

    #[test]
    fn existing_mask_is_skipped_and_left_untouched_under_restart() {
        let tmp = TempDir::new().unwrap();
        let image = tmp.path().join("image1.app.restored.fits");
        let mask = tmp.path().join("image1.app.restored.fits.mask.fits");
        write_test_image(&mask, &[1.0, 0.0, 0.0, 0.0]);
        let before = std::fs::read(&mask).unwrap();

        let stage = MakeMask {
            image,
            threshold: 25.0,
            external_mask: None,
        };
        let exec = Executor {
            restart: true,
            dry_run: false,
            log_dir: None,
        };
        let outcome = stage.run(&exec).unwrap();
        assert_eq!(outcome, StageOutcome::Skipped);
        assert_eq!(std::fs::read(&mask).unwrap(), before);
    }

    #[test]
    fn external_mask_skips_when_present_unless_forced() {
        let tmp = TempDir::new().unwrap();
        let template = tmp.path().join("image1.dirty.fits");
        let out = tmp.path().join("external_mask.fits");
        write_test_image(&template, &[3.0, 0.0, 1.0, 0.0]);
        write_test_image(&out, &[1.0, 1.0, 1.0, 1.0]);

        let params = test_params(tmp.path().join("mslist.txt"));
        let exec = Executor {
            restart: true,
            dry_run: false,
            log_dir: None,
        };

        let stage = ExternalMask {
            out: out.clone(),
            template: template.clone(),
            extended: None,
            force: false,
        };
        assert_eq!(stage.run(&params, &exec).unwrap(), StageOutcome::Skipped);

        let forced = ExternalMask {
            out: out.clone(),
            template,
            extended: None,
            force: true,
        };
        assert_eq!(forced.run(&params, &exec).unwrap(), StageOutcome::Ran);

        // Rebuilt blank.
        let mut fptr = FitsFile::open(&out).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        let pixels: Vec<f32> = hdu.read_image(&mut fptr).unwrap();
        assert_eq!(pixels, vec![0.0; 4]);
    }

    #[test]
    fn extended_mask_is_merged_when_configured() {
        let tmp = TempDir::new().unwrap();
        let template = tmp.path().join("image1.dirty.fits");
        let out = tmp.path().join("external_mask_ext.fits");
        let extended = tmp.path().join("mask-high.fits");
        write_test_image(&template, &[0.0; 4]);
        write_test_image(&extended, &[0.0, 1.0, 0.0, 1.0]);

        let mut params = test_params(tmp.path().join("mslist.txt"));
        params.mask.extended_size = Some(2000.0);
        let exec = Executor {
            restart: false,
            dry_run: false,
            log_dir: None,
        };

        let stage = ExternalMask {
            out: out.clone(),
            template,
            extended: Some(extended),
            force: false,
        };
        assert_eq!(stage.run(&params, &exec).unwrap(), StageOutcome::Ran);

        let mut fptr = FitsFile::open(&out).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        let pixels: Vec<f32> = hdu.read_image(&mut fptr).unwrap();
        assert_eq!(pixels, vec![0.0, 1.0, 0.0, 1.0]);
    }
}
