// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FITS mask manipulation done in-crate: blank masks cut from a template
//! image's shape, and the pixelwise OR used to fold one mask into another.
//!
//! A mask maps each image pixel to masked (non-zero) or unmasked (zero).
//! Merges are monotonic: a merge can only grow the masked region.

use std::path::{Path, PathBuf};

use fitsio::{hdu::HduInfo, FitsFile};
use ndarray::{ArrayD, IxDyn, Zip};
use thiserror::Error;

/// The pixel data of a mask (or mask-shaped image), kept alongside nothing:
/// the FITS header stays in the file it came from.
pub(crate) struct MaskImage {
    data: ArrayD<f32>,
}

impl MaskImage {
    pub(crate) fn read(path: &Path) -> Result<MaskImage, MaskError> {
        let mut fptr = FitsFile::open(path).map_err(|err| MaskError::fitsio(path, err))?;
        let hdu = fptr
            .primary_hdu()
            .map_err(|err| MaskError::fitsio(path, err))?;
        let shape = match &hdu.info {
            HduInfo::ImageInfo { shape, .. } => shape.clone(),
            _ => {
                return Err(MaskError::NotImage {
                    path: path.to_path_buf(),
                })
            }
        };
        let data: Vec<f32> = hdu
            .read_image(&mut fptr)
            .map_err(|err| MaskError::fitsio(path, err))?;
        let data = ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|_| MaskError::NotImage {
            path: path.to_path_buf(),
        })?;
        Ok(MaskImage { data })
    }

    /// OR `other` into this mask. Any pixel masked in either input is masked
    /// in the result; nothing is ever unmasked.
    pub(crate) fn merge_from(&mut self, other: &MaskImage) -> Result<(), MaskError> {
        if self.data.shape() != other.data.shape() {
            return Err(MaskError::ShapeMismatch {
                a: self.data.shape().to_vec(),
                b: other.data.shape().to_vec(),
            });
        }
        Zip::from(&mut self.data).and(&other.data).for_each(|a, &b| {
            if b > 0.0 {
                *a = 1.0;
            }
        });
        Ok(())
    }

    pub(crate) fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Overwrite the pixel data of an existing FITS file (which must have
    /// this mask's shape; it normally is the file the mask was read from, or
    /// a copy of it).
    pub(crate) fn write_to(&self, path: &Path) -> Result<(), MaskError> {
        let mut fptr = FitsFile::edit(path).map_err(|err| MaskError::fitsio(path, err))?;
        let hdu = fptr
            .primary_hdu()
            .map_err(|err| MaskError::fitsio(path, err))?;
        let slice = self.data.as_slice().expect("mask data is contiguous");
        hdu.write_image(&mut fptr, slice)
            .map_err(|err| MaskError::fitsio(path, err))?;
        Ok(())
    }
}

/// Write a blank mask with the shape and header of `template`. The template
/// file is copied wholesale (keeping its WCS) and its pixels zeroed.
pub(crate) fn write_blank_mask(template: &Path, out: &Path) -> Result<(), MaskError> {
    std::fs::copy(template, out).map_err(|err| MaskError::Copy {
        from: template.to_path_buf(),
        to: out.to_path_buf(),
        err,
    })?;
    let mut mask = MaskImage::read(out)?;
    mask.zero();
    mask.write_to(out)
}

/// OR the mask at `merge` into the mask at `base`, writing the result to
/// `out` (commonly the same path as `base`).
pub(crate) fn merge_mask(base: &Path, merge: &Path, out: &Path) -> Result<(), MaskError> {
    let mut mask = MaskImage::read(base)?;
    let other = MaskImage::read(merge)?;
    mask.merge_from(&other)?;
    if out != base {
        std::fs::copy(base, out).map_err(|err| MaskError::Copy {
            from: base.to_path_buf(),
            to: out.to_path_buf(),
            err,
        })?;
    }
    mask.write_to(out)
}

#[derive(Error, Debug)]
pub(crate) enum MaskError {
    #[error("FITS error on {path}: {err}")]
    Fitsio {
        path: PathBuf,
        err: Box<fitsio::errors::Error>,
    },

    #[error("{path}: primary HDU is not an image")]
    NotImage { path: PathBuf },

    #[error("Mask shapes differ: {a:?} vs {b:?}")]
    ShapeMismatch { a: Vec<usize>, b: Vec<usize> },

    #[error("Couldn't copy {from} to {to}: {err}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        err: std::io::Error,
    },
}

impl MaskError {
    fn fitsio(path: &Path, err: fitsio::errors::Error) -> MaskError {
        MaskError::Fitsio {
            path: path.to_path_buf(),
            err: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use fitsio::images::{ImageDescription, ImageType};
    use tempfile::TempDir;

    use super::*;

    fn write_test_image(path: &Path, dimensions: &[usize], data: &[f32]) {
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions,
        };
        let mut fptr = FitsFile::create(path)
            .with_custom_primary(&description)
            .open()
            .unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        hdu.write_image(&mut fptr, data).unwrap();
    }

    fn read_pixels(path: &Path) -> Vec<f32> {
        let mut fptr = FitsFile::open(path).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        hdu.read_image(&mut fptr).unwrap()
    }

    #[test]
    fn blank_mask_takes_template_shape_and_is_all_zero() {
        let tmp = TempDir::new().unwrap();
        let template = tmp.path().join("image.dirty.fits");
        let mask = tmp.path().join("external_mask.fits");
        write_test_image(&template, &[2, 3], &[5.0, -1.0, 0.5, 2.0, 3.0, 4.0]);

        write_blank_mask(&template, &mask).unwrap();

        assert_eq!(read_pixels(&mask), vec![0.0; 6]);
        // The template itself is untouched.
        assert_eq!(read_pixels(&template)[0], 5.0);
    }

    #[test]
    fn merges_are_monotonic() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("base.fits");
        let other = tmp.path().join("other.fits");
        write_test_image(&base, &[2, 2], &[1.0, 0.0, 1.0, 0.0]);
        write_test_image(&other, &[2, 2], &[0.0, 1.0, 0.0, 0.0]);

        merge_mask(&base, &other, &base).unwrap();

        // Previously masked pixels stay masked; the merge adds pixel 1.
        assert_eq!(read_pixels(&base), vec![1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn merge_to_a_new_path_leaves_the_base_alone() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("base.fits");
        let other = tmp.path().join("other.fits");
        let out = tmp.path().join("merged.fits");
        write_test_image(&base, &[2, 2], &[1.0, 0.0, 0.0, 0.0]);
        write_test_image(&other, &[2, 2], &[0.0, 0.0, 0.0, 1.0]);

        merge_mask(&base, &other, &out).unwrap();

        assert_eq!(read_pixels(&base), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(read_pixels(&out), vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn mismatched_shapes_are_fatal() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("base.fits");
        let other = tmp.path().join("other.fits");
        write_test_image(&base, &[2, 2], &[0.0; 4]);
        write_test_image(&other, &[2, 3], &[0.0; 6]);

        let result = merge_mask(&base, &other, &base);
        assert!(matches!(result, Err(MaskError::ShapeMismatch { .. })));
    }
}
