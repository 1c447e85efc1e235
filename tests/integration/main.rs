// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! The external tools are stubbed with shell scripts that record their
//! invocations into `stage_invocations.log` and drop the artifacts the
//! pipeline expects, so the restart/skip behavior of the real binary can be
//! observed end to end.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod cli_args;
mod run_pipeline;

use std::{
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use fitsio::{
    images::{ImageDescription, ImageType},
    FitsFile,
};

fn selfcal() -> Command {
    Command::cargo_bin("ddf_selfcal").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// A small but real FITS image, used as the template every stub "image
/// product" is copied from.
fn write_template_fits(path: &Path) {
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &[2, 2],
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .open()
        .unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    hdu.write_image(&mut fptr, &[0.0_f32, 1.0, 0.0, 1.0]).unwrap();
}

/// Install the stub external tools into `bin_dir` and return a PATH that
/// finds them first.
fn install_stub_tools(bin_dir: &Path) -> String {
    std::fs::create_dir_all(bin_dir).unwrap();

    write_stub(
        bin_dir,
        "DDF.py",
        r#"#!/bin/sh
echo "DDF.py $@" >> stage_invocations.log
name=""
for a in "$@"; do
    case "$a" in
        --Output-Name=*) name="${a#--Output-Name=}";;
    esac
done
cp template.fits "$name.app.restored.fits"
cp template.fits "$name.dirty.fits"
cp template.fits "$name.Norm.fits"
touch "$name.DicoModel"
"#,
    );

    write_stub(
        bin_dir,
        "MakeMask.py",
        r#"#!/bin/sh
echo "MakeMask.py $@" >> stage_invocations.log
im=""
for a in "$@"; do
    case "$a" in
        --RestoredIm=*) im="${a#--RestoredIm=}";;
    esac
done
cp template.fits "$im.mask.fits"
"#,
    );

    write_stub(
        bin_dir,
        "MakeModel.py",
        r#"#!/bin/sh
echo "MakeModel.py $@" >> stage_invocations.log
base=""
for a in "$@"; do
    case "$a" in
        --BaseImageName=*) base="${a#--BaseImageName=}";;
    esac
done
touch "$base.npy" "$base.npy.ClusterCat.npy"
"#,
    );

    write_stub(
        bin_dir,
        "MaskDicoModel.py",
        r#"#!/bin/sh
echo "MaskDicoModel.py $@" >> stage_invocations.log
out=""
for a in "$@"; do
    case "$a" in
        --OutDicoModel=*) out="${a#--OutDicoModel=}";;
    esac
done
touch "$out"
"#,
    );

    write_stub(
        bin_dir,
        "killMS.py",
        r#"#!/bin/sh
echo "killMS.py $@" >> stage_invocations.log
ms=""
sols=""
for a in "$@"; do
    case "$a" in
        --MSName=*) ms="${a#--MSName=}";;
        --OutSolsName=*) sols="${a#--OutSolsName=}";;
    esac
done
touch "$ms/killMS.$sols.sols.npz"
"#,
    );

    // Not stages: these always run and aren't counted.
    write_stub(bin_dir, "CleanSHM.py", "#!/bin/sh\nexit 0\n");
    write_stub(bin_dir, "CheckImagingWeights.py", "#!/bin/sh\nexit 0\n");

    format!(
        "{}:{}",
        bin_dir.display(),
        std::env::var("PATH").unwrap_or_default()
    )
}

fn write_stub(bin_dir: &Path, name: &str, contents: &str) {
    use std::os::unix::fs::PermissionsExt;

    let path = bin_dir.join(name);
    std::fs::write(&path, contents).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
}

/// The stage-tool invocations recorded so far, one per line, in order.
fn recorded_invocations(work_dir: &Path) -> Vec<String> {
    match std::fs::read_to_string(work_dir.join("stage_invocations.log")) {
        Ok(contents) => contents.lines().map(|line| line.to_string()).collect(),
        Err(_) => vec![],
    }
}

fn count_invocations(invocations: &[String], program: &str) -> usize {
    invocations
        .iter()
        .filter(|line| line.starts_with(program))
        .count()
}

struct PipelineDir {
    work: tempfile::TempDir,
    path_env: String,
}

/// A working directory with stub tools, a template image, and a
/// measurement-set list naming `ms_names` (created as directories).
fn setup_pipeline_dir(ms_names: &[&str]) -> PipelineDir {
    let work = tempfile::TempDir::new().unwrap();
    let path_env = install_stub_tools(&work.path().join("stub-bin"));
    write_template_fits(&work.path().join("template.fits"));

    let mut mslist = String::new();
    for ms in ms_names {
        std::fs::create_dir(work.path().join(ms)).unwrap();
        mslist.push_str(ms);
        mslist.push('\n');
    }
    std::fs::write(work.path().join("mslist.txt"), mslist).unwrap();

    PipelineDir { work, path_env }
}

impl PipelineDir {
    fn run_selfcal(&self, extra_args: &[&str]) -> Result<Output, OutputError> {
        selfcal()
            .current_dir(self.work.path())
            .env("PATH", &self.path_env)
            .args(["run", "--mslist", "mslist.txt"])
            .args(extra_args)
            .ok()
    }

    fn path(&self) -> &Path {
        self.work.path()
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.work.path().join(name)
    }
}
