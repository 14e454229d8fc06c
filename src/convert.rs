use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::KiraError;

pub const NIFTI_EXTENSIONS: [&str; 2] = ["nii.gz", "nii"];

pub trait Converter: Send + Sync {
    fn convert(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        basename: &str,
    ) -> Result<(), KiraError>;

    fn output_extensions(&self) -> &[&'static str] {
        &NIFTI_EXTENSIONS
    }
}

#[derive(Debug, Clone)]
pub struct Dcm2niixConverter {
    dcm2niix: Option<PathBuf>,
    compress: bool,
}

impl Dcm2niixConverter {
    pub fn new() -> Self {
        Self {
            dcm2niix: find_in_path("dcm2niix"),
            compress: true,
        }
    }

    pub fn with_binary(path: PathBuf) -> Self {
        Self {
            dcm2niix: Some(path),
            compress: true,
        }
    }

    pub fn version(&self) -> Option<String> {
        let path = self.dcm2niix.as_ref()?;
        let output = Command::new(path).arg("--version").output().ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!stdout.is_empty()).then_some(stdout)
    }

    fn args(&self, input_dir: &Path, output_dir: &Path, basename: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            output_dir.to_string_lossy().to_string(),
            "-f".to_string(),
            basename.to_string(),
            "-z".to_string(),
            if self.compress { "y" } else { "n" }.to_string(),
            "-b".to_string(),
            "y".to_string(),
            input_dir.to_string_lossy().to_string(),
        ]
    }
}

impl Default for Dcm2niixConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter for Dcm2niixConverter {
    fn convert(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        basename: &str,
    ) -> Result<(), KiraError> {
        let program = self
            .dcm2niix
            .as_ref()
            .ok_or_else(|| KiraError::MissingTool("dcm2niix".to_string()))?;
        let output = Command::new(program)
            .args(self.args(input_dir, output_dir, basename))
            .output()
            .map_err(|err| KiraError::Conversion(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("dcm2niix exited with {}", output.status)
        } else {
            stderr
        };
        Err(KiraError::Conversion(message))
    }

    fn output_extensions(&self) -> &[&'static str] {
        if self.compress {
            &NIFTI_EXTENSIONS[..1]
        } else {
            &NIFTI_EXTENSIONS[1..]
        }
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
