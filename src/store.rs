use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{ScanRef, SessionRef, SubjectRef};
use crate::error::KiraError;
use crate::pattern::ScanNameSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationPath {
    pub directory: Utf8PathBuf,
    pub basename: String,
}

impl DestinationPath {
    pub fn stem_path(&self) -> Utf8PathBuf {
        self.directory.join(&self.basename)
    }

    pub fn with_extension(&self, ext: &str) -> Utf8PathBuf {
        self.directory.join(format!("{}.{ext}", self.basename))
    }
}

#[derive(Debug, Clone)]
pub struct Layout {
    root: Utf8PathBuf,
}

impl Layout {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn sourcedata_root(&self) -> Utf8PathBuf {
        self.root.join("sourcedata")
    }

    // <root>/sourcedata/sub-<s>/<session>/scans/<id>-<type>/resources/DICOM/files
    pub fn staging_dir(&self, subject: &SubjectRef, scan: &ScanRef) -> Utf8PathBuf {
        self.sourcedata_root()
            .join(format!("sub-{}", subject.canonical_label))
            .join(scan.source_session.raw_identifier())
            .join("scans")
            .join(scan.staging_dir_name())
            .join("resources")
            .join("DICOM")
            .join("files")
    }

    pub fn destination(
        &self,
        subject: &SubjectRef,
        session: &SessionRef,
        spec: &ScanNameSpec,
    ) -> DestinationPath {
        let mut directory = self.root.join(format!("sub-{}", subject.canonical_label));
        if let Some(label) = &session.canonical_label {
            directory = directory.join(format!("ses-{label}"));
        }
        directory = directory.join(&spec.modality);
        DestinationPath {
            directory,
            basename: spec.file_stem(subject, session),
        }
    }

    pub fn report_path(&self) -> Utf8PathBuf {
        self.sourcedata_root().join("kira-bids-report.json")
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), KiraError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn has_staged_files(dir: &Utf8Path) -> bool {
        if !dir.as_std_path().is_dir() {
            return false;
        }
        let pattern = format!("{}/**/*", glob::Pattern::escape(dir.as_str()));
        match glob::glob(&pattern) {
            Ok(paths) => paths.flatten().any(|path| path.is_file()),
            Err(_) => false,
        }
    }

    pub fn existing_outputs(dest: &DestinationPath, extensions: &[&str]) -> Vec<Utf8PathBuf> {
        extensions
            .iter()
            .map(|ext| dest.with_extension(ext))
            .filter(|path| path.as_std_path().is_file())
            .collect()
    }

    pub fn remove_outputs(paths: &[Utf8PathBuf]) -> Result<(), KiraError> {
        for path in paths {
            fs::remove_file(path.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("kira-bids-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn utf8_path(path: &Path) -> Result<Utf8PathBuf, KiraError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|_| KiraError::Filesystem(format!("non-utf8 path: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RawScan, RawSession};
    use crate::pattern::decompose;

    #[test]
    fn layout_paths() {
        let layout = Layout::new(Utf8PathBuf::from("/data/bids"));
        let subject = SubjectRef::resolve("21", true, None, Some(3)).unwrap();
        let session = SessionRef {
            raw: RawSession::new("20180504"),
            canonical_label: Some("pre".to_string()),
        };
        let spec = decompose("func-bold_task-rest").valid().unwrap();
        let dest = layout.destination(&subject, &session, &spec);
        assert_eq!(dest.directory.as_str(), "/data/bids/sub-021/ses-pre/func");
        assert_eq!(dest.basename, "sub-021_ses-pre_task-rest_bold");

        let scan = ScanRef::new(RawScan::new("4", "func-bold_task-rest"), &session);
        assert!(
            layout
                .staging_dir(&subject, &scan)
                .ends_with(
                    "sourcedata/sub-021/20180504/scans/4-func_bold_task_rest/resources/DICOM/files"
                )
        );
    }

    #[test]
    fn destination_serializes_as_strings() {
        let dest = DestinationPath {
            directory: Utf8PathBuf::from("/data/bids/sub-021/anat"),
            basename: "sub-021_T1w".to_string(),
        };
        let value = serde_json::to_value(&dest).unwrap();
        assert_eq!(value["directory"], "/data/bids/sub-021/anat");
        assert_eq!(dest.stem_path().as_str(), "/data/bids/sub-021/anat/sub-021_T1w");
    }

    #[test]
    fn staged_files_require_a_file() {
        let temp = tempfile::tempdir().unwrap();
        let dir = utf8_path(&temp.path().join("files")).unwrap();
        assert!(!Layout::has_staged_files(&dir));
        Layout::ensure_dir(&dir).unwrap();
        assert!(!Layout::has_staged_files(&dir));
        std::fs::write(dir.join("a.dcm").as_std_path(), b"dicom").unwrap();
        assert!(Layout::has_staged_files(&dir));
    }
}
