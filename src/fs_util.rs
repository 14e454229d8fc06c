use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::KiraError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| KiraError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| KiraError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(KiraError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn validate_zip(zip_path: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| KiraError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| KiraError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn flatten_into(source: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, KiraError> {
    fs::create_dir_all(target_dir).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut written = Vec::new();
    let mut stack = vec![source.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = target_dir.join(name);
            if fs::rename(&path, &target).is_err() {
                fs::copy(&path, &target).map_err(|err| KiraError::Filesystem(err.to_string()))?;
            }
            written.push(target);
        }
    }
    written.sort();
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    #[test]
    fn extracts_and_flattens_nested_bundle() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("scan.zip");
        {
            let file = fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = SimpleFileOptions::default();
            writer
                .start_file("20180504/scans/4-func/resources/DICOM/files/a.dcm", options)
                .unwrap();
            writer.write_all(b"dicom a").unwrap();
            writer
                .start_file("20180504/scans/4-func/resources/DICOM/files/b.dcm", options)
                .unwrap();
            writer.write_all(b"dicom b").unwrap();
            writer.finish().unwrap();
        }

        validate_zip(&zip_path).unwrap();
        let extract_dir = temp.path().join("extract");
        extract_zip(&zip_path, &extract_dir).unwrap();
        let staged = temp.path().join("staged");
        let written = flatten_into(&extract_dir, &staged).unwrap();

        assert_eq!(written, vec![staged.join("a.dcm"), staged.join("b.dcm")]);
        assert_eq!(fs::read(staged.join("b.dcm")).unwrap(), b"dicom b");
    }
}
