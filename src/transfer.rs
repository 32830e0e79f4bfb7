use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{debug, info};

use crate::api::Download;
use crate::domain::RegError;

/// Columns the import endpoint reads without a fallback.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "first_name",
    "last_name",
    "email",
    "phone_number",
    "id_document_number",
];

#[derive(Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub file_size: u64,
}

/// Expands `~` and environment variables in a user supplied path.
pub fn expand_path(raw: &str) -> Result<PathBuf, RegError> {
    let expanded = shellexpand::full(raw.trim())
        .map_err(|e| RegError::LoadingFailed(format!("can not expand {raw}: {e}")))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn ensure_csv(path: &Path) -> Result<(), RegError> {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
        .as_deref()
    {
        Some("CSV") => Ok(()),
        _ => Err(RegError::UnknownFileType),
    }
}

pub fn get_file_info(path: PathBuf) -> Result<FileInfo, RegError> {
    let metadata = fs::metadata(&path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => RegError::FileNotFound(path.clone()),
        ErrorKind::PermissionDenied => RegError::PermissionDenied(path.clone()),
        _ => RegError::Io(e),
    })?;
    if !metadata.is_file() {
        return Err(RegError::LoadingFailed(format!(
            "{} is not a file",
            path.display()
        )));
    }
    Ok(FileInfo {
        path,
        file_size: metadata.len(),
    })
}

fn load_csv(path: &Path) -> Result<LazyFrame, PolarsError> {
    LazyCsvReader::new(PlPath::Local(path.into()))
        .with_has_header(true)
        .finish()
}

/// Checks an import file before it is uploaded: it must exist, be a CSV file
/// and carry every required column.
pub fn preflight(path: PathBuf) -> Result<ImportSummary, RegError> {
    let info = get_file_info(path)?;
    ensure_csv(&info.path)?;

    let df = load_csv(&info.path)?.collect()?;
    let present: Vec<&str> = df.get_column_names().iter().map(|n| n.as_str()).collect();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !present.contains(*c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(RegError::MissingColumns(missing));
    }

    debug!(
        "Import file {} has {} rows, columns {present:?}",
        info.path.display(),
        df.height()
    );
    Ok(ImportSummary {
        rows: df.height(),
        file_size: info.file_size,
        path: info.path,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), RegError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => RegError::PermissionDenied(path.to_path_buf()),
        _ => RegError::Io(e),
    })
}

pub fn write_export(path: &Path, bytes: &[u8]) -> Result<PathBuf, RegError> {
    write_file(path, bytes)?;
    info!("Exported {} bytes to {}", bytes.len(), path.display());
    Ok(path.to_path_buf())
}

/// Stores a downloaded document in `dir` under its server filename.
pub fn write_download(dir: &Path, download: &Download) -> Result<PathBuf, RegError> {
    let target = dir.join(&download.filename);
    write_file(&target, &download.bytes)?;
    info!("Saved document to {}", target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn preflight_accepts_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = csv_file(
            &dir,
            "members.csv",
            "first_name,last_name,email,phone_number,id_document_number,circle\n\
             Anna,Kowalska,anna@example.org,600100200,90010112345,Kraków\n\
             Jan,Nowak,jan@example.org,600100201,85050554321,Gdańsk\n",
        );
        let summary = preflight(path.clone()).unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.path, path);
    }

    #[test]
    fn preflight_lists_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = csv_file(&dir, "members.csv", "first_name,last_name,email\nAnna,Kowalska,a@b.pl\n");
        match preflight(path) {
            Err(RegError::MissingColumns(missing)) => {
                assert_eq!(missing, vec!["phone_number", "id_document_number"])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn preflight_rejects_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = csv_file(&dir, "members.xlsx", "x");
        assert!(matches!(preflight(path), Err(RegError::UnknownFileType)));
        assert!(matches!(
            preflight(dir.path().join("missing.csv")),
            Err(RegError::FileNotFound(_))
        ));
        assert!(matches!(
            preflight(dir.path().to_path_buf()),
            Err(RegError::LoadingFailed(_))
        ));
    }

    #[test]
    fn export_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out").join("members.csv");
        let written = write_export(&target, b"first_name\nAnna\n").unwrap();
        assert_eq!(fs::read_to_string(written).unwrap(), "first_name\nAnna\n");
    }

    #[test]
    fn download_lands_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let download = Download {
            filename: "deklaracja.pdf".into(),
            bytes: vec![1, 2, 3],
        };
        let path = write_download(dir.path(), &download).unwrap();
        assert_eq!(path, dir.path().join("deklaracja.pdf"));
        assert_eq!(fs::read(path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn paths_are_expanded() {
        assert_eq!(
            expand_path(" /tmp/members.csv ").unwrap(),
            PathBuf::from("/tmp/members.csv")
        );
        assert!(matches!(
            expand_path("$REGTV_SURELY_UNDEFINED_VARIABLE/members.csv"),
            Err(RegError::LoadingFailed(_))
        ));
    }
}
