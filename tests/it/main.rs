use tempfile::TempDir;

pub mod reference_vs_value;
pub mod single_flight;
pub mod storage_backends;

#[track_caller]
pub fn temporary_directory() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("create temporary directory");
    let path = dir.path().to_path_buf();
    (dir, path)
}
