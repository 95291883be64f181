use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::info;

use crate::{config::Config, error::LoadError, metrics_consts::RAW_DATA_DOWNLOADS};

fn unavailable(context: &str, e: impl std::fmt::Display) -> LoadError {
    LoadError::SourceUnavailable(format!("{context}: {e}"))
}

/// Makes sure the year file and both reference files are present in the raw data
/// directory, downloading the year file if needed. Returns the year file's path.
pub async fn fetch_raw_data(config: &Config) -> Result<PathBuf, LoadError> {
    let target = config.year_file();

    if target.exists() {
        info!("raw data already present at {}", target.display());
    } else if !config.download_raw_data {
        return Err(LoadError::SourceUnavailable(format!(
            "{} is missing and downloads are disabled",
            target.display()
        )));
    } else {
        download(&config.source_url(), Path::new(&config.raw_data_dir), &target).await?;
    }

    for reference in [config.carriers_file(), config.airports_file()] {
        if !reference.exists() {
            return Err(LoadError::SourceUnavailable(format!(
                "reference file {} is missing",
                reference.display()
            )));
        }
    }

    Ok(target)
}

async fn download(url: &str, dir: &Path, target: &Path) -> Result<(), LoadError> {
    info!("downloading {url} to {}", target.display());
    fs::create_dir_all(dir).map_err(|e| unavailable(&dir.display().to_string(), e))?;

    let mut response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| unavailable(url, e))?;

    // Written next to the target and only renamed once complete, so an interrupted
    // download never looks like a finished one
    let mut file = NamedTempFile::new_in(dir).map_err(|e| unavailable("temp file", e))?;
    let mut bytes = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(|e| unavailable(url, e))? {
        file.write_all(&chunk)
            .map_err(|e| unavailable("temp file", e))?;
        bytes += chunk.len() as u64;
    }
    file.flush().map_err(|e| unavailable("temp file", e))?;
    file.persist(target)
        .map_err(|e| unavailable(&target.display().to_string(), e.error))?;

    metrics::counter!(RAW_DATA_DOWNLOADS).increment(1);
    info!("downloaded {bytes} bytes to {}", target.display());
    Ok(())
}
