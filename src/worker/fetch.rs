//! Tarball download and extraction

use crate::worker::workdir::{is_dir, WorkDir};
use crate::worker::BuildError;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tar::Archive;
use tracing::debug;

/// Download `url` to the work directory's tarball path.
///
/// The whole transfer (connect, body, write) must finish within `timeout`.
pub async fn download(url: &str, workdir: &WorkDir, timeout: Duration) -> Result<u64, BuildError> {
    let dest = workdir.tarball();
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();

    let task_url = url.to_string();
    let transfer = tokio::task::spawn_blocking(move || -> Result<u64, String> {
        let mut response = agent.get(&task_url).call().map_err(|e| e.to_string())?;
        let mut reader = response.body_mut().as_reader();

        let file = File::create(&dest).map_err(|e| format!("creating {}: {}", dest.display(), e))?;
        let mut writer = BufWriter::new(file);
        let written = std::io::copy(&mut reader, &mut writer).map_err(|e| e.to_string())?;
        writer.flush().map_err(|e| e.to_string())?;
        Ok(written)
    });

    match tokio::time::timeout(timeout, transfer).await {
        Ok(Ok(Ok(bytes))) => {
            debug!("Downloaded {} bytes from {}", bytes, url);
            Ok(bytes)
        }
        Ok(Ok(Err(reason))) => Err(BuildError::Download {
            url: url.to_string(),
            reason,
        }),
        Ok(Err(join)) => Err(BuildError::Download {
            url: url.to_string(),
            reason: join.to_string(),
        }),
        Err(_elapsed) => Err(BuildError::DownloadTimeout {
            url: url.to_string(),
            secs: timeout.as_secs(),
        }),
    }
}

/// Extract the downloaded tarball into the work directory.
///
/// Registry tarballs normally unpack to `package/`; an archive with a
/// different single top-level directory is renamed to `package/`.
pub async fn extract(workdir: &WorkDir) -> Result<(), BuildError> {
    let tarball = workdir.tarball();
    let root = workdir.root().to_path_buf();

    let unpacked = tokio::task::spawn_blocking(move || unpack_tar_gz(&tarball, &root))
        .await
        .map_err(|e| BuildError::Extract {
            path: workdir.tarball(),
            source: std::io::Error::other(e.to_string()),
        })?;
    unpacked.map_err(|e| BuildError::Extract {
        path: workdir.tarball(),
        source: e,
    })?;

    if !is_dir(&workdir.package_dir()).await {
        normalize_package_root(workdir).await?;
    }
    Ok(())
}

fn unpack_tar_gz(archive_path: &Path, dest: &Path) -> std::io::Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(false);
    // `unpack` refuses entries that would land outside `dest`
    archive.unpack(dest)
}

async fn normalize_package_root(workdir: &WorkDir) -> Result<(), BuildError> {
    let mut dirs = Vec::new();
    let mut entries = tokio::fs::read_dir(workdir.root())
        .await
        .map_err(|e| BuildError::Extract {
            path: workdir.root().to_path_buf(),
            source: e,
        })?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if is_dir(&entry.path()).await {
            dirs.push(entry.path());
        }
    }

    match dirs.as_slice() {
        [only] => tokio::fs::rename(only, workdir.package_dir())
            .await
            .map_err(|e| BuildError::Extract {
                path: only.clone(),
                source: e,
            }),
        _ => Err(BuildError::Extract {
            path: workdir.tarball(),
            source: std::io::Error::other("archive has no single package directory"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_bytes, serve_stalled, tarball_bytes};
    use tempfile::TempDir;

    fn write_tarball(path: &Path, root: &str, files: &[(&str, &str)]) {
        std::fs::write(path, tarball_bytes(root, files)).unwrap();
    }

    #[tokio::test]
    async fn extracts_registry_layout() {
        let temp = TempDir::new().unwrap();
        let workdir = WorkDir::for_hash(temp.path(), "ab").unwrap();
        workdir.ensure().await.unwrap();
        write_tarball(
            &workdir.tarball(),
            "package",
            &[("package.json", r#"{"name":"tiny"}"#), ("index.js", "module.exports = 1;")],
        );

        extract(&workdir).await.unwrap();

        assert!(workdir.manifest().is_file());
        assert!(workdir.package_dir().join("index.js").is_file());
    }

    #[tokio::test]
    async fn renames_nonstandard_root() {
        let temp = TempDir::new().unwrap();
        let workdir = WorkDir::for_hash(temp.path(), "ab").unwrap();
        workdir.ensure().await.unwrap();
        write_tarball(&workdir.tarball(), "tiny-1.0.0", &[("package.json", "{}")]);

        extract(&workdir).await.unwrap();

        assert!(workdir.manifest().is_file());
    }

    #[tokio::test]
    async fn corrupt_archive_fails() {
        let temp = TempDir::new().unwrap();
        let workdir = WorkDir::for_hash(temp.path(), "ab").unwrap();
        workdir.ensure().await.unwrap();
        std::fs::write(workdir.tarball(), b"definitely not gzip").unwrap();

        let err = extract(&workdir).await.unwrap_err();
        assert!(matches!(err, BuildError::Extract { .. }));
    }

    #[tokio::test]
    async fn unreachable_host_fails_download() {
        let temp = TempDir::new().unwrap();
        let workdir = WorkDir::for_hash(temp.path(), "ab").unwrap();
        workdir.ensure().await.unwrap();

        let err = download(
            "http://127.0.0.1:9/tiny-1.0.0.tgz",
            &workdir,
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Download { .. } | BuildError::DownloadTimeout { .. }
        ));
    }

    #[tokio::test]
    async fn downloads_and_extracts_served_tarball() {
        let temp = TempDir::new().unwrap();
        let workdir = WorkDir::for_hash(temp.path(), "ab").unwrap();
        workdir.ensure().await.unwrap();
        let body = tarball_bytes(
            "package",
            &[("package.json", r#"{"name":"tiny","main":"index.js"}"#), ("index.js", "1;")],
        );
        let size = body.len() as u64;
        let base = serve_bytes(body);

        let written = download(
            &format!("{base}/tiny/-/tiny-1.0.0.tgz"),
            &workdir,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        extract(&workdir).await.unwrap();

        assert_eq!(written, size);
        assert!(workdir.manifest().is_file());
        assert_eq!(
            std::fs::read_to_string(workdir.package_dir().join("index.js")).unwrap(),
            "1;"
        );
    }

    #[tokio::test]
    async fn stalled_transfer_times_out() {
        let temp = TempDir::new().unwrap();
        let workdir = WorkDir::for_hash(temp.path(), "ab").unwrap();
        workdir.ensure().await.unwrap();
        let base = serve_stalled();

        let started = std::time::Instant::now();
        let err = download(
            &format!("{base}/tiny/-/tiny-1.0.0.tgz"),
            &workdir,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(err.reason(), "fetch failed");
    }
}
