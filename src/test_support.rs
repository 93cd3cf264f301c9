//! Fixtures shared by unit tests

use serde_json::Value;
use std::path::{Path, PathBuf};

/// Write an executable `sh` script named `name` into `dir`
#[cfg(unix)]
pub fn write_executable(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Copies the entry file (`$1`) to `--outfile`
#[cfg(unix)]
const COPY_ENTRY: &str = r#"for arg in "$@"; do case "$arg" in --outfile=*) out="${arg#--outfile=}";; esac; done
cat "$1" > "$out""#;

/// Bundler stand-in that copies the entry file to `--outfile`
#[cfg(unix)]
pub fn stub_bundler(dir: &Path) -> PathBuf {
    write_executable(dir, "stub-esbuild", COPY_ENTRY)
}

/// Like [`stub_bundler`], but takes a second first
#[cfg(unix)]
pub fn slow_bundler(dir: &Path) -> PathBuf {
    write_executable(dir, "slow-esbuild", &format!("sleep 1\n{COPY_ENTRY}"))
}

/// Lay out an extracted package under `<work_root>/<hash>/package`
pub fn prewarm(work_root: &Path, hash: &str, manifest: Value, files: &[(&str, &str)]) -> PathBuf {
    let package_dir = work_root.join(hash).join("package");
    std::fs::create_dir_all(&package_dir).unwrap();
    std::fs::write(
        package_dir.join("package.json"),
        serde_json::to_string(&manifest).unwrap(),
    )
    .unwrap();
    for (name, content) in files {
        let path = package_dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    package_dir
}

/// Gzip tar archive holding `files` under the top-level directory `root`
pub fn tarball_bytes(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{root}/{name}"), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn read_request_head(stream: &mut std::net::TcpStream) {
    use std::io::Read;

    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
}

/// Local HTTP server answering every request with `body`; returns its base URL
pub fn serve_bytes(body: Vec<u8>) -> String {
    use std::io::Write;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            read_request_head(&mut stream);
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        }
    });
    format!("http://{addr}")
}

/// Local HTTP server that sends headers and a few body bytes, then stalls
pub fn serve_stalled() -> String {
    use std::io::Write;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            std::thread::spawn(move || {
                read_request_head(&mut stream);
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\nConnection: close\r\n\r\n\x1f\x8b",
                );
                let _ = stream.flush();
                std::thread::sleep(std::time::Duration::from_secs(30));
            });
        }
    });
    format!("http://{addr}")
}
