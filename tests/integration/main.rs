//! Integration tests for bundle-broker

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn broker() -> Command {
        cargo_bin_cmd!("bundle-broker")
    }

    #[test]
    fn help_displays() {
        broker()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("browser bundles"));
    }

    #[test]
    fn version_displays() {
        broker()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("bundle-broker"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        broker()
            .arg("--config")
            .arg(&path)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();
        broker()
            .arg("--config")
            .arg(dir.path().join("config.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[worker]"))
            .stdout(predicate::str::contains("deadline_secs = 35"));
    }

    #[test]
    fn config_init_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        broker()
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(path.exists());

        broker()
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn cache_hash_prints_sha1() {
        broker()
            .args(["cache", "hash", "lodash@4.17.21"])
            .assert()
            .success()
            .stdout(predicate::str::is_match("^[0-9a-f]{40}  lodash@4.17.21\n$").unwrap());
    }

    #[test]
    fn cache_hash_rejects_bad_package() {
        broker().args(["cache", "hash", "@/"]).assert().failure();
    }

    #[test]
    fn bundle_requires_package() {
        broker()
            .arg("bundle")
            .assert()
            .failure()
            .stderr(predicate::str::contains("required"));
    }

    #[test]
    fn worker_is_hidden() {
        broker()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"(?m)^\s+worker\s").unwrap().not());
    }
}

#[cfg(unix)]
mod end_to_end {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use bundle_broker::config::Config;
    use bundle_broker::package::content_hash;
    use predicates::prelude::*;
    use serde_json::{json, Value};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Gzip tarball of `tiny@1.0.0` in the registry's `package/` layout
    fn tiny_tarball() -> Vec<u8> {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::fast(),
        ));
        let files = [
            ("package/package.json", r#"{"name":"tiny","version":"1.0.0","main":"index.js"}"#),
            ("package/index.js", "export const tiny = 'downloaded';\n"),
        ];
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Registry that knows one package, `tiny`, at 1.0.0, and serves its tarball
    fn serve_registry() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let document = json!({
            "name": "tiny",
            "versions": {
                "1.0.0": {"dist": {"tarball": format!("http://{addr}/tiny/-/tiny-1.0.0.tgz")}}
            },
            "dist-tags": {"latest": "1.0.0"}
        })
        .to_string()
        .into_bytes();
        let tarball = tiny_tarball();

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&request);
                let (status, content_type, body): (_, _, &[u8]) = if head.starts_with("GET /tiny ") {
                    ("200 OK", "application/json", document.as_slice())
                } else if head.starts_with("GET /tiny/-/tiny-1.0.0.tgz ") {
                    ("200 OK", "application/octet-stream", tarball.as_slice())
                } else {
                    ("404 Not Found", "application/json", b"{}".as_slice())
                };
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(body);
            }
        });

        format!("http://{addr}")
    }

    fn write_executable(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct Fixture {
        dir: TempDir,
        config_path: PathBuf,
    }

    impl Fixture {
        fn new(package_manager: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let bundler = write_executable(
                dir.path(),
                "stub-esbuild",
                r#"for arg in "$@"; do case "$arg" in --outfile=*) out="${arg#--outfile=}";; esac; done
cat "$1" > "$out""#,
            );

            let mut config = Config::default();
            config.registry.url = serve_registry();
            config.registry.timeout_secs = 5;
            config.worker.work_root = dir.path().join("work");
            config.worker.bundler = bundler.display().to_string();
            config.worker.package_manager = package_manager.to_string();
            config.worker.install_args = Vec::new();
            config.worker.tarball_timeout_secs = 2;
            config.cache.database.enabled = true;
            config.cache.database.path = dir.path().join("scripts");

            let config_path = dir.path().join("config.toml");
            std::fs::write(&config_path, toml::to_string_pretty(&config).unwrap()).unwrap();
            Self { dir, config_path }
        }

        fn work_root(&self) -> PathBuf {
            self.dir.path().join("work")
        }

        /// Extracted `tiny@1.0.0`, so no tarball is downloaded
        fn prewarm_tiny(&self, manifest: Value) -> PathBuf {
            let package_dir = self
                .work_root()
                .join(content_hash("tiny@1.0.0"))
                .join("package");
            std::fs::create_dir_all(package_dir.join("node_modules")).unwrap();
            std::fs::write(package_dir.join("package.json"), manifest.to_string()).unwrap();
            std::fs::write(package_dir.join("index.js"), "export const tiny = 42;\n").unwrap();
            package_dir
        }

        fn command(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("bundle-broker");
            cmd.arg("--config").arg(&self.config_path).env_remove("RUST_LOG");
            cmd
        }
    }

    #[test]
    fn bundle_builds_then_serves_from_cache() {
        let fixture = Fixture::new("true");
        let package_dir = fixture.prewarm_tiny(json!({"name": "tiny", "main": "index.js"}));

        fixture
            .command()
            .args(["bundle", "tiny"])
            .assert()
            .success()
            .stdout(predicate::str::contains("export const tiny = 42;"));
        assert!(!package_dir.exists());

        // Durable tier survives the process; the workdir is gone, so this must be a hit
        fixture
            .command()
            .args(["bundle", "--json", "tiny@1.0.0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\":200"))
            .stdout(predicate::str::contains("immutable"));

        fixture
            .command()
            .args(["cache", "get", &content_hash("tiny@1.0.0")])
            .assert()
            .success()
            .stdout(predicate::str::contains("export const tiny = 42;"));
    }

    #[test]
    fn bundle_downloads_and_extracts_tarball() {
        let fixture = Fixture::new("true");

        fixture
            .command()
            .args(["bundle", "tiny@1.0.0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("export const tiny = 'downloaded';"));
        assert!(!fixture.work_root().join(content_hash("tiny@1.0.0")).exists());
    }

    #[test]
    fn identical_requests_both_build() {
        let fixture = Fixture::new("true");
        fixture.prewarm_tiny(json!({"name": "tiny", "main": "index.js"}));

        // One build takes the pre-warmed package, the other downloads
        fixture
            .command()
            .args(["bundle", "--json", "tiny@1.0.0", "tiny@1.0.0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\":200"))
            .stdout(predicate::str::contains("\"status\":500").not());
        assert!(!fixture.work_root().join(content_hash("tiny@1.0.0")).exists());
    }

    #[test]
    fn install_failure_substitutes_script() {
        let fixture = Fixture::new("false");
        let package_dir = fixture.prewarm_tiny(json!({
            "name": "tiny",
            "main": "index.js",
            "dependencies": {"left-pad": "^1.3.0"}
        }));

        fixture
            .command()
            .args(["bundle", "tiny@1.0.0"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("throw new Error('[bundle-broker]: install failed')"))
            .stderr(predicate::str::contains("1 of 1 package(s) failed"));
        assert!(!package_dir.exists());

        fixture
            .command()
            .args(["cache", "get", &content_hash("tiny@1.0.0")])
            .assert()
            .failure();
    }

    #[test]
    fn missing_entry_point_reports_json() {
        let fixture = Fixture::new("true");
        fixture.prewarm_tiny(json!({"name": "tiny"}));

        fixture
            .command()
            .args(["bundle", "--no-substitute", "--json", "tiny"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("\"status\":500"))
            .stdout(predicate::str::contains("\"reason\":\"no entry point\""));
    }

    #[test]
    fn unknown_version_and_package() {
        let fixture = Fixture::new("true");

        fixture
            .command()
            .args(["bundle", "--no-substitute", "--json", "tiny@9.9.9", "nope"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("\"reason\":\"invalid version\""))
            .stdout(predicate::str::contains("\"reason\":\"package not found\""))
            .stderr(predicate::str::contains("2 of 2 package(s) failed"));
    }

    #[test]
    fn out_dir_receives_scripts() {
        let fixture = Fixture::new("true");
        fixture.prewarm_tiny(json!({"name": "tiny", "module": "index.js"}));
        let out = fixture.dir.path().join("out");

        fixture
            .command()
            .args(["bundle", "tiny@1.0.0", "--out-dir"])
            .arg(&out)
            .assert()
            .success();

        let script = std::fs::read_to_string(out.join("tiny@1.0.0.js")).unwrap();
        assert!(script.contains("export const tiny = 42;"));
    }

    #[test]
    fn clean_removes_leftovers() {
        let fixture = Fixture::new("true");
        fixture.prewarm_tiny(json!({"name": "tiny"}));

        fixture
            .command()
            .arg("clean")
            .assert()
            .success()
            .stderr(predicate::str::contains("Removed 1 stale work directory"));
        assert_eq!(std::fs::read_dir(fixture.work_root()).unwrap().count(), 0);
    }

    #[test]
    fn worker_announces_ready_and_exits_on_eof() {
        let dir = TempDir::new().unwrap();
        let output = cargo_bin_cmd!("bundle-broker")
            .args(["worker", "--work-root"])
            .arg(dir.path())
            .write_stdin(Vec::<u8>::new())
            .output()
            .unwrap();

        assert!(output.status.success());
        let stdout = output.stdout;
        assert!(stdout.len() > 4);
        let len = u32::from_be_bytes([stdout[0], stdout[1], stdout[2], stdout[3]]) as usize;
        let frame: Value = serde_json::from_slice(&stdout[4..4 + len]).unwrap();
        assert_eq!(frame["event"], "READY");
    }
}
