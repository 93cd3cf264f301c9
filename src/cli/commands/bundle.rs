//! Bundle command - build packages and emit their scripts

use crate::broker::{Broker, Fetched};
use crate::cli::args::BundleArgs;
use crate::config::Config;
use crate::error::{BrokerError, BrokerResult};
use crate::outcome::{BuildOutcome, ScriptSource};
use crate::package::PackageRequest;
use crate::response::{render, Rendered};
use crate::ui::{BuildProgress, UiContext};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Execute the bundle command
pub async fn execute(args: BundleArgs, config: &Config, verbose: u8) -> BrokerResult<()> {
    let requests = args
        .packages
        .iter()
        .map(|p| PackageRequest::parse(p))
        .collect::<BrokerResult<Vec<_>>>()?;

    if let Some(ref dir) = args.out_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| BrokerError::io(format!("creating {}", dir.display()), e))?;
    }

    let broker = Broker::from_config(config, verbose).await?;
    let substitute = args.substitute_on_fail(config.output.substitute_on_fail);
    let ctx = UiContext::detect();
    let progress = BuildProgress::new(&ctx, requests.len() as u64);

    // One cache, many workers
    let builds = requests.into_iter().map(|request| {
        let broker = &broker;
        let progress = &progress;
        async move {
            progress.started(request.tag());
            let fetched = broker.fetch_package(request).await;
            let (ok, detail) = summary(&fetched.outcome);
            progress.finished(fetched.request.tag(), ok, &detail);
            fetched
        }
    });
    let results = join_all(builds).await;
    progress.finish();

    let mut failed = 0;
    for fetched in &results {
        if !fetched.outcome.is_bundled() {
            failed += 1;
        }
        let rendered = render(fetched, substitute)?;
        emit(&args, fetched, &rendered).await?;
    }

    if failed > 0 {
        return Err(BrokerError::User(format!(
            "{} of {} package(s) failed to bundle",
            failed,
            results.len()
        )));
    }
    Ok(())
}

fn summary(outcome: &BuildOutcome) -> (bool, String) {
    match outcome {
        BuildOutcome::Bundled { script, source } => {
            let origin = match source {
                ScriptSource::Cache => "cached",
                ScriptSource::Build => "built",
            };
            (true, format!("{}, {} bytes", origin, script.len()))
        }
        BuildOutcome::Failed { reason, .. } => (false, reason.clone()),
    }
}

#[derive(Debug, Serialize)]
struct ResponseMeta<'a> {
    package: &'a str,
    hash: &'a str,
    status: u16,
    headers: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
}

async fn emit(args: &BundleArgs, fetched: &Fetched, rendered: &Rendered) -> BrokerResult<()> {
    let file = match args.out_dir {
        Some(ref dir) => {
            let path = output_path(dir, fetched.request.tag(), rendered);
            tokio::fs::write(&path, &rendered.body)
                .await
                .map_err(|e| BrokerError::io(format!("writing {}", path.display()), e))?;
            debug!("Wrote {}", path.display());
            Some(path)
        }
        None => None,
    };

    if args.json {
        let meta = ResponseMeta {
            package: fetched.request.tag(),
            hash: fetched.request.hash(),
            status: rendered.status,
            headers: rendered.headers.iter().map(|(k, v)| (*k, v.as_str())).collect(),
            reason: fetched.outcome.reason(),
            file: file.map(|p| p.display().to_string()),
        };
        println!("{}", serde_json::to_string(&meta)?);
    } else if file.is_none() {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(rendered.body.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|e| BrokerError::io("writing script to stdout", e))?;
    }
    Ok(())
}

/// `<dir>/<tag>.js`, with `/` of scoped names flattened; JSON errors get `.error.json`
fn output_path(dir: &Path, tag: &str, rendered: &Rendered) -> PathBuf {
    let stem = tag.replace('/', "__");
    let is_json = rendered
        .headers
        .iter()
        .any(|(k, v)| *k == "content-type" && v == "application/json");
    if is_json {
        dir.join(format!("{stem}.error.json"))
    } else {
        dir.join(format!("{stem}.js"))
    }
}
