//! Turning outcomes into deliverable responses
//!
//! A bundled script is served as JavaScript with an etag. A failure is
//! either a JSON error body (status 500) or, when the caller opted in, a
//! substitute script that throws the failure reason when it is loaded.

use crate::broker::Fetched;
use crate::error::BrokerResult;
use crate::outcome::{BuildOutcome, ScriptSource};
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const JAVASCRIPT: &str = "text/javascript";
const JSON: &str = "application/json";
const IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Headers for a script body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHeaders {
    pub etag: String,
    pub content_type: &'static str,
    pub content_length: usize,
    pub cache_control: Option<&'static str>,
}

impl ScriptHeaders {
    /// `cached` scripts are content-addressed and never change
    pub fn for_script(script: &str, cached: bool) -> Self {
        Self {
            etag: etag(script),
            content_type: JAVASCRIPT,
            content_length: script.len(),
            cache_control: cached.then_some(IMMUTABLE),
        }
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("etag", self.etag.clone()),
            ("content-type", self.content_type.to_string()),
            ("content-length", self.content_length.to_string()),
        ];
        if let Some(cache_control) = self.cache_control {
            pairs.push(("cache-control", cache_control.to_string()));
        }
        pairs
    }
}

/// Strong etag: body length and a SHA-256 prefix
fn etag(body: &str) -> String {
    let digest = hex::encode(Sha256::digest(body.as_bytes()));
    format!("\"{:x}-{}\"", body.len(), &digest[..27])
}

/// JSON body of a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: bool,
    pub message: String,
    pub data: Vec<String>,
}

impl ErrorBody {
    pub fn new(reason: &str, detail: &[String]) -> Self {
        Self {
            error: true,
            message: reason.to_string(),
            data: detail.to_vec(),
        }
    }
}

/// A fully rendered response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Rendered {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Render a served request
pub fn render(fetched: &Fetched, substitute_on_fail: bool) -> BrokerResult<Rendered> {
    match fetched.outcome {
        BuildOutcome::Bundled { ref script, source } => {
            let cached = source == ScriptSource::Cache;
            let body = annotate(script, cached);
            Ok(Rendered {
                status: 200,
                headers: ScriptHeaders::for_script(&body, cached).to_pairs(),
                body,
            })
        }
        BuildOutcome::Failed { ref reason, .. } if substitute_on_fail => {
            let body = failure_script(reason, fetched.request.tag());
            Ok(Rendered {
                status: 200,
                headers: ScriptHeaders::for_script(&body, false).to_pairs(),
                body,
            })
        }
        BuildOutcome::Failed {
            ref reason,
            ref detail,
        } => {
            let body = serde_json::to_string(&ErrorBody::new(reason, detail))?;
            Ok(Rendered {
                status: 500,
                headers: vec![
                    ("content-type", JSON.to_string()),
                    ("content-length", body.len().to_string()),
                ],
                body,
            })
        }
    }
}

/// Script that reports the failure in the browser console and throws
pub fn failure_script(reason: &str, tag: &str) -> String {
    format!(
        r#"/**
 * Script loading failed
 * Reason: {comment_reason}
 * Server version: {version}
 * Generated on {date} after bundling encountered an error
 */
(() => {{
  console.error('[{name}] Running server version {version}');
  console.error('[{name}] An error occurred while bundling {package}');
  throw new Error('[{name}]: {reason}');
}})();
"#,
        comment_reason = comment_safe(reason),
        version = SERVER_VERSION,
        date = Local::now().format("%a %b %d %Y"),
        name = SERVER_NAME,
        package = js_string(tag),
        reason = js_string(reason),
    )
}

/// Prefix a script with a banner describing where it came from
pub fn annotate(script: &str, cached: bool) -> String {
    format!(
        "/**\n * Generated with {} {}\n * on {}\n * cached script: {}\n * size: {}\n */\n{}\n",
        SERVER_NAME,
        SERVER_VERSION,
        Local::now().format("%a %b %d %Y"),
        cached,
        script.len(),
        script
    )
}

/// Escape for a single-quoted JavaScript string literal
fn js_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\x3c"),
            c => out.push(c),
        }
    }
    out
}

fn comment_safe(raw: &str) -> String {
    raw.replace("*/", "* /").replace('\n', " ")
}
