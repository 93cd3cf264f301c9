//! CLI argument definitions using clap derive

use crate::worker::WorkerSettings;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// bundle-broker - browser bundles for npm packages, on demand
///
/// Resolves a package version against the registry, builds it in an
/// isolated worker process and caches the resulting script.
#[derive(Parser, Debug)]
#[command(name = "bundle-broker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BUNDLE_BROKER_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (or fetch from cache) browser bundles for packages
    Bundle(BundleArgs),

    /// Inspect the script cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Remove stale work directories left by killed workers
    Clean,

    /// Run a build worker (spawned by the coordinator)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the bundle command
#[derive(Parser, Debug)]
pub struct BundleArgs {
    /// Packages as [@scope/]name[@version], e.g. lodash@4.17.21
    #[arg(required = true)]
    pub packages: Vec<String>,

    /// Write each script to <out-dir>/<name>@<version>.js instead of stdout
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,

    /// Emit a substitute script that throws, instead of an error, on failure
    #[arg(long, conflicts_with = "no_substitute")]
    pub substitute: bool,

    /// Report failures as JSON errors even if substitution is configured
    #[arg(long)]
    pub no_substitute: bool,

    /// Print response metadata (status, headers) as JSON instead of bodies
    #[arg(long)]
    pub json: bool,
}

impl BundleArgs {
    /// Flag override of `output.substitute_on_fail`
    pub fn substitute_on_fail(&self, configured: bool) -> bool {
        if self.substitute {
            true
        } else if self.no_substitute {
            false
        } else {
            configured
        }
    }
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache actions
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show tier configuration and record counts
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the cached script for a hash
    Get {
        /// Content hash (hex SHA-1 of the package tag)
        hash: String,
    },

    /// Print the content hash for a package tag
    Hash {
        /// Package as [@scope/]name@version
        package: String,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the hidden worker command
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Directory holding per-build work directories
    #[arg(long)]
    pub work_root: PathBuf,

    /// Tarball download timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub tarball_timeout_secs: u64,

    /// Package manager program
    #[arg(long, default_value = "npm")]
    pub package_manager: String,

    /// Argument passed to the package manager (repeatable)
    #[arg(long = "install-arg", allow_hyphen_values = true)]
    pub install_args: Vec<String>,

    /// Bundler program
    #[arg(long, default_value = "esbuild")]
    pub bundler: String,

    /// Do not forward progress lines to the coordinator
    #[arg(long)]
    pub no_logs: bool,
}

impl From<WorkerArgs> for WorkerSettings {
    fn from(args: WorkerArgs) -> Self {
        Self {
            work_root: args.work_root,
            tarball_timeout: Duration::from_secs(args.tarball_timeout_secs),
            package_manager: args.package_manager,
            install_args: args.install_args,
            bundler: args.bundler,
            forward_logs: !args.no_logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn worker_args_round_trip_settings() {
        let settings = WorkerSettings {
            work_root: PathBuf::from("/tmp/work"),
            tarball_timeout: Duration::from_secs(7),
            package_manager: "pnpm".to_string(),
            install_args: vec!["install".to_string(), "--ignore-scripts".to_string()],
            bundler: "/opt/esbuild".to_string(),
            forward_logs: false,
        };

        let argv = std::iter::once("bundle-broker".to_string()).chain(settings.to_args());
        let cli = Cli::try_parse_from(argv).unwrap();

        let Commands::Worker(args) = cli.command else {
            panic!("expected worker command");
        };
        assert_eq!(WorkerSettings::from(args), settings);
    }

    #[test]
    fn substitute_flags_override_config() {
        let cli = Cli::try_parse_from(["bundle-broker", "bundle", "lodash", "--no-substitute"]).unwrap();
        let Commands::Bundle(args) = cli.command else {
            panic!("expected bundle command");
        };
        assert!(!args.substitute_on_fail(true));

        let cli = Cli::try_parse_from(["bundle-broker", "bundle", "lodash"]).unwrap();
        let Commands::Bundle(args) = cli.command else {
            panic!("expected bundle command");
        };
        assert!(args.substitute_on_fail(true));
        assert!(!args.substitute_on_fail(false));
    }

    #[test]
    fn bundle_requires_a_package() {
        assert!(Cli::try_parse_from(["bundle-broker", "bundle"]).is_err());
    }
}
