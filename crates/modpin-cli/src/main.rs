//! modpin - pin Go module dependencies with a minimal `go.mod` diff.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod digest;
mod update;

use config::Config;

#[derive(Parser)]
#[command(name = "modpin")]
#[command(version)]
#[command(about = "Update Go module requirements without disturbing the rest of go.mod", long_about = None)]
struct Cli {
    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Path to a modpin.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pin modules at new versions and rewrite go.mod/go.sum
    Update {
        /// Module directory (relative to --repo-root when given)
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Work inside this clean git checkout; it is reset afterwards
        #[arg(long)]
        repo_root: Option<PathBuf>,

        /// Target as module@version (repeatable)
        #[arg(long = "dep", required = true)]
        deps: Vec<String>,

        /// Pin this target module as an indirect requirement (repeatable)
        #[arg(long)]
        indirect: Vec<String>,

        /// Show changes without writing files
        #[arg(long)]
        dry_run: bool,
    },

    /// Find the image tag that carries a manifest digest
    ResolveDigest {
        /// Image name, e.g. "alpine" or "team/app"
        #[arg(long)]
        image: String,

        /// Manifest digest, e.g. "sha256:..."
        #[arg(long)]
        digest: String,

        /// Registry host (defaults to the public registry)
        #[arg(long)]
        registry: Option<String>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = Config::load(cli.config.as_deref())?.with_env(|name| std::env::var(name).ok());

    match cli.command {
        Commands::Update {
            dir,
            repo_root,
            deps,
            indirect,
            dry_run,
        } => {
            let options = update::UpdateOptions {
                dir,
                repo_root,
                targets: deps,
                indirect,
                dry_run,
            };
            let result = update::update_modules(&options, &config)?;
            result.print_summary();
        }

        Commands::ResolveDigest {
            image,
            digest,
            registry,
        } => {
            let options = digest::DigestOptions {
                image,
                digest,
                registry,
            };
            match digest::resolve_digest(&options, &config)? {
                Some(tag) => println!("{tag}"),
                None => println!("No tag found for {}", options.digest),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_update_command() {
        let cli = Cli::try_parse_from([
            "modpin",
            "update",
            "--dir",
            "services/api",
            "--dep",
            "example.com/foo@v1.2.0",
            "--dep",
            "example.com/tool@v0.3.0",
            "--indirect",
            "example.com/tool",
            "--dry-run",
        ])
        .unwrap();

        match cli.command {
            Commands::Update {
                dir,
                repo_root,
                deps,
                indirect,
                dry_run,
            } => {
                assert_eq!(dir, PathBuf::from("services/api"));
                assert!(repo_root.is_none());
                assert_eq!(deps.len(), 2);
                assert_eq!(indirect, vec!["example.com/tool"]);
                assert!(dry_run);
            }
            Commands::ResolveDigest { .. } => panic!("Expected Update command"),
        }
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn update_requires_a_target() {
        assert!(Cli::try_parse_from(["modpin", "update"]).is_err());
    }

    #[test]
    fn parses_resolve_digest_with_global_flags() {
        let cli = Cli::try_parse_from([
            "modpin",
            "resolve-digest",
            "--image",
            "alpine",
            "--digest",
            "sha256:abc",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::ResolveDigest {
                image,
                digest,
                registry,
            } => {
                assert_eq!(image, "alpine");
                assert_eq!(digest, "sha256:abc");
                assert!(registry.is_none());
            }
            Commands::Update { .. } => panic!("Expected ResolveDigest command"),
        }
    }
}
