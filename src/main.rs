//! # jenkinson
//!
//! A small command-line client for the Jenkins remote access API.
//!
//! ## Usage
//!
//! ```sh
//! # store credentials for a server (prompts for anything not given as a flag)
//! jenkinson configure --host https://ci.example.com --user admin
//! # list jobs and the state of their last build
//! jenkinson jobs
//! # trigger a build, wait for it to leave the queue and follow its console output
//! jenkinson build my-job --follow
//! # print the console output of build 42
//! jenkinson log my-job 42
//! ```
//!
//! Every command accepts `--profile <name>` to pick a set of stored credentials other than
//! `default`.
//!
//! ## Configuration
//!
//! Credentials are kept in `credentials.toml` in the platform configuration directory
//! (`~/.config/jenkinson` on Linux), one table per profile:
//!
//! ```toml
//! [default]
//! host = "https://ci.example.com"
//! user = "admin"
//! # API token, from the user's configuration page in Jenkins
//! token = "11aa..."
//! # Filled in by `jenkinson configure`
//! crumb_header = "Jenkins-Crumb"
//! crumb = "0f3c..."
//! ```
//!
//! Set `JENKINSON_CREDENTIALS` to use a different file. Single keys can be overridden with
//! environment variables of the form `JENKINSON_PROFILE_<PROFILE>__<KEY>`, e.g.
//! `JENKINSON_PROFILE_DEFAULT__TOKEN=<your token here>`.
//!
//! ## Exit codes
//!
//! | code | meaning |
//! |------|---------|
//! | 1 | anything else |
//! | 2 | the server could not be reached |
//! | 3 | the server's answer made no sense |
//! | 4 | the build did not leave the queue in time |
//! | 5 | credentials missing or unreadable |
//! | 6 | the server refused the request |
//! | 64 | bad command line |

use jenkinson::build::ResolverConfig;
use jenkinson::commands;
use jenkinson::config::DEFAULT_PROFILE;
use jenkinson::log_stream::LogStreamConfig;
use jenkinson::transport::{Auth, HttpTransport};
use jenkinson::{CredentialStore, Profile, Session};

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use log::*;
use simple_logger::SimpleLogger;
use std::io;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "jenkinson", version, about = "A CLI tool to manage Jenkins")]
struct Cli {
    /// Select a Jenkins profile
    #[arg(long, global = true, default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Log more (-v for info, -vv for debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a job
    Build {
        job: String,
        /// Stream the build's log once it has started
        #[arg(short, long)]
        follow: bool,
        /// Seconds between two looks at the queue
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
        /// Seconds to wait for the build to leave the queue
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
    /// Store credentials for a profile
    Configure {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },
    /// List jobs
    Jobs,
    /// Get a build's log
    Log {
        job: String,
        build: String,
        /// Seconds between two log polls
        #[arg(long, default_value_t = 3)]
        poll_interval: u64,
        /// Give up after this many unsuccessful answers in a row (default: never)
        #[arg(long)]
        max_failed_polls: Option<u32>,
    },
}

#[tokio::main(flavor = "current_thread")]
#[doc(hidden)]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            e.print().ok();
            std::process::exit(jenkinson::USAGE_EXIT_CODE);
        }
    };

    if let Err(e) = run(cli).await {
        let code = e
            .downcast_ref::<jenkinson::Error>()
            .map_or(1, jenkinson::Error::exit_code);
        eprintln!("Error: {:#}", e);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    SimpleLogger::new().with_level(level).init()?;

    let mut store = CredentialStore::load_default()?;
    let mut stdout = io::stdout();
    match cli.command {
        Commands::Configure { host, user, token } => {
            let mut stdin = io::stdin().lock();
            let mut ask = |value: Option<String>, label: &str| match value {
                Some(value) => Ok(value),
                None => commands::prompt(label, &mut stdin, &mut stdout),
            };
            let host = ask(host, "Jenkins Host")?;
            let user = ask(user, "Jenkins User")?;
            let token = ask(token, "Jenkins Token")?;
            let transport = HttpTransport::new(Auth::new(user.clone(), token.clone()))?;
            commands::configure(
                &mut store,
                &cli.profile,
                Profile::new(host, user, token),
                &transport,
            )
            .await?;
            info!("Profile {} saved to {}", cli.profile, store.path().display());
        }
        Commands::Jobs => {
            let session = Session::from_profile(store.profile(&cli.profile)?)?;
            commands::jobs(&session, &mut stdout).await?;
        }
        Commands::Build {
            job,
            follow,
            poll_interval,
            timeout,
        } => {
            let session = Session::from_profile(store.profile(&cli.profile)?)?;
            let resolver = ResolverConfig {
                poll_interval: Duration::from_secs(poll_interval.max(1)),
                deadline: Duration::from_secs(timeout),
            };
            commands::build(
                &session,
                &job,
                follow,
                resolver,
                LogStreamConfig::default(),
                &mut stdout,
            )
            .await?;
        }
        Commands::Log {
            job,
            build,
            poll_interval,
            max_failed_polls,
        } => {
            let session = Session::from_profile(store.profile(&cli.profile)?)?;
            let config = LogStreamConfig {
                poll_interval: Duration::from_secs(poll_interval.max(1)),
                max_failed_polls,
            };
            commands::print_log(&session, &job, &build, config, &mut stdout).await?;
        }
    }
    Ok(())
}
