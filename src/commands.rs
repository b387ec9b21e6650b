//! The `jenkinson` subcommands. Every command writes its user-facing output to the given sink.

use crate::build::{self, BuildOutcome, ResolverConfig};
use crate::config::{CredentialStore, Profile};
use crate::crumb;
use crate::error::{Error, Result};
use crate::jobs;
use crate::log_stream::{self, LogStreamConfig};
use crate::session::Session;
use crate::table;
use crate::transport::Transport;
use futures::TryStreamExt;
use log::*;
use std::io::{BufRead, Write};

/// Print every job with the label of its last build
pub async fn jobs<T: Transport>(session: &Session<T>, out: &mut impl Write) -> Result<()> {
    let jobs = jobs::list_jobs(session).await?;
    let mut rows = vec![vec!["JOB NAME".to_string(), "STATUS".to_string()]];
    rows.extend(jobs.iter().map(|job| vec![job.name.clone(), job.status()]));
    out.write_all(table::format_columns(&rows).as_bytes())?;
    Ok(())
}

/// Trigger a build, print its URL once it is scheduled and optionally follow its log
pub async fn build<T: Transport + 'static>(
    session: &Session<T>,
    job: &str,
    follow: bool,
    resolver: ResolverConfig,
    log_config: LogStreamConfig,
    out: &mut impl Write,
) -> Result<()> {
    let build_url = match build::trigger_build(session, job, resolver).await? {
        BuildOutcome::Queued { build_url, .. } => build_url,
        BuildOutcome::Rejected { status } => {
            return Err(Error::BuildRejected {
                job: job.to_string(),
                status,
            })
        }
    };
    writeln!(out, "{}", build_url)?;
    if follow {
        let number = build::parse_build_number(&build_url)?;
        print_log(session, job, &number.to_string(), log_config, out).await?;
    }
    Ok(())
}

/// Copy the console log of a build to `out` as it grows
pub async fn print_log<T: Transport>(
    session: &Session<T>,
    job: &str,
    build: &str,
    config: LogStreamConfig,
    out: &mut impl Write,
) -> Result<()> {
    let chunks = log_stream::stream_log(session, job, build, config);
    futures::pin_mut!(chunks);
    while let Some(chunk) = chunks.try_next().await? {
        out.write_all(chunk.as_bytes())?;
        out.flush()?;
    }
    Ok(())
}

/// Do the crumb handshake for `profile` and store it under `name`
pub async fn configure<T: Transport + ?Sized>(
    store: &mut CredentialStore,
    name: &str,
    mut profile: Profile,
    transport: &T,
) -> Result<()> {
    let crumb = crumb::fetch_crumb(transport, &profile.host).await?;
    debug!("Got crumb header {} for {}", crumb.header, profile.host);
    profile.set_crumb(crumb);
    store.set_profile(name, profile);
    store.save()
}

/// Ask for one value on `out` and read the answer from `input`
pub fn prompt(label: &str, input: &mut impl BufRead, out: &mut impl Write) -> Result<String> {
    write!(out, "{}: ", label)?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}
