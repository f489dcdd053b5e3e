//! Subcommand handlers
//!
//! Each handler returns the process exit code; errors bubble up as
//! `anyhow::Error` and are reported by `main` with exit code 2.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{submit, ApiClient, SpecFetcher, SubmissionApi, SubmissionState, SubmitOptions};
use crate::checks::cache::SpecCache;
use crate::checks::{load, run_checks, RunOptions, SpecSource};
use crate::cli::{CacheAction, CheckArgs, Commands, SubmitArgs};
use crate::config::AppConfig;
use crate::core::Slug;
use crate::error::{EXIT_NOT_PASSED, EXIT_SUCCESS};
use crate::languages::{all_adapters, resolve_language};
use crate::report::{render_submission, render_with, RenderOptions};

pub async fn dispatch(command: Commands, config: &AppConfig) -> Result<u8> {
    match command {
        Commands::Check(args) => {
            let cwd = std::env::current_dir().context("Failed to read the current directory")?;
            let fetcher: Arc<dyn SpecFetcher> =
                Arc::new(ApiClient::new(&config.api_url, config.token.clone())?);
            let (report, code) = check(&cwd, &args, config, fetcher).await?;
            print!("{}", report);
            Ok(code)
        }
        Commands::Submit(args) => {
            let cwd = std::env::current_dir().context("Failed to read the current directory")?;
            let token = config
                .token
                .clone()
                .context("Not logged in. Set EXERCHECK_TOKEN to your access token")?;
            let client = Arc::new(ApiClient::new(&config.api_url, Some(token))?);
            run_submit(&cwd, &args, config, client).await
        }
        Commands::Cache { action } => {
            let cache = SpecCache::new(&config.cache_dir, config.cache_ttl);
            let text = cache_command(&cache, &action)?;
            print!("{}", text);
            Ok(EXIT_SUCCESS)
        }
    }
}

fn spec_source(
    local: Option<&Path>,
    config: &AppConfig,
    fetcher: Arc<dyn SpecFetcher>,
    update: bool,
) -> SpecSource {
    match local {
        Some(path) => SpecSource::Local(path.to_path_buf()),
        None => SpecSource::Remote {
            checks_root: config.checks_path.clone(),
            cache: SpecCache::new(&config.cache_dir, config.cache_ttl),
            fetcher,
            update,
        },
    }
}

/// Run the checks for `args.slug` against `workspace`; returns the
/// rendered report and the exit code.
pub async fn check(
    workspace: &Path,
    args: &CheckArgs,
    config: &AppConfig,
    fetcher: Arc<dyn SpecFetcher>,
) -> Result<(String, u8)> {
    let slug = Slug::parse(&args.slug)?;
    let adapters = all_adapters()?;
    let language = resolve_language(workspace, args.language.as_deref(), &adapters)?;

    let source = spec_source(args.local.as_deref(), config, fetcher, args.update);
    let set = load(&slug, language.name(), &source)
        .await?
        .restrict_to(&args.targets)?;
    info!(
        "Running {} check(s) for {} in {}",
        set.len(),
        slug,
        language.name()
    );

    let options = RunOptions {
        default_timeout: config.check_timeout,
    };
    let results = run_checks(&set, workspace, language, &options).await;
    let report = render_with(
        &results,
        args.output,
        &RenderOptions { show_log: args.log },
    );
    let code = if results.all_passed() {
        EXIT_SUCCESS
    } else {
        EXIT_NOT_PASSED
    };
    Ok((report, code))
}

async fn run_submit(
    workspace: &Path,
    args: &SubmitArgs,
    config: &AppConfig,
    client: Arc<ApiClient>,
) -> Result<u8> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let yes = args.yes;
    let confirm = move |files: &[String]| yes || confirm_files(files, io::stdin().lock(), io::stderr());
    let result = submit_with(workspace, args, config, client.clone(), client, confirm, cancel_rx).await;
    interrupt.abort();

    let (report, code) = result?;
    print!("{}", report);
    Ok(code)
}

/// Submit `workspace`; returns the rendered submission and the exit code
pub async fn submit_with<C>(
    workspace: &Path,
    args: &SubmitArgs,
    config: &AppConfig,
    api: Arc<dyn SubmissionApi>,
    fetcher: Arc<dyn SpecFetcher>,
    confirm: C,
    cancel: watch::Receiver<bool>,
) -> Result<(String, u8)>
where
    C: FnOnce(&[String]) -> bool,
{
    let slug = Slug::parse(&args.slug)?;
    let adapters = all_adapters()?;
    let language = resolve_language(workspace, args.language.as_deref(), &adapters)?;

    // The checks only contribute extra file patterns here.
    let source = spec_source(args.local.as_deref(), config, fetcher, false);
    let extra_files = match load(&slug, language.name(), &source).await {
        Ok(set) => set.extra_files().to_vec(),
        Err(e) => {
            warn!("Could not load checks for {} ({}), submitting sources only", slug, e);
            Vec::new()
        }
    };

    let options = SubmitOptions {
        message: args.message.clone(),
        extra_files,
        async_mode: args.async_mode,
        timeout: Duration::from_secs(args.timeout),
        ..SubmitOptions::new(slug.to_string())
    };
    let submission = submit(
        workspace,
        language.as_ref(),
        api.as_ref(),
        &options,
        confirm,
        cancel,
    )
    .await?;

    let code = match submission.state {
        SubmissionState::Succeeded | SubmissionState::Cancelled => EXIT_SUCCESS,
        _ => EXIT_NOT_PASSED,
    };
    Ok((render_submission(&submission, args.output), code))
}

/// Print the file list and ask; empty input, `y` and `yes` accept
fn confirm_files(files: &[String], mut input: impl BufRead, mut out: impl Write) -> bool {
    let _ = writeln!(out, "Files to submit:");
    for file in files {
        let _ = writeln!(out, "  {}", file);
    }
    let _ = write!(out, "Submit these files? [Y/n] ");
    let _ = out.flush();

    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
}

pub fn cache_command(cache: &SpecCache, action: &CacheAction) -> Result<String> {
    match action {
        CacheAction::List => {
            let entries = cache.list()?;
            if entries.is_empty() {
                return Ok(format!("No cached checks in {}\n", cache.root().display()));
            }
            let mut out = format!(
                "{:<16} {:<10} {:<24} {:<14} {}\n",
                "COURSE", "LANGUAGE", "STAGE", "VERSION", "AGE"
            );
            for entry in entries {
                out.push_str(&format!(
                    "{:<16} {:<10} {:<24} {:<14} {}\n",
                    entry.course,
                    entry.language,
                    entry.stage,
                    entry.version.get(..12).unwrap_or(&entry.version),
                    format_age(entry.age)
                ));
            }
            Ok(out)
        }
        CacheAction::Clear { slug, language } => {
            let slug = slug.as_deref().map(Slug::parse).transpose()?;
            let removed = cache.clear(slug.as_ref(), language.as_deref())?;
            Ok(format!("Removed {} cached check set(s)\n", removed))
        }
    }
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}
