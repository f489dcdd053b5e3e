use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use exercheck::cli::Cli;
use exercheck::commands;
use exercheck::config::AppConfig;
use exercheck::error::EXIT_ERROR;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_deref()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    let result = match AppConfig::from_env() {
        Ok(config) => commands::dispatch(cli.command, &config).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&env, level)?)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// `RUST_LOG` wins over the built-in `exercheck=warn`; `--log-level` wins over both
fn log_filter(env: &str, level: Option<&str>) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive("exercheck=warn".parse()?)
        .parse_lossy(env);
    if let Some(level) = level {
        filter = filter.add_directive(format!("exercheck={}", level).parse()?);
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_defaults_to_warn() {
        assert_eq!(log_filter("", None).unwrap().to_string(), "exercheck=warn");
    }

    #[test]
    fn test_rust_log_can_raise_crate_level() {
        let filter = log_filter("exercheck=debug", None).unwrap().to_string();
        assert!(filter.contains("exercheck=debug"));
        assert!(!filter.contains("warn"));
    }

    #[test]
    fn test_log_level_flag_applies() {
        let filter = log_filter("", Some("info")).unwrap().to_string();
        assert!(filter.contains("exercheck=info"));
        assert!(log_filter("", Some("loud")).is_err());
    }
}
