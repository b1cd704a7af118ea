use anyhow::{Context, Result, anyhow};
use clap::{Args, ValueHint};
use dotenvy::dotenv;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;
use url::Url;

use crate::client::DEFAULT_AUTHORIZE_URL;
use crate::error::B2Error;

pub const ENV_PREFIX: &str = "B2_";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// One layer of settings, read from the config file or from `B2_*` variables.
#[derive(Debug, Deserialize, Default)]
struct ConfigSource {
    authorize_url: Option<Url>,
    file_id: Option<String>,
    bucket_name: Option<String>,
    file_name: Option<String>,
    output_dir: Option<PathBuf>,
    timeout: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// ID of the file to describe and download by ID
    #[arg(long)]
    pub file_id: Option<String>,
    /// Bucket holding the file to download by name
    #[arg(long = "bucket")]
    pub bucket_name: Option<String>,
    /// Name of the file to download by name
    #[arg(long)]
    pub file_name: Option<String>,
    /// Directory downloaded files are written to
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,
    /// Timeout for each request, e.g. "30s" or "5m"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
    /// Endpoint used to authorize the account
    #[arg(long, value_hint = ValueHint::Url)]
    pub authorize_url: Option<Url>,
}

#[derive(Debug)]
pub struct Config {
    pub authorize_url: Url,
    pub file_id: Option<String>,
    pub bucket_name: Option<String>,
    pub file_name: Option<String>,
    pub output_dir: PathBuf,
    pub request_timeout: Duration,
}

impl Config {
    /// Bucket and file name to download by name, when both are set.
    pub fn by_name(&self) -> Option<(&str, &str)> {
        self.bucket_name.as_deref().zip(self.file_name.as_deref())
    }

    pub fn validate(&self) -> Result<(), B2Error> {
        match (&self.bucket_name, &self.file_name) {
            (Some(_), None) => {
                return Err(B2Error::Argument(
                    "--bucket requires --file-name".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(B2Error::Argument(
                    "--file-name requires --bucket".to_string(),
                ));
            }
            _ => {}
        }
        if self.file_id.is_none() && self.by_name().is_none() {
            return Err(B2Error::Argument(
                "Nothing to fetch: provide --file-id and/or --bucket with --file-name".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn merge_config(file: ConfigSource, env: ConfigSource, args: ConfigArgs) -> Result<Config> {
    let authorize_url = match args
        .authorize_url
        .or(env.authorize_url)
        .or(file.authorize_url)
    {
        Some(url) => url,
        None => Url::parse(DEFAULT_AUTHORIZE_URL)?,
    };

    let request_timeout = match args.timeout {
        Some(timeout) => timeout,
        None => match env.timeout.or(file.timeout) {
            Some(timeout) => humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid timeout '{timeout}'"))?,
            None => DEFAULT_REQUEST_TIMEOUT,
        },
    };

    if request_timeout.is_zero() {
        return Err(anyhow!("Request timeout must be greater than zero"));
    }

    Ok(Config {
        authorize_url,
        file_id: non_empty(args.file_id.or(env.file_id).or(file.file_id)),
        bucket_name: non_empty(args.bucket_name.or(env.bucket_name).or(file.bucket_name)),
        file_name: non_empty(args.file_name.or(env.file_name).or(file.file_name)),
        output_dir: args
            .output_dir
            .or(env.output_dir)
            .or(file.output_dir)
            .unwrap_or_else(std::env::temp_dir),
        request_timeout,
    })
}

pub fn read_config(args: ConfigArgs) -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::prefixed(ENV_PREFIX)
        .from_env::<ConfigSource>()
        .context("Invalid B2_* environment variable")?;

    let config_file = directories::ProjectDirs::from("io", "b2fetch", "b2fetch")
        .map(|project_dirs| project_dirs.config_dir().join("config.toml"));
    if config_file.is_none() {
        debug!("Unable to determine home directory, skipping config file");
    }
    let file_config = read_config_file(config_file.as_deref())?;

    merge_config(file_config, env_config, args)
}

/// Reads the optional config file; a missing location or file yields an empty layer.
fn read_config_file(config_file: Option<&Path>) -> Result<ConfigSource> {
    let Some(config_file) = config_file else {
        return Ok(ConfigSource::default());
    };
    match fs::read_to_string(config_file) {
        Ok(config) => toml::from_str(&config)
            .with_context(|| format!("Invalid config file {}", config_file.display())),
        Err(_) => Ok(ConfigSource::default()),
    }
}
