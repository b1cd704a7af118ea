use anyhow::{Context, Result, bail};
use autumnus::{FormatterOption, Options, highlight, themes};
use clap::{ArgAction, CommandFactory, Parser};
use iocraft::prelude::*;
use std::{
    fs,
    io::{self, IsTerminal},
    path::Path,
    process::ExitCode,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::{
    client::B2Client,
    config::ConfigArgs,
    download::{Download, DownloadComplete, DownloadEvent},
    error::B2Error,
    rest_types::FileInfo,
    ui::{ErrorMessage, FileInfoDetails, ProgressBar, SuccessMessage},
};

mod client;
mod config;
mod download;
mod error;
mod rest_types;
mod serde_utils;
mod ui;

const FALLBACK_FILE_NAME: &str = "download";

#[derive(Parser)]
#[command(name = "b2fetch")]
#[command(version)]
#[command(about = "Fetch file information and contents from Backblaze B2")]
struct Cli {
    /// B2 account ID or application key ID
    account_id: String,
    /// B2 application key
    application_key: String,
    #[command(flatten)]
    config: ConfigArgs,
    /// Print file information as JSON
    #[arg(long)]
    json: bool,
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
        .and_then(|rt| rt.block_on(run(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            element!(ErrorMessage(message: format!("{e:#}"))).eprint();
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,b2fetch={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<B2Error>()
        .map_or(1, B2Error::exit_code)
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::read_config(cli.config)?;
    config.validate()?;

    let client = B2Client::new(config.authorize_url.clone(), config.request_timeout)?;

    let session = client
        .authorize(&cli.account_id, &cli.application_key)
        .await?;
    element!(SuccessMessage(message: "Authorized B2 account".to_string())).eprint();

    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Unable to create output directory {}",
            config.output_dir.display()
        )
    })?;

    let by_id = match config.file_id.as_deref() {
        Some(file_id) => {
            let info = client
                .get_file_info(&session.api_url, file_id, &session.authorization_token)
                .await?;
            print_file_info(&info, cli.json)?;
            Some((file_id, info))
        }
        None => None,
    };

    if let Some((bucket_name, file_name)) = config.by_name() {
        let target = config
            .output_dir
            .join(format!("by-name_{}", base_name(file_name)));
        let download = client.download_by_name(
            &session.authorization_token,
            &session.download_url,
            bucket_name,
            file_name,
            &target,
        );
        let complete =
            run_download(format!("Downloading {bucket_name}/{file_name}"), download).await?;
        report_download(&complete);
    }

    if let Some((file_id, info)) = by_id {
        let target = config
            .output_dir
            .join(format!("by-id_{}", base_name(&info.file_name)));
        let download = client.download_by_id(
            &session.authorization_token,
            &session.download_url,
            file_id,
            &target,
        );
        let complete = run_download(format!("Downloading {file_id}"), download).await?;
        report_download(&complete);
    }

    Ok(())
}

/// Last path component of a B2 file name, safe to use as a local file name.
fn base_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

fn print_file_info(info: &FileInfo, json: bool) -> Result<()> {
    if !json {
        element!(FileInfoDetails(entries: info.entries())).print();
        return Ok(());
    }

    let output = serde_json::to_string_pretty(info)?;
    if io::stdout().is_terminal() {
        let output = highlight(
            &output,
            Options {
                formatter: FormatterOption::Terminal {
                    theme: Some(
                        themes::get("ayu_light").expect("Syntax highlighting theme not found"),
                    ),
                },
                lang_or_file: Some("json"),
            },
        );
        println!("{}", output);
    } else {
        println!("{}", output);
    }
    Ok(())
}

async fn run_download(title: String, mut download: Download<'_>) -> Result<DownloadComplete> {
    if !io::stdout().is_terminal() {
        return Ok(download.finish().await?);
    }

    let (tx, rx) = watch::channel(0.0);

    let process_stream = async {
        while let Some(event) = download.next_event().await {
            match event? {
                DownloadEvent::Progress(p) => {
                    if let Some(total) = p.total_bytes.filter(|total| *total > 0) {
                        let percent = (p.bytes_written as f32 / total as f32) * 100.0;
                        let _ = tx.send(percent);
                    }
                }
                DownloadEvent::Complete(complete) => return Ok(complete),
            }
        }
        Err::<DownloadComplete, B2Error>(download.ended_early())
    };

    let mut progress_bar = element!(ProgressBar(title: title, progress: Some(rx)));

    let complete = tokio::select! {
        result = process_stream => result?,
        _ = progress_bar.render_loop() => {
            bail!("Progress display stopped before the download finished")
        }
    };

    Ok(complete)
}

fn report_download(complete: &DownloadComplete) {
    element!(SuccessMessage(message: format!(
        "Saved {} ({} bytes)",
        complete.path.display(),
        complete.bytes_written
    )))
    .eprint();
}
