use std::{collections::HashMap, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use shared::domain::{Multiplicity, RecordId, UploadStatus};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use upload_core::{
    load_options, FileListValue, FileRecord, SelectedFile, UploadController, UploadEvent,
    UploadOptions,
};

#[derive(Parser, Debug)]
#[command(about = "Upload files to an HTTP endpoint, reporting per-file progress")]
struct Args {
    /// Options file; `upload.toml` in the working directory is used when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    url: Option<String>,
    /// `true`, `false` or the maximum number of files kept.
    #[arg(long)]
    multiple: Option<Multiplicity>,
    #[arg(long)]
    max_size: Option<u64>,
    /// Extra request header as `NAME=VALUE`; may be repeated.
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
    #[arg(long)]
    form_data_key: Option<String>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

impl Args {
    fn apply_to(&self, options: &mut UploadOptions) {
        if let Some(url) = &self.url {
            options.url = Some(url.clone());
        }
        if let Some(multiple) = self.multiple {
            options.multiple = multiple;
        }
        if let Some(max_size) = self.max_size {
            options.max_size = Some(max_size);
        }
        if let Some(key) = &self.form_data_key {
            options.form_data_key = Some(key.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            options.timeout_ms = Some(timeout_ms);
        }
        for (name, value) in &self.headers {
            options.headers.insert(name.clone(), value.clone());
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

async fn read_selection(paths: &[PathBuf]) -> Result<Vec<SelectedFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(SelectedFile::new(name, content));
    }
    Ok(files)
}

fn is_settled(list: &FileListValue) -> bool {
    list.iter().flatten().all(FileRecord::is_terminal)
}

fn render_record(index: usize, record: &FileRecord) -> String {
    let kind = format!("{:?}", record.file.kind()).to_ascii_lowercase();
    let mut line = format!(
        "{index:>3}  {:<32} {kind:<5} {:<11} {:>6.2}%",
        record.file.name, record.status, record.progress
    );
    if let Some(url) = &record.remote_url {
        line.push_str("  ");
        line.push_str(url);
    }
    line
}

/// Prints records whose status or whole-percent progress changed since the
/// last call.
#[derive(Default)]
struct ProgressPrinter {
    last_seen: HashMap<RecordId, (UploadStatus, u32)>,
}

impl ProgressPrinter {
    fn changed_lines(&mut self, list: &FileListValue) -> Vec<String> {
        let mut lines = Vec::new();
        for (index, record) in list.iter().flatten().enumerate() {
            let key = (record.status, record.progress.floor() as u32);
            if self.last_seen.insert(record.id, key) != Some(key) {
                lines.push(render_record(index, record));
            }
        }
        lines
    }
}

async fn wait_for_settlement(
    controller: &UploadController,
    events: &mut broadcast::Receiver<UploadEvent>,
) -> FileListValue {
    let mut printer = ProgressPrinter::default();
    loop {
        let current = controller.value();
        if is_settled(&current) {
            return current;
        }
        match events.recv().await {
            Ok(UploadEvent::ValueChanged { list, .. }) => {
                for line in printer.changed_lines(&list) {
                    println!("{line}");
                }
            }
            Ok(UploadEvent::Finished { .. }) => {}
            Ok(UploadEvent::Error(err)) => {
                let report = err.report();
                warn!(kind = ?report.kind, error = %report.message, "upload: submission rejected");
            }
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "upload: progress events skipped"),
            Err(RecvError::Closed) => return controller.value(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let mut options = load_options(args.config.as_deref())?;
    args.apply_to(&mut options);
    let controller = UploadController::from_options(&options)?;
    let mut events = controller.subscribe_events();

    let selection = read_selection(&args.files).await?;
    let submitted = selection.len();
    controller.submit(selection);

    let settled = wait_for_settlement(&controller, &mut events).await;
    let Some(records) = settled else {
        return Err(anyhow!("none of the {submitted} file(s) were accepted"));
    };
    if records.len() < submitted {
        warn!(
            submitted,
            kept = records.len(),
            "upload: some files were not kept by the size or multiplicity policy"
        );
    }

    println!();
    for (index, record) in records.iter().enumerate() {
        println!("{}", render_record(index, record));
    }

    let failed = records
        .iter()
        .filter(|record| record.status == UploadStatus::Fail)
        .count();
    if failed > 0 {
        return Err(anyhow!("{failed} of {} upload(s) failed", records.len()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
