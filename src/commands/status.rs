use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::store::{CaseSummary, SqliteStore, StatusReport};
use crate::util::read_json;

#[derive(Debug, Serialize)]
struct StatusResponse {
    db_path: String,
    cases: Vec<CaseSummary>,
    report: StatusReport,
    latest_run: Option<LatestRun>,
}

#[derive(Debug, Serialize)]
struct LatestRun {
    path: String,
    run_id: String,
    status: String,
    updated_at: String,
    document_count: usize,
    failed_count: usize,
}

#[derive(Debug, Deserialize)]
struct RunManifestHeader {
    run_id: String,
    status: String,
    updated_at: String,
    counts: RunManifestCounts,
}

#[derive(Debug, Deserialize)]
struct RunManifestCounts {
    document_count: usize,
    failed_count: usize,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args.store.resolved_db_path();
    info!(cache_root = %args.store.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "case database missing; nothing processed yet");
        return Ok(());
    }

    let store = SqliteStore::open(&db_path)?;
    if let Some(document_id) = &args.document {
        return document_status(&store, document_id, args.json);
    }

    let cases = store.list_cases()?;
    let report = store.status_report()?;
    let latest_run = latest_manifest(&args.store.cache_root.join("manifests"))?;

    let response = StatusResponse {
        db_path: db_path.display().to_string(),
        cases,
        report,
        latest_run,
    };

    if args.json {
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &response)
            .context("failed to serialize status json output")?;
        writeln!(output)?;
        output.flush()?;
        return Ok(());
    }

    log_status(&response);
    Ok(())
}

fn document_status(store: &SqliteStore, document_id: &str, json: bool) -> Result<()> {
    let Some(document) = store.document(document_id)? else {
        bail!("document {document_id} is not registered");
    };

    if json {
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &document)
            .context("failed to serialize document status json output")?;
        writeln!(output)?;
        output.flush()?;
        return Ok(());
    }

    info!(
        document_id = %document.document_id,
        filename = %document.filename,
        case_id = %document.case_id.as_deref().unwrap_or("-"),
        bucket_id = ?document.bucket_id,
        ocr_status = %document.ocr_status,
        ocr_confidence = ?document.ocr_confidence,
        class_bucket = %document.class_bucket_key.as_deref().unwrap_or("-"),
        class_confidence = ?document.class_confidence,
        tags = %document.tags.join(","),
        "document status"
    );
    Ok(())
}

fn log_status(response: &StatusResponse) {
    let count = |map: &BTreeMap<String, i64>, key: &str| map.get(key).copied().unwrap_or(0);
    let jobs = &response.report.jobs_by_status;
    let documents = &response.report.documents_by_status;

    info!(
        path = %response.db_path,
        cases = response.cases.len(),
        jobs_pending = count(jobs, "pending"),
        jobs_processing = count(jobs, "processing"),
        jobs_completed = count(jobs, "completed"),
        jobs_failed = count(jobs, "failed"),
        "job status"
    );
    info!(
        documents_completed = count(documents, "completed"),
        documents_low_confidence = count(documents, "low_confidence"),
        documents_failed = count(documents, "failed"),
        documents_pending = count(documents, "pending"),
        "document status"
    );
    for (bucket, documents) in &response.report.documents_by_bucket {
        info!(bucket = %bucket, documents, "bucket contents");
    }

    match &response.latest_run {
        Some(run) => info!(
            run_id = %run.run_id,
            status = %run.status,
            updated_at = %run.updated_at,
            documents = run.document_count,
            failed = run.failed_count,
            path = %run.path,
            "latest process run"
        ),
        None => warn!("no process run manifest found"),
    }
}

fn latest_manifest(manifest_dir: &Path) -> Result<Option<LatestRun>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?
    {
        let path = entry?.path();
        let is_run_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("process_run_") && name.ends_with(".json"));
        if is_run_manifest {
            candidates.push(path);
        }
    }
    // Compact UTC timestamps sort lexically.
    candidates.sort();

    let Some(path) = candidates.pop() else {
        return Ok(None);
    };
    let manifest: RunManifestHeader = read_json(&path)?;
    Ok(Some(LatestRun {
        path: path.display().to_string(),
        run_id: manifest.run_id,
        status: manifest.status,
        updated_at: manifest.updated_at,
        document_count: manifest.counts.document_count,
        failed_count: manifest.counts.failed_count,
    }))
}
