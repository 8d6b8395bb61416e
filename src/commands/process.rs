use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::classify::Classifier;
use crate::cli::ProcessArgs;
use crate::error::PipelineError;
use crate::model::{
    Document, DocumentResultFile, DocumentRunSummary, OcrStatus, ProcessCounts,
    ProcessRunManifest,
};
use crate::pipeline::tools::collect_tool_versions;
use crate::pipeline::{CancelFlag, OcrPipeline, PopplerTools, QueuedSink, TesseractRecognizer};
use crate::source::{FileSystemSource, infer_media_type};
use crate::store::SqliteStore;
use crate::util::{
    ensure_directory, now_utc_string, safe_file_stem, sha256_bytes, sha256_file,
    utc_compact_string, write_json_pretty,
};
use crate::worker::{DocumentJob, DocumentWorker, JobOutcome, run_pool};

const MANIFEST_VERSION: u32 = 1;

pub fn run(args: ProcessArgs) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run_async(args))
}

async fn run_async(args: ProcessArgs) -> Result<()> {
    let started_at = now_utc_string();
    let run_id = format!("process-{}", utc_compact_string(Utc::now()));
    let cache_root = &args.store.cache_root;
    let results_dir = cache_root.join("results");
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        cache_root
            .join("manifests")
            .join(format!("process_run_{}.json", utc_compact_string(Utc::now())))
    });
    ensure_directory(&results_dir)?;

    let store = Arc::new(SqliteStore::open(&args.store.resolved_db_path())?);
    if let Some(case_id) = &args.case_id
        && !store.case_exists(case_id)?
    {
        bail!("case {case_id} does not exist; create it with `case create` first");
    }

    let tool_config = args.ocr.tool_config();
    let config = args.ocr.pipeline_config(args.work_root.clone())?;
    let tool_versions = {
        let tool_config = tool_config.clone();
        tokio::task::spawn_blocking(move || collect_tool_versions(&tool_config))
            .await
            .context("tool version lookup aborted")?
    };
    let mut warnings = Vec::new();
    if tool_versions.pdftoppm.is_none() {
        warnings.push("pdftoppm not found; scanned PDFs will fail to rasterize".to_string());
    }
    if tool_versions.tesseract.is_none() {
        warnings.push("tesseract not found; recognition passes will fail".to_string());
    }

    let mut jobs = Vec::with_capacity(args.files.len());
    for (index, path) in args.files.iter().enumerate() {
        let sha256 = match sha256_file(path) {
            Ok(sha256) => sha256,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "input could not be hashed");
                warnings.push(format!("{}: {err:#}", path.display()));
                String::new()
            }
        };
        let document = document_for_path(path, &sha256);
        store.register_document(&document, args.case_id.as_deref(), &sha256)?;

        let job_id = format!("{run_id}-{:03}", index + 1);
        store.create_job(&job_id, &document.document_id)?;
        jobs.push(DocumentJob {
            job_id,
            case_id: args.case_id.clone(),
            document,
        });
    }

    info!(
        run_id = %run_id,
        documents = jobs.len(),
        concurrency = args.concurrency,
        case_id = %args.case_id.as_deref().unwrap_or("-"),
        "process run started"
    );

    let cancel = CancelFlag::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping at the next page boundary");
                cancel.cancel();
            }
        })
    };

    let pipeline = OcrPipeline::new(
        PopplerTools::new(tool_config.clone()),
        TesseractRecognizer::new(tool_config),
        config.clone(),
    );
    let classifier = Classifier::with_default_rules(config.classify_confidence_threshold)?;
    let (sink, sink_writer) = QueuedSink::spawn(store.clone());
    let worker = Arc::new(DocumentWorker::new(
        pipeline,
        classifier,
        Arc::new(FileSystemSource::new(None)),
        Arc::new(sink),
        store.clone(),
        cancel.clone(),
    ));

    // The pool drops the last worker handle, which closes the update queue.
    let outcomes = run_pool(worker, jobs, args.concurrency).await;
    interrupt.abort();
    sink_writer.await.context("job update writer aborted")?;

    let mut documents = Vec::with_capacity(outcomes.len());
    for (job, outcome) in outcomes {
        let summary = match outcome {
            Ok(outcome) => {
                let result_path = results_dir.join(format!(
                    "{}_{}.json",
                    safe_file_stem(&job.document.filename),
                    job.document.document_id
                ));
                write_json_pretty(&result_path, &result_file(&job, &outcome))?;
                summarize_success(&job, &outcome, &result_path)
            }
            Err(err) => {
                if err
                    .downcast_ref::<PipelineError>()
                    .is_some_and(PipelineError::is_input_error)
                {
                    warnings.push(format!("{}: {err}", job.document.filename));
                }
                summarize_failure(&job, &err)
            }
        };
        documents.push(summary);
    }

    let counts = tally(&documents);
    let status = run_status(&counts, cancel.is_cancelled());
    let manifest = ProcessRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: "process".to_string(),
        case_id: args.case_id.clone(),
        concurrency: args.concurrency,
        tool_versions,
        config,
        counts: counts.clone(),
        documents,
        warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        run_id = %run_id,
        status,
        documents = counts.document_count,
        completed = counts.completed_count,
        low_confidence = counts.low_confidence_count,
        failed = counts.failed_count,
        born_digital = counts.born_digital_count,
        moved = counts.moved_count,
        manifest = %manifest_path.display(),
        "process run finished"
    );

    if cancel.is_cancelled() {
        bail!(
            "process run cancelled; partial manifest written to {}",
            manifest_path.display()
        );
    }
    Ok(())
}

// Same path and content always map to the same document.
pub fn document_for_path(path: &Path, sha256: &str) -> Document {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let seed = format!("{}|{sha256}", path.display());

    Document {
        document_id: format!("doc-{}", &sha256_bytes(seed.as_bytes())[..12]),
        source_ref: path.display().to_string(),
        media_type: infer_media_type(&filename),
        filename,
    }
}

fn result_file(job: &DocumentJob, outcome: &JobOutcome) -> DocumentResultFile {
    DocumentResultFile {
        document_id: job.document.document_id.clone(),
        filename: job.document.filename.clone(),
        status: outcome.status,
        generated_at: now_utc_string(),
        ocr: outcome.ocr.clone(),
        classification: outcome.classification.clone(),
        applied_bucket_id: outcome.applied_bucket_id,
    }
}

fn summarize_success(job: &DocumentJob, outcome: &JobOutcome, result_path: &Path) -> DocumentRunSummary {
    DocumentRunSummary {
        document_id: job.document.document_id.clone(),
        job_id: job.job_id.clone(),
        filename: job.document.filename.clone(),
        status: outcome.status,
        born_digital: outcome.ocr.born_digital,
        page_count: outcome.ocr.pages.len(),
        avg_confidence: Some(outcome.ocr.avg_confidence),
        bucket_key: outcome
            .classification
            .as_ref()
            .map(|result| result.bucket_key.clone()),
        class_confidence: outcome.classification.as_ref().map(|result| result.confidence),
        applied_bucket_id: outcome.applied_bucket_id,
        result_path: Some(result_path.display().to_string()),
        error: None,
    }
}

fn summarize_failure(job: &DocumentJob, err: &anyhow::Error) -> DocumentRunSummary {
    DocumentRunSummary {
        document_id: job.document.document_id.clone(),
        job_id: job.job_id.clone(),
        filename: job.document.filename.clone(),
        status: OcrStatus::Failed,
        born_digital: false,
        page_count: 0,
        avg_confidence: None,
        bucket_key: None,
        class_confidence: None,
        applied_bucket_id: None,
        result_path: None,
        error: Some(format!("{err:#}")),
    }
}

pub fn tally(documents: &[DocumentRunSummary]) -> ProcessCounts {
    let mut counts = ProcessCounts {
        document_count: documents.len(),
        ..ProcessCounts::default()
    };
    for document in documents {
        match document.status {
            OcrStatus::Completed => counts.completed_count += 1,
            OcrStatus::LowConfidence => counts.low_confidence_count += 1,
            OcrStatus::Failed => counts.failed_count += 1,
            _ => {}
        }
        if document.born_digital {
            counts.born_digital_count += 1;
        }
        if document.bucket_key.is_some() {
            counts.classified_count += 1;
        }
        if document.applied_bucket_id.is_some() {
            counts.moved_count += 1;
        }
    }
    counts
}

pub fn run_status(counts: &ProcessCounts, cancelled: bool) -> &'static str {
    if cancelled {
        "cancelled"
    } else if counts.failed_count > 0 {
        "completed_with_failures"
    } else {
        "completed"
    }
}
