use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::classify::Classifier;
use crate::error::PipelineError;
use crate::model::{ClassificationResult, Document, JobUpdate, OcrResult, OcrStatus};
use crate::pipeline::{
    CancelFlag, ExtractInput, OcrPipeline, PdfTools, ProgressReporter, ResultSink, TextRecognizer,
};
use crate::source::ByteSource;

pub trait CaseRecords: Send + Sync {
    fn resolve_bucket(&self, case_id: &str, bucket_key: &str) -> Result<Option<i64>>;

    fn record_classification(
        &self,
        document_id: &str,
        classification: &ClassificationResult,
        applied_bucket_id: Option<i64>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DocumentJob {
    pub job_id: String,
    pub case_id: Option<String>,
    pub document: Document,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: OcrStatus,
    pub ocr: OcrResult,
    pub classification: Option<ClassificationResult>,
    pub applied_bucket_id: Option<i64>,
}

pub struct DocumentWorker<P, R> {
    pipeline: OcrPipeline<P, R>,
    classifier: Classifier,
    source: Arc<dyn ByteSource>,
    sink: Arc<dyn ResultSink>,
    records: Arc<dyn CaseRecords>,
    cancel: CancelFlag,
}

impl<P: PdfTools, R: TextRecognizer> DocumentWorker<P, R> {
    pub fn new(
        pipeline: OcrPipeline<P, R>,
        classifier: Classifier,
        source: Arc<dyn ByteSource>,
        sink: Arc<dyn ResultSink>,
        records: Arc<dyn CaseRecords>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            pipeline,
            classifier,
            source,
            sink,
            records,
            cancel,
        }
    }

    pub async fn process_document(&self, job: &DocumentJob) -> Result<JobOutcome> {
        let mut reporter = ProgressReporter::new(self.sink.as_ref(), &job.job_id);
        reporter.publish(&JobUpdate::progress(OcrStatus::Processing, 0));

        match self.run_job(job, &mut reporter).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let message = format!("{err:#}");
                error!(
                    document_id = %job.document.document_id,
                    job_id = %job.job_id,
                    error = %message,
                    "document processing failed"
                );
                let progress = reporter.last_sent().unwrap_or(0);
                reporter.publish(&JobUpdate::failed(progress, message));
                Err(err)
            }
        }
    }

    async fn run_job(
        &self,
        job: &DocumentJob,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<JobOutcome> {
        let document = &job.document;
        let bytes = self
            .source
            .get_bytes(&document.source_ref)
            .with_context(|| format!("failed to fetch {}", document.filename))?;
        if bytes.is_empty() {
            return Err(PipelineError::EmptyInput(document.filename.clone()).into());
        }

        let ocr = self
            .pipeline
            .extract(
                ExtractInput {
                    filename: &document.filename,
                    media_type: &document.media_type,
                    bytes: &bytes,
                },
                &mut |fraction| reporter.report(fraction),
                &self.cancel,
            )
            .await?;

        let threshold = self.pipeline.config().ocr_confidence_threshold;
        let status = if ocr.avg_confidence >= threshold {
            OcrStatus::Completed
        } else {
            OcrStatus::LowConfidence
        };
        let full_text = ocr.full_text();
        info!(
            document_id = %document.document_id,
            status = %status,
            avg_confidence = ocr.avg_confidence,
            born_digital = ocr.born_digital,
            pages = ocr.pages.len(),
            "text extraction finished"
        );

        reporter.publish(&JobUpdate {
            status,
            progress: 100,
            text: Some(full_text.clone()),
            confidence: Some(ocr.avg_confidence),
            layout: Some(ocr.layout.clone()),
            error: None,
        });

        // OCR text is already persisted; a failure here leaves only the classification empty.
        let mut classification = None;
        let mut applied_bucket_id = None;
        if status == OcrStatus::Completed {
            match self.classify(job, &full_text) {
                Ok((result, bucket)) => {
                    classification = Some(result);
                    applied_bucket_id = bucket;
                }
                Err(err) => warn!(
                    document_id = %document.document_id,
                    error = %format!("{err:#}"),
                    "classification could not be recorded"
                ),
            }
        }

        Ok(JobOutcome {
            status,
            ocr,
            classification,
            applied_bucket_id,
        })
    }

    fn classify(&self, job: &DocumentJob, text: &str) -> Result<(ClassificationResult, Option<i64>)> {
        let document = &job.document;
        let result = self.classifier.classify(text, &document.filename);
        let applied_bucket_id = if result.confidence >= self.classifier.threshold() {
            self.resolve_bucket(job, &result)?
        } else {
            None
        };
        self.records
            .record_classification(&document.document_id, &result, applied_bucket_id)
            .with_context(|| format!("failed to record classification of {}", document.filename))?;
        info!(
            document_id = %document.document_id,
            bucket = %result.bucket_key,
            confidence = result.confidence,
            moved = applied_bucket_id.is_some(),
            "document classified"
        );
        Ok((result, applied_bucket_id))
    }

    fn resolve_bucket(&self, job: &DocumentJob, result: &ClassificationResult) -> Result<Option<i64>> {
        let Some(case_id) = &job.case_id else {
            return Ok(None);
        };
        let bucket = self
            .records
            .resolve_bucket(case_id, &result.bucket_key)
            .with_context(|| format!("failed to resolve bucket {}", result.bucket_key))?;
        if bucket.is_none() {
            warn!(
                document_id = %job.document.document_id,
                case_id = %case_id,
                bucket = %result.bucket_key,
                "case has no matching bucket; classification kept unapplied"
            );
        }
        Ok(bucket)
    }
}

pub async fn run_pool<P, R>(
    worker: Arc<DocumentWorker<P, R>>,
    jobs: Vec<DocumentJob>,
    concurrency: usize,
) -> Vec<(DocumentJob, Result<JobOutcome>)>
where
    P: PdfTools + 'static,
    R: TextRecognizer + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(jobs.len());

    for job in jobs {
        let worker = Arc::clone(&worker);
        let semaphore = Arc::clone(&semaphore);
        let task_job = job.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .context("worker pool closed")?;
            worker.process_document(&task_job).await
        });
        handles.push((job, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (job, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) => Err(anyhow!("worker task for {} aborted: {err}", job.document.filename)),
        };
        outcomes.push((job, outcome));
    }
    outcomes
}
