pub mod detector;
pub mod embedded;
pub mod engine;
pub mod progress;
pub mod run;
pub mod tools;
pub mod tsv;

#[cfg(test)]
pub(crate) mod fakes;

pub use progress::{CancelFlag, ProgressReporter, QueuedSink, ResultSink};
pub use run::{ExtractInput, OcrPipeline};
pub use tools::{PdfTools, PopplerTools, TesseractRecognizer, TextRecognizer};
