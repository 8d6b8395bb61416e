use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::classify::Classifier;
use crate::cli::ClassifyArgs;

pub fn run(args: ClassifyArgs) -> Result<()> {
    let text = match (&args.text, &args.text_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("either --text or --text-file is required"),
    };

    let classifier = Classifier::with_default_rules(args.threshold)?;
    let result = classifier.classify(&text, &args.filename);

    info!(
        bucket = %result.bucket_key,
        confidence = result.confidence,
        threshold = classifier.threshold(),
        "classification computed"
    );

    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &result)
        .context("failed to serialize classification json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}
