use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::{CaseCreateArgs, CaseListArgs};
use crate::store::{CaseSummary, SqliteStore};

pub fn create(args: CaseCreateArgs) -> Result<()> {
    let db_path = args.store.resolved_db_path();
    let store = SqliteStore::open(&db_path)?;
    let case = store.create_case(&args.name, args.client.as_deref())?;
    let buckets = store.buckets(&case.case_id)?;

    info!(
        case_id = %case.case_id,
        name = %case.name,
        buckets = buckets.len(),
        db = %db_path.display(),
        "case created"
    );

    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "{}", case.case_id)?;
    output.flush()?;
    Ok(())
}

pub fn list(args: CaseListArgs) -> Result<()> {
    let store = SqliteStore::open(&args.store.resolved_db_path())?;
    let cases = store.list_cases()?;

    if args.json {
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &cases)
            .context("failed to serialize case list json output")?;
        writeln!(output)?;
        output.flush()?;
        return Ok(());
    }

    write_case_table(&cases)
}

fn write_case_table(cases: &[CaseSummary]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Cases: {}", cases.len())?;
    for case in cases {
        writeln!(
            output,
            "{}  {}  client={}  documents={}  created={}",
            case.case_id,
            case.name,
            case.client.as_deref().unwrap_or("-"),
            case.document_count,
            case.created_at.format("%Y-%m-%d %H:%M"),
        )?;
    }
    output.flush()?;
    Ok(())
}
