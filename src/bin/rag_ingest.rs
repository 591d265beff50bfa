use anyhow::Result;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use pillsure_rag::bootstrap;
use pillsure_rag::config::{Settings, VectorBackend};
use pillsure_rag::rag::ingestion::{IngestReport, IngestTarget};
use pillsure_rag::rag::records::CollectionKind;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Target {
    All,
    Medicines,
    Doctors,
}

#[derive(Parser, Debug)]
#[command(name = "rag-ingest")]
#[command(about = "Project the medicine and doctor catalog into the vector index")]
struct Args {
    /// What to ingest. `all` clears both collections first.
    #[arg(value_enum, default_value_t = Target::All)]
    target: Target,

    /// Re-sync a single record instead of a full pass (needs `medicines` or `doctors`)
    #[arg(long)]
    id: Option<String>,

    /// Rows fetched per page
    #[arg(long)]
    page_size: Option<i64>,

    /// Catalog database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Qdrant server URL
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();

    let args = Args::parse();
    let mut settings = Settings::load()?;
    if let Some(url) = args.database_url.clone() {
        settings.database.url = url;
    }
    if let Some(url) = args.qdrant_url.clone() {
        settings.vector.url = url;
    }
    if let Some(page_size) = args.page_size.filter(|p| *p > 0) {
        settings.rag.ingest_page_size = page_size;
    }
    if settings.vector.backend == VectorBackend::Memory {
        anyhow::bail!("rag-ingest needs a persistent vector backend, set vector.backend = \"qdrant\"");
    }

    println!("Initializing embedding model...");
    let embeddings = bootstrap::build_embeddings(&settings)?;

    println!("Connecting to vector index at {}...", settings.vector.url);
    let index = bootstrap::build_index(&settings).await?;
    let pipeline = bootstrap::build_ingestion(&settings, embeddings, index).await?;

    if let Some(id) = args.id.as_deref() {
        let kind = match args.target {
            Target::Medicines => CollectionKind::Medicines,
            Target::Doctors => CollectionKind::Doctors,
            Target::All => anyhow::bail!("--id needs a target of `medicines` or `doctors`"),
        };
        if pipeline.update_one(kind, id).await? {
            println!("Synced {} record {}", kind, id);
        } else {
            anyhow::bail!("{} record {} not found", kind, id);
        }
        return Ok(());
    }

    let target = match args.target {
        Target::All => IngestTarget::All,
        Target::Medicines => IngestTarget::Medicines,
        Target::Doctors => IngestTarget::Doctors,
    };

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let progress_pb = pb.clone();
    let result = pipeline
        .run_with_progress(target, &move |kind, done, total| {
            let pb = &progress_pb;
            pb.set_message(kind.to_string());
            pb.set_length(total);
            pb.set_position(done);
        })
        .await;
    pb.finish_with_message("done");

    let reports = result?;
    println!("\nIngestion complete!");
    for report in &reports {
        print_report(report);
    }
    println!("  Vector index:   {}", settings.vector.url);

    Ok(())
}

fn print_report(report: &IngestReport) {
    println!(
        "  {:<10} indexed {}/{} (skipped {})",
        report.kind.as_str(), report.processed, report.total, report.skipped
    );
}
