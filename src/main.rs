use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vekta_rag::config::Settings;
use vekta_rag::embedding::HashEmbedder;
use vekta_rag::extractor::{clean_script, ResponseExtractor};
use vekta_rag::logging;
use vekta_rag::parser;
use vekta_rag::rag::{source_documents, RetrievalPipeline};

#[derive(Parser)]
#[command(name = "vekta-rag")]
#[command(version = "0.1")]
#[command(about = "Grounded retrieval and test-case extraction over a local vector index", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk text files and add them to the knowledge base
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Nearest chunks for a query
    Search {
        query: String,
        #[arg(short)]
        k: Option<usize>,
    },
    /// Fill a prompt template with retrieved context
    Prompt {
        query: String,
        #[arg(short, long)]
        template: PathBuf,
        #[arg(short)]
        k: Option<usize>,
    },
    /// Recover test-case records from generated text (stdin when no file)
    Extract {
        file: Option<PathBuf>,
        /// Source document names used for Grounded_In
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Treat the input as a generated script and strip its code fences
        #[arg(long)]
        script: bool,
    },
    Stats,
    Clear,
    Config,
}

fn open_pipeline(settings: &Settings) -> Result<RetrievalPipeline> {
    let provider = Arc::new(HashEmbedder::new(settings.model.clone(), settings.dimensions));
    RetrievalPipeline::new(settings, provider)
        .with_context(|| format!("Failed to open knowledge base at '{}'", settings.path))
}

fn ingest_command(settings: &Settings, files: &[PathBuf]) -> Result<()> {
    let documents = files
        .iter()
        .map(|path| {
            parser::parse_file(path).with_context(|| format!("Failed to read '{}'", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let pipeline = open_pipeline(settings)?;
    let total_chunks = pipeline.ingest_documents(&documents)?;

    let output = serde_json::json!({
        "status": "KB Built Successfully",
        "files_processed": documents.len(),
        "total_chunks": total_chunks,
        "total_entries": pipeline.stats().total_entries,
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn search_command(settings: &Settings, query: &str, k: Option<usize>) -> Result<()> {
    let pipeline = open_pipeline(settings)?;
    let k = k.unwrap_or(settings.top_k);
    let results = pipeline.retrieve(query, k)?;

    let output = serde_json::json!({
        "query": query,
        "database_record_count": pipeline.stats().total_entries,
        "results": results,
        "actual_results_count": results.len(),
        "requested_results_count": k,
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn prompt_command(settings: &Settings, query: &str, template: &Path, k: Option<usize>) -> Result<()> {
    let template = fs::read_to_string(template)
        .with_context(|| format!("Failed to read template '{}'", template.display()))?;
    let pipeline = open_pipeline(settings)?;
    let (prompt, results) =
        pipeline.generate_with_rag(query, k.unwrap_or(settings.top_k), &template)?;

    let output = serde_json::json!({
        "query": query,
        "prompt": prompt,
        "grounded_in": source_documents(&results),
        "sources": results.iter().map(|r| &r.metadata).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn extract_command(file: Option<&Path>, sources: Vec<String>, script: bool) -> Result<()> {
    let raw = match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?,
        None => {
            let mut raw = String::new();
            io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read generated text from stdin")?;
            raw
        }
    };

    if script {
        let output = serde_json::json!({
            "format": "script",
            "script": clean_script(&raw),
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    let extracted = ResponseExtractor::with_sources(sources).extract(&raw);
    let format = extracted.format();
    let output = serde_json::json!({
        "format": format,
        "test_cases": extracted.into_records(),
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn stats_command(settings: &Settings) -> Result<()> {
    let pipeline = open_pipeline(settings)?;
    println!("{}", serde_json::to_string(&pipeline.stats())?);
    Ok(())
}

fn clear_command(settings: &Settings) -> Result<()> {
    let pipeline = open_pipeline(settings)?;
    pipeline.clear()?;
    println!("{}", serde_json::to_string(&pipeline.stats())?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = Settings::new()?;
    logging::init(args.verbose || settings.verbose);

    match args.command {
        Commands::Ingest { files } => ingest_command(&settings, &files)?,
        Commands::Search { query, k } => search_command(&settings, &query, k)?,
        Commands::Prompt { query, template, k } => prompt_command(&settings, &query, &template, k)?,
        Commands::Extract {
            file,
            sources,
            script,
        } => extract_command(file.as_deref(), sources, script)?,
        Commands::Stats => stats_command(&settings)?,
        Commands::Clear => clear_command(&settings)?,
        Commands::Config => settings.print_config(),
    }
    Ok(())
}
