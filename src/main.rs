use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use retrieval_core::config::DEFAULT_CONFIG_PATH;
use retrieval_core::index::HnswParams;
use retrieval_core::logging::{self, LogFormat};
use retrieval_core::{
    create_encoder, BuildPipeline, IndexHandle, IndexStore, RetrievalConfig, Retriever,
    VectorEncoder,
};

#[derive(Parser, Debug)]
#[command(
    name = "retrieval",
    version,
    about = "Chunk, embed and index Markdown docs, then search them"
)]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, global = true, env = "RETRIEVAL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and publish a new index generation
    Build {
        /// Print the build report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Search the published index
    Search {
        query: String,

        /// Candidate pool fetched from the index
        #[arg(long)]
        top_n: Option<usize>,

        /// Results returned
        #[arg(long)]
        top_k: Option<usize>,

        /// Drop candidates scoring below this
        #[arg(long)]
        min_score: Option<f32>,

        /// Print results as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print chunks by id
    Show {
        #[arg(required = true)]
        chunk_ids: Vec<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Describe the published generation
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Text };
    logging::init(&cli.log_level, format);

    let config = RetrievalConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Command::Build { json } => build(config, json),
        Command::Search {
            query,
            top_n,
            top_k,
            min_score,
            json,
        } => search(config, &query, top_n, top_k, min_score, json),
        Command::Show { chunk_ids, json } => show(&config, &chunk_ids, json),
        Command::Status => status(&config),
    }
}

fn encoder(config: &RetrievalConfig) -> Result<Arc<dyn VectorEncoder>> {
    create_encoder(&config.embedding).context("failed to create encoder")
}

fn build(config: RetrievalConfig, json: bool) -> Result<()> {
    let encoder = encoder(&config)?;
    let pipeline = BuildPipeline::new(config, encoder)?;
    let report = pipeline.run().context("build failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("generation   {}", report.generation);
    println!("documents    {}", report.documents);
    println!("chunks       {} ({} duplicates dropped)", report.chunks, report.duplicate_chunks);
    println!("indexed      {}", report.indexed);
    println!("skipped      {}", report.skipped);
    for chunk_id in &report.skipped_chunks {
        println!("  - {chunk_id}");
    }
    println!("cache        {} hits, {} misses", report.cache_hits, report.cache_misses);
    println!("model        {} ({}d, {})", report.model_id, report.dim, report.backend);
    println!("elapsed      {:.2?}", report.elapsed);
    Ok(())
}

fn load_handle(config: &RetrievalConfig) -> Result<Arc<IndexHandle>> {
    let store = IndexStore::new(&config.index.dir);
    let handle = IndexHandle::new();
    if let Some(index) = store
        .load_current(HnswParams::from(&config.index))
        .with_context(|| format!("failed to load index from {}", store.dir().display()))?
    {
        handle.swap(Arc::new(index));
    }
    Ok(Arc::new(handle))
}

fn search(
    config: RetrievalConfig,
    query: &str,
    top_n: Option<usize>,
    top_k: Option<usize>,
    min_score: Option<f32>,
    json: bool,
) -> Result<()> {
    let mut settings = config.retrieval.clone();
    if let Some(min) = min_score {
        settings.min_score = Some(min);
    }
    let top_n = top_n.unwrap_or(settings.top_n);
    let top_k = top_k.unwrap_or(settings.top_k);
    if top_k > top_n {
        bail!("--top-k ({top_k}) must not exceed --top-n ({top_n})");
    }

    let handle = load_handle(&config)?;
    let retriever = Retriever::new(encoder(&config)?, handle, settings);
    let results = retriever.retrieve(query, top_n, top_k)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("no results");
    }
    for (rank, hit) in results.iter().enumerate() {
        println!(
            "{:>2}. {:.4}  {}  [{}]  {}",
            rank + 1,
            hit.score,
            hit.doc_id,
            hit.section_path.join(" > "),
            hit.chunk_id
        );
        let preview: String = hit.text_snippet.chars().take(160).collect();
        println!("    {}", preview.replace('\n', " "));
    }
    Ok(())
}

fn show(config: &RetrievalConfig, chunk_ids: &[String], json: bool) -> Result<()> {
    let handle = load_handle(config)?;
    let Some(index) = handle.current() else {
        bail!("no index published under {}", config.index.dir.display());
    };

    let found = index.chunks_by_id(chunk_ids);
    if found.len() < chunk_ids.len() {
        tracing::warn!(
            requested = chunk_ids.len(),
            found = found.len(),
            "some chunk ids are unknown"
        );
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }
    for chunk in found {
        println!("== {} ({} > {})", chunk.chunk_id, chunk.doc_id, chunk.section_path.join(" > "));
        println!("{}\n", chunk.text);
    }
    Ok(())
}

fn status(config: &RetrievalConfig) -> Result<()> {
    let store = IndexStore::new(&config.index.dir);
    let Some(current) = store.current()? else {
        println!("no index published under {}", store.dir().display());
        return Ok(());
    };

    let manifest = store.load_manifest(&current)?;
    println!("generation   {current}");
    println!("created      {}", manifest.created_at.to_rfc3339());
    println!("model        {} ({}d)", manifest.model_id, manifest.dim);
    println!("backend      {}", manifest.backend);
    println!("vectors      {}", manifest.num_vectors);
    println!(
        "chunking     {} tokens, {}% overlap ({})",
        manifest.window_tokens, manifest.overlap_percent, manifest.tokenizer
    );
    println!("kept         {}", store.generations()?.join(", "));
    Ok(())
}
