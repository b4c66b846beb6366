use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use docqa::ai::core::{AIProvider, ModelParameters};
use docqa::ai::providers::create_provider;
use docqa::ai::rag::{
    AnswerComposer, Embedder, GenerationBackend, ProviderEmbeddingBackend,
    ProviderGenerationBackend, RAGService, RetrievalResult, Retriever, Segmenter, VectorIndex,
};
use docqa::utils::select;
use docqa::Settings;

#[derive(Parser, Debug)]
#[command(name = "docqa", version, about = "Ask questions answered only from a document")]
struct Cli {
    /// JSON settings file; DOCQA_* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment and embed a document, then save the index
    Index {
        document: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the passages most similar to a question
    Search {
        #[command(flatten)]
        source: SourceArgs,
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Answer a question from the document
    Ask {
        #[command(flatten)]
        source: SourceArgs,
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Wait for the full answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Answer questions read line by line from stdin
    Chat {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Plain text document, indexed on the fly
    #[arg(long)]
    document: Option<PathBuf>,
    /// Index written by `docqa index`
    #[arg(long)]
    index: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn embedder(settings: &Settings, provider: Arc<dyn AIProvider>) -> Embedder {
    let backend = ProviderEmbeddingBackend::new(provider, settings.embedding.model.clone());
    Embedder::new(Arc::new(backend))
        .with_batch_size(settings.embedding.batch_size)
        .with_timeout(settings.embedding.timeout_seconds.map(Duration::from_secs))
}

fn generator(settings: &Settings, provider: Arc<dyn AIProvider>) -> Result<Arc<dyn GenerationBackend>> {
    let generation = &settings.generation;
    let weights: Vec<f64> = generation.models.iter().map(|m| m.weight).collect();
    let model = select(&generation.models, &weights, &mut rand::thread_rng())
        .context("Failed to select a generation model")?;
    info!("Using generation model {}", model.name);

    let parameters = ModelParameters {
        temperature: generation.temperature,
        max_tokens: generation.max_output_tokens,
        ..Default::default()
    };
    let backend = ProviderGenerationBackend::new(provider, model.name.clone())
        .with_system_prompt(generation.system_prompt.clone())
        .with_parameters(Some(parameters))
        .with_timeout(generation.timeout_seconds.map(Duration::from_secs));
    Ok(Arc::new(backend))
}

async fn build_retriever(source: &SourceArgs, settings: &Settings, embedder: Embedder) -> Result<Retriever> {
    match (&source.document, &source.index) {
        (Some(document), _) => {
            let text = read_document(document)?;
            let segmenter = Segmenter::new(settings.retrieval.min_passage_chars);
            Ok(Retriever::from_document(&text, &segmenter, embedder).await?)
        }
        (None, Some(index_path)) => {
            let (index, metadata) = VectorIndex::load(index_path)
                .with_context(|| format!("Failed to load index {}", index_path.display()))?;
            if metadata.embedding_model != settings.embedding.model {
                warn!(
                    "Index was built with {} but queries will use {}",
                    metadata.embedding_model, settings.embedding.model
                );
            }
            debug!("Index built at {}", metadata.built_at);
            Ok(Retriever::new(embedder, index))
        }
        (None, None) => bail!("Either --document or --index is required"),
    }
}

fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read document {}", path.display()))
}

async fn build_service(
    source: &SourceArgs,
    settings: &Settings,
    provider: Arc<dyn AIProvider>,
    top_k: usize,
) -> Result<RAGService> {
    let retriever = build_retriever(source, settings, embedder(settings, provider.clone())).await?;
    let composer = AnswerComposer::new(generator(settings, provider)?)
        .with_max_context_tokens(settings.retrieval.max_context_tokens);
    Ok(RAGService::new(retriever, composer).with_top_k(top_k))
}

fn print_sources(sources: &RetrievalResult) {
    for source in sources {
        println!("[{}] {:.4}  {}", source.passage.id, source.score, source.passage.text);
    }
}

fn log_sources(sources: &RetrievalResult) {
    for source in sources {
        debug!("Source passage {} (score {:.4})", source.passage.id, source.score);
    }
}

async fn answer(service: &RAGService, question: &str, stream: bool) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    if stream {
        let (sources, mut chunks) = service.ask_stream(question).await?;
        log_sources(&sources);
        while let Some(chunk) = chunks.next().await {
            stdout.write_all(chunk?.as_bytes()).await?;
            stdout.flush().await?;
        }
        stdout.write_all(b"\n").await?;
    } else {
        let response = service.ask(question).await?;
        log_sources(&response.sources);
        stdout.write_all(response.answer.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;
    Ok(())
}

async fn chat(service: &RAGService, stream: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Ready for questions; type `exit` or send EOF to quit");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, ending session");
                break;
            }
        };
        let Some(line) = line else { break };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            break;
        }
        if let Err(e) = answer(service, question, stream).await {
            error!("Failed to answer: {:#}", e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let provider = create_provider(&settings.provider)
        .map_err(|e| anyhow::anyhow!("Failed to create provider: {}", e))?;

    match cli.command {
        Command::Index { document, out } => {
            let text = read_document(&document)?;
            let segmenter = Segmenter::new(settings.retrieval.min_passage_chars);
            let retriever = Retriever::from_document(&text, &segmenter, embedder(&settings, provider)).await?;
            retriever.index().save(&out, &settings.embedding.model)?;
            println!("{} passages indexed to {}", retriever.index().len(), out.display());
        }
        Command::Search { source, question, top_k } => {
            let retriever = build_retriever(&source, &settings, embedder(&settings, provider)).await?;
            let k = top_k.unwrap_or(settings.retrieval.top_k);
            print_sources(&retriever.retrieve(&question, k).await?);
        }
        Command::Ask { source, question, top_k, no_stream } => {
            let k = top_k.unwrap_or(settings.retrieval.top_k);
            let service = build_service(&source, &settings, provider, k).await?;
            answer(&service, &question, settings.generation.stream && !no_stream).await?;
        }
        Command::Chat { source, top_k } => {
            let k = top_k.unwrap_or(settings.retrieval.top_k);
            let service = build_service(&source, &settings, provider, k).await?;
            chat(&service, settings.generation.stream).await?;
        }
    }

    Ok(())
}
