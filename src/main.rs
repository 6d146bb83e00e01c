use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use docrag::history::{ConversationLog, Role};
use docrag::{EmbeddingProvider, RagConfig, RagService};

#[derive(Parser)]
#[command(name = "docrag")]
#[command(about = "Answer questions from a single reference document", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML config file; flags and environment override its values
    #[arg(long, env = "DOCRAG_CONFIG")]
    config: Option<PathBuf>,

    /// Source document (PDF or text)
    #[arg(long, env = "DOCRAG_SOURCE")]
    source: Option<PathBuf>,

    /// Directory holding the persisted index
    #[arg(long, env = "DOCRAG_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    #[arg(long, env = "DOCRAG_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    #[arg(long, env = "DOCRAG_CHUNK_OVERLAP")]
    chunk_overlap: Option<usize>,

    /// Chunks retrieved per question
    #[arg(short, long, env = "DOCRAG_K")]
    k: Option<usize>,

    #[arg(long, env = "DOCRAG_TEMPERATURE")]
    temperature: Option<f32>,

    #[arg(long, env = "DOCRAG_MAX_TOKENS")]
    max_tokens: Option<usize>,

    /// Embedding backend: gemini or hashing
    #[arg(long, env = "DOCRAG_EMBEDDING_PROVIDER")]
    embedding_provider: Option<EmbeddingProvider>,

    #[arg(long, env = "DOCRAG_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    #[arg(long, env = "DOCRAG_GENERATION_MODEL")]
    generation_model: Option<String>,

    /// Refuse without calling the model when the best chunk is less similar than this
    #[arg(long, env = "DOCRAG_MIN_SIMILARITY")]
    min_similarity: Option<f32>,

    /// Re-embed the document even if a matching index exists
    #[arg(long, default_value_t = false)]
    rebuild: bool,

    /// Per-question timeout
    #[arg(long, env = "DOCRAG_ANSWER_TIMEOUT_SECS", default_value_t = 60)]
    answer_timeout_secs: u64,

    /// Answer one question and exit instead of starting the prompt loop
    #[arg(short, long)]
    question: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<(RagConfig, Duration, Option<String>)> {
        let mut config = match &self.config {
            Some(path) => RagConfig::from_yaml_file(path)?,
            None => RagConfig::default(),
        };

        if let Some(v) = self.source {
            config.source_document_path = v;
        }
        if let Some(v) = self.index_dir {
            config.index_store_path = v;
        }
        if let Some(v) = self.chunk_size {
            config.chunk_size = v;
        }
        if let Some(v) = self.chunk_overlap {
            config.chunk_overlap = v;
        }
        if let Some(v) = self.k {
            config.retrieval_k = v;
        }
        if let Some(v) = self.temperature {
            config.generation_temperature = v;
        }
        if let Some(v) = self.max_tokens {
            config.generation_max_tokens = v;
        }
        if let Some(v) = self.embedding_provider {
            config.embedding_provider = v;
        }
        if let Some(v) = self.embedding_model {
            config.embedding_model_id = v;
        }
        if let Some(v) = self.generation_model {
            config.generation_model_id = v;
        }
        if self.min_similarity.is_some() {
            config.min_similarity = self.min_similarity;
        }
        config.force_rebuild |= self.rebuild;

        Ok((
            config,
            Duration::from_secs(self.answer_timeout_secs),
            self.question,
        ))
    }
}

/// Answer under a caller-side timeout and record the exchange. A failure is
/// returned as the user-facing message, distinct from a refusal.
async fn ask(
    service: &RagService,
    log: &mut ConversationLog,
    question: &str,
    timeout: Duration,
) -> std::result::Result<String, String> {
    log.push(Role::User, question);
    let reply = match tokio::time::timeout(timeout, service.answer(question)).await {
        Ok(Ok(answer)) => Ok(answer),
        Ok(Err(e)) => {
            error!("answer failed: {e}");
            Err(format!(
                "the question could not be answered right now ({} failure)",
                e.kind()
            ))
        }
        Err(_) => Err(format!("no answer within {} seconds", timeout.as_secs())),
    };
    let shown = match &reply {
        Ok(answer) => answer.clone(),
        Err(message) => format!("Error: {message}."),
    };
    log.push(Role::Assistant, shown);
    reply
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docrag=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config, timeout, single_question) = Cli::parse().into_config()?;

    info!("Building index for {}", config.source_document_path.display());
    let service = RagService::build(&config)
        .await
        .context("failed to initialize the RAG service")?;

    let mut log = ConversationLog::new();

    if let Some(question) = single_question {
        return match ask(&service, &mut log, &question, timeout).await {
            Ok(answer) => {
                println!("{answer}");
                Ok(())
            }
            Err(message) => bail!(message),
        };
    }

    println!("Ready. Ask about the document (/history shows the conversation, Ctrl+D exits).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break; // EOF (Ctrl+D)
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/history" {
            println!("{}\n", log.render());
            continue;
        }

        match ask(&service, &mut log, question, timeout).await {
            Ok(answer) => println!("{answer}\n"),
            Err(message) => println!("Error: {message}.\n"),
        }
    }

    Ok(())
}
