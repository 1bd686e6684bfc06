use anyhow::{Context, Result};
use clap::Parser;
use daemon::{Engine, Router, StdioServer};
use db::{PostgresOptions, Store};
use embedding::{EmbeddingProvider, HttpEmbeddingClient, ResiliencePipeline, ResilientEmbedding};
use llm::{ChatProvider, HttpChatClient, ResilientChat};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const EMBED_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const CHAT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Compound documentation indexing and retrieval service.
///
/// Spawned as a child process; speaks line-delimited JSON-RPC on stdin and
/// stdout. All logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "compound-docs", version)]
struct Cli {
  /// Postgres host for the vector/metadata store
  #[arg(long, default_value = "127.0.0.1")]
  postgres_host: String,

  /// Postgres port
  #[arg(long, default_value_t = 5433, value_parser = clap::value_parser!(u16).range(1..))]
  postgres_port: u16,

  /// Postgres database name
  #[arg(long, default_value = "compounding")]
  postgres_database: String,

  /// Postgres user
  #[arg(long, default_value = "postgres")]
  postgres_user: String,

  /// Postgres password
  #[arg(long, default_value = "")]
  postgres_password: String,

  /// Embedding/chat model host
  #[arg(long, default_value = "127.0.0.1")]
  embedding_host: String,

  /// Embedding/chat model port
  #[arg(long, default_value_t = 11435, value_parser = clap::value_parser!(u16).range(1..))]
  embedding_port: u16,
}

/// Logging goes to stderr only; stdout belongs to the protocol.
fn init_logging() {
  let filter = tracing_subscriber::EnvFilter::from_default_env()
    .add_directive(tracing::Level::INFO.into())
    .add_directive("sqlx=warn".parse().expect("directive"))
    .add_directive("hyper=warn".parse().expect("directive"))
    .add_directive("reqwest=warn".parse().expect("directive"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_ansi(false)
    .init();
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging();

  let embedding_client = HttpEmbeddingClient::new().with_host(&cli.embedding_host, cli.embedding_port);
  info!(
    version = env!("CARGO_PKG_VERSION"),
    embedding_model = embedding_client.model_id(),
    embedding_dimensions = embedding_client.dimensions(),
    "Starting compound-docs service"
  );

  let postgres = PostgresOptions {
    host: cli.postgres_host,
    port: cli.postgres_port,
    database: cli.postgres_database,
    user: cli.postgres_user,
    password: cli.postgres_password,
  };

  let store = Store::connect(&postgres, embedding_client.dimensions())
    .await
    .context("Failed to connect to the store")?;

  let embed_pipeline = Arc::new(ResiliencePipeline::with_defaults(EMBED_CALL_TIMEOUT));
  let boxed_embedder: Box<dyn EmbeddingProvider> = Box::new(embedding_client);
  let embedder = Arc::new(ResilientEmbedding::new(boxed_embedder, embed_pipeline));

  let chat_client = HttpChatClient::new().with_host(&cli.embedding_host, cli.embedding_port);
  let chat_pipeline = Arc::new(ResiliencePipeline::with_defaults(CHAT_CALL_TIMEOUT));
  let boxed_chat: Box<dyn ChatProvider> = Box::new(chat_client);
  let chat = Arc::new(ResilientChat::new(boxed_chat, chat_pipeline));

  let engine = Arc::new(Engine::new(store, embedder, chat));
  let router = Arc::new(Router::new(engine));

  let server = StdioServer::new(router);
  server.run().await.context("Server failed")?;

  Ok(())
}
