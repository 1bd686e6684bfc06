//! The explicit shared-state handle passed to every handler. There are no
//! globals: anything tenant-scoped flows from here as arguments.

use crate::provider::ConfigProvider;
use crate::session::SessionState;
use db::Store;
use embedding::ResiliencePipeline;
use index::{DeliveryQueue, FailedFilesTracker, IndexContext, Indexer, LinkGraph, Scanner, SharedEmbedder};
use retrieval::{RagGenerator, RetrievalPlanner, SharedChat};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Handles to the background tasks of one activation.
pub(crate) struct ActivationTasks {
  pub watch_cancel: Arc<AtomicBool>,
  pub watch_handle: JoinHandle<()>,
  pub worker_handle: JoinHandle<()>,
}

pub struct Engine {
  pub(crate) store: Store,
  pub(crate) embedder: SharedEmbedder,
  pub(crate) session: SessionState,
  pub(crate) config: ConfigProvider,
  pub(crate) graph: Arc<LinkGraph>,
  pub(crate) tracker: Arc<FailedFilesTracker>,
  pub(crate) queue: Arc<DeliveryQueue>,
  pub(crate) indexer: Arc<Indexer>,
  pub(crate) planner: RetrievalPlanner,
  pub(crate) generator: RagGenerator,
  pub(crate) embed_pipeline: Arc<ResiliencePipeline>,
  pub(crate) chat_pipeline: Arc<ResiliencePipeline>,
  pub(crate) tasks: Mutex<Option<ActivationTasks>>,
  /// The index context of the current activation, shared with the worker.
  pub(crate) index_ctx: Mutex<Option<Arc<IndexContext>>>,
}

impl Engine {
  pub fn new(store: Store, embedder: SharedEmbedder, chat: SharedChat) -> Self {
    let graph = Arc::new(LinkGraph::new());
    let tracker = Arc::new(FailedFilesTracker::new());
    let queue = Arc::new(DeliveryQueue::default());
    let indexer = Arc::new(Indexer::new(
      store.clone(),
      embedder.clone(),
      graph.clone(),
      tracker.clone(),
    ));
    let planner = RetrievalPlanner::new(store.clone(), embedder.clone(), graph.clone());
    let embed_pipeline = embedder.pipeline().clone();
    let chat_pipeline = chat.pipeline().clone();
    let generator = RagGenerator::new(chat);

    Self {
      store,
      embedder,
      session: SessionState::new(),
      config: ConfigProvider::new(),
      graph,
      tracker,
      queue,
      indexer,
      planner,
      generator,
      embed_pipeline,
      chat_pipeline,
      tasks: Mutex::new(None),
      index_ctx: Mutex::new(None),
    }
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  pub fn session(&self) -> &SessionState {
    &self.session
  }

  pub fn config(&self) -> &ConfigProvider {
    &self.config
  }

  pub fn embedder(&self) -> &SharedEmbedder {
    &self.embedder
  }

  pub(crate) fn current_index_ctx(&self) -> Option<Arc<IndexContext>> {
    self.index_ctx.lock().expect("index ctx lock poisoned").clone()
  }

  /// Build the index context for an activation from config + tenant.
  pub(crate) fn build_index_ctx(
    tenant: compound_core::TenantKey,
    docs_root: std::path::PathBuf,
    scanner: Scanner,
  ) -> Arc<IndexContext> {
    Arc::new(IndexContext {
      tenant,
      docs_root,
      scanner: Arc::new(scanner),
    })
  }
}
