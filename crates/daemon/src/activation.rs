//! Activation orchestration: the ordered sequence that brings a project
//! online, and its inverse.

use crate::dimension::{validate_dimensions, warn_validation_skipped, DEFAULT_VALIDATION_TIMEOUT};
use crate::engine::{ActivationTasks, Engine};
use crate::session::ActiveSession;
use compound_core::{compute_path_hash, derive_repo_root, EngineError, ProjectConfig, TenantKey};
use index::{DeliveryQueue, Debouncer, FileWatcher, IndexContext, Indexer, Reconciler, Scanner};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ActivationSummary {
  pub project_name: String,
  pub branch_name: String,
  pub path_hash: String,
  pub docs_root: String,
  pub reconcile_upserts: usize,
  pub reconcile_deletes: usize,
  pub pending_drained: usize,
}

impl Engine {
  /// Activate a project. A previously active project is deactivated first;
  /// the two sessions never overlap.
  pub async fn activate(&self, config_path: &Path, branch_name: &str) -> Result<ActivationSummary, EngineError> {
    // 1-3: resolve config, repo root, tenant key
    let config = ProjectConfig::load(config_path)?;
    let repo_root = derive_repo_root(config_path);
    let path_hash = compute_path_hash(&repo_root);
    let project_name = config.resolve_project_name(&repo_root);
    let tenant = TenantKey::new(project_name.clone(), branch_name.to_string(), path_hash.clone());
    let docs_root = config.resolved_docs_root(&repo_root);

    warn_missing_custom_type_files(&config, &repo_root);

    // 4: tear down any existing session first
    if self.session.is_active() {
      info!("Another project is active, deactivating it first");
      self.deactivate().await?;
    }

    // 5: tenant registry + config switch
    self
      .store
      .upsert_tenant(&tenant, &repo_root.to_string_lossy())
      .await
      .map_err(|e| EngineError::Database(e.to_string()))?;
    self.config.switch_to(config.clone());
    self.apply_resilience_config(&config);

    // 6: dimension validation
    if config.skip_dimension_validation {
      warn_validation_skipped();
    } else {
      validate_dimensions(&self.store, &self.embedder, DEFAULT_VALIDATION_TIMEOUT).await?;
    }

    // 7: reconciliation through the shared queue
    let scanner = Scanner::new(&config.include_patterns, &config.exclude_patterns)
      .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
    let ctx = Engine::build_index_ctx(tenant.clone(), docs_root.clone(), scanner);

    let reconciler = Reconciler::new(self.store.clone(), self.tracker.clone());
    let report = reconciler
      .reconcile(&ctx, &self.queue)
      .await
      .map_err(|e| EngineError::Database(e.to_string()))?;

    if let Some(ref external) = config.external_docs {
      let external_scanner = Scanner::new(&external.include_patterns, &external.exclude_patterns)
        .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
      let external_root = if external.path.is_absolute() {
        external.path.clone()
      } else {
        repo_root.join(&external.path)
      };
      match reconciler
        .reconcile_external(&self.indexer, &ctx, &external_scanner, &external_root)
        .await
      {
        Ok(ext) => debug!(indexed = ext.external_indexed, failed = ext.external_failed, "External docs reconciled"),
        Err(e) => warn!(error = %e, "External docs reconciliation failed"),
      }
    }

    // 8: watcher + indexer worker
    let tasks = start_background_tasks(self, ctx.clone(), config.file_watcher.debounce_ms);
    {
      let mut guard = self.tasks.lock().expect("tasks lock poisoned");
      *guard = Some(tasks);
    }
    {
      let mut guard = self.index_ctx.lock().expect("index ctx lock poisoned");
      *guard = Some(ctx);
    }

    // 9: commit the session
    self.session.set_active(ActiveSession {
      config_path: config_path.to_path_buf(),
      repo_root: repo_root.clone(),
      docs_root: docs_root.clone(),
      tenant: tenant.clone(),
      activated_at: chrono::Utc::now(),
    });

    info!(
      project_name = %tenant.project_name,
      branch_name = %tenant.branch_name,
      path_hash = %tenant.path_hash,
      "Project activated"
    );

    Ok(ActivationSummary {
      project_name: tenant.project_name,
      branch_name: tenant.branch_name,
      path_hash: tenant.path_hash,
      docs_root: docs_root.to_string_lossy().to_string(),
      reconcile_upserts: report.upserts_scheduled,
      reconcile_deletes: report.deletes_scheduled,
      pending_drained: report.pending_drained,
    })
  }

  /// Deactivate the current project, reversing activation in inverse
  /// order. A no-op when nothing is active.
  pub async fn deactivate(&self) -> Result<(), EngineError> {
    let Some(session) = self.session.clear_active() else {
      return Ok(());
    };

    // Stop watcher and worker, bounded wait
    let tasks = {
      let mut guard = self.tasks.lock().expect("tasks lock poisoned");
      guard.take()
    };
    if let Some(tasks) = tasks {
      tasks.watch_cancel.store(true, Ordering::SeqCst);
      let _ = tokio::time::timeout(Duration::from_secs(5), tasks.watch_handle).await;
      tasks.worker_handle.abort();
      let _ = tasks.worker_handle.await;
    }
    {
      let mut guard = self.index_ctx.lock().expect("index ctx lock poisoned");
      *guard = None;
    }

    // Refresh last-seen, then drop derived state
    if let Err(e) = self.store.touch_tenant(&session.tenant).await {
      warn!(error = %e, "Failed to refresh tenant timestamps");
    }
    self.queue.clear();
    self.graph.clear();
    self.tracker.clear();
    self.config.clear();

    info!(
      project_name = %session.tenant.project_name,
      branch_name = %session.tenant.branch_name,
      "Project deactivated"
    );
    Ok(())
  }

  /// Full shutdown: deactivate, then let in-flight work settle.
  pub async fn shutdown(&self) {
    if let Err(e) = self.deactivate().await {
      warn!(error = %e, "Deactivation during shutdown failed");
    }
    info!("Engine shutdown complete");
  }

  /// Apply the project's resilience settings to both outbound pipelines.
  /// The circuit resets with the switch, like every other derived cache.
  fn apply_resilience_config(&self, config: &ProjectConfig) {
    let r = &config.resilience;
    let limiter = embedding::LimiterConfig {
      max_parallelism: r.concurrency.max_parallelism,
      max_queue: r.concurrency.max_queue,
    };
    let breaker = embedding::BreakerConfig {
      sampling_duration: Duration::from_secs(r.circuit_breaker.sampling_duration_secs),
      minimum_throughput: r.circuit_breaker.minimum_throughput,
      failure_ratio: r.circuit_breaker.failure_ratio,
      break_duration: Duration::from_secs(r.circuit_breaker.break_duration_secs),
    };
    let retry = embedding::RetryPolicy {
      max_attempts: r.retry.max_attempts,
      initial_delay: Duration::from_millis(r.retry.initial_delay_ms),
      ..Default::default()
    };

    self.embed_pipeline.reconfigure(limiter.clone(), breaker.clone(), retry.clone());
    self.chat_pipeline.reconfigure(limiter, breaker, retry);
  }

  /// Drain the pending tracker when the embedding host recovers.
  pub async fn drain_pending(&self) -> Result<usize, EngineError> {
    let Some(ctx) = self.current_index_ctx() else {
      return Err(EngineError::ProjectNotActivated);
    };

    let reconciler = Reconciler::new(self.store.clone(), self.tracker.clone());
    let report = reconciler
      .reconcile(&ctx, &self.queue)
      .await
      .map_err(|e| EngineError::Database(e.to_string()))?;
    Ok(report.pending_drained + report.upserts_scheduled)
  }
}

fn warn_missing_custom_type_files(config: &ProjectConfig, repo_root: &Path) {
  for custom in &config.custom_doc_types {
    let folder = repo_root.join(&custom.folder);
    if !folder.exists() {
      warn!(doc_type = %custom.name, folder = %folder.display(), "Custom doc type folder does not exist");
    }
    let schema = repo_root.join(&custom.schema_file);
    if !schema.exists() {
      warn!(doc_type = %custom.name, schema_file = %schema.display(), "Custom doc type schema file does not exist");
    }
  }
}

/// Spawn the blocking watch loop and the async indexer worker for one
/// activation.
fn start_background_tasks(engine: &Engine, ctx: Arc<IndexContext>, debounce_ms: u64) -> ActivationTasks {
  let watch_cancel = Arc::new(AtomicBool::new(false));

  let watch_handle = {
    let cancel = watch_cancel.clone();
    let queue = engine.queue.clone();
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || run_watch_loop(ctx, queue, debounce_ms, cancel))
  };

  let worker_handle = {
    let queue = engine.queue.clone();
    let indexer = engine.indexer.clone();
    let ctx = ctx.clone();
    tokio::spawn(async move { run_indexer_worker(ctx, queue, indexer).await })
  };

  ActivationTasks {
    watch_cancel,
    watch_handle,
    worker_handle,
  }
}

/// Blocking loop: poll OS events, debounce, deliver ready events into the
/// bounded queue. Runs until cancelled.
fn run_watch_loop(ctx: Arc<IndexContext>, queue: Arc<DeliveryQueue>, debounce_ms: u64, cancel: Arc<AtomicBool>) {
  let watcher = match FileWatcher::new(&ctx.docs_root) {
    Ok(w) => w,
    Err(e) => {
      warn!(docs_root = %ctx.docs_root.display(), error = %e, "Failed to start file watcher");
      return;
    }
  };
  let mut debouncer = Debouncer::new(Duration::from_millis(debounce_ms));

  info!(docs_root = %ctx.docs_root.display(), debounce_ms, "Watch loop started");

  while !cancel.load(Ordering::SeqCst) {
    for event in watcher.poll() {
      // Glob filtering happens here so non-corpus churn never reaches
      // the debounce table
      match ctx.relative_path(&event.path) {
        Some(relative) if ctx.scanner.matches(&relative) => debouncer.observe(event),
        _ => {}
      }
    }

    for ready in debouncer.collect_ready() {
      queue.push(ready);
    }

    std::thread::sleep(Duration::from_millis(50));
  }

  debouncer.clear();
  info!("Watch loop stopped");
}

/// Single worker draining the queue serially; file-change order dictates
/// store mutation order.
async fn run_indexer_worker(ctx: Arc<IndexContext>, queue: Arc<DeliveryQueue>, indexer: Arc<Indexer>) {
  info!("Indexer worker started");
  loop {
    let event = queue.pop().await;
    let outcome = indexer.handle_event(&ctx, &event).await;
    debug!(path = ?event.path, outcome = ?outcome, "Indexer event processed");
  }
}
