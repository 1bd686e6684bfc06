//! Reconciliation: diff the docs-root snapshot against the store and close
//! the gap through the same queue the live watcher feeds, so every indexer
//! invariant applies uniformly.

use crate::debounce::DeliveryQueue;
use crate::indexer::{IndexContext, IndexError, IndexOutcome, Indexer};
use crate::scanner::Scanner;
use crate::tracker::FailedFilesTracker;
use crate::watcher::{FileEvent, FileEventKind};
use db::Store;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// What a reconciliation pass scheduled.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
  pub upserts_scheduled: usize,
  pub deletes_scheduled: usize,
  pub pending_drained: usize,
  pub external_indexed: usize,
  pub external_failed: usize,
}

pub struct Reconciler {
  store: Store,
  tracker: Arc<FailedFilesTracker>,
}

impl Reconciler {
  pub fn new(store: Store, tracker: Arc<FailedFilesTracker>) -> Self {
    Self { store, tracker }
  }

  /// Diff disk against store and push the difference into the delivery
  /// queue as synthetic watcher events. Also drains the pending tracker.
  pub async fn reconcile(&self, ctx: &IndexContext, queue: &DeliveryQueue) -> Result<ReconcileReport, IndexError> {
    let mut report = ReconcileReport::default();

    let on_disk = ctx.scanner.scan(&ctx.docs_root);
    let disk_hashes: HashMap<&str, &str> = on_disk
      .iter()
      .map(|f| (f.relative_path.as_str(), f.content_hash.as_str()))
      .collect();

    let filter = ctx.filter();
    let stored = self.store.list_document_hashes(&filter).await?;
    let stored_hashes: HashMap<&str, &str> = stored.iter().map(|(p, h)| (p.as_str(), h.as_str())).collect();

    // New or modified on disk
    for file in &on_disk {
      let needs_index = match stored_hashes.get(file.relative_path.as_str()) {
        None => true,
        Some(stored_hash) => *stored_hash != file.content_hash,
      };
      if needs_index {
        let kind = if stored_hashes.contains_key(file.relative_path.as_str()) {
          FileEventKind::Changed
        } else {
          FileEventKind::Created
        };
        queue.push(FileEvent {
          path: file.absolute_path.clone(),
          kind,
        });
        report.upserts_scheduled += 1;
      }
    }

    // Orphan rows in the store
    for (path, _) in &stored {
      if !disk_hashes.contains_key(path.as_str()) {
        queue.push(FileEvent {
          path: ctx.docs_root.join(path),
          kind: FileEventKind::Deleted,
        });
        report.deletes_scheduled += 1;
      }
    }

    // Drain the pending tracker through the same queue
    for (path, kind) in self.tracker.pending_list() {
      queue.push(FileEvent {
        path: ctx.docs_root.join(&path),
        kind,
      });
      report.pending_drained += 1;
    }

    info!(
      upserts = report.upserts_scheduled,
      deletes = report.deletes_scheduled,
      drained = report.pending_drained,
      "Reconciliation scheduled"
    );
    Ok(report)
  }

  /// Reconcile the read-only external docs tree. External files are
  /// indexed inline (no watcher covers them), diffed by content hash.
  pub async fn reconcile_external(
    &self,
    indexer: &Indexer,
    ctx: &IndexContext,
    external_scanner: &Scanner,
    external_root: &std::path::Path,
  ) -> Result<ReconcileReport, IndexError> {
    let mut report = ReconcileReport::default();

    let external_ctx = IndexContext {
      tenant: ctx.tenant.clone(),
      docs_root: external_root.to_path_buf(),
      scanner: ctx.scanner.clone(),
    };

    let on_disk = external_scanner.scan(external_root);
    let filter = ctx.filter();
    let stored = self.store.list_external_document_hashes(&filter).await?;
    let stored_hashes: HashMap<&str, &str> = stored.iter().map(|(p, h)| (p.as_str(), h.as_str())).collect();

    for file in &on_disk {
      let unchanged = stored_hashes
        .get(file.relative_path.as_str())
        .is_some_and(|h| *h == file.content_hash);
      if unchanged {
        continue;
      }
      match indexer.index_external(&external_ctx, file).await {
        Ok(IndexOutcome::Indexed { .. }) => report.external_indexed += 1,
        Ok(_) => {}
        Err(e) => {
          warn!(document_path = %file.relative_path, error = %e, "External document failed to index");
          report.external_failed += 1;
        }
      }
    }

    let disk_paths: HashMap<&str, ()> = on_disk.iter().map(|f| (f.relative_path.as_str(), ())).collect();
    for (path, _) in &stored {
      if !disk_paths.contains_key(path.as_str()) {
        self.store.delete_external_document_by_path(&filter, path).await?;
        report.deletes_scheduled += 1;
      }
    }

    Ok(report)
  }
}
