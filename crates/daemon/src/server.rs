//! Line-delimited JSON-RPC over the parent process's standard streams.
//!
//! stdout carries protocol frames only; all logging goes to stderr.
//! Requests dispatch concurrently; a single writer task serializes
//! responses. EOF on stdin, a `shutdown` request, or ctrl-c all end the
//! session the same way.

use crate::router::{Request, Response, Router};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

pub struct StdioServer {
  router: Arc<Router>,
}

impl StdioServer {
  pub fn new(router: Arc<Router>) -> Self {
    Self { router }
  }

  /// Serve until the client closes stdin, requests shutdown, or the
  /// process receives ctrl-c.
  pub async fn run(&self) -> Result<(), ServerError> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    // Single writer keeps responses whole even with concurrent handlers
    let writer = tokio::spawn(async move {
      let mut stdout = tokio::io::stdout();
      while let Some(frame) = out_rx.recv().await {
        if stdout.write_all(frame.as_bytes()).await.is_err() {
          break;
        }
        if stdout.write_all(b"\n").await.is_err() {
          break;
        }
        if stdout.flush().await.is_err() {
          break;
        }
      }
    });

    let mut shutdown_rx = self.router.shutdown_signal();

    info!("Serving on standard streams");

    loop {
      tokio::select! {
        line = lines.next_line() => {
          match line? {
            None => {
              info!("Client closed the channel");
              break;
            }
            Some(line) => {
              let trimmed = line.trim();
              if trimmed.is_empty() {
                continue;
              }

              let request: Request = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                  warn!(error = %e, "Unparseable request frame");
                  let response = Response::error(None, -32700, &format!("Parse error: {}", e));
                  send_response(&out_tx, &response).await;
                  continue;
                }
              };

              debug!(tool_name = %request.method, "Request received");
              let router = Arc::clone(&self.router);
              let out = out_tx.clone();
              tokio::spawn(async move {
                let response = router.handle(request).await;
                send_response(&out, &response).await;
              });
            }
          }
        }
        _ = shutdown_rx.recv() => {
          info!("Shutdown requested");
          break;
        }
        _ = tokio::signal::ctrl_c() => {
          info!("Interrupt received");
          break;
        }
      }
    }

    // Orderly teardown: deactivate and let in-flight work settle
    self.router.engine().shutdown().await;

    drop(out_tx);
    let _ = writer.await;
    Ok(())
  }
}

async fn send_response(out: &mpsc::Sender<String>, response: &Response) {
  match serde_json::to_string(response) {
    Ok(json) => {
      if out.send(json).await.is_err() {
        error!("Response writer is gone");
      }
    }
    Err(e) => error!(error = %e, "Failed to serialize response"),
  }
}
