use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use revitpy_core::impls::{InMemoryDocument, InMemoryElementProvider};
use revitpy_core::ports::DocumentSession;
use revitpy_core::{
    AsyncRevit, BatchOptions, BoxError, FilterOperator, RuntimeConfig, TransactionId,
    TransactionOptions,
};

#[derive(Debug, Deserialize)]
struct WallRecord {
    id: u64,
    h: f64,
}

/// トランザクションをログに出してから InMemoryDocument に委譲する
struct TracingDocument {
    inner: InMemoryDocument,
}

#[async_trait]
impl DocumentSession for TracingDocument {
    async fn begin_transaction(&self, name: &str) -> Result<TransactionId, BoxError> {
        let id = self.inner.begin_transaction(name).await?;
        info!(%id, name, "begin");
        Ok(id)
    }

    async fn commit(&self, transaction: TransactionId) -> Result<(), BoxError> {
        info!(id = %transaction, "commit");
        self.inner.commit(transaction).await
    }

    async fn rollback(&self, transaction: TransactionId) -> Result<(), BoxError> {
        info!(id = %transaction, "rollback");
        self.inner.rollback(transaction).await
    }
}

fn sample_elements() -> Vec<Value> {
    (0..12)
        .map(|i| {
            let kind = if i % 3 == 0 { "Door" } else { "Wall" };
            json!({ "id": i, "type": kind, "h": 2.5 + i as f64, "level": format!("L{}", i % 2) })
        })
        .collect()
}

fn load_config() -> Result<RuntimeConfig, BoxError> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "loading config");
            Ok(RuntimeConfig::from_path(path)?)
        }
        None => Ok(RuntimeConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) InMemory の provider / document で facade を用意
    let config = load_config()?;
    let revit = AsyncRevit::new(
        config,
        Arc::new(InMemoryElementProvider::new(sample_elements())),
        Arc::new(TracingDocument {
            inner: InMemoryDocument::new(),
        }),
    );
    revit.start().await;

    // (B) query（Wall のうち h >= 6 を高い順に）
    let tall_walls = revit
        .query_of_type("Wall")
        .filter("h", FilterOperator::GreaterEqual, 6.0)?
        .order_by_descending("h")
        .to_list();
    info!(count = tall_walls.len(), "tall walls selected");

    // (C) progress 付きの batch update
    let progress = revit.progress_reporter(0);
    progress.add_callback(|report| {
        info!(
            current = report.current,
            total = report.total,
            state = ?report.state,
            message = report.message.as_deref().unwrap_or(""),
            "progress"
        );
    });
    let results = revit
        .batch_update(
            tall_walls,
            |element| async move {
                let wall: WallRecord = serde_json::from_value(element)?;
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, BoxError>(json!({ "id": wall.id, "h": wall.h * 1.1 }))
            },
            BatchOptions::from_config(&revit.config().batch)
                .with_name("raise_walls")
                .with_batch_size(3)
                .with_progress(progress),
        )
        .await?;
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    info!(succeeded, total = results.len(), "batch finished");

    // (D) 2回失敗するバックグラウンド処理（retry で成功させる）
    let remaining_failures = Arc::new(AtomicU32::new(2));
    let task = revit
        .task(
            "flaky_sync",
            revitpy_core::Work::from_async(move |ctx| {
                let remaining = Arc::clone(&remaining_failures);
                async move {
                    let left = remaining.load(Ordering::SeqCst);
                    if left > 0 {
                        remaining.fetch_sub(1, Ordering::SeqCst);
                        return Err(BoxError::from(format!("intentional failure (left={left})")));
                    }
                    Ok::<_, BoxError>(json!({ "attempt": ctx.attempt() }))
                }
            }),
        )
        .with_retry(2, Duration::from_millis(50));
    let id = revit.enqueue(task).await?;
    let result = revit.wait_for(id, Some(Duration::from_secs(5))).await?;
    info!(status = ?result.status(), attempts = result.attempts(), "background task done");

    // (E) スコープ付き transaction
    let renamed = revit
        .transaction("rename levels", TransactionOptions::default(), |id| async move {
            info!(%id, "renaming inside transaction");
            Ok::<_, BoxError>(2)
        })
        .await?;
    info!(renamed, "transaction committed");

    let stats = revit.queue().stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    revit.stop(Some(Duration::from_secs(2))).await;
    Ok(())
}
