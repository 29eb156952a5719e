//! Classifier pool.
//! Fans the 64 cells out in batches of 8 across a fixed set of workers, each
//! batch on its own blocking task, and joins them all before returning.
//! A failing batch fails the whole board: callers either get 64 labels in
//! input order or an error, never a partial board.

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::debug;

use crate::board::{CELL_COUNT, CellLabel};
use crate::classifier::CellClassifier;

pub const BATCH_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("expected 64 cells, got {0}")]
    WrongCellCount(usize),
    #[error("classifier pool has no workers")]
    NoWorkers,
    #[error("worker {worker} failed on batch {batch}: {message}")]
    Worker {
        worker: usize,
        batch: usize,
        message: String,
    },
    #[error("batch task did not complete: {0}")]
    Join(String),
}

pub struct ClassifierPool {
    workers: Vec<Arc<dyn CellClassifier>>,
}

impl ClassifierPool {
    pub fn new(workers: Vec<Arc<dyn CellClassifier>>) -> Self {
        Self { workers }
    }

    /// `size` handles to the same stateless classifier.
    pub fn uniform(classifier: Arc<dyn CellClassifier>, size: usize) -> Self {
        Self::new((0..size).map(|_| Arc::clone(&classifier)).collect())
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub async fn classify(
        &self,
        cells: Vec<DynamicImage>,
    ) -> Result<[CellLabel; CELL_COUNT], ClassifyError> {
        if cells.len() != CELL_COUNT {
            return Err(ClassifyError::WrongCellCount(cells.len()));
        }
        if self.workers.is_empty() {
            return Err(ClassifyError::NoWorkers);
        }
        let start = Instant::now();

        let mut batches: Vec<Vec<DynamicImage>> = Vec::with_capacity(CELL_COUNT / BATCH_SIZE);
        let mut cells = cells.into_iter().peekable();
        while cells.peek().is_some() {
            batches.push(cells.by_ref().take(BATCH_SIZE).collect());
        }

        let mut tasks = JoinSet::new();
        for (batch, images) in batches.into_iter().enumerate() {
            let worker = batch % self.workers.len();
            let classifier = Arc::clone(&self.workers[worker]);
            tasks.spawn_blocking(move || {
                let labels = images
                    .iter()
                    .map(|img| classifier.classify(img))
                    .collect::<anyhow::Result<Vec<CellLabel>>>()
                    .map_err(|e| ClassifyError::Worker {
                        worker,
                        batch,
                        message: format!("{:#}", e),
                    });
                (batch, labels)
            });
        }

        // Drain every task before answering, even after the first failure.
        let mut labels = [CellLabel::Empty; CELL_COUNT];
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((batch, Ok(batch_labels))) => {
                    let offset = batch * BATCH_SIZE;
                    labels[offset..offset + batch_labels.len()].copy_from_slice(&batch_labels);
                }
                Ok((_, Err(e))) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(ClassifyError::Join(e.to_string()));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        debug!(elapsed = ?start.elapsed(), workers = self.workers.len(), "Classified 64 cells");
        Ok(labels)
    }
}
