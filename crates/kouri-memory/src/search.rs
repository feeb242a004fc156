//! Nearest-neighbor backends over squared L2 distance.

use kouri_config::IndexKind;
use tracing::{info, warn};

/// An append-only vector store answering k-nearest queries.
pub trait SearchBackend: Send + Sync {
    fn dimension(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors. Callers guarantee every vector has `dimension()` entries.
    fn add(&mut self, vectors: &[Vec<f32>]);

    /// Up to `k` `(position, distance)` pairs, closest first.
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)>;

    fn name(&self) -> &'static str;
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn closest(mut hits: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    hits.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    hits.truncate(k);
    hits
}

// ── Flat ───────────────────────────────────────────────────────

/// Exact linear scan over contiguous rows.
pub struct FlatL2 {
    dim: usize,
    data: Vec<f32>,
}

impl FlatL2 {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    fn scan(&self, query: &[f32], rows: std::ops::Range<usize>) -> Vec<(usize, f32)> {
        rows.map(|i| {
            let row = &self.data[i * self.dim..(i + 1) * self.dim];
            (i, squared_l2(row, query))
        })
        .collect()
    }
}

impl SearchBackend for FlatL2 {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    fn add(&mut self, vectors: &[Vec<f32>]) {
        for v in vectors {
            self.data.extend_from_slice(v);
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || query.len() != self.dim {
            return Vec::new();
        }
        closest(self.scan(query, 0..self.len()), k)
    }

    fn name(&self) -> &'static str {
        "flat"
    }
}

// ── Parallel ───────────────────────────────────────────────────

/// Rows per worker below which the scan stays on the calling thread.
const PARALLEL_MIN_ROWS: usize = 4096;

/// Same results as [`FlatL2`], with the scan split across scoped threads.
pub struct ParallelL2 {
    inner: FlatL2,
    workers: usize,
}

impl ParallelL2 {
    /// `None` when the host offers a single hardware thread.
    pub fn try_new(dim: usize) -> Option<Self> {
        let workers = std::thread::available_parallelism().ok()?.get();
        if workers <= 1 {
            return None;
        }
        Some(Self {
            inner: FlatL2::new(dim),
            workers,
        })
    }
}

impl SearchBackend for ParallelL2 {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn add(&mut self, vectors: &[Vec<f32>]) {
        self.inner.add(vectors);
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let rows = self.len();
        if k == 0 || query.len() != self.dimension() {
            return Vec::new();
        }
        if rows < PARALLEL_MIN_ROWS * 2 {
            return self.inner.search(query, k);
        }

        let chunk = rows.div_ceil(self.workers).max(PARALLEL_MIN_ROWS);
        let hits = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..rows)
                .step_by(chunk)
                .map(|start| {
                    let end = (start + chunk).min(rows);
                    scope.spawn(move || closest(self.inner.scan(query, start..end), k))
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().ok())
                .flatten()
                .collect::<Vec<_>>()
        });
        closest(hits, k)
    }

    fn name(&self) -> &'static str {
        "parallel"
    }
}

/// Build the configured backend, falling back to a flat scan when the
/// accelerated one cannot run here.
pub fn build_backend(kind: IndexKind, dim: usize) -> Box<dyn SearchBackend> {
    match kind {
        IndexKind::Flat => Box::new(FlatL2::new(dim)),
        IndexKind::Accelerated => match ParallelL2::try_new(dim) {
            Some(backend) => {
                info!(dim, workers = backend.workers, "using parallel vector scan");
                Box::new(backend)
            }
            None => {
                warn!("accelerated index unavailable on this host, using flat scan");
                Box::new(FlatL2::new(dim))
            }
        },
    }
}
