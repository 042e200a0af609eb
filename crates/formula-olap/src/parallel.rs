#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::ThreadPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

/// Worker count from `FORMULA_OLAP_THREADS`, then `RAYON_NUM_THREADS`, then the number of
/// available cores.
pub(crate) fn desired_threads() -> usize {
    ["FORMULA_OLAP_THREADS", "RAYON_NUM_THREADS"]
        .iter()
        .find_map(|var| {
            std::env::var(var)
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
        })
        .unwrap_or_else(available_threads)
}

pub(crate) fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Lazily built Rayon pool dedicated to one engine's table queries.
///
/// Global pool initialization can fail under resource pressure and Rayon then panics on first
/// use; a private pool that fails to build simply makes the engine fall back to sequential
/// execution.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
#[derive(Debug)]
pub(crate) struct TableQueryPool {
    threads: usize,
    pool: OnceLock<Option<ThreadPool>>,
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
impl TableQueryPool {
    pub(crate) fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            pool: OnceLock::new(),
        }
    }

    pub(crate) fn get(&self) -> Option<&ThreadPool> {
        self.pool.get_or_init(|| build_pool(self.threads)).as_ref()
    }
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_pool(requested: usize) -> Option<ThreadPool> {
    let try_build = |n| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|idx| format!("formula-olap-{idx}"))
            .build()
    };

    match try_build(requested) {
        Ok(pool) => Some(pool),
        Err(err) if requested > 1 => {
            log::warn!("could not start {requested} table query workers ({err}); trying 1");
            try_build(1).ok()
        }
        Err(err) => {
            log::warn!("could not start a table query worker ({err}); running sequentially");
            None
        }
    }
}
