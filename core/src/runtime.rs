use crate::{Error, Result};
use rayon::ThreadPoolBuilder;
use std::env;
use std::sync::OnceLock;

/// Environment variable read when no explicit thread count is given.
pub const THREADS_ENV_VAR: &str = "CV_MAPPING_THREADS";

static THREAD_POOL_INIT: OnceLock<std::result::Result<usize, String>> = OnceLock::new();

/// Initialize the global Rayon thread pool used by the per-point parallel stages.
///
/// Priority:
/// 1. `num_threads` argument
/// 2. `CV_MAPPING_THREADS` environment variable
/// 3. Rayon default
///
/// Only the first call configures the pool; later calls return the first outcome.
/// Returns the number of worker threads.
pub fn init_global_thread_pool(num_threads: Option<usize>) -> Result<usize> {
    let res = THREAD_POOL_INIT.get_or_init(|| {
        let configured_threads = match num_threads {
            Some(n) => Some(n),
            None => read_cpu_threads_from_env()?,
        };

        let mut builder = ThreadPoolBuilder::new();
        if let Some(n) = configured_threads {
            if n == 0 {
                return Err(format!("{THREADS_ENV_VAR} must be >= 1"));
            }
            builder = builder.num_threads(n);
        }

        builder.build_global().map_err(|e| e.to_string())?;
        Ok(rayon::current_num_threads())
    });
    res.clone().map_err(Error::RuntimeError)
}

fn read_cpu_threads_from_env() -> std::result::Result<Option<usize>, String> {
    let raw = match env::var(THREADS_ENV_VAR) {
        Ok(v) => v,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => return Err(format!("failed to read {THREADS_ENV_VAR}: {e}")),
    };

    let parsed: usize = raw
        .parse()
        .map_err(|_| format!("{THREADS_ENV_VAR} must be a positive integer, got '{raw}'"))?;
    if parsed == 0 {
        return Err(format!("{THREADS_ENV_VAR} must be >= 1"));
    }
    Ok(Some(parsed))
}
