use std::time::Duration;

use anyhow::Result;

/// Engine configuration, environment-driven with workable defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Number of judging workers, each bound to its own isolate box.
    pub worker_count: usize,
    /// Capacity of the in-process job queue.
    pub max_queue_size: usize,
    /// Jobs still queued after this long are failed instead of run.
    pub queue_timeout: Duration,
    /// Worker `i` owns isolate box `box_id_base + i`.
    pub box_id_base: u32,
    pub isolate_bin: String,
    /// Per-channel cap on captured stdout/stderr, in bytes.
    pub output_limit_bytes: usize,
    /// CPU seconds granted to the compile phase, for languages that do not
    /// carry their own window.
    pub compile_time_limit: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/judge".to_string(),
            worker_count: default_worker_count(),
            max_queue_size: 100,
            queue_timeout: Duration::from_secs(30),
            box_id_base: 0,
            isolate_bin: "isolate".to_string(),
            output_limit_bytes: 64 * 1024,
            compile_time_limit: 30.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults.database_url.clone());

        let worker_count = env_parse("WORKER_COUNT", defaults.worker_count).max(1);
        let max_queue_size = env_parse("MAX_QUEUE_SIZE", defaults.max_queue_size).max(1);
        let queue_timeout =
            Duration::from_secs(env_parse("QUEUE_TIMEOUT_SECS", defaults.queue_timeout.as_secs()));
        let box_id_base = env_parse("BOX_ID_BASE", defaults.box_id_base);
        let isolate_bin =
            std::env::var("ISOLATE_BIN").unwrap_or_else(|_| defaults.isolate_bin.clone());
        let output_limit_bytes = env_parse("OUTPUT_LIMIT_BYTES", defaults.output_limit_bytes);
        let compile_time_limit = env_parse("COMPILE_TIME_LIMIT_SECS", defaults.compile_time_limit);

        Ok(Config {
            database_url,
            worker_count,
            max_queue_size,
            queue_timeout,
            box_id_base,
            isolate_bin,
            output_limit_bytes,
            compile_time_limit,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// One worker per CPU, minus one for the engine itself, never below one.
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}
