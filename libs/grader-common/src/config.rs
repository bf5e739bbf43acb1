use std::env;
use std::path::PathBuf;

/// Worker configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub staging_dir: PathBuf,
    pub execution_timeout_ms: u64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub runtime_image_prefix: String,
    pub sandbox_memory_mb: u32,
    pub sandbox_cpus: f32,
    pub docker_bin: String,
    pub health_port: u16,
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("grader-submissions")),
            execution_timeout_ms: parsed("EXECUTION_TIMEOUT_MS", 10_000),
            // a pool of zero workers would accept work and never run it
            worker_count: parsed("WORKER_COUNT", 4usize).max(1),
            queue_capacity: parsed("QUEUE_CAPACITY", 64usize).max(1),
            runtime_image_prefix: env::var("RUNTIME_IMAGE_PREFIX")
                .unwrap_or_else(|_| "code-execution".to_string()),
            sandbox_memory_mb: parsed("SANDBOX_MEMORY_MB", 256),
            sandbox_cpus: parsed("SANDBOX_CPUS", 0.5),
            docker_bin: env::var("DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
            health_port: parsed("HEALTH_PORT", 9090),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
