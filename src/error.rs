use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum KettleError {
    #[error("channel closed: peer process is gone")]
    ChannelClosed,

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("environment load failed: {reason}")]
    EnvironmentLoad { reason: String },

    #[error("environment not loaded")]
    EnvironmentNotLoaded,

    #[error("no response from peer after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("could not load the environment within {timeout_secs}s")]
    LoadTimeout { timeout_secs: u64 },

    #[error("handler error: {reason}")]
    Handler { reason: String },

    #[error("test executor crashed: {reason}")]
    ExecutorCrash { reason: String },

    #[error("config parse error in {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("unknown file set: {name}")]
    UnknownFileSet { name: String },

    #[error("glob pattern error: {pattern}: {reason}")]
    GlobPattern { pattern: String, reason: String },

    #[error("invalid match pattern {pattern}: {reason}")]
    MatchPattern { pattern: String, reason: String },

    #[error("manifest error in {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("{hook} hook failed: {reason}")]
    Hook { hook: String, reason: String },

    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("console error: {reason}")]
    Console { reason: String },

    #[error("process error: {reason}")]
    Process { reason: String },

    #[error("a worker is already running (pid {pid})")]
    WorkerAlreadyRunning { pid: i32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, KettleError>;
