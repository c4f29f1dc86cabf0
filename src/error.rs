//! Error types for bucketmesh
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - A split between task-level, peer-level and node-level failures
//! - User-friendly suggestions and exit codes for the CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoNotFound = 203,

    // Peer errors (3xx)
    DialFailed = 300,
    DialTimeout = 301,
    PeerDisconnected = 302,
    PeerBackpressure = 303,
    NoPeerAvailable = 310,
    TaskUnknownToPeers = 311,

    // Protocol errors (4xx)
    ProtocolMalformed = 400,
    FrameTooLarge = 401,

    // Task errors (5xx)
    BucketNotFound = 500,
    QueueFull = 501,
    OverflowFailed = 502,
    Cancelled = 503,

    // Lifecycle errors (6xx)
    ListenerFatal = 600,
    Stopped = 601,
    AlreadyStarted = 602,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E501")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            600..=699 => 60,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the node
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO / Serialization Errors
    // ─────────────────────────────────────────────────────────────

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Peer Errors (absorbed by discovery, never fatal to the node)
    // ─────────────────────────────────────────────────────────────

    /// Connection attempt to a peer failed
    #[error("Failed to dial peer {address}: {message}")]
    DialFailed { address: String, message: String },

    /// Connection attempt did not complete in time
    #[error("Dial to peer {address} timed out after {timeout_ms}ms")]
    DialTimeout { address: String, timeout_ms: u64 },

    /// The peer's outbound channel is closed
    #[error("Peer {address} is disconnected")]
    PeerDisconnected { address: String },

    /// The peer's outbound channel is full
    #[error("Outbound queue for peer {address} is full")]
    PeerBackpressure { address: String },

    /// No reachable peer exists
    #[error("No peer ready/available")]
    NoPeerAvailable,

    /// Reachable peers exist but none reported load for the task
    #[error("No reachable peer reported load for task={task}")]
    TaskUnknownToPeers { task: String },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Malformed frame or unexpected message
    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    /// Frame length above the allowed maximum
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: u32, max: u32 },

    // ─────────────────────────────────────────────────────────────
    // Task Errors (surfaced to the Fill caller)
    // ─────────────────────────────────────────────────────────────

    /// No local bucket exists for the task
    #[error("Unable to find bucket for task={task}")]
    BucketNotFound { task: String },

    /// Local bucket is at capacity
    #[error("Bucket for task={task} is full")]
    QueueFull { task: String },

    /// Local bucket full and the overflow could not be placed on a peer
    #[error("Local bucket full & unable to fill to peer: {source}")]
    OverflowFailed {
        task: String,
        #[source]
        source: Box<Error>,
    },

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    // ─────────────────────────────────────────────────────────────
    // Lifecycle Errors (terminate start())
    // ─────────────────────────────────────────────────────────────

    /// Inbound listener failed
    #[error("Inbound listener failed: {message}")]
    ListenerFatal { message: String },

    /// Stop was requested
    #[error("Node signaled to stop")]
    Stopped,

    /// start() was already invoked on this node
    #[error("Node already started")]
    AlreadyStarted,

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                _ => ErrorCode::IoRead,
            },
            Error::Json(_) => ErrorCode::ProtocolMalformed,
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::DialFailed { .. } => ErrorCode::DialFailed,
            Error::DialTimeout { .. } => ErrorCode::DialTimeout,
            Error::PeerDisconnected { .. } => ErrorCode::PeerDisconnected,
            Error::PeerBackpressure { .. } => ErrorCode::PeerBackpressure,
            Error::NoPeerAvailable => ErrorCode::NoPeerAvailable,
            Error::TaskUnknownToPeers { .. } => ErrorCode::TaskUnknownToPeers,

            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::FrameTooLarge { .. } => ErrorCode::FrameTooLarge,

            Error::BucketNotFound { .. } => ErrorCode::BucketNotFound,
            Error::QueueFull { .. } => ErrorCode::QueueFull,
            Error::OverflowFailed { .. } => ErrorCode::OverflowFailed,
            Error::Cancelled => ErrorCode::Cancelled,

            Error::ListenerFatal { .. } => ErrorCode::ListenerFatal,
            Error::Stopped => ErrorCode::Stopped,
            Error::AlreadyStarted => ErrorCode::AlreadyStarted,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// True for the local-capacity condition that triggers forwarding
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Error::QueueFull { .. })
    }

    /// True when no peer could take overflow work
    pub fn is_peer_unavailable(&self) -> bool {
        match self {
            Error::NoPeerAvailable | Error::TaskUnknownToPeers { .. } => true,
            Error::OverflowFailed { source, .. } => source.is_peer_unavailable(),
            _ => false,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DialFailed { .. }
                | Error::DialTimeout { .. }
                | Error::PeerDisconnected { .. }
                | Error::PeerBackpressure { .. }
                | Error::NoPeerAvailable
                | Error::QueueFull { .. }
                | Error::OverflowFailed { .. }
                | Error::Io(_)
        )
    }

    /// Check if the error is fatal (node should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Config(_)
                | Error::ListenerFatal { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'bucketmesh config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'bucketmesh config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::ListenerFatal { .. } => Some(
                "Check that 'peer.listen_port' is free and the process may bind to it."
            ),
            Error::BucketNotFound { .. } => Some(
                "Add a [[buckets]] entry for this task to the configuration."
            ),
            Error::NoPeerAvailable => Some(
                "Verify 'peer.addresses' and that sibling nodes are running."
            ),
            Error::PeerBackpressure { .. } => Some(
                "The peer is not draining forwarded work fast enough. Raise 'peer.outbound_queue_size'."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn dial_failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Error::DialFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn bucket_not_found(task: impl Into<String>) -> Self {
        Error::BucketNotFound { task: task.into() }
    }

    pub fn queue_full(task: impl Into<String>) -> Self {
        Error::QueueFull { task: task.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Error::ProtocolMalformed {
            message: message.into(),
        }
    }

    /// Wrap a peer failure with the local QueueFull context
    pub fn overflow_failed(task: impl Into<String>, source: Error) -> Self {
        Error::OverflowFailed {
            task: task.into(),
            source: Box::new(source),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
