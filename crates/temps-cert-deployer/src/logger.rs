//! Per-provider diagnostic sink
//!
//! Providers report progress through a [`DeployLogger`] rather than calling
//! `tracing` directly, so the calling workflow can capture a deployment's
//! diagnostics (for example into a run log) or silence them entirely.

use std::fmt;
use std::sync::Arc;

use tracing::Level;

/// Destination for deployment diagnostics
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// Forwards diagnostics to `tracing`, tagged with the provider type
pub struct TracingSink {
    provider: String,
}

impl TracingSink {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) {
        let provider = self.provider.as_str();
        match level {
            Level::ERROR => tracing::error!(target: "temps_cert_deployer::deploy", provider, "{}", message),
            Level::WARN => tracing::warn!(target: "temps_cert_deployer::deploy", provider, "{}", message),
            Level::INFO => tracing::info!(target: "temps_cert_deployer::deploy", provider, "{}", message),
            Level::DEBUG => tracing::debug!(target: "temps_cert_deployer::deploy", provider, "{}", message),
            _ => tracing::trace!(target: "temps_cert_deployer::deploy", provider, "{}", message),
        }
    }
}

/// Drops every message
pub struct DiscardSink;

impl LogSink for DiscardSink {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Cloneable handle over a [`LogSink`]
#[derive(Clone)]
pub struct DeployLogger {
    sink: Arc<dyn LogSink>,
}

impl DeployLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Default logger for a provider, backed by `tracing`
    pub fn tracing(provider: impl Into<String>) -> Self {
        Self::new(Arc::new(TracingSink::new(provider)))
    }

    /// Logger that silences all diagnostics
    pub fn discard() -> Self {
        Self::new(Arc::new(DiscardSink))
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.sink.log(Level::DEBUG, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.sink.log(Level::INFO, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.sink.log(Level::WARN, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.sink.log(Level::ERROR, message.as_ref());
    }

    /// Log a vendor call at debug level
    pub fn sdk_request(&self, operation: &str, detail: impl fmt::Debug) {
        self.debug(format!("sdk request '{}': {:?}", operation, detail));
    }
}

impl Default for DeployLogger {
    fn default() -> Self {
        Self::tracing("unknown")
    }
}

impl fmt::Debug for DeployLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployLogger").finish_non_exhaustive()
    }
}

/// Sink that keeps messages in memory, used by tests across the crate
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySink {
    pub(crate) lines: std::sync::Mutex<Vec<(Level, String)>>,
}

#[cfg(test)]
impl LogSink for MemorySink {
    fn log(&self, level: Level, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_forwards_to_sink() {
        let sink = Arc::new(MemorySink::default());
        let logger = DeployLogger::new(sink.clone());

        logger.info("ssl certificate uploaded");
        logger.warn("domain skipped");
        logger.sdk_request("vod.ListDomain", ("offset", 0));

        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], (Level::INFO, "ssl certificate uploaded".to_string()));
        assert_eq!(lines[1].0, Level::WARN);
        assert_eq!(lines[2].0, Level::DEBUG);
        assert!(lines[2].1.starts_with("sdk request 'vod.ListDomain'"));
    }

    #[test]
    fn test_discard_logger_is_silent() {
        let logger = DeployLogger::discard();
        logger.error("nothing happens");
        logger.debug("still nothing");
    }

    #[test]
    fn test_cloned_logger_shares_sink() {
        let sink = Arc::new(MemorySink::default());
        let logger = DeployLogger::new(sink.clone());
        let cloned = logger.clone();

        logger.info("one");
        cloned.info("two");

        assert_eq!(sink.lines.lock().unwrap().len(), 2);
    }
}
