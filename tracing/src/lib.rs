use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[cfg(feature = "axum")]
pub mod http;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),

    #[error("invalid RUST_LOG: {0}")]
    Filter(#[from] tracing_subscriber::filter::FromEnvError),
}

/// Selects how log lines are rendered on stderr.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

pub struct TracingBuilder {
    level: Level,
    format: LogFormat,
}

impl Default for TracingBuilder {
    fn default() -> Self {
        TracingBuilder {
            level: Level::INFO,
            format: LogFormat::Compact,
        }
    }
}

impl TracingBuilder {
    /// Set the default log level. RUST_LOG still has a higher priority over this value.
    pub fn level(mut self, level: Level) -> TracingBuilder {
        self.level = level;
        self
    }

    /// Switch the stderr output format, default is [LogFormat::Compact].
    pub fn format(mut self, format: LogFormat) -> TracingBuilder {
        self.format = format;
        self
    }

    /// This will setup tracing based on the configuration passed in.
    /// It will setup a stderr writer output layer and a EnvFilter based on the provided log
    /// level (RUST_LOG still has a higher priority over the configured value).
    pub fn build(self) -> Result<(), Error> {
        let filter = EnvFilter::builder()
            .with_default_directive(self.level.into())
            .from_env()?;

        let fmt_layer = match self.format {
            LogFormat::Compact => tracing_subscriber::fmt::Layer::new()
                .with_writer(std::io::stderr)
                .compact()
                .boxed(),
            LogFormat::Json => tracing_subscriber::fmt::Layer::new()
                .with_writer(std::io::stderr)
                .json()
                .boxed(),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}
