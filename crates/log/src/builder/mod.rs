//! Logger builder implementation

use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, TestWriter, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{Config, Format, Writer};
use crate::error::{LogError, LogResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Box a fmt layer, dropping the timer when timestamps are off.
macro_rules! boxed_fmt_layer {
    ($layer:expr, $display:expr) => {
        if $display.time {
            $layer.boxed()
        } else {
            $layer.without_time().boxed()
        }
    };
}

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Returned by a successful [`LoggerBuilder::build`]
#[derive(Debug)]
pub struct LoggerGuard {
    config: Config,
}

impl LoggerGuard {
    /// Configuration the installed subscriber was built from
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Build the subscriber without installing it
    pub(crate) fn layers(&self) -> LogResult<(EnvFilter, BoxedLayer)> {
        self.config.validate()?;
        let filter = EnvFilter::try_new(&self.config.level)
            .map_err(|e| LogError::Filter(format!("{}: {}", self.config.level, e)))?;
        Ok((filter, fmt_layer(&self.config)))
    }

    /// Build and install the global subscriber
    ///
    /// Fails if the level directive does not parse or a global subscriber
    /// is already set.
    pub fn build(self) -> LogResult<LoggerGuard> {
        let (filter, fmt_layer) = self.layers()?;
        Registry::default()
            .with(fmt_layer)
            .with(filter)
            .try_init()
            .map_err(|e| LogError::Init(e.to_string()))?;

        tracing::debug!(
            level = %self.config.level,
            format = %self.config.format,
            "logger initialized"
        );
        Ok(LoggerGuard {
            config: self.config,
        })
    }
}

fn make_writer(writer: Writer) -> BoxMakeWriter {
    match writer {
        Writer::Stderr => BoxMakeWriter::new(std::io::stderr),
        Writer::Stdout => BoxMakeWriter::new(std::io::stdout),
        Writer::Test => BoxMakeWriter::new(TestWriter::new()),
    }
}

fn fmt_layer(config: &Config) -> BoxedLayer {
    let display = &config.display;
    let base = fmt::layer::<Registry>()
        .with_ansi(display.colors)
        .with_target(display.target)
        .with_thread_ids(display.thread_ids)
        .with_file(display.source)
        .with_line_number(display.source)
        .with_writer(make_writer(config.writer));

    match config.format {
        Format::Pretty => boxed_fmt_layer!(base.pretty(), display),
        Format::Compact => boxed_fmt_layer!(base.compact(), display),
        Format::Json => boxed_fmt_layer!(
            base.json()
                .flatten_event(display.flatten)
                .with_current_span(true),
            display
        ),
    }
}
