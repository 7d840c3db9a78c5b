//! Log output for the embedded agent.
//!
//! Every line is prefixed with `METERING_AGENT` so agent output can be told apart from the
//! host application's own logs:
//!
//! ```text
//! METERING_AGENT | INFO | Metering agent started: 2 metrics, 1 endpoints, 0 sources
//! METERING_AGENT | WARN | Sender disk: I/O error: permission denied (will retry in 2s)
//! ```

use std::fmt;
use std::sync::Once;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields, MakeWriter,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `debug` or `metering_agent=trace`.
pub const LOG_LEVEL_ENV: &str = "METERING_LOG_LEVEL";

const DEFAULT_LOG_LEVEL: &str = "info";

static INIT: Once = Once::new();

/// Installs the global subscriber the first time it is called. A host that already installed
/// its own subscriber keeps it.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
        let installed =
            tracing::subscriber::set_global_default(subscriber(filter, std::io::stdout));
        if installed.is_ok() {
            tracing::debug!(
                "Logging initialized, library built {}",
                env!("BUILD_TIMESTAMP")
            );
        }
    });
}

/// Plain text lines for host log files: no color escapes, whatever features the workspace enables.
fn subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .event_format(Formatter)
        .finish()
}

/// Formats events as `METERING_AGENT | LEVEL | [span{fields}: ]message fields`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "METERING_AGENT | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
