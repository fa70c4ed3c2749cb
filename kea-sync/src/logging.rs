//! Log output setup.
//!
//! Two layouts: the default `tracing_subscriber` format, or single lines
//! prefixed with the sd-daemon `<N>` syslog priority for journald.

use std::fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Syslog priority of a level, as understood by sd-daemon.
pub fn sd_level(level: &Level) -> u8 {
    if *level == Level::ERROR {
        3
    } else if *level == Level::WARN {
        4
    } else if *level == Level::INFO {
        6
    } else {
        7
    }
}

/// Formats events as `<N>message fields`.
///
/// Journald reads the priority from the prefix and adds its own timestamp.
#[derive(Debug, Default, Clone, Copy)]
pub struct SdDaemonFormat;

impl<S, N> FormatEvent<S, N> for SdDaemonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "<{}>", sd_level(event.metadata().level()))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber.
pub fn init(filter: EnvFilter, syslog_level_prefix: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(filter);
    if syslog_level_prefix {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .event_format(SdDaemonFormat),
            )
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}
