//! Tracing subscriber setup and the "YYYY-MM-DD HH:MM:SS [LEVEL] message" format.
//!
//! Four user-visible levels: INFO, SUCCESS, WARN, ERROR. SUCCESS is an INFO
//! event on target `success`, emitted with [`crate::success!`].

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

pub const SUCCESS_TARGET: &str = "success";

/// Emit a SUCCESS-level line (an INFO event rendered as `[SUCCESS]`).
#[macro_export]
macro_rules! success {
    ($($arg:tt)*) => {
        tracing::info!(target: "success", $($arg)*)
    };
}

// Custom time formatter for logs: "YYYY-MM-DD HH:MM:SS" (local time)
pub struct LocalTimeFormatter;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

// Custom event formatter: "YYYY-MM-DD HH:MM:SS [LEVEL] message"
pub struct CustomEventFormat {
    pub ansi: bool,
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for CustomEventFormat
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use tracing_subscriber::fmt::time::FormatTime;

        LocalTimeFormatter.format_time(&mut writer)?;
        write!(writer, " ")?;

        let (label, color) = level_tag(event.metadata().level(), event.metadata().target());
        if self.ansi {
            write!(writer, "{}[{}]\x1b[0m ", color, label)?;
        } else {
            write!(writer, "[{}] ", label)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn level_tag(level: &tracing::Level, target: &str) -> (&'static str, &'static str) {
    if target == SUCCESS_TARGET {
        return ("SUCCESS", "\x1b[1;32m");
    }
    match *level {
        tracing::Level::TRACE => ("TRACE", "\x1b[2m"),  // Dim/gray
        tracing::Level::DEBUG => ("DEBUG", "\x1b[34m"), // Blue
        tracing::Level::INFO => ("INFO", "\x1b[36m"),   // Cyan
        tracing::Level::WARN => ("WARN", "\x1b[33m"),   // Yellow
        tracing::Level::ERROR => ("ERROR", "\x1b[31m"), // Red
    }
}

/// Map a user-facing level name onto a tracing filter directive.
/// CRITICAL maps to ERROR; unknown names fall back to INFO.
pub fn level_filter(level: &str) -> Option<&'static str> {
    match level.to_lowercase().as_str() {
        "critical" | "error" => Some("error"),
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        _ => None,
    }
}

/// Initialize the global subscriber. Colors only when stdout is a terminal;
/// cron output lands in plain log files.
pub fn init_tracing(filter: &str) {
    use tracing_subscriber::prelude::*;

    let ansi = std::io::stdout().is_terminal();

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .with_level(true)
                .with_ansi(ansi)
                .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
                .event_format(CustomEventFormat { ansi }),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_map_to_filters() {
        assert_eq!(level_filter("CRITICAL"), Some("error"));
        assert_eq!(level_filter("Warning"), Some("warn"));
        assert_eq!(level_filter("debug"), Some("debug"));
        assert_eq!(level_filter("loud"), None);
    }

    #[test]
    fn success_target_renders_as_success() {
        assert_eq!(level_tag(&tracing::Level::INFO, SUCCESS_TARGET).0, "SUCCESS");
        assert_eq!(level_tag(&tracing::Level::INFO, "minerctl").0, "INFO");
        assert_eq!(level_tag(&tracing::Level::WARN, "minerctl").0, "WARN");
    }
}
