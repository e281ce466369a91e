//! Logging utilities with turn context support.
//!
//! Task-local context lets every log line emitted while a turn is streaming
//! carry the owning task id and attempt number without threading them through
//! every collaborator.

use chrono::Local;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::config::LoggingConfig;

tokio::task_local! {
    /// Task-local storage for the id of the task that owns the current turn.
    pub static TASK_ID: String;
}

tokio::task_local! {
    /// Task-local storage for the current attempt number (retries increment it).
    pub static TURN_ATTEMPT: u32;
}

/// Get the current task id from context, if set.
///
/// Returns an empty string if no task context is set.
pub fn get_task_id() -> String {
    TASK_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Get the current attempt number from context, 0 if unset.
pub fn get_turn_attempt() -> u32 {
    TURN_ATTEMPT.try_with(|a| *a).unwrap_or(0)
}

/// Create a tracing span for one streamed turn, tagged with the task context.
#[macro_export]
macro_rules! turn_span {
    ($name:expr) => {
        tracing::info_span!(
            $name,
            task_id = %$crate::core::logging::get_task_id(),
            attempt = $crate::core::logging::get_turn_attempt()
        )
    };
}

/// Execute an async block with turn context (task id, attempt).
///
/// # Example
///
/// ```ignore
/// with_turn_context!(task_id, attempt, async {
///     engine.run(stream, cancel).await
/// })
/// ```
#[macro_export]
macro_rules! with_turn_context {
    ($task_id:expr, $attempt:expr, $body:expr) => {
        $crate::core::logging::TASK_ID
            .scope($task_id, async {
                $crate::core::logging::TURN_ATTEMPT
                    .scope($attempt, $body)
                    .await
            })
            .await
    };
}

/// Local-time formatter (respects TZ).
struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter. ANSI colours are disabled when
/// `NO_COLOR` is set. Returns an error if a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.filter.clone());
    let filter = EnvFilter::try_new(base_filter)?;
    let no_color = std::env::var("NO_COLOR").is_ok();

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_timer(LocalTime))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_timer(LocalTime)
                    .with_ansi(!no_color),
            )
            .try_init()?;
    }
    Ok(())
}
