// Tracing setup shared by the server binary and tests
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,toolgate_core=info";

/// Install the global subscriber: fmt layer on stderr, filtered by `RUST_LOG`.
///
/// Logs never go to stdout, which carries the stdio protocol stream.
/// Metrics go through the `opentelemetry` global meter; with no exporter
/// installed those instruments are no-ops.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    subscriber(env_filter).try_init()?;

    tracing::info!(target: "telemetry", "Tracing initialized");
    Ok(())
}

fn subscriber(filter: EnvFilter) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_default_filter_drops_debug() {
        tracing::subscriber::with_default(subscriber(EnvFilter::new(DEFAULT_FILTER)), || {
            assert!(tracing::enabled!(target: "gateway", Level::INFO));
            assert!(!tracing::enabled!(target: "gateway", Level::DEBUG));
        });
    }

    #[test]
    fn test_filter_directive_enables_target() {
        let filter = EnvFilter::new("warn,upstream=debug");
        tracing::subscriber::with_default(subscriber(filter), || {
            assert!(tracing::enabled!(target: "upstream", Level::DEBUG));
            assert!(!tracing::enabled!(target: "registry", Level::INFO));
        });
    }
}
