use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes tracing on stderr so it never interleaves with the report on
/// stdout.
///
/// `RUST_LOG` wins when set. Otherwise only warnings are shown, or debug
/// output for this crate with `--verbose`.
pub fn init(verbose: bool) {
    let default = if verbose {
        "authquest=debug,info"
    } else {
        "authquest=warn,warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
