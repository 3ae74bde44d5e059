use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target prefix of every event emitted by this crate (the crate name as compiled).
fn crate_target() -> &'static str {
    let path: &'static str = module_path!();
    path.split("::").next().unwrap_or(path)
}

fn default_directive(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "warn" };
    format!("{}={level}", crate_target())
}

/// Install the global subscriber. Logs go to stderr; stdout carries command output.
///
/// `RUST_LOG` directives are honoured on top of the crate default
/// (`warn`, or `debug` with `verbose`).
pub fn init(json: bool, verbose: bool) {
    let directive = default_directive(verbose);
    let filter = match directive.parse::<tracing_subscriber::filter::Directive>() {
        Ok(d) => EnvFilter::from_default_env().add_directive(d),
        Err(_) => EnvFilter::from_default_env(),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false)
                    .with_span_list(false),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init();
    }
}
