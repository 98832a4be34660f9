//! permatrix CLI entry point

fn main() {
    // Structured logging with env-based filter, defaulting to info. stdout is the console report, so logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    permatrix::cli::run(permatrix::probes::suite());
}
