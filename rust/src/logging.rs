/// Logging initialization: `tracing-subscriber::fmt` to stderr.
///
/// Called at the start of `ChatApp::new()`. `RUST_LOG` overrides the default filter;
/// `try_init` makes repeated calls (several apps in one test binary) a no-op.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobchat_core=debug,info".into()),
        )
        .try_init();
}
