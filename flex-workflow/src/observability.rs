use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` adds to the default
/// `flex_workflow=info,flex_client=info` directives.
pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["flex_workflow=info", "flex_client=info"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
