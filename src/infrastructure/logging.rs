use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the global logger once. `RUST_LOG` wins over the configured filter.
pub fn init_logging(default_filter: &str) {
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or(default_filter.to_string());
        let result = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .try_init();
        if let Err(error) = result {
            eprintln!("logger already installed: {error}");
        }
    });
}
