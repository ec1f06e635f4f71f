use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Installs the global subscriber. Levels come from `SEDENTARY_LOG`
/// (e.g. `SEDENTARY_LOG=sedentary_analytics=debug,sqlx=warn`) and default to
/// `sedentary_analytics=info`. Safe to call more than once.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("SEDENTARY_LOG")
            .unwrap_or_else(|_| EnvFilter::new("sedentary_analytics=info"));

        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    });
}
