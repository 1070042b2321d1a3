use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::{Settings, TelemetrySettings};

/// Noisy HTTP internals stay at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["hyper=warn", "reqwest=warn", "h2=warn"];

pub(crate) fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(settings.telemetry())))
        .map_err(|err| anyhow::anyhow!("invalid OCR_LOG_LEVEL: {err}"))?;

    let builder = fmt().with_env_filter(filter).with_target(false);

    if settings.telemetry().json {
        builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    } else {
        builder.compact().try_init().map_err(|err| anyhow::anyhow!(err.to_string()))?;
    }

    Ok(())
}

fn default_directives(telemetry: &TelemetrySettings) -> String {
    let mut directives = vec![telemetry.log_level.clone()];
    directives.extend(QUIET_TARGETS.iter().map(|item| item.to_string()));
    directives.join(",")
}
