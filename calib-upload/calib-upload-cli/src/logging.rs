use std::path::Path;

use time::{UtcOffset, format_description::well_known::Iso8601};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::OffsetTime},
    layer::SubscriberExt,
};

/// Log to the console and, optionally, to a file.
///
/// The level is taken from `RUST_LOG` and defaults to `info`.
pub(crate) fn init(log_file: Option<&Path>) -> eyre::Result<()> {
    // Fixed offset of the local timezone at startup.
    let timer = OffsetTime::new(
        UtcOffset::from_whole_seconds(chrono::Local::now().offset().local_minus_utc())?,
        Iso8601::DEFAULT,
    );

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            Some(
                fmt::layer()
                    .with_timer(timer.clone())
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    let console_layer = fmt::layer()
        .with_timer(timer)
        .with_writer(std::io::stderr)
        .with_ansi(!cfg!(windows));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let collector = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(filter);
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}
