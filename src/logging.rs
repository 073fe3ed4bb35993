use easy_error::{err_msg, Error};

/// Sets up stderr logging, filtered by `RUST_LOG` and defaulting to `info`.
pub fn init() -> Result<(), Error> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .map_err(|err| err_msg(format!("Could not build log filter: {err}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| err_msg(format!("Could not initialize logging: {err}")))
}
