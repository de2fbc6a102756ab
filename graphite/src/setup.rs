use anyhow::Result;
use graphite_config::Config;
use graphite_statsd::MetricsConfig;

/// Rejects configurations the servers cannot run with.
pub fn check_config(config: &Config) -> Result<()> {
    if config.carbon_port() != 0 && config.carbon_port() == config.render_port() {
        anyhow::bail!(
            "carbon and render cannot share port {}, configure different ports",
            config.carbon_port()
        );
    }

    if config.connection_wait_timeout().is_zero() {
        anyhow::bail!("`graphite.connection_wait_timeout` must be greater than zero");
    }

    if graphite_store::create_store(config.store_kind(), &Default::default()).is_err() {
        anyhow::bail!(
            "unknown store \"{}\", expected \"memory\" or \"empty\"",
            config.store_kind()
        );
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        graphite_log::info!("launching graphite without config folder");
    } else {
        graphite_log::info!(
            "launching graphite from config folder {}",
            config.path().display()
        );
    }

    graphite_log::info!("  carbon: {}", config.carbon_addr());
    graphite_log::info!("  render: {}", config.render_addr());
    graphite_log::info!("  store: {}", config.store_kind());
    match (
        config.auto_interface_binding(),
        config.each_interface_binding(),
    ) {
        (true, _) => graphite_log::info!("  interface binding: auto"),
        (false, true) => graphite_log::info!("  interface binding: each interface"),
        (false, false) => graphite_log::info!("  interface binding: off"),
    }
    graphite_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    graphite_statsd::init(MetricsConfig {
        prefix: config.metrics_prefix().to_owned(),
        host: host.to_owned(),
        default_tags,
    })?;

    Ok(())
}
