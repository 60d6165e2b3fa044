use std::time::Duration;

use anyhow::{Context, Result};
use ptnet_sim::config::SimConfig;
use ptnet_sim::demo::{self, NetKind};
use ptnet_sim::net::{Net, PtRegistry, io};
use ptnet_sim::options::Options;

fn main() -> Result<()> {
    if std::env::var("PN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("PN_LOG")
            .write_style("PN_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let mut flags = shellwords::split(&std::env::var("PN_FLAGS").unwrap_or_default())
        .context("PN_FLAGS is not a valid argument list")?;
    flags.extend(std::env::args().skip(1));
    let options = Options::parse_from_args(&flags).map_err(|e| anyhow::anyhow!("{e}"))?;
    log::debug!("PN options: {:?}", options);

    let mut config = SimConfig::load_from_file(&options.config)?;
    if options.slow_motion {
        config.slow_motion = true;
    }

    let reg = build_registry(&options, config)?;
    let net_name = reg.config().net_name.clone();
    let ignore_special_places = reg.config().ignore_special_places;
    let mut net = reg.build().context("Failed to build the net")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the tokio runtime")?;
    runtime.block_on(run(&mut net, options.timeout_ms))?;

    if let Some(path) = &options.graph {
        std::fs::write(path, net.generate_graph(&net_name))
            .with_context(|| format!("Failed to write graph: {:?}", path))?;
        log::info!("graph written to {}", path.display());
    }
    if let Some(path) = &options.topology {
        io::write_value(path, &net.topology().describe())
            .with_context(|| format!("Failed to write topology: {:?}", path))?;
        log::info!("topology written to {}", path.display());
    }
    if let Some(path) = &options.records {
        io::write_value(path, &net.merged_records(ignore_special_places))
            .with_context(|| format!("Failed to write records: {:?}", path))?;
        log::info!("records written to {}", path.display());
    }
    println!("Simulation is terminated.");
    Ok(())
}

fn build_registry(options: &Options, config: SimConfig) -> Result<PtRegistry> {
    let reg = match options.net {
        NetKind::NTester => demo::n_tester(config, options.size)?,
        NetKind::TwoInput => {
            let [w1, w2, w3] = options.weights;
            demo::two_input_places(config, w1, w2, w3)?
        }
        NetKind::Drain => demo::weighted_drain(config)?,
    };
    Ok(reg)
}

async fn run(net: &mut Net, timeout_ms: Option<u64>) -> Result<()> {
    let shutdown = net.shutdown();
    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if res.is_ok() {
                        log::info!("interrupted");
                        shutdown.terminate();
                    }
                }
                _ = shutdown.terminated() => {}
            }
        })
    };
    let timer = timeout_ms.map(|ms| shutdown.terminate_after(Duration::from_millis(ms)));

    let result = net.run().await;
    ctrl_c.abort();
    if let Some(timer) = timer {
        timer.abort();
    }
    result.context("Simulation failed")
}
