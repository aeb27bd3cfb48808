use anyhow::Context;
use clap::Parser;
use cncbridge::{
    default_config_path, init_logging, list_ports, BridgeConfig, BridgeServer, BridgeSupervisor,
    SerialConnector, BUILD_DATE, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;

/// WebSocket bridge for a grblHAL motion controller and an ESP32 spindle drive
#[derive(Debug, Parser)]
#[command(name = "cncbridge", version)]
struct Cli {
    /// WebSocket listen port
    #[arg(long, env = "CNCBRIDGE_PORT")]
    port: Option<u16>,

    /// Motion controller serial port (auto-detected when omitted)
    #[arg(long, env = "CNCBRIDGE_COM")]
    com: Option<String>,

    /// Spindle drive serial port (auto-detected when omitted)
    #[arg(long, env = "CNCBRIDGE_VFD")]
    vfd: Option<String>,

    /// Baud rate for both serial links
    #[arg(long)]
    baud: Option<u32>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<String>,

    /// Configuration file (TOML or JSON)
    #[arg(long, env = "CNCBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log one JSON object per line
    #[arg(long)]
    json_logs: bool,

    /// Print the serial ports found and exit
    #[arg(long)]
    list_ports: bool,
}

impl Cli {
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(com) = &self.com {
            config.motion.port = Some(com.clone());
        }
        if let Some(vfd) = &self.vfd {
            config.drive.port = Some(vfd.clone());
        }
        if let Some(baud) = self.baud {
            config.motion.baud_rate = baud;
            config.drive.baud_rate = baud;
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => match default_config_path() {
            Ok(path) => BridgeConfig::load_or_default(&path)?,
            Err(e) => {
                tracing::debug!("No config directory: {}", e);
                BridgeConfig::default()
            }
        },
    };
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    if cli.list_ports {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    tracing::info!("cncbridge {} (built {})", VERSION, BUILD_DATE);
    let config = load_config(&cli)?;

    let supervisor = BridgeSupervisor::start(config, Arc::new(SerialConnector::new())).await;
    let server = match BridgeServer::bind(Arc::clone(&supervisor)).await {
        Ok(server) => server,
        Err(e) => {
            supervisor.shutdown().await;
            return Err(e.into());
        }
    };

    let result = tokio::select! {
        result = server.run() => result.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            signal.context("waiting for ctrl-c")
        }
    };

    supervisor.shutdown().await;
    result
}
