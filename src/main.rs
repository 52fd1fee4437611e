use clap::{Parser, Subcommand};
use olm_bridge::platform::keychain::KeyringStore;
use olm_bridge::settings::{find_settings_file, SETTINGS_FILE};
use olm_bridge::{logging, platform, vpn, ConnectionConfig, Settings, VpnConfig};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "olm-bridge")]
#[command(about = "Host-side orchestration for the olm VPN client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate default settings file
    Init {
        /// Where to write the file (defaults to ./olm.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Check settings and print the effective connection config
    Validate {
        /// Settings file (defaults to ./olm.toml, then the user config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Store settings in the OS credential store
    Save {
        /// Settings file (defaults to ./olm.toml, then the user config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show settings from the OS credential store
    Show,
    /// Bring up the tunnel interface and hold it until Ctrl+C
    ///
    /// Requires root. Useful for checking the host side without an engine.
    Establish {
        /// Tunnel address, e.g. 100.90.128.5/24
        #[arg(long)]
        tunnel_ip: String,
        #[arg(long, default_value_t = 1420)]
        mtu: u16,
        #[arg(long, default_value = "")]
        dns: String,
        /// Additional route, may be repeated
        #[arg(long = "route")]
        routes: Vec<String>,
        #[arg(long)]
        utility_subnet: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    logging::init(level)?;

    match cli.command {
        Commands::Init { path } => {
            let path = path.unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));
            Settings::default().save(&path)?;
            println!("Created default settings: {}", path.display());
        }
        Commands::Validate { config } => {
            let settings = load_settings(config)?;
            match ConnectionConfig::from_request(settings.to_request()) {
                Ok(config) => print_config(&config),
                Err(e) => {
                    error!("Invalid settings: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Save { config } => {
            let mut settings = load_settings(config)?;
            if settings.secret.is_empty() {
                settings.secret = rpassword::prompt_password("Secret: ")?;
            }
            ConnectionConfig::from_request(settings.to_request())?;
            settings.save_to(&KeyringStore::new())?;
            println!("Settings saved to the credential store");
        }
        Commands::Show => {
            let settings = Settings::load_from(&KeyringStore::new())?;
            let host = hostname::get()?;
            println!("Host: {} ({})", host.to_string_lossy(), std::env::consts::OS);
            if settings.endpoint.is_empty() {
                println!("No settings stored");
            } else {
                println!("Endpoint: {}", settings.endpoint);
                println!("  ID: {}", settings.id);
                println!("  Org: {}", settings.org_id);
                println!("  Log level: {}", settings.log_level);
            }
        }
        Commands::Establish {
            tunnel_ip,
            mtu,
            dns,
            routes,
            utility_subnet,
        } => {
            let config = VpnConfig {
                tunnel_ip,
                mtu,
                dns,
                routes,
                utility_subnet,
            };
            establish(&config).await?;
        }
    }

    Ok(())
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings, Box<dyn std::error::Error>> {
    match path.or_else(find_settings_file) {
        Some(path) => {
            info!("Loading settings from {}", path.display());
            Ok(Settings::load(&path)?)
        }
        None => Ok(Settings::default()),
    }
}

fn print_config(config: &ConnectionConfig) {
    println!("Endpoint: {}", config.endpoint);
    println!("  ID: {}", config.id);
    println!("  Secret: ********");
    println!("  Org: {}", config.org_id);
    println!("  MTU: {}", config.mtu);
    println!("  DNS: {} (upstream {})", config.dns, config.upstream_dns.join(", "));
    println!(
        "  Holepunch: {}  Tunnel DNS: {}  Override DNS: {}",
        config.holepunch, config.tunnel_dns, config.override_dns
    );
    println!(
        "  Ping: every {:?}, timeout {:?}",
        config.ping_interval, config.ping_timeout
    );
}

async fn establish(config: &VpnConfig) -> Result<(), Box<dyn std::error::Error>> {
    let service = platform::new_vpn_service()?;
    let fd = vpn::establish(service.new_builder(), config)?;
    println!("Interface up (service {}, fd={})", service.id(), fd);
    println!("Press Ctrl+C to tear down");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    rx.recv().await;

    info!("Tearing down interface");
    service.close();
    Ok(())
}
