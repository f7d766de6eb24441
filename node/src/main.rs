//! MERIDIAN node binary

use clap::{Parser, Subcommand};
use meridian_core::{Address, Amount, GenesisConfig, MeridianError, NetworkTag, NodeConfig};
use meridian_crypto::keys::KeyPair;
use meridian_node::runtime::NodeBuilder;
use meridian_node::start_api_server;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "meridian-node")]
#[command(about = "MERIDIAN Node - permissioned payment chain")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Genesis file path; a throwaway devnet is generated when omitted
        #[arg(short, long)]
        genesis: Option<PathBuf>,

        /// API listen address
        #[arg(long, default_value = "127.0.0.1:8545")]
        api_addr: String,

        /// Data directory
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Network tag (devnet, testnet, mainnet)
        #[arg(long, default_value = "devnet")]
        network: String,

        /// Initialise the chain from genesis at startup
        #[arg(long)]
        init: bool,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a genesis configuration
    Genesis {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Chain name
        #[arg(long, default_value = "MERIDIAN Devnet")]
        chain_name: String,

        /// Chain ID
        #[arg(long, default_value = "7301")]
        chain_id: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            genesis,
            api_addr,
            data_dir,
            network,
            init,
        } => {
            info!("starting MERIDIAN node...");

            let network = parse_network(&network)?;
            let mut config = NodeConfig {
                network,
                ..NodeConfig::default()
            };
            config.data_dir = data_dir.clone();
            config.api.listen_addr = api_addr.clone();

            let mut builder = match genesis {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)?;
                    let genesis = GenesisConfig::from_json(&content)?;
                    let mut builder = NodeBuilder::new(config, genesis);

                    // A real deployment injects its own keys through the
                    // environment
                    if let Ok(secret) = std::env::var("PRIVATE_KEY") {
                        builder = builder.add_validator_key(KeyPair::from_hex_secret(&secret)?);
                    }
                    if let Ok(secret) = std::env::var("FAUCET_KEY") {
                        builder = builder.faucet_key(KeyPair::from_hex_secret(&secret)?);
                    }
                    builder
                }
                None => devnet_builder(config, &data_dir)?,
            };

            if let Ok(key_hex) = std::env::var("BACKUP_ENCRYPTION_KEY") {
                builder = builder.backup_key(parse_backup_key(&key_hex)?);
            }

            let runtime = builder.build()?;
            if init {
                runtime.init_genesis(None, false).await?;
            }

            start_api_server(runtime, &api_addr).await?;
        }

        Commands::Keygen { output } => {
            let keypair = KeyPair::generate();

            let info = serde_json::json!({
                "publicKey": keypair.public_key().to_hex(),
                "address": keypair.address().to_hex(),
                "secretKey": hex::encode(keypair.secret_bytes()),
            });
            let json = serde_json::to_string_pretty(&info)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("Keypair saved to: {}", path.display());
                }
                None => println!("{}", json),
            }
        }

        Commands::Genesis {
            output,
            chain_name,
            chain_id,
        } => {
            let genesis = GenesisConfig {
                chain_name,
                chain_id,
                ..GenesisConfig::devnet()
            };

            std::fs::write(&output, genesis.to_json()?)?;
            println!("Genesis configuration saved to: {}", output.display());
        }
    }

    Ok(())
}

fn parse_network(s: &str) -> Result<NetworkTag, MeridianError> {
    match s {
        "devnet" => Ok(NetworkTag::Devnet),
        "testnet" => Ok(NetworkTag::Testnet),
        "mainnet" => Ok(NetworkTag::Mainnet),
        other => Err(MeridianError::ConfigError(format!("unknown network: {}", other))),
    }
}

fn parse_backup_key(hex_key: &str) -> Result<[u8; 32], MeridianError> {
    let bytes = hex::decode(hex_key.strip_prefix("0x").unwrap_or(hex_key))
        .map_err(|_| MeridianError::ConfigError("BACKUP_ENCRYPTION_KEY must be hex".to_string()))?;
    if bytes.len() != 32 {
        return Err(MeridianError::ConfigError(
            "BACKUP_ENCRYPTION_KEY must be 32 bytes".to_string(),
        ));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Build a single-process devnet: fresh proposer, faucet and three
/// validators, with the key material written to the data directory
fn devnet_builder(config: NodeConfig, data_dir: &PathBuf) -> anyhow::Result<NodeBuilder> {
    std::fs::create_dir_all(data_dir)?;

    let proposer = KeyPair::generate();
    let faucet = KeyPair::generate();
    let validators: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();

    let mut genesis = GenesisConfig::devnet().add_premine(
        faucet.address(),
        Amount::new(1_000_000_000_000_000_000_000_000),
        "devnet faucet reserve",
    );
    for (i, kp) in validators.iter().enumerate() {
        genesis = genesis.add_validator(&format!("val-{}", i), kp.public_key(), kp.address());
    }

    let keys = serde_json::json!({
        "proposer": hex::encode(proposer.secret_bytes()),
        "faucet": hex::encode(faucet.secret_bytes()),
        "validators": validators.iter().map(|kp| hex::encode(kp.secret_bytes())).collect::<Vec<_>>(),
    });
    let key_path = data_dir.join("devnet_keys.json");
    std::fs::write(&key_path, serde_json::to_string_pretty(&keys)?)?;
    info!("devnet keys written to {}", key_path.display());

    let faucet_address: Address = faucet.address();
    info!(faucet = %faucet_address, "devnet faucet account premined");

    let mut builder = NodeBuilder::new(config, genesis)
        .proposer_key(proposer)
        .faucet_key(faucet);
    for kp in validators {
        builder = builder.add_validator_key(kp);
    }
    Ok(builder)
}
