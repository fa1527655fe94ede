//! Handshake wallet node
//!
//! Runs the wallet service against a node, and offers one-shot commands
//! for account management, payments and name auctions.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use hsw_core::{generate_mnemonic, Branch, KdfParams};
use hsw_params::NetworkType;
use hsw_wallet_service::{Account, AccountKey, CreateAccount, WalletConfig, WalletService};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hsw-node")]
#[command(about = "Handshake wallet node", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Network (main, testnet, regtest, simnet)
    #[arg(short, long, global = true)]
    network: Option<String>,

    /// Node RPC URL
    #[arg(long, global = true)]
    node_url: Option<String>,

    /// Node API key
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the chain until interrupted
    Run,

    /// Create an account from a mnemonic (generated when omitted) or an xpub
    CreateAccount {
        /// Account name
        #[arg(long)]
        name: String,

        /// Existing BIP-39 phrase
        #[arg(long, conflicts_with = "xpub")]
        mnemonic: Option<String>,

        /// Account xpub for a watch-only account
        #[arg(long)]
        xpub: Option<String>,

        /// Passphrase sealing the seed
        #[arg(short, long, default_value = "")]
        passphrase: String,

        /// BIP-44 account index
        #[arg(long, default_value = "0")]
        account_index: u32,

        /// Height the account's history starts after
        #[arg(long, default_value = "0")]
        rescan_height: u32,
    },

    /// Show every account
    Info,

    /// Generate a receive address
    Address {
        /// Account name
        #[arg(short, long, default_value = "default")]
        account: String,
    },

    /// Show an account balance
    Balance {
        /// Account name
        #[arg(short, long, default_value = "default")]
        account: String,
    },

    /// Roll back and rescan an account from a height
    Rescan {
        /// Account name
        #[arg(short, long, default_value = "default")]
        account: String,

        /// Height to rescan from
        height: u32,
    },

    /// Send coins
    Send {
        #[command(flatten)]
        signer: Signer,

        /// Destination address
        to: String,

        /// Amount in subunits
        value: u64,

        /// Fee rate in subunits per byte
        #[arg(long)]
        fee_rate: Option<u64>,
    },

    /// Name auction operations
    Name {
        #[command(flatten)]
        signer: Signer,

        #[command(subcommand)]
        op: NameOp,
    },
}

#[derive(Args)]
struct Signer {
    /// Account name
    #[arg(short, long, default_value = "default")]
    account: String,

    /// Passphrase unlocking the account
    #[arg(short, long)]
    passphrase: String,
}

#[derive(Subcommand)]
enum NameOp {
    /// Start an auction
    Open { name: String },
    /// Place a blinded bid
    Bid { name: String, value: u64, lockup: u64 },
    /// Reveal bids
    Reveal { name: String },
    /// Reclaim losing reveals
    Redeem { name: String },
    /// Register or update resource data (hex)
    Update { name: String, data: String },
    /// Start a transfer
    Transfer { name: String, address: String },
    /// Complete a transfer
    Finalize { name: String },
    /// Renew
    Renew { name: String },
    /// Revoke permanently
    Revoke { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let service = WalletService::open(config).context("Failed to open wallet")?;

    match cli.command {
        Commands::Run => run(&service).await?,
        Commands::CreateAccount {
            name,
            mnemonic,
            xpub,
            passphrase,
            account_index,
            rescan_height,
        } => {
            let key = match (mnemonic, xpub) {
                (_, Some(xpub)) => AccountKey::WatchOnly { xpub },
                (phrase, None) => {
                    let phrase = match phrase {
                        Some(phrase) => phrase,
                        None => {
                            let phrase = generate_mnemonic(None)?;
                            println!("Mnemonic: {}", phrase);
                            phrase
                        }
                    };
                    if passphrase.is_empty() {
                        bail!("--passphrase is required for spending accounts");
                    }
                    AccountKey::Mnemonic {
                        phrase,
                        bip39_passphrase: String::new(),
                        passphrase,
                        kdf: KdfParams::default(),
                    }
                }
            };
            let account = service.create_account(&CreateAccount {
                name,
                account_index,
                key,
                rescan_height,
            })?;
            println!("Created account '{}' (id {})", account.name(), account.id());
        }
        Commands::Info => {
            for account in service.accounts() {
                let balance = account.balance()?;
                println!(
                    "{}: rescan {} receive depth {} change depth {} watch-only {} available {} total {}",
                    account.name(),
                    account.rescan_height(),
                    account.depth(Branch::Receive),
                    account.depth(Branch::Change),
                    account.is_watch_only(),
                    balance.available,
                    balance.total()
                );
            }
        }
        Commands::Address { account } => {
            println!("{}", service.account(&account)?.create_receive_address()?);
        }
        Commands::Balance { account } => {
            let balance = service.account(&account)?.balance()?;
            println!("{}", serde_json::to_string_pretty(&balance)?);
        }
        Commands::Rescan { account, height } => {
            let account = service.account(&account)?;
            account.rescan(height, service.cancel_token()).await?;
            println!("Rescanned '{}' to {}", account.name(), account.rescan_height());
        }
        Commands::Send {
            signer,
            to,
            value,
            fee_rate,
        } => {
            let account = unlocked(&service, &signer)?;
            let txid = account.send(&to, value, fee_rate).await?;
            println!("{}", txid);
        }
        Commands::Name { signer, op } => {
            let account = unlocked(&service, &signer)?;
            let txid = match op {
                NameOp::Open { name } => account.open(&name).await?,
                NameOp::Bid {
                    name,
                    value,
                    lockup,
                } => account.bid(&name, value, lockup).await?,
                NameOp::Reveal { name } => account.reveal(&name).await?,
                NameOp::Redeem { name } => account.redeem(&name).await?,
                NameOp::Update { name, data } => {
                    let data = hex::decode(&data).context("resource data must be hex")?;
                    account.update(&name, data).await?
                }
                NameOp::Transfer { name, address } => account.transfer(&name, &address).await?,
                NameOp::Finalize { name } => account.finalize(&name).await?,
                NameOp::Renew { name } => account.renew(&name).await?,
                NameOp::Revoke { name } => account.revoke(&name).await?,
            };
            println!("{}", txid);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<WalletConfig> {
    let mut config = match &cli.config {
        Some(path) if path.exists() => WalletConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        Some(path) => bail!("config file {:?} does not exist", path),
        None => WalletConfig::default(),
    };
    if let Some(network) = &cli.network {
        config.network = NetworkType::from_str(network)?.as_str().to_string();
    }
    if let Some(url) = &cli.node_url {
        config.node_url = Some(url.clone());
    }
    if let Some(key) = &cli.api_key {
        config.api_key = Some(key.clone());
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

fn unlocked(service: &WalletService, signer: &Signer) -> anyhow::Result<Arc<Account>> {
    let account = service.account(&signer.account)?;
    account
        .unlock(&signer.passphrase, Some(Duration::from_secs(60)))
        .context("Failed to unlock account")?;
    Ok(account)
}

async fn run(service: &WalletService) -> anyhow::Result<()> {
    if service.accounts().is_empty() {
        warn!("No accounts yet; create one with `hsw-node create-account`");
    }
    service.start().await;

    tokio::select! {
        result = service.wait() => {
            if let Err(e) = result {
                service.shutdown().await.ok();
                return Err(e).context("Block monitor stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    service.shutdown().await?;
    Ok(())
}
