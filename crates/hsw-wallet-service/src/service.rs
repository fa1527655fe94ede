//! Wallet service supervisor
//!
//! Owns the shared database, the node client and the block monitor, and
//! runs one task per account that consumes monitor notifications. Accounts
//! are independent: a failing account logs and keeps waiting for the next
//! notification while the others continue.

use crate::account::{Account, CreateAccount};
use crate::config::WalletConfig;
use crate::{Error, Result};
use hsw_params::Network;
use hsw_storage_sqlite::{AccountStorage, Database, SharedDatabase};
use hsw_sync::{BlockMonitor, BlockNotification, CancelToken, NodeClient, RpcNodeClient};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Running wallet node
pub struct WalletService {
    config: WalletConfig,
    network: Network,
    db: SharedDatabase,
    client: Arc<dyn NodeClient>,
    monitor: Arc<BlockMonitor>,
    accounts: RwLock<HashMap<String, Arc<Account>>>,
    cancel: CancelToken,
    running: Mutex<bool>,
    monitor_task: tokio::sync::Mutex<Option<JoinHandle<hsw_sync::Result<()>>>>,
    account_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WalletService {
    /// Build the service over an existing database and client, loading
    /// every stored account for the configured network
    pub fn new(config: WalletConfig, client: Arc<dyn NodeClient>, db: SharedDatabase) -> Result<Self> {
        config.validate()?;
        let network = config.network()?;
        let monitor = Arc::new(BlockMonitor::new(
            Arc::clone(&client),
            Arc::clone(&db),
            config.monitor_config(),
        )?);

        let rows = AccountStorage::new(db.lock().conn()).list()?;
        let mut accounts = HashMap::with_capacity(rows.len());
        for row in rows {
            if row.network != network.name {
                warn!("Skipping account '{}' from network {}", row.name, row.network);
                continue;
            }
            let account = Account::load(
                Arc::clone(&db),
                Arc::clone(&client),
                network,
                config.account_config(),
                row,
            )?;
            debug!("Loaded {:?}", account);
            accounts.insert(account.name().to_string(), Arc::new(account));
        }
        info!("Wallet service on {} with {} accounts", network.name, accounts.len());

        Ok(Self {
            config,
            network,
            db,
            client,
            monitor,
            accounts: RwLock::new(accounts),
            cancel: CancelToken::new(),
            running: Mutex::new(false),
            monitor_task: tokio::sync::Mutex::new(None),
            account_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Open the database under the configured data directory and connect
    /// to the configured node
    pub fn open(config: WalletConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.data_dir()?)?;
        let db = Database::open(config.database_path()?)?.into_shared();
        let client: Arc<dyn NodeClient> = Arc::new(RpcNodeClient::new(config.rpc_config()?)?);
        Self::new(config, client, db)
    }

    /// Active configuration
    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Network parameters
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Shared database handle
    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    /// Block monitor
    pub fn monitor(&self) -> &Arc<BlockMonitor> {
        &self.monitor
    }

    /// Create an account. If the service is running it starts following
    /// the chain immediately.
    pub fn create_account(&self, request: &CreateAccount) -> Result<Arc<Account>> {
        if self.accounts.read().contains_key(&request.name) {
            return Err(Error::AccountExists(request.name.clone()));
        }
        let account = Arc::new(Account::create(
            Arc::clone(&self.db),
            Arc::clone(&self.client),
            self.network,
            self.config.account_config(),
            request,
        )?);
        self.accounts
            .write()
            .insert(account.name().to_string(), Arc::clone(&account));

        if *self.running.lock() {
            self.spawn_account(Arc::clone(&account));
            self.monitor.poke();
        }
        Ok(account)
    }

    /// Account by name
    pub fn account(&self, name: &str) -> Result<Arc<Account>> {
        self.accounts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AccountNotFound(name.to_string()))
    }

    /// All accounts, sorted by name
    pub fn accounts(&self) -> Vec<Arc<Account>> {
        let mut accounts: Vec<_> = self.accounts.read().values().cloned().collect();
        accounts.sort_by(|a, b| a.name().cmp(b.name()));
        accounts
    }

    /// Start the monitor and one task per account. Calling it twice is a no-op.
    pub async fn start(&self) {
        {
            let mut running = self.running.lock();
            if *running {
                return;
            }
            *running = true;
        }

        for account in self.accounts() {
            self.spawn_account(account);
        }
        let monitor = Arc::clone(&self.monitor);
        let handle = tokio::spawn(monitor.run(self.cancel.clone()));
        *self.monitor_task.lock().await = Some(handle);
        info!("Wallet service started");
    }

    fn spawn_account(&self, account: Arc<Account>) {
        let rx = self.monitor.subscribe();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(run_account(account, rx, cancel));
        self.account_tasks.lock().push(handle);
    }

    /// Signal every task to stop and wait for them
    pub async fn shutdown(&self) -> Result<()> {
        info!("Wallet service shutting down");
        self.cancel.cancel();
        let result = self.wait().await;

        let tasks: Vec<_> = std::mem::take(&mut *self.account_tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Account task panicked: {}", e);
            }
        }
        *self.running.lock() = false;
        result
    }

    /// Wait for the monitor to stop and return how it ended. A safety stop
    /// comes back as an error. Dropping this future leaves the monitor
    /// running.
    pub async fn wait(&self) -> Result<()> {
        let mut task = self.monitor_task.lock().await;
        let joined = match task.as_mut() {
            Some(handle) => handle.await,
            None => return Ok(()),
        };
        *task = None;
        match joined {
            Ok(result) => Ok(result?),
            Err(e) => Err(Error::InvalidState(format!("monitor task failed: {}", e))),
        }
    }

    /// Token cancelled on shutdown
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

async fn run_account(
    account: Arc<Account>,
    mut rx: mpsc::Receiver<BlockNotification>,
    cancel: CancelToken,
) {
    debug!("Account '{}' task started", account.name());
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            n = rx.recv() => match n {
                Some(n) => n,
                None => break,
            },
        };

        if let Err(e) = account.handle_notification(notification, &cancel).await {
            if e.is_cancelled() {
                break;
            }
            warn!(
                "Account '{}' failed at {}/{}: {}",
                account.name(),
                notification.chain_tip,
                notification.common_tip,
                e
            );
        }
    }
    debug!("Account '{}' task stopped", account.name());
}
