//! HD keyring with lock/unlock over an encrypted seed
//!
//! Keys follow BIP-44: `m/44'/coin_type'/account'/branch/index`. The account
//! extended public key is always available, so addresses can be derived while
//! the keyring is locked. Private keys require an unlock, which decrypts the
//! seed with an Argon2id-derived ChaCha20-Poly1305 key.

use crate::address::{Address, AddressPath};
use crate::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use bip32::{ChildNumber, DerivationPath, Prefix, XPrv, XPub};
use bip39::{Language, Mnemonic};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hsw_params::Network;
use rand::RngCore;
use std::str::FromStr;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

const SEED_FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 1 + 12 + SALT_LEN + NONCE_LEN;

/// Argon2id cost parameters used to seal the seed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Iterations
    pub t_cost: u32,
    /// Parallelism
    pub p_cost: u32,
}

impl Default for KdfParams {
    /// 64 MiB, 3 iterations, 4 lanes
    fn default() -> Self {
        Self {
            m_cost: 65_536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and throwaway regtest wallets
    pub const fn light() -> Self {
        Self {
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        }
    }

    fn derive_key(&self, passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| Error::KeyDerivation(format!("argon2 params: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
            .map_err(|e| Error::KeyDerivation(format!("argon2: {}", e)))?;
        Ok(key)
    }
}

/// Encrypt a seed under `passphrase`.
///
/// Format: `[version][m_cost][t_cost][p_cost][salt(16)][nonce(12)][ciphertext]`
pub fn seal_seed(seed: &[u8], passphrase: &str, kdf: KdfParams) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let key = kdf.derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|e| Error::KeyDerivation(format!("cipher key: {}", e)))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), seed)
        .map_err(|e| Error::KeyDerivation(format!("seed encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.push(SEED_FORMAT_VERSION);
    out.extend_from_slice(&kdf.m_cost.to_le_bytes());
    out.extend_from_slice(&kdf.t_cost.to_le_bytes());
    out.extend_from_slice(&kdf.p_cost.to_le_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed seed
pub fn open_seed(sealed: &[u8], passphrase: &str) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() <= HEADER_LEN {
        return Err(Error::Decryption("sealed seed truncated".to_string()));
    }
    if sealed[0] != SEED_FORMAT_VERSION {
        return Err(Error::Decryption(format!(
            "unsupported seed format version {}",
            sealed[0]
        )));
    }
    let read_u32 = |at: usize| {
        let mut b = [0u8; 4];
        b.copy_from_slice(&sealed[at..at + 4]);
        u32::from_le_bytes(b)
    };
    let kdf = KdfParams {
        m_cost: read_u32(1),
        t_cost: read_u32(5),
        p_cost: read_u32(9),
    };
    let salt = &sealed[13..13 + SALT_LEN];
    let nonce = &sealed[13 + SALT_LEN..HEADER_LEN];
    let key = kdf.derive_key(passphrase, salt)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|e| Error::KeyDerivation(format!("cipher key: {}", e)))?;
    let seed = cipher
        .decrypt(Nonce::from_slice(nonce), &sealed[HEADER_LEN..])
        .map_err(|_| Error::Decryption("wrong passphrase".to_string()))?;
    Ok(Zeroizing::new(seed))
}

/// Generate a new random English mnemonic (12, 18 or 24 words; default 24)
pub fn generate_mnemonic(word_count: Option<u32>) -> Result<String> {
    let entropy_size = match word_count.unwrap_or(24) {
        12 => 16,
        18 => 24,
        _ => 32,
    };
    let mut entropy = Zeroizing::new(vec![0u8; entropy_size]);
    rand::thread_rng().fill_bytes(entropy.as_mut_slice());
    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
    Ok(mnemonic.to_string())
}

/// BIP-39 seed for a mnemonic and optional extension passphrase
pub fn seed_from_mnemonic(phrase: &str, bip39_passphrase: &str) -> Result<Zeroizing<[u8; 64]>> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_seed(bip39_passphrase)))
}

fn child(index: u32) -> Result<ChildNumber> {
    ChildNumber::new(index, false).map_err(|e| Error::KeyDerivation(e.to_string()))
}

fn account_path(network: &Network, account_index: u32) -> Result<DerivationPath> {
    format!("m/44'/{}'/{}'", network.coin_type, account_index)
        .parse()
        .map_err(|e: bip32::Error| Error::KeyDerivation(e.to_string()))
}

struct Unlocked {
    account_xprv: XPrv,
    expires_at: Option<Instant>,
}

/// Account keyring
pub struct Keyring {
    network: Network,
    account_index: u32,
    account_xpub: XPub,
    sealed_seed: Option<Vec<u8>>,
    unlocked: Option<Unlocked>,
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("network", &self.network.name)
            .field("account_index", &self.account_index)
            .field("watch_only", &self.is_watch_only())
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl Keyring {
    /// Create a keyring from a mnemonic, sealing the seed under `passphrase`.
    ///
    /// The keyring starts locked.
    pub fn from_mnemonic(
        network: Network,
        account_index: u32,
        phrase: &str,
        bip39_passphrase: &str,
        passphrase: &str,
        kdf: KdfParams,
    ) -> Result<Self> {
        let seed = seed_from_mnemonic(phrase, bip39_passphrase)?;
        let xprv = XPrv::derive_from_path(&seed[..], &account_path(&network, account_index)?)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        let sealed = seal_seed(&seed[..], passphrase, kdf)?;

        tracing::debug!(
            "Created keyring for account {} on {}",
            account_index,
            network.name
        );

        Ok(Self {
            network,
            account_index,
            account_xpub: xprv.public_key(),
            sealed_seed: Some(sealed),
            unlocked: None,
        })
    }

    /// Restore from persisted parts
    pub fn from_parts(
        network: Network,
        account_index: u32,
        account_xpub: &str,
        sealed_seed: Option<Vec<u8>>,
    ) -> Result<Self> {
        let account_xpub =
            XPub::from_str(account_xpub).map_err(|e| Error::KeyDerivation(e.to_string()))?;
        Ok(Self {
            network,
            account_index,
            account_xpub,
            sealed_seed,
            unlocked: None,
        })
    }

    /// Watch-only keyring that can derive addresses but never sign
    pub fn watch_only(network: Network, account_index: u32, account_xpub: &str) -> Result<Self> {
        Self::from_parts(network, account_index, account_xpub, None)
    }

    /// Network this keyring derives for
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// BIP-44 account index
    pub fn account_index(&self) -> u32 {
        self.account_index
    }

    /// Serialized account extended public key
    pub fn account_xpub(&self) -> String {
        self.account_xpub.to_string(Prefix::XPUB)
    }

    /// Sealed seed bytes, if this is not a watch-only keyring
    pub fn sealed_seed(&self) -> Option<&[u8]> {
        self.sealed_seed.as_deref()
    }

    /// True when no private keys are held
    pub fn is_watch_only(&self) -> bool {
        self.sealed_seed.is_none()
    }

    /// True when private keys are unavailable
    pub fn is_locked(&self) -> bool {
        match &self.unlocked {
            None => true,
            Some(u) => u.expires_at.is_some_and(|t| Instant::now() >= t),
        }
    }

    /// Decrypt the seed and keep the account private key until `lock` or timeout
    pub fn unlock(&mut self, passphrase: &str, timeout: Option<Duration>) -> Result<()> {
        let sealed = self
            .sealed_seed
            .as_ref()
            .ok_or_else(|| Error::KeyDerivation("watch-only keyring cannot unlock".to_string()))?;
        let seed = open_seed(sealed, passphrase)?;
        let xprv = XPrv::derive_from_path(
            seed.as_slice(),
            &account_path(&self.network, self.account_index)?,
        )
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;

        if xprv.public_key().to_bytes() != self.account_xpub.to_bytes() {
            return Err(Error::Decryption(
                "seed does not match account public key".to_string(),
            ));
        }

        self.unlocked = Some(Unlocked {
            account_xprv: xprv,
            expires_at: timeout.map(|t| Instant::now() + t),
        });
        tracing::info!("Keyring for account {} unlocked", self.account_index);
        Ok(())
    }

    /// Drop the decrypted account key
    pub fn lock(&mut self) {
        if self.unlocked.take().is_some() {
            tracing::info!("Keyring for account {} locked", self.account_index);
        }
    }

    /// Re-seal the seed under a new passphrase
    pub fn change_passphrase(&mut self, old: &str, new: &str, kdf: KdfParams) -> Result<()> {
        let sealed = self
            .sealed_seed
            .as_ref()
            .ok_or_else(|| Error::KeyDerivation("watch-only keyring has no seed".to_string()))?;
        let seed = open_seed(sealed, old)?;
        self.sealed_seed = Some(seal_seed(seed.as_slice(), new, kdf)?);
        Ok(())
    }

    /// Compressed public key at `path`
    pub fn public_key(&self, path: AddressPath) -> Result<[u8; 33]> {
        let key = self
            .account_xpub
            .derive_child(child(path.branch.index())?)
            .and_then(|k| k.derive_child(ChildNumber::new(path.index, false)?))
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        Ok(key.to_bytes())
    }

    /// Pubkey-hash address at `path`
    pub fn address(&self, path: AddressPath) -> Result<Address> {
        Ok(Address::from_pubkey(&self.public_key(path)?))
    }

    /// Private key at `path`; fails with `WalletLocked` while locked
    pub fn secret_key(&self, path: AddressPath) -> Result<secp256k1::SecretKey> {
        if self.is_locked() {
            return Err(Error::WalletLocked);
        }
        let unlocked = self.unlocked.as_ref().ok_or(Error::WalletLocked)?;
        let key = unlocked
            .account_xprv
            .derive_child(child(path.branch.index())?)
            .and_then(|k| k.derive_child(ChildNumber::new(path.index, false)?))
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        secp256k1::SecretKey::from_slice(&key.to_bytes())
            .map_err(|e| Error::KeyDerivation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Branch;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn keyring() -> Keyring {
        Keyring::from_mnemonic(Network::regtest(), 0, PHRASE, "", "hunter2", KdfParams::light()).unwrap()
    }

    #[test]
    fn test_generate_mnemonic_word_counts() {
        assert_eq!(generate_mnemonic(Some(12)).unwrap().split_whitespace().count(), 12);
        assert_eq!(generate_mnemonic(None).unwrap().split_whitespace().count(), 24);
    }

    #[test]
    fn test_invalid_mnemonic_rejected() {
        let err = Keyring::from_mnemonic(Network::regtest(), 0, "not a phrase", "", "pw", KdfParams::light())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMnemonic(_)));
    }

    #[test]
    fn test_starts_locked_and_unlocks() {
        let mut kr = keyring();
        assert!(kr.is_locked());
        let path = AddressPath::new(Branch::Receive, 0);
        assert!(matches!(kr.secret_key(path), Err(Error::WalletLocked)));

        assert!(kr.unlock("wrong", None).is_err());
        kr.unlock("hunter2", None).unwrap();
        assert!(!kr.is_locked());

        let sk = kr.secret_key(path).unwrap();
        let secp = secp256k1::Secp256k1::new();
        let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        assert_eq!(pk.serialize(), kr.public_key(path).unwrap());

        kr.lock();
        assert!(kr.is_locked());
    }

    #[test]
    fn test_unlock_timeout_expires() {
        let mut kr = keyring();
        kr.unlock("hunter2", Some(Duration::from_millis(0))).unwrap();
        assert!(kr.is_locked());
    }

    #[test]
    fn test_restore_from_parts_derives_same_addresses() {
        let kr = keyring();
        let restored = Keyring::from_parts(
            Network::regtest(),
            0,
            &kr.account_xpub(),
            kr.sealed_seed().map(|s| s.to_vec()),
        )
        .unwrap();
        for index in 0..3 {
            let path = AddressPath::new(Branch::Change, index);
            assert_eq!(kr.address(path).unwrap(), restored.address(path).unwrap());
        }
    }

    #[test]
    fn test_watch_only_cannot_unlock() {
        let kr = keyring();
        let mut watch = Keyring::watch_only(Network::regtest(), 0, &kr.account_xpub()).unwrap();
        assert!(watch.is_watch_only());
        assert!(watch.unlock("hunter2", None).is_err());
    }

    #[test]
    fn test_change_passphrase() {
        let mut kr = keyring();
        kr.change_passphrase("hunter2", "correct horse", KdfParams::light()).unwrap();
        assert!(kr.unlock("hunter2", None).is_err());
        kr.unlock("correct horse", None).unwrap();
    }
}
