//! Marketplace operations over the record store and the recovery cache.
//!
//! Callers are expected to have validated request shapes already; this
//! layer enforces the cross-record rules (credentials, listing ownership,
//! key uniqueness) and drives the recovery handshake.

use crate::error::{Result, StoreError};
use crate::recovery::RecoveryTokenCache;
use crate::store::{KindConfig, RecordStore, StoreConfig, ACCOUNTS, LISTINGS};
use crate::types::{Record, RecordPatch};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Account field holding the password.
const PASSWORD_FIELD: &str = "Password";

/// Text stored for accounts that did not describe themselves.
pub const DEFAULT_ABOUT: &str = "No information about you yet, tell us about yourself :)";

/// Default lifetime of a recovery token.
pub const DEFAULT_RECOVERY_TTL: Duration = Duration::from_secs(15 * 60);

/// Role of an account on the marketplace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Buyer,
    Seller,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Buyer => "buyer",
            AccountStatus::Seller => "seller",
        }
    }

    /// Parse a stored status; anything else is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "buyer" => Some(AccountStatus::Buyer),
            "seller" => Some(AccountStatus::Seller),
            _ => None,
        }
    }
}

/// Registration data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewAccount {
    pub email: String,
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
    pub age: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
    #[serde(
        rename = "aboutmyself",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub about: Option<String>,
}

/// Public view of an account.
///
/// Accounts written before registration defaults existed may lack any field
/// but the username, so the rest are optional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    /// `None` when missing or not a known status.
    #[serde(default)]
    pub status: Option<AccountStatus>,
    #[serde(default)]
    pub img: Option<String>,
}

impl AccountInfo {
    fn from_record(account: &Record) -> Result<Self> {
        let field = |name: &str| account.get_str(name).map(str::to_string);
        Ok(Self {
            username: account.key("username")?.to_string(),
            email: field("email"),
            status: account.get_str("status").and_then(AccountStatus::parse),
            img: field("img"),
        })
    }
}

/// A product listing as submitted by its owner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewListing {
    pub uniquename: String,
    pub price: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    pub img1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img5: Option<String>,
}

/// Marketplace configuration.
#[derive(Clone, Debug)]
pub struct MarketplaceConfig {
    pub store: StoreConfig,
    pub recovery_ttl: Duration,
}

impl MarketplaceConfig {
    /// Configuration rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.store.data_dir = data_dir.into();
        config
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                kinds: vec![account_kind(), KindConfig::listings()],
                ..Default::default()
            },
            recovery_ttl: DEFAULT_RECOVERY_TTL,
        }
    }
}

/// Accounts with the marketplace's registration defaults.
fn account_kind() -> KindConfig {
    KindConfig::accounts()
        .with_default("status", AccountStatus::Buyer.as_str())
        .with_default("aboutmyself", DEFAULT_ABOUT)
}

/// Accounts, listings, and password recovery.
pub struct Marketplace {
    store: RecordStore,
    /// Payload is the account username.
    recovery: RecoveryTokenCache<String>,
    recovery_ttl: Duration,
}

impl Marketplace {
    /// Open (or create) the marketplace data directory.
    pub fn open(config: MarketplaceConfig) -> Result<Self> {
        let store = RecordStore::open_or_create(config.store)?;
        for kind in [ACCOUNTS, LISTINGS] {
            if !store.kinds().contains(&kind) {
                return Err(StoreError::InvalidConfig(format!(
                    "marketplace requires the '{}' kind",
                    kind
                )));
            }
        }

        Ok(Self {
            store,
            recovery: RecoveryTokenCache::new(),
            recovery_ttl: config.recovery_ttl,
        })
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn recovery(&self) -> &RecoveryTokenCache<String> {
        &self.recovery
    }

    // --- Accounts ---

    /// Register an account. Fails with `DuplicateKey` if the username is taken.
    pub fn register(&self, account: NewAccount) -> Result<Record> {
        let record = Record::json(&account)?;
        let stored = self.store.insert(ACCOUNTS, record)?;
        info!(username = %account.username, "Account registered");
        Ok(stored)
    }

    /// Return the account if `password` matches, else `InvalidCredentials`.
    pub fn verify_credentials(&self, username: &str, password: &str) -> Result<Record> {
        match self.store.find_by_key(ACCOUNTS, username)? {
            Some(account) if account.get_str(PASSWORD_FIELD) == Some(password) => Ok(account),
            _ => Err(StoreError::InvalidCredentials),
        }
    }

    /// Public account details, after a credential check.
    pub fn account_info(&self, username: &str, password: &str) -> Result<AccountInfo> {
        let account = self.verify_credentials(username, password)?;
        AccountInfo::from_record(&account)
    }

    /// Change username and/or password. `None` leaves a field as it is.
    ///
    /// A new username must not belong to another account.
    pub fn change_credentials(
        &self,
        username: &str,
        new_username: Option<&str>,
        new_password: Option<&str>,
    ) -> Result<Record> {
        let patch = RecordPatch::new()
            .set_opt("username", new_username)
            .set_opt(PASSWORD_FIELD, new_password);
        self.store.update(ACCOUNTS, username, &patch)
    }

    pub fn change_image(&self, username: &str, img: &str) -> Result<Record> {
        self.store
            .update(ACCOUNTS, username, &RecordPatch::new().set("img", img))
    }

    pub fn change_status(&self, username: &str, status: AccountStatus) -> Result<Record> {
        self.store.update(
            ACCOUNTS,
            username,
            &RecordPatch::new().set("status", status.as_str()),
        )
    }

    /// Update the self-description. Requires the account password.
    ///
    /// The password is checked under the same lock as the update.
    pub fn change_about(&self, username: &str, password: &str, about: &str) -> Result<Record> {
        let result = self.store.update_where(
            ACCOUNTS,
            username,
            |account| match account.get_str(PASSWORD_FIELD) {
                Some(stored) if stored == password => Ok(()),
                _ => Err(StoreError::InvalidCredentials),
            },
            &RecordPatch::new().set("aboutmyself", about),
        );
        match result {
            Err(StoreError::RecordNotFound { .. }) => Err(StoreError::InvalidCredentials),
            other => other,
        }
    }

    /// Profile image of an account, if it has one.
    pub fn profile_image(&self, username: &str) -> Result<Option<String>> {
        let account = self
            .store
            .find_by_key(ACCOUNTS, username)?
            .ok_or_else(|| StoreError::not_found(ACCOUNTS, username))?;
        Ok(account.get_str("img").map(str::to_string))
    }

    // --- Listings ---

    /// Publish a listing owned by `owner`.
    ///
    /// The owner's username and profile image are copied onto the listing.
    /// The owner account stays locked until the listing is stored.
    pub fn submit_listing(&self, owner: &str, listing: NewListing) -> Result<Record> {
        let stored = self
            .store
            .insert_referencing(LISTINGS, ACCOUNTS, owner, |account| {
                let imgprofile = account
                    .get("img")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                Ok(Record::json(&listing)?
                    .with("username", owner)
                    .with("imgprofile", imgprofile))
            })?;
        info!(owner, uniquename = %listing.uniquename, "Listing published");
        Ok(stored)
    }

    /// Every listing, oldest first.
    pub fn listings(&self) -> Result<Vec<Record>> {
        self.store.list(LISTINGS)
    }

    // --- Recovery ---

    /// Start password recovery for the account registered with `email`.
    ///
    /// Returns the secret to deliver to that address, or `None` if no account
    /// uses it. Any earlier token for the address stops working.
    pub fn request_recovery(&self, email: &str) -> Result<Option<String>> {
        let Some(account) = self.store.find_by_field(ACCOUNTS, "email", email)? else {
            return Ok(None);
        };
        let username = account.key("username")?.to_string();
        Ok(Some(self.recovery.issue(email, username, self.recovery_ttl)))
    }

    /// Finish recovery: consume `secret` and set a new password.
    pub fn complete_recovery(&self, secret: &str, new_password: &str) -> Result<Record> {
        let username = self.recovery.redeem(secret)?;
        let updated = self.store.update(
            ACCOUNTS,
            &username,
            &RecordPatch::new().set(PASSWORD_FIELD, new_password),
        )?;
        info!(username = %username, "Password reset through recovery");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_market(dir: &TempDir) -> Marketplace {
        Marketplace::open(MarketplaceConfig::new(dir.path().join("data"))).unwrap()
    }

    fn new_account(username: &str) -> NewAccount {
        NewAccount {
            email: format!("{}@example.com", username),
            username: username.to_string(),
            password: "password123".to_string(),
            age: 30,
            img: None,
            status: None,
            about: None,
        }
    }

    fn new_listing(uniquename: &str) -> NewListing {
        NewListing {
            uniquename: uniquename.to_string(),
            price: "100".to_string(),
            description: "Barely used".to_string(),
            telephone: None,
            whatsapp: None,
            telegram: Some("@seller".to_string()),
            img1: "front.png".to_string(),
            img2: None,
            img3: None,
            img4: None,
            img5: None,
        }
    }

    #[test]
    fn test_register_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);

        let stored = market.register(new_account("alice")).unwrap();
        assert_eq!(stored.get_str("status"), Some("buyer"));
        assert_eq!(stored.get_str("aboutmyself"), Some(DEFAULT_ABOUT));
        assert_eq!(stored.get("balance"), Some(&json!(0)));
        assert_eq!(stored.get_str("Password"), Some("password123"));
        assert!(!stored.contains("img"));
    }

    #[test]
    fn test_register_duplicate_username() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);

        market.register(new_account("alice")).unwrap();
        assert!(matches!(
            market.register(new_account("alice")),
            Err(StoreError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_verify_credentials() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();

        assert!(market.verify_credentials("alice", "password123").is_ok());
        assert!(matches!(
            market.verify_credentials("alice", "wrong"),
            Err(StoreError::InvalidCredentials)
        ));
        assert!(matches!(
            market.verify_credentials("nobody", "password123"),
            Err(StoreError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_account_info() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();
        market.change_image("alice", "alice.png").unwrap();

        let info = market.account_info("alice", "password123").unwrap();
        assert_eq!(
            info,
            AccountInfo {
                username: "alice".to_string(),
                email: Some("alice@example.com".to_string()),
                status: Some(AccountStatus::Buyer),
                img: Some("alice.png".to_string()),
            }
        );
    }

    #[test]
    fn test_account_info_for_sparse_accounts() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(
            data_dir.join("accounts.json"),
            r#"[
                {"username": "legacy", "email": "l@example.com", "Password": "password123"},
                {"username": "odd", "Password": "pw", "status": "admin"}
            ]"#,
        )
        .unwrap();
        let market = Marketplace::open(MarketplaceConfig::new(&data_dir)).unwrap();

        let info = market.account_info("legacy", "password123").unwrap();
        assert_eq!(
            info,
            AccountInfo {
                username: "legacy".to_string(),
                email: Some("l@example.com".to_string()),
                status: None,
                img: None,
            }
        );

        let info = market.account_info("odd", "pw").unwrap();
        assert_eq!(info.email, None);
        assert_eq!(info.status, None);
    }

    #[test]
    fn test_change_credentials() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();
        market.register(new_account("bob")).unwrap();

        let updated = market
            .change_credentials("alice", None, Some("new-password"))
            .unwrap();
        assert_eq!(updated.get_str("username"), Some("alice"));
        assert!(market.verify_credentials("alice", "new-password").is_ok());

        assert!(matches!(
            market.change_credentials("alice", Some("bob"), None),
            Err(StoreError::DuplicateKey { .. })
        ));

        market
            .change_credentials("alice", Some("alicia"), None)
            .unwrap();
        assert!(market.verify_credentials("alicia", "new-password").is_ok());
        assert!(market.store().find_by_key(ACCOUNTS, "alice").unwrap().is_none());
    }

    #[test]
    fn test_change_status_and_about() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();

        let updated = market.change_status("alice", AccountStatus::Seller).unwrap();
        assert_eq!(updated.get_str("status"), Some("seller"));

        assert!(matches!(
            market.change_about("alice", "wrong", "hi"),
            Err(StoreError::InvalidCredentials)
        ));
        let updated = market
            .change_about("alice", "password123", "I sell bikes")
            .unwrap();
        assert_eq!(updated.get_str("aboutmyself"), Some("I sell bikes"));

        assert!(matches!(
            market.change_about("nobody", "password123", "hi"),
            Err(StoreError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_change_about_rejects_replaced_password() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();
        market
            .change_credentials("alice", None, Some("new-password"))
            .unwrap();

        assert!(matches!(
            market.change_about("alice", "password123", "stale"),
            Err(StoreError::InvalidCredentials)
        ));
        let account = market.store().find_by_key(ACCOUNTS, "alice").unwrap().unwrap();
        assert_eq!(account.get_str("aboutmyself"), Some(DEFAULT_ABOUT));
    }

    #[test]
    fn test_profile_image() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();

        assert_eq!(market.profile_image("alice").unwrap(), None);
        market.change_image("alice", "a.png").unwrap();
        assert_eq!(market.profile_image("alice").unwrap().as_deref(), Some("a.png"));
        assert!(matches!(
            market.profile_image("nobody"),
            Err(StoreError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn test_submit_listing_copies_owner() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();
        market.change_image("alice", "alice.png").unwrap();

        let listing = market.submit_listing("alice", new_listing("bike-1")).unwrap();
        assert_eq!(listing.get_str("username"), Some("alice"));
        assert_eq!(listing.get_str("imgprofile"), Some("alice.png"));
        assert_eq!(listing.get_str("telegram"), Some("@seller"));
        assert!(!listing.contains("img2"));
    }

    #[test]
    fn test_submit_listing_without_owner_image() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();

        let listing = market.submit_listing("alice", new_listing("bike-1")).unwrap();
        assert_eq!(listing.get("imgprofile"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn test_submit_listing_rules() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();

        assert!(matches!(
            market.submit_listing("nobody", new_listing("bike-1")),
            Err(StoreError::RecordNotFound { .. })
        ));

        market.submit_listing("alice", new_listing("bike-1")).unwrap();
        assert!(matches!(
            market.submit_listing("alice", new_listing("bike-1")),
            Err(StoreError::DuplicateKey { .. })
        ));

        market.submit_listing("alice", new_listing("bike-2")).unwrap();
        let names: Vec<_> = market
            .listings()
            .unwrap()
            .iter()
            .map(|l| l.get_str("uniquename").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["bike-1", "bike-2"]);
    }

    #[test]
    fn test_recovery_flow() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();

        assert!(market.request_recovery("nobody@example.com").unwrap().is_none());

        let secret = market.request_recovery("alice@example.com").unwrap().unwrap();
        market.complete_recovery(&secret, "fresh-password").unwrap();

        assert!(market.verify_credentials("alice", "fresh-password").is_ok());
        assert!(matches!(
            market.complete_recovery(&secret, "again"),
            Err(StoreError::TokenNotFound)
        ));
    }

    #[test]
    fn test_recovery_reissue_invalidates_first_secret() {
        let dir = TempDir::new().unwrap();
        let market = test_market(&dir);
        market.register(new_account("alice")).unwrap();

        let first = market.request_recovery("alice@example.com").unwrap().unwrap();
        let second = market.request_recovery("alice@example.com").unwrap().unwrap();

        assert!(matches!(
            market.complete_recovery(&first, "x-password"),
            Err(StoreError::TokenNotFound)
        ));
        market.complete_recovery(&second, "y-password").unwrap();
    }

    #[test]
    fn test_recovery_expired() {
        let dir = TempDir::new().unwrap();
        let mut config = MarketplaceConfig::new(dir.path().join("data"));
        config.recovery_ttl = Duration::from_millis(1);
        let market = Marketplace::open(config).unwrap();
        market.register(new_account("alice")).unwrap();

        let secret = market.request_recovery("alice@example.com").unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(matches!(
            market.complete_recovery(&secret, "fresh-password"),
            Err(StoreError::TokenExpired)
        ));
        assert!(market.verify_credentials("alice", "password123").is_ok());
    }

    #[test]
    fn test_marketplace_requires_kinds() {
        let dir = TempDir::new().unwrap();
        let mut config = MarketplaceConfig::new(dir.path().join("data"));
        config.store.kinds = vec![KindConfig::accounts()];

        assert!(matches!(
            Marketplace::open(config),
            Err(StoreError::InvalidConfig(_))
        ));
    }
}
