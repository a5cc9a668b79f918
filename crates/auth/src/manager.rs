//! Auth manager: login, client authentication, permission checks, CRUD,
//! and the cluster-wide signing-key bootstrap.
//!
//! # Key bootstrap
//!
//! On init the manager takes the distributed `jwt_init_lock`, reads the PEM
//! keypair from the auth config rows, and generates + persists a fresh
//! 2048-bit pair only when either half is missing. Peers racing through
//! startup therefore converge on one signing keypair, and a token issued by
//! any node validates on all of them.

use crate::jwt::{Claims, Identity, JwtService};
use crate::store::AuthStore;
use crate::types::{
    permitted, ClientCredential, Permission, Role, Subject, SubjectKind, User, UserCredential,
    UserStatus,
};
use async_trait::async_trait;
use lodestar_core::traits::{Component, ComponentStatus, NodeContext};
use lodestar_core::types::now_millis;
use lodestar_core::{Error, Result};
use lodestar_crypto::{codegen, password, RsaKeypair};
use lodestar_kv::{DistributedLock, KvStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const JWT_PRIVATE_KEY_CONFIG: &str = "jwt.private_key_pem";
const JWT_PUBLIC_KEY_CONFIG: &str = "jwt.public_key_pem";
const JWT_INIT_LOCK: &str = "jwt_init_lock";
const ADMIN_SEED_LOCK: &str = "admin_seed_lock";
const ADMIN_ROLE_ID: &str = "admin";

const INIT_LOCK_TTL: Duration = Duration::from_secs(30);
const INIT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

fn default_issuer() -> String {
    "lodestar".to_string()
}

fn default_audience() -> String {
    "lodestar-api".to_string()
}

fn default_token_ttl_secs() -> u64 {
    48 * 60 * 60
}

fn default_bcrypt_cost() -> u32 {
    password::DEFAULT_COST
}

fn default_admin_username() -> String {
    "admin".to_string()
}

/// Auth manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    #[serde(default = "default_admin_username")]
    pub initial_admin_username: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            audience: default_audience(),
            token_ttl_secs: default_token_ttl_secs(),
            bcrypt_cost: default_bcrypt_cost(),
            initial_admin_username: default_admin_username(),
        }
    }
}

/// Successful interactive login.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user: User,
    pub token: String,
}

/// Request to create an interactive user.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

/// Request to create a machine client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewClient {
    /// Explicit client id, or generated when absent.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Explicit secret, or generated when absent.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<SubjectKind>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Freshly created client. The plaintext secret appears here exactly once;
/// only its bcrypt hash is stored.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedClient {
    pub client_id: String,
    pub secret: String,
}

/// Partial update of a machine client. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateClient {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<SubjectKind>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

/// The authentication and authorization manager.
pub struct AuthManager {
    kv: Arc<dyn KvStore>,
    store: AuthStore,
    config: RwLock<AuthConfig>,
    jwt: RwLock<Option<Arc<JwtService>>>,
    status: RwLock<ComponentStatus>,
}

impl AuthManager {
    pub fn new(kv: Arc<dyn KvStore>, config: AuthConfig) -> Self {
        let store = AuthStore::new(Arc::clone(&kv));
        Self {
            kv,
            store,
            config: RwLock::new(config),
            jwt: RwLock::new(None),
            status: RwLock::new(ComponentStatus::NotInitialized),
        }
    }

    pub fn auth_store(&self) -> &AuthStore {
        &self.store
    }

    fn config(&self) -> AuthConfig {
        self.config.read().expect("auth config poisoned").clone()
    }

    /// The JWT service, available after a successful `initialize`.
    pub fn jwt(&self) -> Result<Arc<JwtService>> {
        self.jwt
            .read()
            .expect("jwt slot poisoned")
            .clone()
            .ok_or_else(|| Error::InvalidState("auth manager not initialized".to_string()))
    }

    fn set_status(&self, status: ComponentStatus) {
        *self.status.write().expect("status poisoned") = status;
    }

    /// Bootstrap the shared signing keypair and seed the initial admin.
    /// Idempotent; safe to race across peers.
    pub async fn initialize(&self) -> Result<()> {
        self.bootstrap_jwt_keys().await?;
        self.seed_initial_admin().await?;
        self.set_status(ComponentStatus::Initialized);
        Ok(())
    }

    async fn bootstrap_jwt_keys(&self) -> Result<()> {
        let lock = DistributedLock::new(Arc::clone(&self.kv), JWT_INIT_LOCK, INIT_LOCK_TTL);
        lock.lock(INIT_LOCK_TIMEOUT).await?;
        let outcome = self.load_or_create_keypair().await;
        if let Err(e) = lock.unlock().await {
            warn!(error = %e, "releasing {JWT_INIT_LOCK} failed");
        }
        let keypair = outcome?;

        let config = self.config();
        let service = JwtService::from_keypair(
            &keypair,
            config.issuer,
            config.audience,
            Duration::from_secs(config.token_ttl_secs),
        )?;
        *self.jwt.write().expect("jwt slot poisoned") = Some(Arc::new(service));
        Ok(())
    }

    /// Must run under `jwt_init_lock`.
    async fn load_or_create_keypair(&self) -> Result<RsaKeypair> {
        let private = self.store.get_auth_config(JWT_PRIVATE_KEY_CONFIG).await?;
        let public = self.store.get_auth_config(JWT_PUBLIC_KEY_CONFIG).await?;
        if let (Some(private), Some(public)) = (private, public) {
            return RsaKeypair::from_pem(private, public);
        }

        info!("no shared JWT keypair found, generating");
        let keypair = RsaKeypair::generate()?;
        self.store
            .set_auth_config(JWT_PRIVATE_KEY_CONFIG, keypair.private_pem())
            .await?;
        self.store
            .set_auth_config(JWT_PUBLIC_KEY_CONFIG, keypair.public_pem())
            .await?;
        Ok(keypair)
    }

    async fn seed_initial_admin(&self) -> Result<()> {
        let config = self.config();
        let username = config.initial_admin_username.clone();

        let lock = DistributedLock::new(Arc::clone(&self.kv), ADMIN_SEED_LOCK, INIT_LOCK_TTL);
        lock.lock(INIT_LOCK_TIMEOUT).await?;
        let outcome = self.seed_admin_locked(&config, &username).await;
        if let Err(e) = lock.unlock().await {
            warn!(error = %e, "releasing {ADMIN_SEED_LOCK} failed");
        }
        outcome
    }

    async fn seed_admin_locked(&self, config: &AuthConfig, username: &str) -> Result<()> {
        if self.store.get_role(ADMIN_ROLE_ID).await?.is_none() {
            self.store
                .save_role(&Role {
                    id: ADMIN_ROLE_ID.to_string(),
                    name: ADMIN_ROLE_ID.to_string(),
                    description: "full access".to_string(),
                    permissions: vec![Permission::any()],
                })
                .await?;
        }

        if self.store.find_user_by_username(username).await?.is_some() {
            return Ok(());
        }

        info!(username, "seeding initial admin user");
        let now = now_millis();
        let id = Uuid::new_v4().to_string();
        let user = User {
            id: id.clone(),
            username: username.to_string(),
            display_name: username.to_string(),
            email: String::new(),
            phone: String::new(),
            status: UserStatus::Active,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        // Initial password equals the username; the operator is expected to
        // rotate it on first login.
        let credential = UserCredential {
            username: username.to_string(),
            password_hash: password::hash(username, config.bcrypt_cost)?,
            updated_at: now,
        };
        let subject = Subject::new(&id, SubjectKind::User, username)
            .with_roles(vec![ADMIN_ROLE_ID.to_string()]);
        self.store.create_user(&user, &credential, &subject).await
    }

    // ── Authentication ───────────────────────────────────────────

    /// Interactive login with username and password.
    pub async fn login(&self, username: &str, plain_password: &str) -> Result<LoginResult> {
        let mut user = self
            .store
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))?;
        match user.status {
            UserStatus::Disabled => return Err(Error::UserDisabled(username.to_string())),
            UserStatus::Locked => return Err(Error::UserLocked(username.to_string())),
            UserStatus::Active => {}
        }

        let credential = self
            .store
            .get_credential(username)
            .await?
            .ok_or(Error::InvalidCredentials)?;
        if !password::verify(plain_password, &credential.password_hash)? {
            return Err(Error::InvalidCredentials);
        }

        let subject = self
            .store
            .get_subject(&user.id)
            .await?
            .ok_or_else(|| Error::Internal(format!("user {username} has no subject")))?;
        let permissions = self.collect_permissions(&subject.roles).await?;

        let name = if user.display_name.is_empty() {
            user.username.clone()
        } else {
            user.display_name.clone()
        };
        let token = self.jwt()?.sign(Identity {
            subject_id: user.id.clone(),
            kind: SubjectKind::User,
            name,
            roles: subject.roles.clone(),
            permissions,
            extra: Default::default(),
        })?;

        // Best effort: a failed stamp must not fail the login.
        user.last_login_at = Some(now_millis());
        if let Err(e) = self.store.save_user(&user).await {
            warn!(username, error = %e, "failed to stamp last login");
        }

        Ok(LoginResult { user, token })
    }

    /// Machine-client authentication with client id and secret.
    pub async fn authenticate_client(&self, client_id: &str, secret: &str) -> Result<String> {
        let subject = self
            .store
            .get_subject(client_id)
            .await?
            .ok_or(Error::InvalidCredentials)?;
        let credential = self
            .store
            .get_client_credential(client_id)
            .await?
            .ok_or(Error::InvalidCredentials)?;
        if !password::verify(secret, &credential.secret_hash)? {
            return Err(Error::InvalidCredentials);
        }
        if subject.disabled {
            return Err(Error::UserDisabled(client_id.to_string()));
        }

        let permissions = self.collect_permissions(&subject.roles).await?;
        self.jwt()?.sign(Identity {
            subject_id: subject.id.clone(),
            kind: credential.subject_kind,
            name: subject.name.clone(),
            roles: subject.roles.clone(),
            permissions,
            extra: Default::default(),
        })
    }

    /// Validate a token's signature and standard claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        self.jwt()?.validate(token)
    }

    /// Full permission check: token validity, subject liveness, then
    /// first-match-wins evaluation of the snapshotted permission list.
    pub async fn check_permission(
        &self,
        token: &str,
        resource: &str,
        action: &str,
    ) -> Result<Claims> {
        let claims = self.validate_token(token)?;
        let subject = self
            .store
            .get_subject(&claims.sub)
            .await?
            .ok_or_else(|| Error::Unauthenticated(format!("subject {} not found", claims.sub)))?;
        if subject.disabled {
            return Err(Error::Unauthenticated(format!(
                "subject {} is disabled",
                claims.sub
            )));
        }
        if permitted(&claims.permissions, resource, action) {
            Ok(claims)
        } else {
            Err(Error::PermissionDenied("permission denied".to_string()))
        }
    }

    /// Flatten the permission lists of the given roles, in role order.
    /// Dangling role references are skipped with a warning.
    async fn collect_permissions(&self, roles: &[String]) -> Result<Vec<Permission>> {
        let mut permissions = Vec::new();
        for role_id in roles {
            match self.store.get_role(role_id).await? {
                Some(role) => permissions.extend(role.permissions),
                None => warn!(role = %role_id, "subject references missing role"),
            }
        }
        Ok(permissions)
    }

    // ── User CRUD ────────────────────────────────────────────────

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.store.list_users().await
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {id}")))
    }

    pub async fn create_user(&self, new: NewUser, roles: Vec<String>) -> Result<User> {
        if new.username.is_empty() || new.password.is_empty() {
            return Err(Error::InvalidInput(
                "username and password are required".to_string(),
            ));
        }
        let config = self.config();
        let now = now_millis();
        let id = Uuid::new_v4().to_string();
        let user = User {
            id: id.clone(),
            username: new.username.clone(),
            display_name: new.display_name,
            email: new.email,
            phone: new.phone,
            status: UserStatus::Active,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        let credential = UserCredential {
            username: new.username.clone(),
            password_hash: password::hash(&new.password, config.bcrypt_cost)?,
            updated_at: now,
        };
        let subject = Subject::new(&id, SubjectKind::User, &new.username).with_roles(roles);
        self.store.create_user(&user, &credential, &subject).await?;
        Ok(user)
    }

    pub async fn update_user(&self, mut user: User) -> Result<User> {
        self.get_user(&user.id).await?;
        user.updated_at = now_millis();
        self.store.save_user(&user).await?;
        Ok(user)
    }

    pub async fn delete_user(&self, id: &str) -> Result<()> {
        let user = self.get_user(id).await?;
        self.store.delete_user(&user).await
    }

    pub async fn change_password(&self, username: &str, new_password: &str) -> Result<()> {
        if new_password.is_empty() {
            return Err(Error::InvalidInput("password is required".to_string()));
        }
        self.store
            .get_credential(username)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {username}")))?;
        let config = self.config();
        self.store
            .save_credential(&UserCredential {
                username: username.to_string(),
                password_hash: password::hash(new_password, config.bcrypt_cost)?,
                updated_at: now_millis(),
            })
            .await
    }

    // ── Role CRUD ────────────────────────────────────────────────

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.store.list_roles().await
    }

    pub async fn get_role(&self, id: &str) -> Result<Role> {
        self.store
            .get_role(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("role {id}")))
    }

    pub async fn save_role(&self, mut role: Role) -> Result<Role> {
        if role.name.is_empty() {
            return Err(Error::InvalidInput("role name is required".to_string()));
        }
        if role.id.is_empty() {
            role.id = Uuid::new_v4().to_string();
        }
        self.store.save_role(&role).await?;
        Ok(role)
    }

    pub async fn delete_role(&self, id: &str) -> Result<()> {
        if !self.store.delete_role(id).await? {
            return Err(Error::NotFound(format!("role {id}")));
        }
        Ok(())
    }

    // ── Client CRUD ──────────────────────────────────────────────

    pub async fn list_clients(&self) -> Result<Vec<ClientCredential>> {
        self.store.list_client_credentials().await
    }

    pub async fn get_client(&self, client_id: &str) -> Result<ClientCredential> {
        self.store
            .get_client_credential(client_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("client {client_id}")))
    }

    /// Register a machine client. The returned plaintext secret is shown
    /// exactly once; only the bcrypt hash is stored.
    pub async fn create_client(&self, new: NewClient) -> Result<CreatedClient> {
        let config = self.config();
        let client_id = new
            .client_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if client_id.is_empty() {
            return Err(Error::InvalidInput("client id must not be empty".to_string()));
        }
        let secret = new.secret.unwrap_or_else(|| codegen::short_code(32));
        let kind = new.kind.unwrap_or(SubjectKind::Service);
        let name = new.name.unwrap_or_else(|| client_id.clone());

        let credential = ClientCredential {
            client_id: client_id.clone(),
            secret_hash: password::hash(&secret, config.bcrypt_cost)?,
            subject_kind: kind,
            updated_at: now_millis(),
        };
        let subject = Subject::new(&client_id, kind, name).with_roles(new.roles);
        self.store.create_client(&credential, &subject).await?;

        Ok(CreatedClient { client_id, secret })
    }

    /// Apply a partial update to a client and its companion subject. Tokens
    /// already issued keep their snapshot; the next authentication reflects
    /// the change.
    pub async fn update_client(
        &self,
        client_id: &str,
        update: UpdateClient,
    ) -> Result<ClientCredential> {
        let mut credential = self.get_client(client_id).await?;
        let mut subject = self
            .store
            .get_subject(client_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("client {client_id} has no subject")))?;

        let previous_kind = credential.subject_kind;
        if let Some(name) = update.name {
            if name.is_empty() {
                return Err(Error::InvalidInput("client name must not be empty".to_string()));
            }
            subject.name = name;
        }
        if let Some(kind) = update.kind {
            credential.subject_kind = kind;
            subject.kind = kind;
        }
        if let Some(roles) = update.roles {
            subject.roles = roles;
        }

        let now = now_millis();
        credential.updated_at = now;
        subject.updated_at = now;
        self.store
            .update_client(&credential, &subject, previous_kind)
            .await?;
        Ok(credential)
    }

    /// Replace a client's secret with the supplied one, or a generated one
    /// when absent. As at creation, the plaintext is returned exactly once.
    pub async fn rotate_client_secret(
        &self,
        client_id: &str,
        secret: Option<String>,
    ) -> Result<CreatedClient> {
        let mut credential = self.get_client(client_id).await?;
        let secret = secret.unwrap_or_else(|| codegen::short_code(32));
        if secret.is_empty() {
            return Err(Error::InvalidInput("client secret must not be empty".to_string()));
        }
        let config = self.config();
        credential.secret_hash = password::hash(&secret, config.bcrypt_cost)?;
        credential.updated_at = now_millis();
        self.store.save_client_credential(&credential).await?;
        Ok(CreatedClient {
            client_id: credential.client_id,
            secret,
        })
    }

    pub async fn delete_client(&self, client_id: &str) -> Result<()> {
        let credential = self.get_client(client_id).await?;
        self.store
            .delete_client(client_id, credential.subject_kind)
            .await
    }

    /// Flip a subject's disabled flag, revoking or restoring access for
    /// tokens that are still unexpired.
    pub async fn set_subject_disabled(&self, id: &str, disabled: bool) -> Result<Subject> {
        let mut subject = self
            .store
            .get_subject(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("subject {id}")))?;
        subject.disabled = disabled;
        subject.updated_at = now_millis();
        self.store.save_subject(&subject).await?;
        Ok(subject)
    }
}

#[async_trait]
impl Component for AuthManager {
    fn name(&self) -> &str {
        "auth"
    }

    fn status(&self) -> ComponentStatus {
        *self.status.read().expect("status poisoned")
    }

    fn default_config(&self) -> Option<serde_json::Value> {
        // The construction-time config is the fallback, so a node built
        // with custom settings keeps them when no override exists.
        serde_json::to_value(self.config()).ok()
    }

    async fn init(&self, _ctx: &NodeContext, raw_config: serde_json::Value) -> Result<()> {
        if !raw_config.is_null() {
            *self.config.write().expect("auth config poisoned") =
                serde_json::from_value(raw_config)?;
        }
        self.initialize().await
    }

    async fn start(&self) -> Result<()> {
        self.set_status(ComponentStatus::Running);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.set_status(ComponentStatus::Stopped);
        Ok(())
    }
}
