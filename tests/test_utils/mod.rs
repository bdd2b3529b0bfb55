//! Shared fixtures for the integration tests.
//!
//! In-memory SQLite with migrations applied, plus in-process doubles for the
//! vendor adapter, the platform API, the alerter and the OAuth provider.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pipes::alerting::{Alert, Alerter};
use pipes::authorization::{Authorization, AuthorizationService};
use pipes::config::WorkerConfig;
use pipes::crypto::CryptoKey;
use pipes::integrations::{
    AdapterError, IntegrationCatalog, Vendor, VendorAdapter, VendorRegistry,
};
use pipes::locks::TenantLocks;
use pipes::oauth::{OAuth1Token, OAuth2Token, OAuthError, OAuthProvider};
use pipes::pipes::{Pipe, PipeId, Status};
use pipes::platform::{
    Account, Client, ImportResult, Mapped, PlatformClient, PlatformError, PlatformSession,
    Project, Task, TimeEntry, User,
};
use pipes::repositories::{
    AuthorizationRepository, IdMappingRepository, ImportRepository, PipeRepository,
    QueueRepository,
};
use pipes::scheduler::{RunExecutor, RunScheduler};
use pipes::service::PipesService;
use pipes::sync::PipeSyncService;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("32-byte key")
}

/// Catalog used by every test: Asana offers every pipe, FreshBooks is OAuth1.
pub const TEST_CATALOG: &str = r#"[
    {"id": "asana", "name": "Asana", "auth_type": "oauth2",
     "pipes": [
        {"id": "users", "name": "Users"},
        {"id": "clients", "name": "Clients"},
        {"id": "projects", "name": "Projects", "automatic_option": true},
        {"id": "tasks", "name": "Tasks", "automatic_option": true},
        {"id": "todolists", "name": "Todo lists"},
        {"id": "time_entries", "name": "Time entries"}
     ]},
    {"id": "freshbooks", "name": "FreshBooks", "auth_type": "oauth1", "pipes": []}
]"#;

// ---------------------------------------------------------------------------
// vendor double

/// Records the double serves and observes.
#[derive(Default)]
pub struct VendorData {
    pub accounts: Vec<Account>,
    pub users: Vec<User>,
    pub clients: Vec<Client>,
    pub projects: Vec<Project>,
    pub tasks: Vec<Task>,
    pub todo_lists: Vec<Task>,
    /// Platform time entry ids whose export fails.
    pub failing_exports: HashSet<i64>,
    /// Makes `projects()` return a decode error.
    pub corrupt_projects: bool,
    /// Delay inside `projects()`, used to observe run overlap.
    pub projects_delay: Option<Duration>,
    /// Delay inside `users()`.
    pub users_delay: Option<Duration>,
    /// Makes `tasks()` panic.
    pub panic_tasks: bool,
}

#[derive(Default)]
pub struct MockVendor {
    pub data: Mutex<VendorData>,
    pub calls: Mutex<Vec<String>>,
    pub since: Mutex<Vec<Option<DateTime<Utc>>>>,
    pub params_seen: Mutex<Vec<Value>>,
    pub exported: Mutex<Vec<TimeEntry>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl MockVendor {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    /// Counts the call as active for `delay`, tracking the peak overlap.
    async fn occupy(&self, delay: Option<Duration>) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockAdapter {
    workspace_id: i64,
    state: Arc<MockVendor>,
}

#[async_trait]
impl VendorAdapter for MockAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Asana
    }

    fn workspace_id(&self) -> i64 {
        self.workspace_id
    }

    fn set_credentials(&mut self, _data: &[u8]) -> Result<(), AdapterError> {
        Ok(())
    }

    fn set_params(&mut self, params: &Value) -> Result<(), AdapterError> {
        self.state.params_seen.lock().unwrap().push(params.clone());
        match params.get("account_id").and_then(Value::as_i64) {
            Some(id) if id <= 0 => Err(AdapterError::InvalidParams("Missing account_id".into())),
            _ => Ok(()),
        }
    }

    fn set_since(&mut self, since: Option<DateTime<Utc>>) {
        self.state.since.lock().unwrap().push(since);
    }

    async fn accounts(&self) -> Result<Vec<Account>, AdapterError> {
        self.state.record("accounts");
        Ok(self.state.data.lock().unwrap().accounts.clone())
    }

    async fn users(&self) -> Result<Vec<User>, AdapterError> {
        self.state.record("users");
        let delay = self.state.data.lock().unwrap().users_delay;
        self.state.occupy(delay).await;
        Ok(self.state.data.lock().unwrap().users.clone())
    }

    async fn clients(&self) -> Result<Vec<Client>, AdapterError> {
        self.state.record("clients");
        Ok(self.state.data.lock().unwrap().clients.clone())
    }

    async fn projects(&self) -> Result<Vec<Project>, AdapterError> {
        self.state.record("projects");
        let (delay, corrupt, projects) = {
            let data = self.state.data.lock().unwrap();
            (data.projects_delay, data.corrupt_projects, data.projects.clone())
        };
        self.state.occupy(delay).await;

        if corrupt {
            let source = serde_json::from_str::<Value>("{\"data\": [").unwrap_err();
            return Err(AdapterError::decode("asana projects", source));
        }
        Ok(projects)
    }

    async fn tasks(&self) -> Result<Vec<Task>, AdapterError> {
        self.state.record("tasks");
        let (panics, tasks) = {
            let data = self.state.data.lock().unwrap();
            (data.panic_tasks, data.tasks.clone())
        };
        if panics {
            panic!("tasks double asked to panic");
        }
        Ok(tasks)
    }

    async fn todo_lists(&self) -> Result<Vec<Task>, AdapterError> {
        self.state.record("todolists");
        Ok(self.state.data.lock().unwrap().todo_lists.clone())
    }

    async fn export_time_entry(&self, entry: &TimeEntry) -> Result<i64, AdapterError> {
        self.state.record("export_time_entry");
        if self.state.data.lock().unwrap().failing_exports.contains(&entry.id) {
            return Err(AdapterError::Status {
                status: 500,
                body: "export failed".into(),
            });
        }
        self.state.exported.lock().unwrap().push(entry.clone());
        Ok(1_000 + entry.id)
    }
}

// ---------------------------------------------------------------------------
// platform double

/// Platform state shared by the client and its sessions. New records get
/// fresh ids; records sent with an id keep it.
pub struct MockPlatform {
    next_id: AtomicI64,
    pub workspaces: Mutex<HashMap<String, i64>>,
    pub posted_users: Mutex<Vec<User>>,
    pub posted_clients: Mutex<Vec<Client>>,
    pub posted_projects: Mutex<Vec<Vec<Project>>>,
    pub posted_tasks: Mutex<Vec<Vec<Task>>>,
    pub time_entries: Mutex<Vec<TimeEntry>>,
    pub time_entry_queries: Mutex<Vec<(Vec<i64>, Vec<i64>)>>,
    pub ping_error: Mutex<Option<u16>>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            workspaces: Mutex::default(),
            posted_users: Mutex::default(),
            posted_clients: Mutex::default(),
            posted_projects: Mutex::default(),
            posted_tasks: Mutex::default(),
            time_entries: Mutex::default(),
            time_entry_queries: Mutex::default(),
            ping_error: Mutex::default(),
        }
    }
}

impl MockPlatform {
    pub fn ids_issued(&self) -> i64 {
        self.next_id.load(Ordering::SeqCst) - 100
    }

    fn import<T: Mapped>(&self, records: &[T]) -> ImportResult {
        let mapped: Vec<(String, i64)> = records
            .iter()
            .map(|record| {
                let id = if record.id() > 0 {
                    record.id()
                } else {
                    self.next_id.fetch_add(1, Ordering::SeqCst)
                };
                (record.foreign_id().to_string(), id)
            })
            .collect();
        ImportResult {
            count: mapped.len(),
            mapped,
            notifications: Vec::new(),
        }
    }
}

pub struct SharedPlatform(pub Arc<MockPlatform>);

#[async_trait]
impl PlatformClient for SharedPlatform {
    async fn ping(&self) -> Result<(), PlatformError> {
        match *self.0.ping_error.lock().unwrap() {
            Some(status) => Err(PlatformError::Status {
                endpoint: "/api/v9/status".into(),
                status,
            }),
            None => Ok(()),
        }
    }

    async fn workspace_id(&self, token: &str) -> Result<i64, PlatformError> {
        self.0
            .workspaces
            .lock()
            .unwrap()
            .get(token)
            .copied()
            .ok_or_else(|| PlatformError::Status {
                endpoint: "/api/pipes/workspace".into(),
                status: 403,
            })
    }

    fn authenticate(&self, _token: &str) -> Box<dyn PlatformSession> {
        Box::new(MockSession(self.0.clone()))
    }
}

pub struct MockSession(Arc<MockPlatform>);

#[async_trait]
impl PlatformSession for MockSession {
    async fn post_users(&self, users: &[User]) -> Result<ImportResult, PlatformError> {
        self.0.posted_users.lock().unwrap().extend_from_slice(users);
        Ok(self.0.import(users))
    }

    async fn post_clients(&self, clients: &[Client]) -> Result<ImportResult, PlatformError> {
        self.0.posted_clients.lock().unwrap().extend_from_slice(clients);
        Ok(self.0.import(clients))
    }

    async fn post_projects(&self, projects: &[Project]) -> Result<ImportResult, PlatformError> {
        self.0.posted_projects.lock().unwrap().push(projects.to_vec());
        Ok(self.0.import(projects))
    }

    async fn post_tasks(&self, tasks: &[Task]) -> Result<ImportResult, PlatformError> {
        self.0.posted_tasks.lock().unwrap().push(tasks.to_vec());
        Ok(self.0.import(tasks))
    }

    async fn post_todo_lists(&self, tasks: &[Task]) -> Result<ImportResult, PlatformError> {
        self.post_tasks(tasks).await
    }

    async fn time_entries(
        &self,
        _since: DateTime<Utc>,
        user_ids: &[i64],
        project_ids: &[i64],
    ) -> Result<Vec<TimeEntry>, PlatformError> {
        self.0
            .time_entry_queries
            .lock()
            .unwrap()
            .push((user_ids.to_vec(), project_ids.to_vec()));
        Ok(self.0.time_entries.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// alerting and oauth doubles

#[derive(Default)]
pub struct RecordingAlerter {
    pub alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerter {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

pub struct SharedAlerter(pub Arc<RecordingAlerter>);

impl Alerter for SharedAlerter {
    fn notify(&self, alert: Alert) {
        self.0.alerts.lock().unwrap().push(alert);
    }
}

/// Refreshes succeed with a token valid for an hour and are counted.
#[derive(Default)]
pub struct CountingOAuth {
    pub refreshes: AtomicUsize,
}

pub struct SharedOAuth(pub Arc<CountingOAuth>);

#[async_trait]
impl OAuthProvider for SharedOAuth {
    fn oauth2_url(&self, _vendor: Vendor) -> Option<String> {
        Some("https://vendor.test/oauth/authorize?client_id=pipes".to_string())
    }

    async fn oauth2_exchange(&self, _vendor: Vendor, code: &str) -> Result<OAuth2Token, OAuthError> {
        Ok(OAuth2Token {
            access_token: format!("access-for-{code}"),
            token_type: "Bearer".into(),
            refresh_token: Some("refresh".into()),
            expiry: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }

    async fn oauth2_refresh(
        &self,
        _vendor: Vendor,
        token: &OAuth2Token,
    ) -> Result<OAuth2Token, OAuthError> {
        self.0.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(OAuth2Token {
            access_token: "refreshed".into(),
            token_type: "Bearer".into(),
            refresh_token: token.refresh_token.clone(),
            expiry: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }

    async fn oauth1_auth_url(
        &self,
        _vendor: Vendor,
        account_name: &str,
        callback_url: &str,
    ) -> Result<String, OAuthError> {
        Ok(format!(
            "https://{account_name}.vendor.test/authorize?oauth_callback={callback_url}"
        ))
    }

    async fn oauth1_exchange(
        &self,
        _vendor: Vendor,
        _account_name: &str,
        token: &str,
        _verifier: &str,
    ) -> Result<OAuth1Token, OAuthError> {
        Ok(OAuth1Token {
            token: token.to_string(),
            secret: "secret".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// harness

/// Fully wired engine over the doubles above. Asana is served by
/// [`MockAdapter`].
pub struct Harness {
    pub db: Arc<DatabaseConnection>,
    pub catalog: Arc<IntegrationCatalog>,
    pub registry: Arc<VendorRegistry>,
    pub pipes: PipeRepository,
    pub imports: ImportRepository,
    pub mappings: IdMappingRepository,
    pub queue: QueueRepository,
    pub authorizations: AuthorizationService,
    pub vendor: Arc<MockVendor>,
    pub platform: Arc<MockPlatform>,
    pub alerter: Arc<RecordingAlerter>,
    pub oauth: Arc<CountingOAuth>,
    pub executor: Arc<RunExecutor>,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        let db = setup_test_db().await?;
        let catalog = Arc::new(IntegrationCatalog::from_json(TEST_CATALOG)?);

        let vendor = Arc::new(MockVendor::default());
        let mut registry = VendorRegistry::new();
        let adapter_state = vendor.clone();
        registry.register(
            Vendor::Asana,
            Arc::new(move |workspace_id: i64| {
                Box::new(MockAdapter {
                    workspace_id,
                    state: adapter_state.clone(),
                }) as Box<dyn VendorAdapter>
            }),
        );
        let registry = Arc::new(registry);

        let platform = Arc::new(MockPlatform::default());
        let alerter = Arc::new(RecordingAlerter::default());
        let oauth = Arc::new(CountingOAuth::default());

        let pipes = PipeRepository::new(db.clone());
        let imports = ImportRepository::new(db.clone());
        let mappings = IdMappingRepository::new(db.clone());
        let queue = QueueRepository::new(db.clone());
        let authorizations = AuthorizationService::new(
            AuthorizationRepository::new(db.clone(), test_crypto_key()),
            pipes.clone(),
            mappings.clone(),
            catalog.clone(),
            Arc::new(SharedOAuth(oauth.clone())),
        );
        let sync = PipeSyncService::new(
            pipes.clone(),
            imports.clone(),
            mappings.clone(),
            authorizations.clone(),
            registry.clone(),
            Arc::new(SharedPlatform(platform.clone())),
            Arc::new(SharedAlerter(alerter.clone())),
            "https://pipes.test",
        );
        let executor = Arc::new(RunExecutor::new(sync, TenantLocks::new()));

        Ok(Self {
            db,
            catalog,
            registry,
            pipes,
            imports,
            mappings,
            queue,
            authorizations,
            vendor,
            platform,
            alerter,
            oauth,
            executor,
        })
    }

    /// Stores an Asana authorization with the given OAuth2 token.
    pub async fn authorize(&self, workspace_id: i64, token: &OAuth2Token) -> Result<()> {
        let mut auth = Authorization::new(workspace_id, Vendor::Asana, "workspace-token");
        auth.set_oauth2_token(token)?;
        self.authorizations.save(&auth).await?;
        Ok(())
    }

    /// Authorizes with a token that does not expire.
    pub async fn authorize_valid(&self, workspace_id: i64) -> Result<()> {
        self.authorize(workspace_id, &valid_token()).await
    }

    pub async fn configure(&self, workspace_id: i64, id: PipeId, params: Value) -> Result<Pipe> {
        let mut pipe = Pipe::new(workspace_id, Vendor::Asana, id);
        pipe.configured = true;
        pipe.service_params = (!params.is_null()).then_some(params);
        self.pipes.save(&pipe).await?;
        Ok(pipe)
    }

    /// Loads the stored pipe and runs it through the executor.
    pub async fn run(&self, workspace_id: i64, id: PipeId) -> Result<Status> {
        let pipe = self
            .pipes
            .load(workspace_id, &pipes::pipes::pipes_key(Vendor::Asana, id))
            .await?
            .ok_or_else(|| anyhow::anyhow!("pipe {id} not configured"))?;
        Ok(self.executor.execute(pipe).await)
    }

    pub fn worker_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 2,
            channel_capacity: 8,
            queue_tick_ms: 10,
            queue_claim_batch: 4,
        }
    }

    /// Facade over the harness with live run workers.
    pub fn service(&self, shutdown: CancellationToken) -> (PipesService, Vec<JoinHandle<()>>) {
        let (scheduler, handles) = RunScheduler::start(
            self.executor.clone(),
            self.queue.clone(),
            self.pipes.clone(),
            &Self::worker_config(),
            shutdown,
        );
        let service = PipesService::new(
            self.db.clone(),
            self.pipes.clone(),
            self.imports.clone(),
            self.mappings.clone(),
            self.authorizations.clone(),
            self.catalog.clone(),
            self.registry.clone(),
            Arc::new(SharedPlatform(self.platform.clone())),
            self.executor.clone(),
            scheduler,
        );
        (service, handles)
    }

    pub async fn mapping(&self, workspace_id: i64, object: &str) -> Result<BTreeMap<String, i64>> {
        let key = format!("asana:{object}");
        Ok(self.mappings.load(workspace_id, &key).await?.data)
    }
}

pub fn valid_token() -> OAuth2Token {
    OAuth2Token {
        access_token: "access".into(),
        token_type: "Bearer".into(),
        refresh_token: Some("refresh".into()),
        expiry: None,
    }
}

pub fn expired_token() -> OAuth2Token {
    OAuth2Token {
        access_token: "stale".into(),
        token_type: "Bearer".into(),
        refresh_token: Some("refresh".into()),
        expiry: Some(Utc::now() - chrono::Duration::hours(1)),
    }
}

pub fn project(foreign_id: &str, name: &str) -> Project {
    Project {
        name: name.to_string(),
        active: true,
        foreign_id: foreign_id.to_string(),
        ..Project::default()
    }
}

pub fn task(foreign_id: &str, project: &str, active: bool) -> Task {
    Task {
        name: format!("task {foreign_id}"),
        active,
        foreign_id: foreign_id.to_string(),
        foreign_project_id: Some(project.to_string()),
        ..Task::default()
    }
}

pub fn user(foreign_id: &str, email: &str) -> User {
    User {
        email: email.to_string(),
        name: email.to_string(),
        foreign_id: foreign_id.to_string(),
        ..User::default()
    }
}
