//! Fetch and post stages.
//!
//! Fetch stages list vendor records, resolve platform ids through the
//! identifier mappings and stage the batch. The batch (or the fetch error) is
//! staged even when the fetch fails. Post stages send the staged batch to the
//! platform and fold the returned ids back into the mappings.

use std::time::Instant;

use chrono::Utc;
use metrics::histogram;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::{PipeSyncService, Run, SyncError};
use crate::alerting::Alert;
use crate::authorization::Authorization;
use crate::integrations::VendorAdapter;
use crate::pipes::{Pipe, PipeId, Stage};
use crate::platform::{
    Account, Client, ImportResult, Project, Staged, Task, User, adjust_request_size,
};

/// Staged vendor accounts live under this object key.
pub(crate) const ACCOUNTS_OBJECT: &str = "accounts";

impl PipeSyncService {
    pub(super) async fn dispatch(&self, run: &mut Run) -> Result<(), SyncError> {
        match run.pipe.id {
            PipeId::Users => self.sync_users(run).await,
            PipeId::Clients => self.sync_clients(run).await,
            PipeId::Projects => self.sync_projects(run).await,
            PipeId::Tasks => self.sync_tasks(run, PipeId::Tasks).await,
            PipeId::TodoLists => self.sync_tasks(run, PipeId::TodoLists).await,
            PipeId::TimeEntries => self.sync_time_entries(run).await,
        }
    }

    /// Writes a fetched batch to the staging store. Failures are logged only.
    async fn stage<T: Serialize + Clone>(
        &self,
        workspace_id: i64,
        key: &str,
        result: &Result<Vec<T>, SyncError>,
    ) {
        let staged = Staged::from_result(result);
        if let Err(err) = self.imports.save(workspace_id, key, &staged).await {
            warn!(workspace_id, key, error = %err, "could not stage fetched objects");
        }
    }

    /// Staging and mapping key the vendor's adapter uses for `object`.
    pub(crate) fn object_key(&self, pipe: &Pipe, object: &str) -> Result<String, SyncError> {
        Ok(self
            .registry
            .create(pipe.vendor, pipe.workspace_id)?
            .key_for(object))
    }

    // users

    async fn sync_users(&self, run: &mut Run) -> Result<(), SyncError> {
        self.fetch_users(&run.pipe, &run.auth).await?;
        self.post_users(run).await
    }

    /// Lists and stages vendor users. Also used for the background fetch of
    /// the service users endpoint.
    #[instrument(skip_all, fields(workspace_id = pipe.workspace_id, vendor = %pipe.vendor))]
    pub async fn fetch_users(&self, pipe: &Pipe, auth: &Authorization) -> Result<(), SyncError> {
        let adapter = self.adapter(pipe, auth)?;
        let key = adapter.key_for(PipeId::Users.as_str());
        let result: Result<Vec<User>, SyncError> = timed("fetch_users", async {
            let mut users = adapter.users().await?;
            let mapping = self.mappings.load(pipe.workspace_id, &key).await?;
            for user in &mut users {
                user.id = mapping.get(&user.foreign_id);
            }
            Ok(users)
        })
        .await;
        self.stage(pipe.workspace_id, &key, &result).await;
        result.map(|_| ())
    }

    async fn post_users(&self, run: &mut Run) -> Result<(), SyncError> {
        run.status.set_stage(Stage::Posting);
        let key = self.object_key(&run.pipe, PipeId::Users.as_str())?;
        let staged: Staged<User> = self
            .imports
            .latest(run.pipe.workspace_id, &key)
            .await?
            .ok_or_else(|| SyncError::Missing("service users not found".to_string()))?;

        let selector = run
            .pipe
            .users_selector
            .as_ref()
            .filter(|s| !s.ids.is_empty())
            .ok_or_else(|| SyncError::Missing("unable to get selected users".to_string()))?;

        let mut selected = Vec::new();
        for id in &selector.ids {
            let wanted = id.to_string();
            for user in staged.items.iter().filter(|u| u.foreign_id == wanted) {
                selected.push(User {
                    send_invitation: selector.send_invites,
                    ..user.clone()
                });
            }
        }

        let result = run.session.post_users(&selected).await?;
        self.remember(run.pipe.workspace_id, &key, &result).await?;
        run.status
            .complete(PipeId::Users.as_str(), result.notifications, result.count);
        Ok(())
    }

    // clients

    async fn sync_clients(&self, run: &mut Run) -> Result<(), SyncError> {
        self.fetch_clients(run).await?;
        self.post_clients(run).await
    }

    async fn fetch_clients(&self, run: &mut Run) -> Result<(), SyncError> {
        run.status.set_stage(Stage::Fetching);
        let adapter = self.adapter(&run.pipe, &run.auth)?;
        let key = adapter.key_for(PipeId::Clients.as_str());
        let workspace_id = run.pipe.workspace_id;
        let result: Result<Vec<Client>, SyncError> = timed("fetch_clients", async {
            let mut clients = adapter.clients().await?;
            let mapping = self.mappings.load(workspace_id, &key).await?;
            for client in &mut clients {
                client.id = mapping.get(&client.foreign_id);
            }
            Ok(clients)
        })
        .await;
        self.stage(workspace_id, &key, &result).await;
        result.map(|_| ())
    }

    async fn post_clients(&self, run: &mut Run) -> Result<(), SyncError> {
        run.status.set_stage(Stage::Posting);
        let key = self.object_key(&run.pipe, PipeId::Clients.as_str())?;
        let staged: Staged<Client> = self
            .imports
            .latest(run.pipe.workspace_id, &key)
            .await?
            .ok_or_else(|| SyncError::Missing("service clients not found".to_string()))?;
        if staged.items.is_empty() {
            return Ok(());
        }

        let result = run.session.post_clients(&staged.items).await?;
        self.remember(run.pipe.workspace_id, &key, &result).await?;
        run.status
            .complete(PipeId::Clients.as_str(), result.notifications, result.count);
        Ok(())
    }

    // projects

    async fn sync_projects(&self, run: &mut Run) -> Result<(), SyncError> {
        self.fetch_projects(run).await?;
        self.post_projects(run).await
    }

    async fn fetch_projects(&self, run: &mut Run) -> Result<(), SyncError> {
        let mut adapter = self.adapter(&run.pipe, &run.auth)?;
        let key = adapter.key_for(PipeId::Projects.as_str());
        let result = self.collect_projects(run, adapter.as_mut(), &key).await;
        self.stage(run.pipe.workspace_id, &key, &result).await;
        result.map(|_| ())
    }

    async fn collect_projects(
        &self,
        run: &mut Run,
        adapter: &mut dyn VendorAdapter,
        key: &str,
    ) -> Result<Vec<Project>, SyncError> {
        self.sync_clients(run).await?;
        run.status.set_stage(Stage::Fetching);

        let started = Instant::now();
        adapter.set_since(run.pipe.last_sync);
        let mut projects = adapter.projects().await?;
        record_stage("fetch_projects", started);

        let workspace_id = run.pipe.workspace_id;
        let clients = self
            .mappings
            .load(workspace_id, &adapter.key_for(PipeId::Clients.as_str()))
            .await?;
        let mapping = self.mappings.load(workspace_id, key).await?;
        for project in &mut projects {
            project.name = project.name.trim().to_string();
            project.id = mapping.get(&project.foreign_id);
            project.client_id = project
                .foreign_client_id
                .as_deref()
                .map(|id| clients.get(id))
                .unwrap_or(0);
        }
        Ok(projects)
    }

    async fn post_projects(&self, run: &mut Run) -> Result<(), SyncError> {
        run.status.set_stage(Stage::Posting);
        let key = self.object_key(&run.pipe, PipeId::Projects.as_str())?;
        let staged: Staged<Project> = self
            .imports
            .latest(run.pipe.workspace_id, &key)
            .await?
            .ok_or_else(|| SyncError::Missing("service projects not found".to_string()))?;

        let result = run.session.post_projects(&staged.items).await?;
        self.remember(run.pipe.workspace_id, &key, &result).await?;
        run.status
            .complete(PipeId::Projects.as_str(), result.notifications, result.count);
        Ok(())
    }

    // tasks and todo lists

    async fn sync_tasks(&self, run: &mut Run, pipe: PipeId) -> Result<(), SyncError> {
        self.fetch_tasks(run, pipe).await?;
        self.post_tasks(run, pipe).await
    }

    async fn fetch_tasks(&self, run: &mut Run, pipe: PipeId) -> Result<(), SyncError> {
        let mut adapter = self.adapter(&run.pipe, &run.auth)?;
        let key = adapter.key_for(pipe.as_str());
        let result = self.collect_tasks(run, adapter.as_mut(), pipe, &key).await;
        self.stage(run.pipe.workspace_id, &key, &result).await;
        result.map(|_| ())
    }

    async fn collect_tasks(
        &self,
        run: &mut Run,
        adapter: &mut dyn VendorAdapter,
        pipe: PipeId,
        key: &str,
    ) -> Result<Vec<Task>, SyncError> {
        self.sync_projects(run).await?;
        run.status.set_stage(Stage::Fetching);

        let started = Instant::now();
        adapter.set_since(run.pipe.last_sync);
        let fetched = match pipe {
            PipeId::TodoLists => adapter.todo_lists().await?,
            _ => adapter.tasks().await?,
        };
        record_stage("fetch_tasks", started);

        let workspace_id = run.pipe.workspace_id;
        let projects = self
            .mappings
            .load(workspace_id, &adapter.key_for(PipeId::Projects.as_str()))
            .await?;
        let mapping = self.mappings.load(workspace_id, key).await?;

        Ok(fetched
            .into_iter()
            .filter_map(|task| {
                let id = mapping.get(&task.foreign_id);
                // Mapped tasks are always resent so they are never retracted.
                (id > 0 || task.active).then(|| Task {
                    id,
                    project_id: task
                        .foreign_project_id
                        .as_deref()
                        .map(|p| projects.get(p))
                        .unwrap_or(0),
                    ..task
                })
            })
            .collect())
    }

    async fn post_tasks(&self, run: &mut Run, pipe: PipeId) -> Result<(), SyncError> {
        run.status.set_stage(Stage::Posting);
        let key = self.object_key(&run.pipe, pipe.as_str())?;
        let staged: Staged<Task> = self
            .imports
            .latest(run.pipe.workspace_id, &key)
            .await?
            .ok_or_else(|| SyncError::Missing("service tasks not found".to_string()))?;

        let mut notifications = Vec::new();
        let mut count = 0;
        for batch in adjust_request_size(&staged.items, 1)? {
            let result = match pipe {
                PipeId::TodoLists => run.session.post_todo_lists(&batch).await?,
                _ => run.session.post_tasks(&batch).await?,
            };
            self.remember(run.pipe.workspace_id, &key, &result).await?;
            notifications.extend(result.notifications);
            count += result.count;
        }
        debug!(%pipe, count, "posted tasks");
        run.status.complete(pipe.as_str(), notifications, count);
        Ok(())
    }

    // time entries

    #[instrument(skip_all, fields(workspace_id = run.pipe.workspace_id))]
    async fn sync_time_entries(&self, run: &mut Run) -> Result<(), SyncError> {
        let adapter = self.adapter(&run.pipe, &run.auth)?;
        let workspace_id = run.pipe.workspace_id;

        let users = self
            .mappings
            .load(workspace_id, &adapter.key_for(PipeId::Users.as_str()))
            .await?
            .reversed();
        let tasks = self
            .mappings
            .load(workspace_id, &adapter.key_for(PipeId::Tasks.as_str()))
            .await?
            .reversed();
        let projects = self
            .mappings
            .load(workspace_id, &adapter.key_for(PipeId::Projects.as_str()))
            .await?
            .reversed();
        let mut entries_mapping = self
            .mappings
            .load(workspace_id, &adapter.key_for(PipeId::TimeEntries.as_str()))
            .await?;

        let since = run.pipe.last_sync.unwrap_or_else(Utc::now);
        let entries = run
            .session
            .time_entries(since, &users.keys(), &projects.keys())
            .await?;

        run.status.set_stage(Stage::Posting);
        for mut entry in entries.iter().cloned() {
            let platform_id = entry.id.to_string();
            entry.foreign_id = Some(entries_mapping.get(&platform_id).to_string());
            entry.foreign_task_id = Some(tasks.foreign_id(entry.task_id).to_string());
            entry.foreign_user_id = Some(users.foreign_id(entry.user_id).to_string());
            entry.foreign_project_id = Some(projects.foreign_id(entry.project_id).to_string());

            match adapter.export_time_entry(&entry).await {
                Ok(foreign_id) => entries_mapping.insert(platform_id, foreign_id),
                Err(err) => {
                    let alert = Alert::new(
                        workspace_id,
                        run.pipe.vendor,
                        PipeId::TimeEntries,
                        format!("time entry export failed: {err}"),
                    )
                    .with("entry_id", entry.id)
                    .with("task_id", entry.task_id)
                    .with("user_id", entry.user_id)
                    .with("project_id", entry.project_id)
                    .with("foreign_id", entry.foreign_id.as_deref().unwrap_or_default())
                    .with("foreign_task_id", entry.foreign_task_id.as_deref().unwrap_or_default())
                    .with("foreign_user_id", entry.foreign_user_id.as_deref().unwrap_or_default())
                    .with(
                        "foreign_project_id",
                        entry.foreign_project_id.as_deref().unwrap_or_default(),
                    );
                    self.alerter.notify(alert);
                    run.status
                        .add_error(SyncError::from(err).classify().to_string());
                }
            }
        }

        self.mappings.save(&entries_mapping).await?;
        run.status
            .complete(PipeId::TimeEntries.as_str(), Vec::new(), entries.len());
        Ok(())
    }

    // accounts

    /// Lists and stages vendor accounts for the service accounts endpoint.
    pub async fn fetch_accounts(&self, pipe: &Pipe, auth: &Authorization) -> Result<(), SyncError> {
        let adapter = self.adapter_for_accounts(pipe, auth)?;
        let key = adapter.key_for(ACCOUNTS_OBJECT);
        let result: Result<Vec<Account>, SyncError> =
            adapter.accounts().await.map_err(SyncError::from);
        self.stage(pipe.workspace_id, &key, &result).await;
        result.map(|_| ())
    }

    /// Folds platform ids from an import response into the stored mapping.
    async fn remember(
        &self,
        workspace_id: i64,
        key: &str,
        result: &ImportResult,
    ) -> Result<(), SyncError> {
        let mut mapping = self.mappings.load(workspace_id, key).await?;
        for (foreign_id, id) in &result.mapped {
            mapping.insert(foreign_id.clone(), *id);
        }
        self.mappings.save(&mapping).await?;
        Ok(())
    }
}

async fn timed<T>(stage: &'static str, fut: impl std::future::Future<Output = T>) -> T {
    let started = Instant::now();
    let out = fut.await;
    record_stage(stage, started);
    out
}

fn record_stage(stage: &'static str, started: Instant) {
    histogram!("pipes_stage_duration_seconds", "stage" => stage)
        .record(started.elapsed().as_secs_f64());
}
