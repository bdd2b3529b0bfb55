//! # Sync Orchestrator
//!
//! Runs one pipe end to end: status bookkeeping, authorization refresh and
//! the dependency-ordered fetch/post stages in [`stages`].
//!
//! Stage graph: `clients -> projects -> {tasks | todolists} -> time_entries`.
//! `users` is independent. Callers must hold the tenant lock; see
//! [`crate::scheduler::RunExecutor`].

mod error;
mod stages;

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{error, info, instrument, warn};

use crate::alerting::{Alert, Alerter};
use crate::authorization::{Authorization, AuthorizationService};
use crate::integrations::{VendorAdapter, VendorRegistry};
use crate::pipes::{Pipe, RunState, Status};
use crate::platform::{PlatformClient, PlatformSession};
use crate::repositories::{IdMappingRepository, ImportRepository, PipeRepository};

pub use error::SyncError;
pub(crate) use stages::ACCOUNTS_OBJECT;

/// State threaded through the stages of one run.
pub(crate) struct Run {
    pub pipe: Pipe,
    pub auth: Authorization,
    pub session: Box<dyn PlatformSession>,
    pub status: Status,
}

#[derive(Clone)]
pub struct PipeSyncService {
    pipes: PipeRepository,
    imports: ImportRepository,
    mappings: IdMappingRepository,
    authorizations: AuthorizationService,
    registry: Arc<VendorRegistry>,
    platform: Arc<dyn PlatformClient>,
    alerter: Arc<dyn Alerter>,
    pipes_api_host: String,
}

impl PipeSyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipes: PipeRepository,
        imports: ImportRepository,
        mappings: IdMappingRepository,
        authorizations: AuthorizationService,
        registry: Arc<VendorRegistry>,
        platform: Arc<dyn PlatformClient>,
        alerter: Arc<dyn Alerter>,
        pipes_api_host: impl Into<String>,
    ) -> Self {
        Self {
            pipes,
            imports,
            mappings,
            authorizations,
            registry,
            platform,
            alerter,
            pipes_api_host: pipes_api_host.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL of the pipe log endpoint recorded on every status.
    pub fn sync_log_url(&self, pipe: &Pipe) -> String {
        format!(
            "{}/api/v1/integrations/{}/pipes/{}/log",
            self.pipes_api_host, pipe.vendor, pipe.id
        )
    }

    /// Runs the pipe and returns its final status.
    ///
    /// Failures never escape: they are recorded on the status and alerted.
    /// `last_sync` advances to the run start only when no error was recorded.
    #[instrument(
        skip(self, pipe),
        fields(workspace_id = pipe.workspace_id, vendor = %pipe.vendor, pipe = %pipe.id)
    )]
    pub async fn synchronize(&self, mut pipe: Pipe) -> Status {
        let started = Instant::now();
        let key = pipe.key();

        let previous = match self.pipes.load_status(pipe.workspace_id, &key).await {
            Ok(previous) => previous,
            Err(err) => {
                warn!(error = %err, "could not load previous status");
                None
            }
        };
        let mut status = Status::start(
            pipe.workspace_id,
            &key,
            previous.as_ref(),
            self.sync_log_url(&pipe),
        );
        if let Err(err) = self.pipes.save_status(&status).await {
            self.alert(&pipe, format!("failed to save pipe status: {err}"));
            status.add_error(err.to_string());
            status.finish();
            return status;
        }

        match self.pipes.load(pipe.workspace_id, &key).await {
            Ok(Some(stored)) => pipe.last_sync = stored.last_sync,
            Ok(None) => {}
            Err(err) => warn!(error = %err, "could not load last sync time"),
        }

        let status = match self.prepare(&pipe).await {
            Ok((auth, session)) => {
                let mut run = Run {
                    pipe,
                    auth,
                    session,
                    status,
                };
                if let Err(err) = self.dispatch(&mut run).await {
                    let message = err.classify().to_string();
                    self.alert(&run.pipe, message.clone());
                    run.status.add_error(message);
                }
                pipe = run.pipe;
                run.status
            }
            Err(err) => {
                let message = err.classify().to_string();
                self.alert(&pipe, message.clone());
                let mut status = status;
                status.add_error(message);
                status
            }
        };

        self.finish(&pipe, status, started).await
    }

    async fn prepare(
        &self,
        pipe: &Pipe,
    ) -> Result<(Authorization, Box<dyn PlatformSession>), SyncError> {
        let auth = self
            .authorizations
            .load(pipe.workspace_id, pipe.vendor)
            .await?;
        let auth = self.authorizations.refresh(auth).await?;
        let session = self.platform.authenticate(&auth.workspace_token);
        Ok((auth, session))
    }

    async fn finish(&self, pipe: &Pipe, mut status: Status, started: Instant) -> Status {
        status.finish();
        if let Err(err) = self.pipes.save_status(&status).await {
            self.alert(pipe, format!("failed to save pipe status: {err}"));
        }
        if status.state == RunState::Success
            && let Err(err) = self
                .pipes
                .update_last_sync(pipe.workspace_id, &pipe.key(), status.sync_date)
                .await
        {
            error!(error = %err, "failed to advance last sync time");
        }

        let outcome = match status.state {
            RunState::Success => "success",
            _ => "error",
        };
        counter!(
            "pipes_runs_total",
            "vendor" => pipe.vendor.as_str(),
            "pipe" => pipe.id.as_str(),
            "state" => outcome
        )
        .increment(1);
        histogram!("pipes_run_duration_seconds", "pipe" => pipe.id.as_str())
            .record(started.elapsed().as_secs_f64());
        info!(
            run = status.run,
            state = outcome,
            errors = status.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipe run finished"
        );
        status
    }

    /// Adapter configured with the pipe params and the authorization blob.
    fn adapter(
        &self,
        pipe: &Pipe,
        auth: &Authorization,
    ) -> Result<Box<dyn VendorAdapter>, SyncError> {
        let mut adapter = self.adapter_for_accounts(pipe, auth)?;
        adapter.set_params(&pipe.params())?;
        Ok(adapter)
    }

    /// Adapter with credentials only. Listing accounts comes before any
    /// pipe params exist.
    fn adapter_for_accounts(
        &self,
        pipe: &Pipe,
        auth: &Authorization,
    ) -> Result<Box<dyn VendorAdapter>, SyncError> {
        let mut adapter = self.registry.create(pipe.vendor, pipe.workspace_id)?;
        adapter.set_credentials(&auth.data)?;
        Ok(adapter)
    }

    fn alert(&self, pipe: &Pipe, message: String) {
        let alert = Alert::new(pipe.workspace_id, pipe.vendor, pipe.id, message)
            .with("key", pipe.key())
            .with(
                "service_params",
                pipe.service_params
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
            );
        self.alerter.notify(alert);
    }
}
