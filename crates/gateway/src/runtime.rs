//! Runtime assembly: collaborators, tools, reasoning engine and session
//! manager, built once from configuration and shared by every caller.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use vertexcare_agent::{SessionManager, build_reasoner};
use vertexcare_config::{AppConfig, CollaboratorBackend, CollaboratorConfig};
use vertexcare_core::{DomainEvent, EventBus, ReasoningError, RegistryError, ToolRegistry};
use vertexcare_tools::{
    CollaboratorError, FixtureError, FixtureStore, RemoteCollaborators, fixture_registry,
    remote_registry,
};

const REAPER_MIN_PERIOD: Duration = Duration::from_secs(1);
const REAPER_MAX_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to load patient fixtures: {0}")]
    Fixtures(#[from] FixtureError),

    #[error("Failed to set up remote collaborators: {0}")]
    Collaborators(#[from] CollaboratorError),

    #[error("Failed to register tools: {0}")]
    Registry(#[from] RegistryError),

    #[error("Failed to create reasoning engine: {0}")]
    Reasoner(#[from] ReasoningError),
}

/// Tool registry backed by the configured collaborators.
pub fn build_registry(config: &CollaboratorConfig) -> Result<ToolRegistry, BuildError> {
    let registry = match config.backend {
        CollaboratorBackend::Fixture => {
            let store = match &config.fixtures_path {
                Some(path) => FixtureStore::load(path)?,
                None => FixtureStore::demo(),
            };
            info!(patients = store.len(), "Using fixture collaborators");
            fixture_registry(Arc::new(store))?
        }
        CollaboratorBackend::Remote => {
            let remote = RemoteCollaborators::new(
                &config.base_url,
                Duration::from_millis(config.request_timeout_ms),
            )?;
            info!(base_url = %remote.base_url(), "Using remote collaborators");
            remote_registry(Arc::new(remote))?
        }
    };
    Ok(registry)
}

/// Session manager wired from `config`.
pub fn build_manager(config: &AppConfig) -> Result<SessionManager, BuildError> {
    let registry = Arc::new(build_registry(&config.collaborators)?);
    let reasoner = build_reasoner(&config.reasoning)?;
    info!(engine = reasoner.name(), tools = registry.len(), "Agent runtime ready");

    Ok(
        SessionManager::new(registry, reasoner, Arc::new(EventBus::default()))
            .with_policy(config.agent.clone()),
    )
}

/// Periodically drop sessions that ended more than `retention` ago.
pub fn spawn_session_reaper(manager: Arc<SessionManager>, retention: Duration) -> JoinHandle<()> {
    let period = retention.clamp(REAPER_MIN_PERIOD, REAPER_MAX_PERIOD);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let pruned = manager.prune_expired(retention);
            if pruned > 0 {
                debug!(pruned, retention_ms = retention.as_millis() as u64, "Pruned ended sessions");
            }
        }
    })
}

/// Mirror domain events into the log until the bus closes.
pub fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::SessionStarted {
            session_id,
            patient_id,
            max_steps,
            ..
        } => debug!(%session_id, %patient_id, max_steps, "event: session started"),
        DomainEvent::ReasoningCompleted {
            session_id,
            step,
            finished,
            duration_ms,
            ..
        } => debug!(%session_id, step, finished, duration_ms, "event: reasoning completed"),
        DomainEvent::ToolDispatched {
            session_id,
            step,
            tool_name,
            attempts,
            failure,
            duration_ms,
            ..
        } => debug!(
            %session_id,
            step,
            tool = %tool_name,
            attempts,
            failure = ?failure,
            duration_ms,
            "event: tool dispatched"
        ),
        DomainEvent::SessionEnded {
            session_id,
            status,
            steps,
            reason,
            ..
        } => info!(%session_id, %status, steps, reason = ?reason, "event: session ended"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vertexcare_config::ReasoningEngineKind;

    #[test]
    fn default_config_uses_demo_fixtures_and_rules() {
        let manager = build_manager(&AppConfig::default()).unwrap();
        let mut names = manager.registry().names();
        names.sort_unstable();
        assert_eq!(names, vec!["explain", "fetch_notes", "predict_risk"]);
        assert_eq!(manager.default_policy().max_steps, 5);
    }

    #[test]
    fn fixture_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"patientId": "X-1", "riskScore": 0.4}}]"#).unwrap();

        let config = CollaboratorConfig {
            fixtures_path: Some(file.path().to_path_buf()),
            ..CollaboratorConfig::default()
        };
        assert_eq!(build_registry(&config).unwrap().len(), 3);

        let missing = CollaboratorConfig {
            fixtures_path: Some("/nonexistent/patients.json".into()),
            ..CollaboratorConfig::default()
        };
        assert!(matches!(build_registry(&missing), Err(BuildError::Fixtures(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_drops_sessions_after_retention() {
        let manager = Arc::new(build_manager(&AppConfig::default()).unwrap());
        let done = manager.start_session("P-100").unwrap();
        let idle = manager.start_session("P-101").unwrap();
        manager.cancel(done).unwrap();

        let reaper = spawn_session_reaper(manager.clone(), Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(manager.snapshot(done).is_ok());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(manager.snapshot(done).is_err());
        assert!(manager.snapshot(idle).is_ok());
        reaper.abort();
    }

    #[test]
    fn remote_backend_and_llm_engine_build() {
        let mut config = AppConfig::default();
        config.collaborators.backend = CollaboratorBackend::Remote;
        config.reasoning.engine = ReasoningEngineKind::Llm;
        assert!(build_manager(&config).is_ok());
    }
}
