use crate::config::types::AppConfig;
use crate::identity::{ConfigIdentityProvider, IdentityProvider};
use crate::inject::CommandInjector;
use crate::metrics::MetricsRegistry;
use crate::session::{ControllerSettings, SessionController, SessionRegistry};
use crate::transport::TransportFactory;
use crate::voice::Transcriber;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application context, built once at startup
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub registry: Arc<SessionRegistry>,
    pub controller: Arc<SessionController>,
    pub injector: Arc<CommandInjector>,
    pub identity: Arc<dyn IdentityProvider>,
    pub metrics: Arc<MetricsRegistry>,
    pub start_time: Instant,
}

impl AppContext {
    /// Wire the session machinery around the given transport and
    /// transcription backends. Accounts come from `config.users`.
    pub fn build(
        config: AppConfig,
        factory: Arc<dyn TransportFactory>,
        transcriber: Arc<dyn Transcriber>,
    ) -> anyhow::Result<Self> {
        let identity = Arc::new(ConfigIdentityProvider::from_config(&config.users)?);
        Ok(Self::with_identity(config, factory, transcriber, identity))
    }

    pub fn with_identity(
        config: AppConfig,
        factory: Arc<dyn TransportFactory>,
        transcriber: Arc<dyn Transcriber>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let registry = Arc::new(SessionRegistry::new());
        let controller = SessionController::new(
            registry.clone(),
            factory,
            ControllerSettings::from_config(&config),
        )
        .with_metrics(metrics.clone());
        let injector = CommandInjector::new(
            registry.clone(),
            transcriber,
            config.voice.append_newline,
        )
        .with_metrics(metrics.clone());

        Self {
            config: Arc::new(config),
            registry,
            controller: Arc::new(controller),
            injector: Arc::new(injector),
            identity,
            metrics,
            start_time: Instant::now(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.config.server.shutdown_timeout)
    }
}
