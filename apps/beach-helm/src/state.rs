use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::auth::ProfileResolver;
use crate::config::Config;
use crate::control::Control;
use crate::desktop::{Desktop, DesktopError};
use crate::dispatch::Dispatcher;
use crate::registry::SessionRegistry;

/// Everything a request handler needs for one room.
#[derive(Clone)]
pub struct AppState {
    start: Instant,
    registry: SessionRegistry,
    desktop: Arc<dyn Desktop>,
    control: Control,
    dispatcher: Dispatcher,
    resolver: Arc<dyn ProfileResolver>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        registry: SessionRegistry,
        desktop: Arc<dyn Desktop>,
        resolver: Arc<dyn ProfileResolver>,
    ) -> Self {
        let control = Control::new(registry.clone(), Arc::clone(&desktop));
        let dispatcher = Dispatcher::new(registry.clone(), Arc::clone(&desktop), control.clone());
        Self {
            start: Instant::now(),
            registry,
            desktop,
            control,
            dispatcher,
            resolver,
            metrics: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, DesktopError> {
        let desktop = config.desktop()?;
        let registry = SessionRegistry::new(config.settings(), config.outbound_buffer);
        Ok(Self::new(
            registry,
            Arc::new(desktop),
            Arc::new(config.resolver()),
        ))
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn desktop(&self) -> &dyn Desktop {
        self.desktop.as_ref()
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn resolver(&self) -> &dyn ProfileResolver {
        self.resolver.as_ref()
    }

    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}
