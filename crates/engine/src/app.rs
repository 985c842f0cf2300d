//! Composition root.
//!
//! Wires ports and configuration into a running engine: the safety pipeline
//! and its late-crisis channel, the scene and choice components, the crisis
//! controller, the orchestrator, and the background idle monitor. All
//! injection is explicit constructor arguments; there is no service locator.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::choice::ChoiceProcessor;
use crate::config::EngineConfig;
use crate::crisis::CrisisController;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::ports::{
    AuditSink, ClockPort, ContentCheckPort, CrisisResourcePort, GeneratorPort, SessionRepo,
};
use crate::infrastructure::resilient_generator::ResilientGenerator;
use crate::orchestrator::monitor::IdleMonitor;
use crate::orchestrator::Orchestrator;
use crate::safety::{AlignmentScorer, SafetyPipeline};
use crate::scene::SceneManager;

/// Every external collaborator the engine needs.
pub struct AppPorts {
    pub generator: Arc<dyn GeneratorPort>,
    pub rule_check: Arc<dyn ContentCheckPort>,
    pub bias_check: Arc<dyn ContentCheckPort>,
    pub crisis_check: Arc<dyn ContentCheckPort>,
    pub repo: Arc<dyn SessionRepo>,
    pub resources: Arc<dyn CrisisResourcePort>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn ClockPort>,
}

pub struct App {
    orchestrator: Arc<Orchestrator>,
    bus: Arc<EventBus>,
    monitor: IdleMonitor,
    late_crisis_task: JoinHandle<()>,
}

impl App {
    pub fn new(config: EngineConfig, ports: AppPorts) -> Self {
        let bus = Arc::new(EventBus::new(config.event_bus.to_bus_config()));
        let (late_crisis_tx, mut late_crisis_rx) = mpsc::unbounded_channel();

        let pipeline = Arc::new(SafetyPipeline::new(
            ports.rule_check,
            ports.bias_check,
            ports.crisis_check,
            config.breaker.to_breaker_config(),
            ports.audit.clone(),
            bus.clone(),
            ports.clock.clone(),
            config.safety.clone(),
            late_crisis_tx,
        ));
        let generator: Arc<dyn GeneratorPort> = Arc::new(ResilientGenerator::new(
            ports.generator,
            config.retry.clone(),
        ));
        let scenes = Arc::new(SceneManager::new(
            pipeline.clone(),
            bus.clone(),
            ports.clock.clone(),
            config.engagement.clone(),
        ));
        let choices = Arc::new(ChoiceProcessor::new(
            pipeline,
            AlignmentScorer::new(config.alignment.clone()),
            bus.clone(),
            ports.clock.clone(),
            config.safety.clone(),
            config.crisis.clone(),
        ));
        let crisis = Arc::new(CrisisController::new(
            ports.resources,
            ports.audit,
            bus.clone(),
            ports.clock.clone(),
            config.crisis.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            ports.repo,
            generator,
            scenes,
            choices,
            crisis,
            bus.clone(),
            ports.clock,
            config.clone(),
        ));

        let late_orchestrator = orchestrator.clone();
        let late_crisis_task = tokio::spawn(async move {
            while let Some(assessment) = late_crisis_rx.recv().await {
                late_orchestrator.handle_late_crisis(assessment).await;
            }
        });

        let monitor = IdleMonitor::spawn(orchestrator.clone(), config.session.monitor_interval());
        tracing::info!(
            validation_deadline_ms = config.safety.validation_deadline_ms,
            monitor_interval_secs = config.session.monitor_interval_secs,
            "Engine assembled"
        );
        Self {
            orchestrator,
            bus,
            monitor,
            late_crisis_task,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Stops the background tasks. Sessions stay durable in the repository.
    pub async fn shutdown(self) {
        self.monitor.shutdown().await;
        self.late_crisis_task.abort();
        tracing::info!("Engine shut down");
    }
}
