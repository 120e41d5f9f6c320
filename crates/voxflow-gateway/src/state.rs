//! Gateway shared state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use voxflow_core::config::Config;
use voxflow_core::providers::{SpeechSynthesizer, TextGenerator};
use voxflow_core::session::SessionRegistry;
use voxflow_pipeline::assembler::PhaseAssembler;
use voxflow_pipeline::commands::CommandRegistry;
use voxflow_pipeline::interrupt::InterruptCoordinator;
use voxflow_pipeline::orchestrator::Orchestrator;

use crate::admission::AdmissionController;

/// Shared gateway state accessible from all connection tasks. Constructed
/// once at startup and torn down with the process.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub admission: Arc<AdmissionController>,
    pub assembler: Arc<PhaseAssembler>,
    pub interrupts: Arc<InterruptCoordinator>,
    pub sessions: Arc<SessionRegistry>,
    pub orchestrator: Arc<Orchestrator>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        let limits = config.limits();
        let admission = Arc::new(AdmissionController::new(&limits));
        let assembler = Arc::new(PhaseAssembler::new());
        let sessions = Arc::new(SessionRegistry::new());
        let interrupts = Arc::new(InterruptCoordinator::new());

        // Interrupt cleanup: flip the identity's sessions to interrupted,
        // then drop whatever is no longer active.
        {
            let sessions = sessions.clone();
            interrupts.register_cleanup(Box::new(move |hardware_id| {
                let marked = sessions.mark_interrupted(hardware_id);
                let removed = sessions.remove_finished(hardware_id);
                info!(
                    hardware_id,
                    marked = marked.len(),
                    removed,
                    "Interrupt cleanup swept sessions"
                );
            }));
        }

        let commands = Arc::new(CommandRegistry::new(&config.enabled_commands()));
        let orchestrator = Arc::new(Orchestrator::new(
            generator,
            synthesizer,
            interrupts.clone(),
            sessions.clone(),
            commands,
            config.sentence(),
        ));

        admission.spawn_reaper(
            Duration::from_secs(limits.sweep_interval_secs),
            assembler.clone(),
            chrono::Duration::seconds(limits.pending_buffer_ttl_secs as i64),
        );

        Self {
            config,
            admission,
            assembler,
            interrupts,
            sessions,
            orchestrator,
        }
    }
}
