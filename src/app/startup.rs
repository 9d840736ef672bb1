use super::{ComponentState, EventclipOrchestrator};
use crate::error::{EventclipError, Result};
use std::time::Duration;
use tracing::{error, info};

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

impl EventclipOrchestrator {
    /// Initialize all system components
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing eventclip components");

        {
            let mut states = self.component_states.lock().await;
            states.insert("capture".to_string(), ComponentState::Stopped);
            states.insert("assembler".to_string(), ComponentState::Stopped);
        }

        if self.config.clip.sink != "memory" {
            tokio::fs::create_dir_all(&self.config.clip.path)
                .await
                .map_err(|e| {
                    EventclipError::component(
                        "assembler",
                        format!(
                            "Failed to create clip directory {}: {}",
                            self.config.clip.path, e
                        ),
                    )
                })?;
            info!("Clips will be written to {}", self.config.clip.path);
        }

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start capturing and accept triggers
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting eventclip");

        self.set_component_state("capture", ComponentState::Starting)
            .await;
        if let Err(e) = self.capture.start().await {
            error!("Failed to start capture loop: {}", e);
            self.set_component_state("capture", ComponentState::Failed)
                .await;
            return Err(e);
        }

        if let Err(e) = self.capture.wait_for_frames(FIRST_FRAME_TIMEOUT).await {
            error!("Frame source failed to produce frames: {}", e);
            self.set_component_state("capture", ComponentState::Failed)
                .await;
            return Err(e);
        }

        self.set_component_state("capture", ComponentState::Running)
            .await;
        self.set_component_state("assembler", ComponentState::Running)
            .await;

        info!("eventclip started successfully");
        Ok(())
    }
}
