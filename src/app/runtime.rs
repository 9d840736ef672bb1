use super::commands::{Command, HELP};
use super::{EventclipOrchestrator, RunMode, SessionSummary, ShutdownReason};
use crate::capture::HealthStatus;
use crate::error::{EventclipError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

const REAP_INTERVAL: Duration = Duration::from_millis(500);

impl EventclipOrchestrator {
    /// Run the trigger loop for `mode` until it ends or a signal arrives,
    /// then shut down gracefully
    pub async fn run(&mut self, mode: RunMode) -> Result<SessionSummary> {
        info!("eventclip is running in {:?} mode", mode);

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| EventclipError::system("Shutdown sender already taken"))?;

        let mut shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| EventclipError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers(shutdown_sender);

        let reason = match mode {
            RunMode::Interactive => self.run_interactive(&mut shutdown_receiver).await?,
            RunMode::Auto { duration } => self.run_auto(duration, &mut shutdown_receiver).await,
        };

        info!("Shutdown initiated: {:?}", reason);
        self.shutdown().await
    }

    async fn run_interactive(
        &mut self,
        shutdown: &mut oneshot::Receiver<ShutdownReason>,
    ) -> Result<ShutdownReason> {
        println!("{}", HELP);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut reap = tokio::time::interval(REAP_INTERVAL);
        let stop = self.cancellation_token.clone();

        loop {
            tokio::select! {
                reason = &mut *shutdown => return Ok(Self::signal_reason(reason)),
                _ = stop.cancelled() => return Ok(ShutdownReason::UserRequest),
                _ = reap.tick() => self.session.reap_finished().await,
                line = lines.next_line() => match line? {
                    Some(line) => match Command::parse(&line) {
                        Ok(command) => {
                            if let Some(reason) = self.execute(command).await {
                                return Ok(reason);
                            }
                        }
                        Err(message) => println!("{}", message),
                    },
                    None => return Ok(ShutdownReason::InputClosed),
                },
            }
        }
    }

    async fn run_auto(
        &mut self,
        duration: Duration,
        shutdown: &mut oneshot::Receiver<ShutdownReason>,
    ) -> ShutdownReason {
        let period = Duration::from_secs(self.config.trigger.auto_interval_seconds.max(1));
        let labels = if self.config.trigger.labels.is_empty() {
            vec!["event".to_string()]
        } else {
            self.config.trigger.labels.clone()
        };

        info!(
            "Auto mode: triggering every {:?} for {:?}",
            period, duration
        );

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut reap = tokio::time::interval(REAP_INTERVAL);
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let mut next_label = 0usize;
        let stop = self.cancellation_token.clone();

        loop {
            tokio::select! {
                reason = &mut *shutdown => return Self::signal_reason(reason),
                _ = stop.cancelled() => return ShutdownReason::UserRequest,
                _ = &mut deadline => return ShutdownReason::DurationElapsed,
                _ = ticker.tick() => {
                    let label = labels[next_label % labels.len()].clone();
                    next_label += 1;
                    if let Ok(clip_id) = self.trigger(label.as_str()) {
                        info!("Auto trigger '{}' started clip {}", label, clip_id);
                    }
                }
                _ = reap.tick() => self.session.reap_finished().await,
            }
        }
    }

    /// Execute one interactive command, returning a shutdown reason to quit
    pub(super) async fn execute(&mut self, command: Command) -> Option<ShutdownReason> {
        match command {
            Command::Trigger(label) => {
                let label = label
                    .or_else(|| self.config.trigger.labels.first().cloned())
                    .unwrap_or_else(|| "manual".to_string());
                match self.trigger(label.as_str()) {
                    Ok(clip_id) => println!("Recording clip {} ({})", clip_id, label),
                    Err(e) => println!("Trigger rejected: {}", e),
                }
            }
            Command::Status => self.print_status(),
            Command::Stats => {
                self.session.reap_finished().await;
                self.print_stats();
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => return Some(ShutdownReason::UserRequest),
            Command::Empty => {}
        }
        None
    }

    fn print_status(&self) {
        let capture = self.capture.stats();
        let health = self.capture.health_check();

        println!(
            "Capture: {} ({} frames, {} read failures)",
            if capture.is_running { "running" } else { "stopped" },
            capture.frames_captured,
            capture.read_failures
        );
        println!(
            "Buffer:  {}/{} frames",
            capture.buffered_frames, capture.buffer_capacity
        );
        println!(
            "Clips:   {} in flight",
            self.assembler.active_clips()
        );
        if health.status != HealthStatus::Healthy {
            println!("Health:  {:?}", health.status);
            for issue in health.issues.iter().chain(health.warnings.iter()) {
                println!("  - {}", issue);
            }
        }
    }

    fn print_stats(&self) {
        let buffer = self.ring_buffer.stats();
        let clips = self.assembler.stats();

        println!("{}", self.session.summary());
        println!(
            "Ring buffer: {} pushed, {} evicted, {} rejected, {} snapshots",
            buffer.frames_pushed, buffer.frames_evicted, buffer.frames_rejected, buffer.snapshots_taken
        );
        println!(
            "Assembler:   {} started, {} completed, {} aborted, {} busy rejections",
            clips.started, clips.completed, clips.aborted, clips.rejected_busy
        );
    }

    fn signal_reason(
        received: std::result::Result<ShutdownReason, oneshot::error::RecvError>,
    ) -> ShutdownReason {
        received.unwrap_or_else(|_| ShutdownReason::Error("Shutdown channel closed".to_string()))
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            warn!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };

                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
