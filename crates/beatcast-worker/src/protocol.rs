//! The phased capture protocol.
//!
//! One run per worker: Setup, Prebuffer, Intro, Playing, Outro, Finalize.
//! A fixed frame tick drives the state machine. Prebuffer ends on a frame
//! count plus a hold, intro and outro on frame counts, playing on the source
//! position, and every tick renders exactly one frame into the capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

use beatcast_models::{RawArtifact, RenderParams, WorkerPhase};

use crate::capture::{Capture, CaptureSettings};
use crate::config::ProtocolConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::scene::{Frame, FrameContext, FrameStage, SceneRenderer};
use crate::source::SourcePlayer;
use crate::status::StatusBoard;

/// The collaborators a protocol run drives.
pub struct ProtocolParts {
    pub scene: Box<dyn SceneRenderer>,
    pub capture: Box<dyn Capture>,
    pub source: Box<dyn SourcePlayer>,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Prebuffer {
        rendered: u32,
        hold_until: Option<Instant>,
    },
    Intro {
        remaining: u64,
    },
    Playing {
        deadline: Instant,
    },
    Outro {
        remaining: u64,
    },
    Finalize,
}

impl Stage {
    fn worker_phase(&self) -> WorkerPhase {
        match self {
            Stage::Prebuffer { .. } => WorkerPhase::Prebuffer,
            Stage::Intro { .. } => WorkerPhase::Intro,
            Stage::Playing { .. } => WorkerPhase::Playing,
            Stage::Outro { .. } => WorkerPhase::Outro,
            Stage::Finalize => WorkerPhase::Finalize,
        }
    }

    fn frame_stage(&self) -> FrameStage {
        match self {
            Stage::Prebuffer { .. } => FrameStage::Prebuffer,
            Stage::Intro { .. } => FrameStage::Intro,
            Stage::Playing { .. } => FrameStage::Playing,
            Stage::Outro { .. } | Stage::Finalize => FrameStage::Outro,
        }
    }
}

/// Timeline of one run, in seconds.
#[derive(Debug, Clone, Copy)]
struct Timeline {
    fps: u32,
    intro_secs: f64,
    outro_secs: f64,
    total_secs: f64,
}

impl Timeline {
    fn frames(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.fps as f64).round() as u64
    }

    /// `(intro + position) / (intro + total + outro)`.
    fn progress(&self, visible_secs: f64) -> f64 {
        let span = self.intro_secs + self.total_secs + self.outro_secs;
        if span <= 0.0 {
            return 1.0;
        }
        (visible_secs / span).clamp(0.0, 1.0)
    }
}

/// Executes the capture protocol exactly once.
pub struct RenderProtocol {
    config: ProtocolConfig,
    board: StatusBoard,
    started: AtomicBool,
    parts: Mutex<ProtocolParts>,
}

impl RenderProtocol {
    pub fn new(config: ProtocolConfig, board: StatusBoard, parts: ProtocolParts) -> Self {
        Self {
            config,
            board,
            started: AtomicBool::new(false),
            parts: Mutex::new(parts),
        }
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    /// Run the protocol. A second call fails with [`WorkerError::AlreadyStarted`].
    ///
    /// The outcome is published on the status board either way.
    pub async fn run(&self, params: &RenderParams) -> WorkerResult<RawArtifact> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }

        let mut guard = self.parts.lock().await;
        let parts: &mut ProtocolParts = &mut guard;

        match self.execute(parts, params).await {
            Ok(artifact) => {
                info!(size = artifact.len(), mime = %artifact.mime, "Render protocol finished");
                self.board.finish(artifact.clone());
                Ok(artifact)
            }
            Err(e) => {
                warn!("Render protocol failed: {}", e);
                parts.capture.abort().await;
                self.board.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(&self, parts: &mut ProtocolParts, params: &RenderParams) -> WorkerResult<RawArtifact> {
        // Setup: source resolved and configuration applied before any frame
        self.board.set_phase(WorkerPhase::Setup);
        let total_secs = parts.source.load(&params.source).await?;
        parts.scene.configure(&params.visual)?;

        let fps = params.output.fps.max(1);
        let (width, height) = params.output.dimensions();
        let timeline = Timeline {
            fps,
            intro_secs: params.intro_secs.max(0.0),
            outro_secs: params.outro_secs.max(0.0),
            total_secs,
        };
        info!(
            total_secs,
            fps,
            width,
            height,
            intro_secs = timeline.intro_secs,
            outro_secs = timeline.outro_secs,
            "Render setup complete"
        );

        // Prebuffer: capture starts ahead of any visible content
        self.board.set_phase(WorkerPhase::Prebuffer);
        parts.capture.start(CaptureSettings { width, height, fps }).await?;
        let capture_start = Instant::now();

        let mut ticker = interval(Duration::from_secs_f64(1.0 / fps as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let mut frame = Frame::new(width, height);
        let mut frames_pushed: u64 = 0;
        let mut stage_started = capture_start;
        let mut stage = Stage::Prebuffer {
            rendered: 0,
            hold_until: None,
        };

        loop {
            ticker.tick().await;
            let now = Instant::now();

            while let Some(next) =
                self.transition(parts, &mut stage, now, frames_pushed, &timeline)
            {
                stage = next;
                stage_started = now;
                self.board.set_phase(stage.worker_phase());
            }
            if matches!(stage, Stage::Finalize) {
                break;
            }

            let stage_elapsed_secs = now.duration_since(stage_started).as_secs_f64();
            let position_secs = parts.source.position();
            let (stage_duration_secs, visible_secs) = match stage {
                Stage::Prebuffer { .. } => (0.0, 0.0),
                Stage::Intro { .. } => (
                    timeline.intro_secs,
                    stage_elapsed_secs.min(timeline.intro_secs),
                ),
                Stage::Playing { .. } => (timeline.total_secs, timeline.intro_secs + position_secs),
                Stage::Outro { .. } | Stage::Finalize => (
                    timeline.outro_secs,
                    timeline.intro_secs
                        + timeline.total_secs
                        + stage_elapsed_secs.min(timeline.outro_secs),
                ),
            };
            let progress = timeline.progress(visible_secs);

            let ctx = FrameContext {
                stage: stage.frame_stage(),
                index: frames_pushed,
                stage_elapsed_secs,
                stage_duration_secs,
                position_secs,
                progress,
            };
            parts.scene.render(&ctx, &mut frame);
            parts.capture.push_frame(&frame).await?;
            frames_pushed += 1;

            match &mut stage {
                Stage::Prebuffer { rendered, .. } => *rendered = rendered.saturating_add(1),
                Stage::Intro { remaining } | Stage::Outro { remaining } => {
                    *remaining = remaining.saturating_sub(1)
                }
                Stage::Playing { .. } | Stage::Finalize => {}
            }
            if !matches!(stage, Stage::Prebuffer { .. }) {
                self.board.set_progress(progress);
            }
        }

        info!(frames = frames_pushed, "Finalizing capture");
        parts.capture.finish().await
    }

    /// Next stage if the current one is complete at `now`.
    fn transition(
        &self,
        parts: &mut ProtocolParts,
        stage: &mut Stage,
        now: Instant,
        frames_pushed: u64,
        timeline: &Timeline,
    ) -> Option<Stage> {
        let cfg = &self.config;
        match *stage {
            Stage::Prebuffer {
                rendered,
                ref mut hold_until,
            } => {
                if rendered < cfg.prebuffer_frames {
                    return None;
                }
                let until = *hold_until.get_or_insert(now + cfg.prebuffer_delay);
                if now < until {
                    return None;
                }
                // Video time of the first intro frame, not wall time
                let trim = frames_pushed as f64 / timeline.fps as f64;
                self.board.set_trim_start(trim);
                info!(trim_start_secs = trim, "Prebuffer complete");
                Some(Stage::Intro {
                    remaining: timeline.frames(timeline.intro_secs),
                })
            }
            Stage::Intro { remaining } => {
                if remaining > 0 {
                    return None;
                }
                let offset = frames_pushed as f64 / timeline.fps as f64;
                parts.capture.attach_source(parts.source.audio_path(), offset);
                parts.source.play();
                Some(Stage::Playing {
                    deadline: now + Duration::from_secs_f64(timeline.total_secs) + cfg.playback_slack,
                })
            }
            Stage::Playing { deadline } => {
                let position = parts.source.position();
                if parts.source.ended() || timeline.total_secs - position <= cfg.end_epsilon_secs {
                    Some(Stage::Outro {
                        remaining: timeline.frames(timeline.outro_secs),
                    })
                } else if now >= deadline {
                    warn!(
                        position,
                        total = timeline.total_secs,
                        "Source stalled, ending playback at safety deadline"
                    );
                    Some(Stage::Outro {
                        remaining: timeline.frames(timeline.outro_secs),
                    })
                } else {
                    None
                }
            }
            Stage::Outro { remaining } => (remaining == 0).then_some(Stage::Finalize),
            Stage::Finalize => None,
        }
    }
}
