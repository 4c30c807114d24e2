//! Scene rendering seam and the built-in title card renderer.

use serde::Deserialize;

use beatcast_models::VisualConfig;

use crate::error::{WorkerError, WorkerResult};

/// One RGBA frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 pixels
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Fill the whole frame with one colour.
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Fill the rectangle `[x0, x1) x [y0, y1)`, clipped to the frame.
    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, rgba: [u8; 4]) {
        let (x1, y1) = (x1.min(self.width), y1.min(self.height));
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        let stride = self.width as usize * 4;
        for y in y0 as usize..y1 as usize {
            let row = &mut self.data[y * stride..(y + 1) * stride];
            for px in row[x0 as usize * 4..x1 as usize * 4].chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

/// Protocol stage a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Prebuffer,
    Intro,
    Playing,
    Outro,
}

/// Everything a renderer may use for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub stage: FrameStage,
    /// Frame number since capture start
    pub index: u64,
    /// Seconds spent in the current stage
    pub stage_elapsed_secs: f64,
    /// Planned length of the current stage (source duration while playing)
    pub stage_duration_secs: f64,
    /// Source playback position
    pub position_secs: f64,
    /// Fraction of the visible timeline done (0.0-1.0)
    pub progress: f64,
}

/// Draws the visual scene.
pub trait SceneRenderer: Send {
    /// Apply a complete visual configuration.
    ///
    /// On error the previous configuration stays active.
    fn configure(&mut self, visual: &VisualConfig) -> WorkerResult<()>;

    /// Draw one frame into `frame`.
    fn render(&mut self, ctx: &FrameContext, frame: &mut Frame);
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TitleCardSettings {
    background: String,
    accent: String,
    /// Height of the progress bar as a fraction of the frame height
    bar_height: f64,
}

impl Default for TitleCardSettings {
    fn default() -> Self {
        Self {
            background: "#0b0b12".to_string(),
            accent: "#ff3d7f".to_string(),
            bar_height: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TitleCardStyle {
    background: [u8; 4],
    accent: [u8; 4],
    bar_height: f64,
}

impl TitleCardStyle {
    fn parse(settings: &TitleCardSettings) -> WorkerResult<Self> {
        if !(0.0..=1.0).contains(&settings.bar_height) {
            return Err(WorkerError::configure(format!(
                "barHeight must be within 0..1, got {}",
                settings.bar_height
            )));
        }
        Ok(Self {
            background: parse_hex_color(&settings.background)?,
            accent: parse_hex_color(&settings.accent)?,
            bar_height: settings.bar_height,
        })
    }
}

/// Minimal renderer: solid background, a countdown band during the intro
/// and a progress bar while the source plays.
#[derive(Debug, Clone)]
pub struct TitleCardRenderer {
    style: TitleCardStyle,
}

impl Default for TitleCardRenderer {
    fn default() -> Self {
        Self {
            style: TitleCardStyle {
                background: [0x0b, 0x0b, 0x12, 255],
                accent: [0xff, 0x3d, 0x7f, 255],
                bar_height: 0.02,
            },
        }
    }
}

impl TitleCardRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SceneRenderer for TitleCardRenderer {
    fn configure(&mut self, visual: &VisualConfig) -> WorkerResult<()> {
        // Parse into a fresh value and swap only once everything is valid
        let settings: TitleCardSettings =
            serde_json::from_value(serde_json::Value::Object(visual.clone()))
                .map_err(|e| WorkerError::configure(e.to_string()))?;
        self.style = TitleCardStyle::parse(&settings)?;
        Ok(())
    }

    fn render(&mut self, ctx: &FrameContext, frame: &mut Frame) {
        let style = self.style;
        frame.fill(style.background);

        let (w, h) = (frame.width, frame.height);
        let bar = ((h as f64 * style.bar_height).ceil() as u32).max(1);

        match ctx.stage {
            FrameStage::Prebuffer => {}
            FrameStage::Intro => {
                // Band shrinks towards the centre as the countdown runs out
                let remaining = if ctx.stage_duration_secs > 0.0 {
                    1.0 - (ctx.stage_elapsed_secs / ctx.stage_duration_secs).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let half = (w as f64 * remaining / 2.0) as u32;
                let mid_y = h / 2;
                frame.fill_rect(
                    w / 2 - half.min(w / 2),
                    mid_y.saturating_sub(bar),
                    w / 2 + half,
                    mid_y + bar,
                    style.accent,
                );
            }
            FrameStage::Playing => {
                let filled = (w as f64 * ctx.progress.clamp(0.0, 1.0)) as u32;
                frame.fill_rect(0, h - bar, filled, h, style.accent);
            }
            FrameStage::Outro => {
                frame.fill_rect(0, h - bar, w, h, style.accent);
            }
        }
    }
}

/// Parse `#rrggbb` or `#rrggbbaa`.
fn parse_hex_color(s: &str) -> WorkerResult<[u8; 4]> {
    let hex = s.trim().trim_start_matches('#');
    let channel = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|c| u8::from_str_radix(c, 16).ok())
            .ok_or_else(|| WorkerError::configure(format!("invalid colour: {}", s)))
    };
    match hex.len() {
        6 => Ok([channel(0)?, channel(2)?, channel(4)?, 255]),
        8 => Ok([channel(0)?, channel(2)?, channel(4)?, channel(6)?]),
        _ => Err(WorkerError::configure(format!("invalid colour: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn visual(value: serde_json::Value) -> VisualConfig {
        value.as_object().cloned().unwrap()
    }

    fn ctx(stage: FrameStage, progress: f64) -> FrameContext {
        FrameContext {
            stage,
            index: 0,
            stage_elapsed_secs: 0.0,
            stage_duration_secs: 1.0,
            position_secs: 0.0,
            progress,
        }
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#ff0080").unwrap(), [255, 0, 128, 255]);
        assert_eq!(parse_hex_color("00000080").unwrap(), [0, 0, 0, 128]);
        assert!(parse_hex_color("#fff").is_err());
        assert!(parse_hex_color("#gg0000").is_err());
    }

    #[test]
    fn test_configure_applies_colours() {
        let mut renderer = TitleCardRenderer::new();
        renderer
            .configure(&visual(json!({"background": "#102030", "shader": "ignored"})))
            .unwrap();

        let mut frame = Frame::new(8, 8);
        renderer.render(&ctx(FrameStage::Prebuffer, 0.0), &mut frame);
        assert_eq!(frame.pixel(3, 3), [0x10, 0x20, 0x30, 255]);
    }

    #[test]
    fn test_failed_configure_keeps_previous_style() {
        let mut renderer = TitleCardRenderer::new();
        renderer.configure(&visual(json!({"background": "#102030"}))).unwrap();
        let before = renderer.style;

        let err = renderer
            .configure(&visual(json!({"background": "#ffffff", "accent": "nope"})))
            .unwrap_err();
        assert!(matches!(err, WorkerError::Configure(_)));
        assert_eq!(renderer.style, before);
    }

    #[test]
    fn test_progress_bar_tracks_progress() {
        let mut renderer = TitleCardRenderer::new();
        renderer
            .configure(&visual(json!({"background": "#000000", "accent": "#ffffff", "barHeight": 0.25})))
            .unwrap();

        let mut frame = Frame::new(100, 8);
        renderer.render(&ctx(FrameStage::Playing, 0.5), &mut frame);
        assert_eq!(frame.pixel(10, 7), [255, 255, 255, 255]);
        assert_eq!(frame.pixel(60, 7), [0, 0, 0, 255]);
        assert_eq!(frame.pixel(10, 0), [0, 0, 0, 255]);
    }
}
