//! On-frame dashboard
//!
//! Draws the monitor state over a camera frame: a left panel with the
//! operator and the detector modules, a right panel with the integrated
//! analysis, the face box and landmarks, and a red frame with a banner
//! while something critical is going on. The same annotated frame is what
//! gets attached to reports.
//!
//! Shapes are always drawn. Text needs a TrueType font; without one the
//! panels are drawn without labels.

use ab_glyph::{FontVec, PxScale};
use camera_capture::{CameraError, FaceLandmarks, VideoFrame};
use dms::{DmsAnalysis, Severity};
use driver_auth::CurrentOperator;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_cross_mut, draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use operator_analysis::{IntegratedAnalysis, RiskStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{info, warn};

const BACKGROUND: Rgb<u8> = Rgb([20, 20, 20]);
const SECTION_BG: Rgb<u8> = Rgb([25, 25, 25]);
const GRAPH_BG: Rgb<u8> = Rgb([40, 40, 40]);
const TEXT_PRIMARY: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_SECONDARY: Rgb<u8> = Rgb([180, 180, 180]);
const SUCCESS: Rgb<u8> = Rgb([0, 255, 0]);
const WARNING: Rgb<u8> = Rgb([255, 165, 0]);
const DANGER: Rgb<u8> = Rgb([255, 0, 0]);
const ACCENT: Rgb<u8> = Rgb([0, 255, 255]);
const FATIGUE_COLOR: Rgb<u8> = Rgb([150, 150, 255]);
const BEHAVIOR_COLOR: Rgb<u8> = Rgb([255, 150, 150]);
const GRAPH_LINE: Rgb<u8> = Rgb([255, 255, 0]);

const MARGIN: i32 = 10;
const PANEL_OPACITY: f32 = 0.9;
const TITLE_SIZE: f32 = 15.0;
const BODY_SIZE: f32 = 13.0;
const SMALL_SIZE: f32 = 11.0;
const FATIGUE_HISTORY: usize = 60;
/// Same analysis alert is not logged twice within this many seconds
const ALERT_REPEAT_SECS: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Draw the dashboard onto report images
    pub enabled: bool,
    /// Width of each side panel in pixels
    pub panel_width: u32,
    /// TrueType font for labels
    pub font_path: Option<PathBuf>,
    /// Alerts kept for the recent-alerts section
    pub alert_history: usize,
    /// Latest annotated frame, rewritten every `snapshot_every_frames`
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every_frames: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            panel_width: 300,
            font_path: Some(PathBuf::from("assets/fonts/DejaVuSans.ttf")),
            alert_history: 10,
            snapshot_path: None,
            snapshot_every_frames: 30,
        }
    }
}

/// Everything the dashboard shows for one frame
#[derive(Debug, Clone, Copy, Default)]
pub struct DashboardView<'a> {
    pub now: f64,
    pub level: u8,
    pub operator: Option<&'a CurrentOperator>,
    pub landmarks: Option<&'a FaceLandmarks>,
    pub dms: Option<&'a DmsAnalysis>,
    pub analysis: Option<&'a IntegratedAnalysis>,
}

impl DashboardView<'_> {
    /// Banner text when the frame shows a critical condition
    pub fn critical_banner(&self) -> Option<String> {
        if let Some(alert) = self.dms.and_then(|d| d.highest_severity_alert()) {
            if alert.severity >= Severity::High {
                return Some(alert.message.to_uppercase());
            }
        }
        if let Some(fatigue) = self.dms.and_then(|d| d.fatigue.as_ref()) {
            if fatigue.result.critical_fatigue {
                return Some("CRITICAL FATIGUE DETECTED".to_string());
            }
        }
        self.analysis
            .filter(|a| a.overall.status == RiskStatus::Critical)
            .map(|a| format!("CRITICAL RISK {}%", a.overall.risk_score))
    }
}

#[derive(Debug, Clone)]
struct AlertEntry {
    at: f64,
    message: String,
    color: Rgb<u8>,
}

/// Renders the overlay and keeps the short histories it plots
pub struct Dashboard {
    config: DashboardConfig,
    font: Option<FontVec>,
    fatigue_history: VecDeque<f32>,
    alerts: VecDeque<AlertEntry>,
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Self {
        let font = config.font_path.as_ref().and_then(|path| {
            let loaded = std::fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
            match loaded {
                Ok(font) => {
                    info!("Dashboard font loaded from {}", path.display());
                    Some(font)
                }
                Err(e) => {
                    warn!("Dashboard font {} unavailable, labels disabled: {}", path.display(), e);
                    None
                }
            }
        });
        Self {
            fatigue_history: VecDeque::with_capacity(FATIGUE_HISTORY),
            alerts: VecDeque::with_capacity(config.alert_history),
            config,
            font,
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Recent alert messages, oldest first
    pub fn recent_alerts(&self) -> impl Iterator<Item = &str> {
        self.alerts.iter().map(|a| a.message.as_str())
    }

    /// Fold one frame's results into the plotted histories
    pub fn observe(&mut self, view: &DashboardView) {
        if let Some(dms) = view.dms {
            if let Some(fatigue) = dms.fatigue.as_ref() {
                if self.fatigue_history.len() == FATIGUE_HISTORY {
                    self.fatigue_history.pop_front();
                }
                self.fatigue_history.push_back(fatigue.fatigue_percentage as f32 / 100.0);
            }
            for alert in &dms.alerts {
                let color = match alert.detector {
                    dms::DetectorKind::Fatigue | dms::DetectorKind::Yawn => FATIGUE_COLOR,
                    _ => BEHAVIOR_COLOR,
                };
                self.push_alert(view.now, &alert.message, color);
            }
        }
        if let Some(analysis) = view.analysis {
            for message in &analysis.overall.alerts {
                let repeated = self
                    .alerts
                    .iter()
                    .any(|a| a.message == *message && view.now - a.at < ALERT_REPEAT_SECS);
                if !repeated {
                    self.push_alert(view.now, message, ACCENT);
                }
            }
        }
    }

    fn push_alert(&mut self, now: f64, message: &str, color: Rgb<u8>) {
        if self.config.alert_history == 0 {
            return;
        }
        while self.alerts.len() >= self.config.alert_history {
            self.alerts.pop_front();
        }
        self.alerts.push_back(AlertEntry {
            at: now,
            message: message.to_string(),
            color,
        });
    }

    /// Annotated copy of `frame`
    pub fn render(&self, frame: &VideoFrame, view: &DashboardView) -> Result<VideoFrame, CameraError> {
        let mut img = frame.to_rgb_image()?;
        self.draw(&mut img, view);
        Ok(VideoFrame::from_rgb_image(img, frame.timestamp_ns, frame.sequence))
    }

    fn draw(&self, img: &mut RgbImage, view: &DashboardView) {
        let (w, h) = (img.width() as i32, img.height() as i32);
        let panel = (self.config.panel_width as i32).min(w - 2 * MARGIN);
        if panel <= 0 || h <= 2 * MARGIN {
            return;
        }

        self.draw_face(img, view);

        shade(img, MARGIN, MARGIN, panel, h - 2 * MARGIN, BACKGROUND, PANEL_OPACITY);
        let x = MARGIN;
        let mut y = MARGIN + 5;
        y = self.draw_header(img, x, y, panel, view);
        y = self.draw_operator(img, x, y, panel, view.operator);
        y = self.draw_fatigue(img, x, y, panel, view.dms);
        y = self.draw_yawn_distraction(img, x, y, panel, view.dms);
        y = self.draw_behavior(img, x, y, panel, view.dms);
        self.draw_alerts(img, x, y, panel, view.now);

        if let Some(analysis) = view.analysis {
            let right = w - panel - MARGIN;
            if right >= MARGIN + panel {
                shade(img, right, MARGIN, panel, h - 2 * MARGIN, BACKGROUND, PANEL_OPACITY);
                self.draw_analysis(img, right, MARGIN + 5, panel, analysis);
            }
        }

        if let Some(banner) = view.critical_banner() {
            draw_border(img, DANGER, 2);
            self.draw_banner(img, &banner);
        }
    }

    fn text(&self, img: &mut RgbImage, x: i32, y: i32, size: f32, color: Rgb<u8>, s: &str) {
        if let Some(font) = self.font.as_ref() {
            draw_text_mut(img, color, x, y, PxScale::from(size), font, s);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn section(&self, img: &mut RgbImage, x: i32, y: i32, panel: i32, height: i32, title: &str, color: Rgb<u8>) {
        fill(img, x + 5, y, panel - 10, height, SECTION_BG);
        self.text(img, x + 10, y + 3, BODY_SIZE, color, title);
    }

    fn status_dot(img: &mut RgbImage, x: i32, y: i32, panel: i32, color: Rgb<u8>) {
        draw_filled_circle_mut(img, (x + panel - 20, y + 10), 4, color);
    }

    fn draw_header(&self, img: &mut RgbImage, x: i32, y: i32, panel: i32, view: &DashboardView) -> i32 {
        let height = 30;
        fill(img, x + 5, y, panel - 10, height, SECTION_BG);
        self.text(img, x + 10, y + 7, TITLE_SIZE, ACCENT, "SAFETY MONITOR");
        let level_color = match view.level {
            0 => SUCCESS,
            1 => WARNING,
            _ => DANGER,
        };
        self.text(img, x + panel - 60, y + 9, SMALL_SIZE, level_color, &format!("opt L{}", view.level));
        y + height + 5
    }

    fn draw_operator(&self, img: &mut RgbImage, x: i32, y: i32, panel: i32, operator: Option<&CurrentOperator>) -> i32 {
        let height = 45;
        self.section(img, x, y, panel, height, "OPERATOR", TEXT_SECONDARY);
        match operator {
            Some(op) => {
                Self::status_dot(img, x, y, panel, SUCCESS);
                self.text(img, x + 15, y + 18, BODY_SIZE, TEXT_PRIMARY, &format!("Name: {}", op.name));
                self.text(img, x + 15, y + 31, SMALL_SIZE, TEXT_SECONDARY, &format!("ID: {}", op.id));
            }
            None => {
                Self::status_dot(img, x, y, panel, WARNING);
                self.text(img, x + 15, y + 18, BODY_SIZE, WARNING, "Not identified");
            }
        }
        y + height + 5
    }

    fn draw_fatigue(&self, img: &mut RgbImage, x: i32, y: i32, panel: i32, dms: Option<&DmsAnalysis>) -> i32 {
        let height = 125;
        self.section(img, x, y, panel, height, "FATIGUE", FATIGUE_COLOR);
        let bar_w = panel - 30;
        let Some(status) = dms.and_then(|d| d.fatigue.as_ref()) else {
            self.text(img, x + 15, y + 20, BODY_SIZE, TEXT_SECONDARY, "No data");
            return y + height + 5;
        };
        let r = &status.result;
        let dot = if r.critical_fatigue {
            DANGER
        } else if r.microsleep_count > 0 {
            WARNING
        } else {
            SUCCESS
        };
        Self::status_dot(img, x, y, panel, dot);

        let ear_color = if r.ear < r.threshold { DANGER } else { SUCCESS };
        self.text(
            img,
            x + 15,
            y + 18,
            SMALL_SIZE,
            ear_color,
            &format!("EAR: {:.3} (threshold {:.3})", r.ear, r.threshold),
        );
        bar(img, x + 15, y + 32, bar_w, 6, r.ear, r.threshold, 0.4, ear_color);

        let pct = status.fatigue_percentage as f64;
        let pct_color = level_color(pct, [40.0, 60.0, 80.0]);
        self.text(img, x + 15, y + 42, SMALL_SIZE, pct_color, &format!("Fatigue level: {}%", status.fatigue_percentage));
        bar(img, x + 15, y + 56, bar_w, 6, pct, 60.0, 100.0, pct_color);

        let ms = r.microsleep_count as f64;
        let ms_color = level_color(ms, [1.0, 2.0, 3.0]);
        self.text(img, x + 15, y + 66, SMALL_SIZE, ms_color, &format!("Microsleeps (10 min): {}/3", r.microsleep_count));
        if r.eyes_closed {
            self.text(img, x + 160, y + 66, SMALL_SIZE, DANGER, &format!("closed {:.1}s", r.closure_duration));
        }

        graph(img, x + 15, y + 84, bar_w, 32, &self.fatigue_history, GRAPH_LINE);
        y + height + 5
    }

    fn draw_yawn_distraction(&self, img: &mut RgbImage, x: i32, y: i32, panel: i32, dms: Option<&DmsAnalysis>) -> i32 {
        let height = 70;
        self.section(img, x, y, panel, height, "YAWN / DISTRACTION", FATIGUE_COLOR);
        let bar_w = panel - 30;
        if let Some(yawn) = dms.and_then(|d| d.yawn.as_ref()) {
            let color = if yawn.multiple_yawns {
                DANGER
            } else if yawn.result.is_yawning {
                WARNING
            } else {
                SUCCESS
            };
            self.text(
                img,
                x + 15,
                y + 18,
                SMALL_SIZE,
                color,
                &format!("Yawns ({} min): {}/{}", yawn.window_minutes, yawn.yawn_count, yawn.max_yawns),
            );
            bar(
                img,
                x + 15,
                y + 32,
                bar_w,
                5,
                yawn.yawn_count as f64,
                yawn.max_yawns as f64,
                (yawn.max_yawns as f64).max(1.0) * 1.5,
                color,
            );
        }
        if let Some(distraction) = dms.and_then(|d| d.distraction.as_ref()) {
            let r = &distraction.result;
            let color = match r.alert_level {
                0 => SUCCESS,
                1 => WARNING,
                _ => DANGER,
            };
            self.text(
                img,
                x + 15,
                y + 40,
                SMALL_SIZE,
                color,
                &format!("Head: {:?} {:.1}s, episodes {}", r.direction, r.distraction_secs, distraction.extreme_rotations),
            );
            bar(img, x + 15, y + 55, bar_w, 5, r.alert_level as f64, 1.0, 2.0, color);
        }
        y + height + 5
    }

    fn draw_behavior(&self, img: &mut RgbImage, x: i32, y: i32, panel: i32, dms: Option<&DmsAnalysis>) -> i32 {
        let height = 60;
        self.section(img, x, y, panel, height, "BEHAVIOR", BEHAVIOR_COLOR);
        let Some(status) = dms.and_then(|d| d.behavior.as_ref()) else {
            self.text(img, x + 15, y + 20, BODY_SIZE, TEXT_SECONDARY, "No data");
            return y + height + 5;
        };
        let r = &status.result;
        Self::status_dot(img, x, y, panel, if r.alerts.is_empty() { SUCCESS } else { DANGER });

        let phone_color = level_color(r.phone_secs, [0.01, 3.0, 7.0]);
        let phone = if r.phone_secs > 0.0 {
            format!("Phone: {:.1}s", r.phone_secs)
        } else {
            "Phone: no".to_string()
        };
        self.text(img, x + 15, y + 18, SMALL_SIZE, phone_color, &phone);
        bar(img, x + 15, y + 32, panel - 30, 5, r.phone_secs, 7.0, 10.0, phone_color);

        let cig_color = if r.cigarette_sightings > 0 { WARNING } else { TEXT_SECONDARY };
        self.text(
            img,
            x + 15,
            y + 40,
            SMALL_SIZE,
            cig_color,
            &format!("Cigarette: {:.1}s, sightings {}", r.cigarette_secs, r.cigarette_sightings),
        );
        y + height + 5
    }

    fn draw_alerts(&self, img: &mut RgbImage, x: i32, y: i32, panel: i32, now: f64) {
        let height = 80;
        let title_color = if self.alerts.is_empty() { TEXT_SECONDARY } else { DANGER };
        self.section(
            img,
            x,
            y,
            panel,
            height,
            &format!("RECENT ALERTS ({})", self.alerts.len()),
            title_color,
        );
        if self.alerts.is_empty() {
            self.text(img, x + 15, y + 20, BODY_SIZE, SUCCESS, "No alerts");
            return;
        }
        for (i, alert) in self.alerts.iter().rev().take(4).enumerate() {
            let ago = (now - alert.at).max(0.0) as u64;
            let message: String = alert.message.chars().take(32).collect();
            self.text(
                img,
                x + 15,
                y + 18 + i as i32 * 14,
                SMALL_SIZE,
                alert.color,
                &format!("[{}s] {}", ago, message),
            );
        }
    }

    fn draw_analysis(&self, img: &mut RgbImage, x: i32, y: i32, panel: i32, analysis: &IntegratedAnalysis) {
        let bar_w = panel - 30;
        let overall = &analysis.overall;
        let status_color = match overall.status {
            RiskStatus::Optimal => SUCCESS,
            RiskStatus::Normal => ACCENT,
            RiskStatus::Attention => WARNING,
            RiskStatus::Critical => DANGER,
        };

        self.section(img, x, y, panel, 55, "ANALYSIS", ACCENT);
        Self::status_dot(img, x, y, panel, status_color);
        self.text(
            img,
            x + 15,
            y + 18,
            BODY_SIZE,
            status_color,
            &format!("Risk: {}% ({:?})", overall.risk_score, overall.status),
        );
        bar(img, x + 15, y + 38, bar_w, 8, overall.risk_score as f64, 75.0, 100.0, status_color);

        let mut row = y + 65;
        fill(img, x + 5, row, panel - 10, 150, SECTION_BG);
        let mut metric = |img: &mut RgbImage, label: String, value: f64, color: Rgb<u8>| {
            self.text(img, x + 15, row + 3, SMALL_SIZE, color, &label);
            bar(img, x + 15, row + 17, bar_w, 5, value, 70.0, 100.0, color);
            row += 28;
        };

        let fatigue = analysis.fatigue.fatigue_percentage as f64;
        metric(img, format!("Fatigue: {}%", analysis.fatigue.fatigue_percentage), fatigue, level_color(fatigue, [40.0, 60.0, 80.0]));
        if let Some(stress) = analysis.stress.as_ref() {
            let v = stress.stress_level as f64;
            metric(img, format!("Stress: {}% ({:?})", stress.stress_level, stress.category), v, level_color(v, [30.0, 50.0, 70.0]));
        }
        if let Some(emotion) = analysis.emotion.as_ref() {
            let v = emotion.wellbeing as f64;
            let color = if emotion.dominant_emotion.is_negative() { WARNING } else { SUCCESS };
            metric(img, format!("Emotion: {:?}, wellbeing {}%", emotion.dominant_emotion, emotion.wellbeing), v, color);
        }
        if let Some(anomaly) = analysis.anomaly.as_ref() {
            let v = anomaly.anomaly_score as f64;
            metric(img, format!("Anomaly: {}% ({:?})", anomaly.anomaly_score, anomaly.level), v, level_color(v, [30.0, 50.0, 70.0]));
        }
        if let Some(pulse) = analysis.pulse.as_ref() {
            let color = if (50..=110).contains(&pulse.bpm) { SUCCESS } else { WARNING };
            metric(img, format!("Pulse: {} bpm, HRV {}", pulse.bpm, pulse.hrv), pulse.quality * 100.0, color);
        }

        if let Some(rec) = overall.recommendations.first() {
            let rec: String = rec.chars().take(36).collect();
            self.text(img, x + 10, y + 225, SMALL_SIZE, TEXT_SECONDARY, &rec);
        }
    }

    fn draw_face(&self, img: &mut RgbImage, view: &DashboardView) {
        let Some(face) = view.landmarks else {
            return;
        };
        let color = if view.critical_banner().is_some() {
            DANGER
        } else if view.operator.is_some() {
            SUCCESS
        } else {
            WARNING
        };
        let r = face.rect;
        if let Some(rect) = rect_at(r.x as i32, r.y as i32, r.width as i32, r.height as i32) {
            draw_hollow_rect_mut(img, rect, color);
        }
        for p in face.points() {
            draw_cross_mut(img, color, p.x as i32, p.y as i32);
        }
    }

    fn draw_banner(&self, img: &mut RgbImage, message: &str) {
        let w = img.width() as i32;
        let (text_w, text_h) = match self.font.as_ref() {
            Some(font) => {
                let (tw, th) = text_size(PxScale::from(TITLE_SIZE), font, message);
                (tw as i32, th as i32)
            }
            None => (w / 3, 14),
        };
        let bx = ((w - text_w) / 2 - 10).max(0);
        fill(img, bx, 22, text_w + 20, text_h + 12, DANGER);
        self.text(img, bx + 10, 28, TITLE_SIZE, TEXT_PRIMARY, message);
    }
}

fn rect_at(x: i32, y: i32, w: i32, h: i32) -> Option<Rect> {
    (w > 0 && h > 0).then(|| Rect::at(x, y).of_size(w as u32, h as u32))
}

fn fill(img: &mut RgbImage, x: i32, y: i32, w: i32, h: i32, color: Rgb<u8>) {
    if let Some(rect) = rect_at(x, y, w, h) {
        draw_filled_rect_mut(img, rect, color);
    }
}

/// Blend `color` over a region with the given opacity
fn shade(img: &mut RgbImage, x: i32, y: i32, w: i32, h: i32, color: Rgb<u8>, opacity: f32) {
    let x0 = x.clamp(0, img.width() as i32) as u32;
    let y0 = y.clamp(0, img.height() as i32) as u32;
    let x1 = (x + w).clamp(0, img.width() as i32) as u32;
    let y1 = (y + h).clamp(0, img.height() as i32) as u32;
    for py in y0..y1 {
        for px in x0..x1 {
            let p = img.get_pixel_mut(px, py);
            for c in 0..3 {
                p.0[c] = (color.0[c] as f32 * opacity + p.0[c] as f32 * (1.0 - opacity)).round() as u8;
            }
        }
    }
}

fn draw_border(img: &mut RgbImage, color: Rgb<u8>, thickness: i32) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    for t in 0..thickness {
        if let Some(rect) = rect_at(2 + t, 2 + t, w - 4 - 2 * t, h - 4 - 2 * t) {
            draw_hollow_rect_mut(img, rect, color);
        }
    }
}

/// Progress bar with a tick at `threshold`
#[allow(clippy::too_many_arguments)]
fn bar(img: &mut RgbImage, x: i32, y: i32, w: i32, h: i32, value: f64, threshold: f64, max: f64, color: Rgb<u8>) {
    if max <= 0.0 {
        return;
    }
    fill(img, x, y, w, h, GRAPH_BG);
    let filled = (w as f64 * (value / max).clamp(0.0, 1.0)) as i32;
    fill(img, x, y, filled, h, color);
    if threshold < max {
        let tx = (x + (w as f64 * threshold / max) as i32) as f32;
        draw_line_segment_mut(img, (tx, (y - 2) as f32), (tx, (y + h + 2) as f32), WARNING);
    }
}

/// Line plot of 0-1 samples
fn graph(img: &mut RgbImage, x: i32, y: i32, w: i32, h: i32, data: &VecDeque<f32>, color: Rgb<u8>) {
    fill(img, x, y, w, h, GRAPH_BG);
    if data.len() < 2 {
        return;
    }
    let n = data.len() as f32;
    let points: Vec<(f32, f32)> = data
        .iter()
        .enumerate()
        .map(|(i, v)| (x as f32 + i as f32 * w as f32 / n, (y + h) as f32 - v.clamp(0.0, 1.0) * h as f32))
        .collect();
    for pair in points.windows(2) {
        draw_line_segment_mut(img, pair[0], pair[1], color);
    }
}

fn level_color(value: f64, steps: [f64; 3]) -> Rgb<u8> {
    if value >= steps[2] {
        DANGER
    } else if value >= steps[1] {
        WARNING
    } else if value >= steps[0] {
        TEXT_PRIMARY
    } else {
        SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::synthetic_face;
    use dms::{DetectorKind, DmsAlert};

    fn grey(secs: f64) -> VideoFrame {
        VideoFrame::filled(640, 480, [170, 120, 100], (secs * 1e9) as u64)
    }

    fn no_font() -> Dashboard {
        Dashboard::new(DashboardConfig {
            font_path: None,
            ..Default::default()
        })
    }

    fn alert(severity: Severity, message: &str, at: f64) -> DmsAlert {
        DmsAlert {
            detector: DetectorKind::Behavior,
            alert_type: "phone_7s".to_string(),
            severity,
            message: message.to_string(),
            timestamp: at,
        }
    }

    fn is_dark(p: &Rgb<u8>) -> bool {
        p.0.iter().all(|&c| c < 60)
    }

    #[test]
    fn test_panel_drawn_without_font() {
        let dashboard = no_font();
        assert!(!dashboard.has_font());
        let out = dashboard.render(&grey(1.0), &DashboardView::default()).unwrap();
        let img = out.to_rgb_image().unwrap();
        assert!(is_dark(img.get_pixel(20, 460)));
        assert_eq!(img.get_pixel(450, 450), &Rgb([170, 120, 100]));
        assert_eq!(out.timestamp_ns, grey(1.0).timestamp_ns);
    }

    #[test]
    fn test_missing_font_file_is_tolerated() {
        let dashboard = Dashboard::new(DashboardConfig {
            font_path: Some(PathBuf::from("/nonexistent/font.ttf")),
            ..Default::default()
        });
        assert!(!dashboard.has_font());
    }

    #[test]
    fn test_face_box_follows_operator() {
        let dashboard = no_font();
        let face = synthetic_face(0.3, 0.0);
        let operator = CurrentOperator {
            id: "OP1".to_string(),
            name: "Ana".to_string(),
            confidence: 0.9,
        };
        let view = DashboardView {
            landmarks: Some(&face),
            operator: Some(&operator),
            ..Default::default()
        };
        let img = dashboard.render(&grey(1.0), &view).unwrap().to_rgb_image().unwrap();
        // right edge of the synthetic face box (x 220, width 200)
        assert_eq!(img.get_pixel(419, 240), &SUCCESS);

        let unknown = DashboardView {
            landmarks: Some(&face),
            ..Default::default()
        };
        let img = dashboard.render(&grey(1.0), &unknown).unwrap().to_rgb_image().unwrap();
        assert_eq!(img.get_pixel(419, 240), &WARNING);
    }

    #[test]
    fn test_critical_alert_draws_border_and_banner() {
        let dashboard = no_font();
        let dms = DmsAnalysis {
            face_detected: true,
            alerts: vec![alert(Severity::Critical, "Phone use 7s", 3.0)],
            ..Default::default()
        };
        let view = DashboardView {
            dms: Some(&dms),
            now: 3.0,
            ..Default::default()
        };
        assert_eq!(view.critical_banner().as_deref(), Some("PHONE USE 7S"));
        let img = dashboard.render(&grey(3.0), &view).unwrap().to_rgb_image().unwrap();
        assert_eq!(img.get_pixel(500, 2), &DANGER);
        assert_eq!(img.get_pixel(320, 30), &DANGER);
    }

    #[test]
    fn test_warning_alert_has_no_banner() {
        let dms = DmsAnalysis {
            alerts: vec![alert(Severity::Warning, "Phone use 3s", 1.0)],
            ..Default::default()
        };
        let view = DashboardView {
            dms: Some(&dms),
            ..Default::default()
        };
        assert!(view.critical_banner().is_none());
        let img = no_font().render(&grey(1.0), &view).unwrap().to_rgb_image().unwrap();
        assert_eq!(img.get_pixel(500, 2), &Rgb([170, 120, 100]));
    }

    #[test]
    fn test_alert_history_is_bounded() {
        let mut dashboard = Dashboard::new(DashboardConfig {
            font_path: None,
            alert_history: 3,
            ..Default::default()
        });
        for i in 0..5 {
            let dms = DmsAnalysis {
                alerts: vec![alert(Severity::Warning, &format!("alert {}", i), i as f64)],
                ..Default::default()
            };
            dashboard.observe(&DashboardView {
                dms: Some(&dms),
                now: i as f64,
                ..Default::default()
            });
        }
        let recent: Vec<&str> = dashboard.recent_alerts().collect();
        assert_eq!(recent, vec!["alert 2", "alert 3", "alert 4"]);
    }

    #[test]
    fn test_small_frame_does_not_panic() {
        let tiny = VideoFrame::filled(16, 12, [90, 90, 90], 0);
        let face = synthetic_face(0.3, 0.0);
        let view = DashboardView {
            landmarks: Some(&face),
            ..Default::default()
        };
        let out = no_font().render(&tiny, &view).unwrap();
        assert_eq!((out.width, out.height), (16, 12));
    }

    #[test]
    fn test_level_colors() {
        assert_eq!(level_color(10.0, [40.0, 60.0, 80.0]), SUCCESS);
        assert_eq!(level_color(45.0, [40.0, 60.0, 80.0]), TEXT_PRIMARY);
        assert_eq!(level_color(65.0, [40.0, 60.0, 80.0]), WARNING);
        assert_eq!(level_color(90.0, [40.0, 60.0, 80.0]), DANGER);
    }
}
