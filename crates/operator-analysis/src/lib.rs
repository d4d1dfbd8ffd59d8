//! Operator Analysis Module
//!
//! Slower-moving signals read from the operator's face, on top of the
//! per-frame detectors:
//! - Fatigue from eye openness against the calibrated resting face
//! - Stress from facial tension, micro-movements and eye strain
//! - Emotion estimate and derived wellbeing, valence and arousal
//! - Heart rate from skin colour (rPPG, FFT via rustfft)
//! - Anomaly screening (intoxication, neurological, erratic)
//! - Integrated risk score with sustained-condition reports

pub mod anomaly;
pub mod emotion;
pub mod fatigue;
pub mod integrated;
pub mod pulse;
pub mod signal;
pub mod stress;

pub use anomaly::{AnomalyAnalysis, AnomalyDetector, AnomalyKind, AnomalyLevel};
pub use emotion::{Emotion, EmotionAnalysis, EmotionAnalyzer, EmotionScores};
pub use fatigue::{FatigueAnalysis, FatigueAnalyzer, FatigueStatus};
pub use integrated::{
    AnalysisConfig, AnalysisReport, AnalysisSummary, IntegratedAnalysis, OperatorAnalyzer, RiskStatus, Trend,
    REPORT_MODULE,
};
pub use pulse::{PulseEstimator, PulseReading, PulseStatus};
pub use stress::{StressAnalysis, StressAnalyzer, StressCategory};

use thiserror::Error;

/// Analysis error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("No skin visible in the pulse regions")]
    NoSkin,

    #[error("Not enough pulse samples ({0:.1}s collected)")]
    InsufficientSamples(f64),

    #[error("No heart-rate peak in band")]
    NoPeak,
}
