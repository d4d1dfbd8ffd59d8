use serde::{Deserialize, Serialize};

/// Operator identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Registry of known operators
    pub encodings_file: String,
    /// Face crop to embedding model
    pub embedding_model_path: Option<String>,
    pub embedding_input_size: u32,
    /// Minimum gap between two welcome messages (seconds)
    pub welcome_delay_secs: f64,
    /// Minutes of continuous unknown presence that repeat the warning
    pub unknown_audio_minutes: Vec<f64>,
    /// Minutes of continuous unknown presence before a report is filed
    pub unknown_report_minutes: f64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            encodings_file: "operators/encodings.json".to_string(),
            embedding_model_path: None,
            embedding_input_size: 112,
            welcome_delay_secs: 5.0,
            unknown_audio_minutes: vec![5.0, 10.0, 15.0],
            unknown_report_minutes: 15.0,
        }
    }
}
