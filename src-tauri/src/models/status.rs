use std::time::{Duration, Instant};

use serde::Serialize;

/// Where the session's model lifecycle stands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LoadPhase {
    #[default]
    Idle,
    Loading,
    Loaded,
}

/// Throughput of a finished generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    pub token_count: usize,
    pub elapsed: Duration,
    pub tokens_per_second: f64,
}

impl GenerationStats {
    pub fn new(token_count: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let tokens_per_second = if secs > 0.0 {
            token_count as f64 / secs
        } else {
            0.0
        };
        Self {
            token_count,
            elapsed,
            tokens_per_second,
        }
    }

    /// Stat line shown under the output
    pub fn stat_line(&self) -> String {
        format!(" Tokens/second: {:.3}", self.tokens_per_second)
    }
}

/// Observable session state - computed by the coordinator, never written by callers.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub load_phase: LoadPhase,
    /// Model currently loaded, if any
    pub current_model: Option<String>,
    /// Model being loaded, if any
    pub loading_model: Option<String>,
    /// Progress of the current load
    pub progress: f64,
    /// Human-readable load status ("Downloading X: 40%", "Loaded X. Weights: 870M")
    pub model_info: String,
    pub running: bool,
    pub is_thinking: bool,
    /// Latest output of the running (or last) generation
    pub output: String,
    pub tokens_per_second: f64,
    pub stat: String,
    pub last_generation: Option<GenerationStats>,
    #[serde(skip)]
    pub started_at: Option<Instant>,
}

impl SessionSnapshot {
    /// Time since the running generation was accepted
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_stats() {
        let stats = GenerationStats::new(100, Duration::from_millis(2_000));

        assert!((stats.tokens_per_second - 50.0).abs() < 1e-9);
        assert_eq!(stats.stat_line(), " Tokens/second: 50.000");
    }

    #[test]
    fn test_zero_elapsed_has_zero_rate() {
        assert_eq!(GenerationStats::new(10, Duration::ZERO).tokens_per_second, 0.0);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(SessionSnapshot::default()).unwrap();

        assert_eq!(json["loadPhase"], "idle");
        assert_eq!(json["isThinking"], false);
        assert!(json.get("startedAt").is_none());
    }
}
