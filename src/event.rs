use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a detected news event.
///
/// Closed set: the upstream matcher classifies raw news into one of these
/// before it ever reaches the engine. Each kind carries a static target-edge
/// expectation (see `engine::edge`); kinds with no reliable edge signal
/// (general news) produce no trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CourtRuling,
    ExecutiveOrder,
    PoliticalNews,
    RegulatoryDecision,
    SecFiling,
    FdaApproval,
    Legislation,
    CandidateAnnouncement,
    SportsInjurySevere,
    SportsInjuryModerate,
    SportsInjuryMinor,
    SportsTrade,
    SportsResult,
    SportsNews,
    GeneralNews,
}

/// Directional read of the event relative to the market question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Event makes the market outcome more likely (YES direction).
    Positive,
    /// Event makes the market outcome less likely (NO direction).
    Negative,
}

/// A structured news event, produced by the external matcher.
///
/// Ephemeral: consumed once by the executor, never stored. Delivery is
/// at-least-once; the dedup and cooldown gates absorb duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsEvent {
    pub kind: EventKind,
    pub polarity: Polarity,
    /// Parser confidence in the classification (0.0–1.0).
    pub confidence: f64,
    /// Polymarket market condition ID this event was matched to.
    pub market_id: String,
    /// YES price observed by the matcher at detection time (0.0–1.0).
    pub observed_price: f64,
    /// Original headline, for logging and alerts.
    #[serde(default)]
    pub headline: String,
    #[serde(default = "Utc::now")]
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_deserializes_from_feed_json() {
        let line = r#"{
            "kind": "court_ruling",
            "polarity": "positive",
            "confidence": 0.9,
            "market_id": "0xabc",
            "observed_price": 0.45,
            "headline": "Supreme Court affirms ruling"
        }"#;
        let ev: NewsEvent = serde_json::from_str(line).unwrap();
        assert_eq!(ev.kind, EventKind::CourtRuling);
        assert_eq!(ev.polarity, Polarity::Positive);
        assert_eq!(ev.market_id, "0xabc");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let line = r#"{
            "kind": "alien_invasion",
            "polarity": "positive",
            "confidence": 0.9,
            "market_id": "m",
            "observed_price": 0.5
        }"#;
        assert!(serde_json::from_str::<NewsEvent>(line).is_err());
    }
}
