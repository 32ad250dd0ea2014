use crate::event::{EventKind, NewsEvent, Polarity};
use crate::store::models::Side;

/// Fair value never leaves this band; a clamped extreme still leaves room
/// for the market to be "wrong" without claiming certainty.
const FAIR_VALUE_FLOOR: f64 = 0.05;
const FAIR_VALUE_CEIL: f64 = 0.95;

/// A priced trading decision derived from one event and one quote.
///
/// Derived, never stored; recomputed per event.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeDecision {
    pub market_id: String,
    pub fair_value: f64,
    pub market_price: f64,
    /// |fair_value − market_price|
    pub edge: f64,
    pub side: Side,
}

/// Expected fair-value shift for an event kind, as a fraction of price.
///
/// Kinds with no reliable edge signal return `None` (no trade). The numbers
/// are calibrated per news category: a Supreme Court ruling moves its market
/// further than a routine sports headline.
pub fn target_edge(kind: EventKind) -> Option<f64> {
    match kind {
        EventKind::CourtRuling => Some(0.50),
        EventKind::ExecutiveOrder => Some(0.40),
        EventKind::PoliticalNews => Some(0.40),
        EventKind::RegulatoryDecision => Some(0.35),
        EventKind::SecFiling => Some(0.35),
        EventKind::FdaApproval => Some(0.35),
        EventKind::Legislation => Some(0.35),
        EventKind::CandidateAnnouncement => Some(0.30),
        EventKind::SportsInjurySevere => Some(0.45),
        EventKind::SportsInjuryModerate => Some(0.30),
        EventKind::SportsInjuryMinor => Some(0.20),
        EventKind::SportsTrade => Some(0.35),
        EventKind::SportsResult => Some(0.40),
        EventKind::SportsNews => Some(0.25),
        EventKind::GeneralNews => None,
    }
}

/// Map an event and the current YES price to a directional decision.
///
/// Pure function. Returns `None` whenever there is nothing actionable:
/// unpriceable event kind, confidence below the floor, fair value equal to
/// the market price, or edge at or under `min_edge`.
pub fn compute_edge(
    event: &NewsEvent,
    market_price: f64,
    min_edge: f64,
    min_confidence: f64,
) -> Option<EdgeDecision> {
    let target = target_edge(event.kind)?;

    if event.confidence < min_confidence {
        return None;
    }
    if !(0.0..=1.0).contains(&market_price) {
        return None;
    }

    let fair_value = match event.polarity {
        Polarity::Positive => 0.5 + target,
        Polarity::Negative => 0.5 - target,
    }
    .clamp(FAIR_VALUE_FLOOR, FAIR_VALUE_CEIL);

    let side = if fair_value > market_price {
        Side::Yes
    } else if fair_value < market_price {
        Side::No
    } else {
        return None;
    };

    // Tolerance absorbs representation error: 0.95 − 0.70 lands a hair
    // above 0.25, and the threshold comparison must not trade on that.
    let edge = (fair_value - market_price).abs();
    if edge <= min_edge + 1e-9 {
        return None;
    }

    Some(EdgeDecision {
        market_id: event.market_id.clone(),
        fair_value,
        market_price,
        edge,
        side,
    })
}
