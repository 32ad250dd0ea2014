use thiserror::Error;

/// Sizing failed in an expected way (low equity, empty account). Not an
/// invariant violation; the caller logs and moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("available cash ${available:.2} below minimum trade size ${minimum:.2}")]
    InsufficientCash { available: f64, minimum: f64 },
    #[error("computed size ${size:.2} below minimum trade size ${minimum:.2}")]
    BelowMinimum { size: f64, minimum: f64 },
}

/// Risk parameters the sizer needs; a subset of the runtime config.
#[derive(Debug, Clone, Copy)]
pub struct SizingParams {
    /// Fraction of equity risked per trade (e.g. 0.02).
    pub risk_per_trade_pct: f64,
    /// Stop-loss distance as a fraction of entry (e.g. 0.15).
    pub stop_loss_pct: f64,
    /// Cap on a single position as a fraction of equity (e.g. 0.30).
    pub max_position_pct: f64,
    /// Floor below which a trade is not worth placing (USD).
    pub min_trade_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sizing {
    pub size_usd: f64,
    /// Dollar amount actually at risk: equity × risk_per_trade_pct.
    pub risk_amount_usd: f64,
}

/// Equity-based position sizing.
///
/// Position Size = Risk Amount / Stop-Loss %, where
/// Risk Amount = Equity × risk-per-trade %. With $10,000 equity, 2% risk
/// and a 15% stop, that is $200 / 0.15 ≈ $1,333. The result is capped by
/// `max_position_pct` of equity and by available cash.
pub fn size_position(
    equity: f64,
    available_cash: f64,
    params: &SizingParams,
) -> Result<Sizing, SizingError> {
    if available_cash < params.min_trade_usd {
        return Err(SizingError::InsufficientCash {
            available: available_cash,
            minimum: params.min_trade_usd,
        });
    }

    let risk_amount_usd = equity * params.risk_per_trade_pct;
    let raw_size = risk_amount_usd / params.stop_loss_pct;
    let size_usd = raw_size
        .min(equity * params.max_position_pct)
        .min(available_cash);

    if size_usd < params.min_trade_usd {
        return Err(SizingError::BelowMinimum {
            size: size_usd,
            minimum: params.min_trade_usd,
        });
    }

    Ok(Sizing {
        size_usd,
        risk_amount_usd,
    })
}
