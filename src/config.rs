// 13.0 config.rs: all settings in one place. risk limits, fill model, backtest window.
// the file format (yaml, env, flags) is the caller's business, this is just the shape.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::executor::ExecutionConfig;
use crate::instrument::InstrumentTable;
use crate::risk::RiskConfig;
use crate::runner::RunnerConfig;
use crate::sizing::MAX_RISK_PCT;

// The complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub instruments: InstrumentTable,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub runner: RunnerConfig,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            instruments: InstrumentTable::cme_defaults(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl TradingConfig {
    // Half the per-trade risk, tighter drawdown halt, two ticks of slippage
    pub fn conservative() -> Self {
        let mut config = Self::default();
        config.risk.max_risk_per_trade_pct = dec!(0.005); // 0.5%
        config.risk.max_drawdown_pct = dec!(0.05); // 5%
        config.risk.max_exposure_per_symbol_pct = dec!(0.25);
        config.risk.max_total_exposure_pct = dec!(0.50);
        config.execution.slippage_ticks = dec!(2);
        config
    }

    // No slippage and no commission. fills land exactly on the bar price
    pub fn frictionless() -> Self {
        let mut config = Self::default();
        config.execution = ExecutionConfig::frictionless();
        config
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let risk = &self.risk;

        // risk checks
        if risk.max_risk_per_trade_pct <= Decimal::ZERO || risk.max_risk_per_trade_pct > MAX_RISK_PCT {
            return Err(ConfigError::InvalidRisk {
                reason: format!("risk per trade must be in (0, {MAX_RISK_PCT}]"),
            });
        }
        if risk.max_drawdown_pct <= Decimal::ZERO || risk.max_drawdown_pct > Decimal::ONE {
            return Err(ConfigError::InvalidRisk {
                reason: "max drawdown must be in (0, 1]".to_string(),
            });
        }
        if risk.max_exposure_per_symbol_pct <= Decimal::ZERO
            || risk.max_total_exposure_pct < risk.max_exposure_per_symbol_pct
        {
            return Err(ConfigError::InvalidRisk {
                reason: "exposure limits must be positive, total at least the per-symbol cap".to_string(),
            });
        }
        if risk.stop_loss_atr_multiple <= Decimal::ZERO
            || risk.take_profit_atr_multiple <= Decimal::ZERO
        {
            return Err(ConfigError::InvalidRisk {
                reason: "ATR multiples must be positive".to_string(),
            });
        }
        if risk.order_ttl_ms < 0 {
            return Err(ConfigError::InvalidRisk {
                reason: "order ttl cannot be negative".to_string(),
            });
        }

        // execution checks
        if self.execution.slippage_ticks < Decimal::ZERO {
            return Err(ConfigError::InvalidExecution {
                reason: "slippage cannot be negative".to_string(),
            });
        }
        if self.execution.commission_per_side < Decimal::ZERO {
            return Err(ConfigError::InvalidExecution {
                reason: "commission cannot be negative".to_string(),
            });
        }
        if self.execution.max_order_history == 0 {
            return Err(ConfigError::InvalidExecution {
                reason: "order history must keep at least one result".to_string(),
            });
        }

        // backtest checks
        if !self.runner.initial_equity.is_positive() {
            return Err(ConfigError::InvalidBacktest {
                reason: "initial equity must be positive".to_string(),
            });
        }
        if self.runner.atr_period == 0 {
            return Err(ConfigError::InvalidBacktest {
                reason: "ATR period must be at least 1".to_string(),
            });
        }
        if let (Some(start), Some(end)) = (self.runner.start, self.runner.end) {
            if start > end {
                return Err(ConfigError::InvalidBacktest {
                    reason: format!("start {start} is after end {end}"),
                });
            }
        }
        if self.instruments.is_empty() {
            return Err(ConfigError::InvalidBacktest {
                reason: "no instruments configured".to_string(),
            });
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid risk config: {reason}")]
    InvalidRisk { reason: String },

    #[error("invalid execution config: {reason}")]
    InvalidExecution { reason: String },

    #[error("invalid backtest config: {reason}")]
    InvalidBacktest { reason: String },
}
