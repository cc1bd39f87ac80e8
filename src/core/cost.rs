//! Cost model: prices a run from provider metadata.
//!
//! `total = base + transfer + vram` where
//! `base = minutes * cost_per_minute`,
//! `transfer = gb_out * egress + gb_in * ingress`,
//! `vram = minutes * vram_gb * vram_cost_per_gb_minute`.

use serde::{Deserialize, Serialize};

use crate::core::{JobQueue, Provider};

/// Placeholder base rate for remote jobs whose provider has no price: unknown but not free.
pub const DEFAULT_REMOTE_COST_PER_MINUTE: f64 = 0.05;

/// Currency used when provider metadata names none.
pub const DEFAULT_CURRENCY: &str = "USD";

const BYTES_PER_GB: f64 = 1_073_741_824.0;

/// Rates actually applied to an estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostRates {
    /// Per minute of run time.
    pub cost_per_minute: f64,
    /// Per GB sent.
    pub egress_cost_per_gb: f64,
    /// Per GB received.
    pub ingress_cost_per_gb: f64,
    /// Per GB of VRAM per minute.
    pub vram_cost_per_gb_minute: f64,
}

/// Quantities to price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostInput {
    /// Queue the job runs on; selects the default base rate.
    pub queue: JobQueue,
    /// Run time in seconds.
    pub duration_sec: f64,
    /// Bytes sent to the provider.
    pub bytes_tx: u64,
    /// Bytes received from the provider.
    pub bytes_rx: u64,
    /// VRAM held during the run (GB).
    pub vram_gb: f64,
}

/// Itemised estimate with explanations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Provider priced against, if one was resolved.
    pub provider_id: Option<String>,
    /// Whether the provider was found in the registry.
    pub provider_known: bool,
    /// Currency of every amount.
    pub currency: String,
    /// Billed minutes.
    pub minutes: f64,
    /// GB sent.
    pub gb_out: f64,
    /// GB received.
    pub gb_in: f64,
    /// VRAM (GB).
    pub vram_gb: f64,
    /// Applied rates.
    pub rates: CostRates,
    /// Run-time component.
    pub base_cost: f64,
    /// Transfer component.
    pub transfer_cost: f64,
    /// VRAM component.
    pub vram_cost: f64,
    /// Sum of all components.
    pub total: f64,
    /// Human-readable explanation of each component.
    pub notes: Vec<String>,
}

/// Prices runs from provider metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Base rate for remote jobs whose provider does not publish one.
    pub remote_default_cost_per_minute: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            remote_default_cost_per_minute: DEFAULT_REMOTE_COST_PER_MINUTE,
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

impl CostModel {
    /// Model with a custom remote placeholder rate.
    pub const fn new(remote_default_cost_per_minute: f64) -> Self {
        Self {
            remote_default_cost_per_minute,
        }
    }

    /// Price `input` against `provider`.
    ///
    /// `requested_provider` is the id the caller asked for; when it is set but
    /// `provider` is `None`, the estimate notes the unknown provider and uses
    /// default rates: the remote placeholder per minute on the remote queue,
    /// zero everywhere else. Every amount is non-negative.
    pub fn estimate(
        &self,
        input: &CostInput,
        provider: Option<&Provider>,
        requested_provider: Option<&str>,
    ) -> CostBreakdown {
        let mut notes = Vec::new();
        let meta = provider.map(|p| &p.meta);

        if provider.is_none() {
            if let Some(id) = requested_provider {
                let base = if input.queue == JobQueue::Remote {
                    "the remote placeholder per-minute rate"
                } else {
                    "a zero per-minute rate"
                };
                notes.push(format!(
                    "provider `{id}` is not registered; using {base} and zero transfer and vram rates"
                ));
            }
        }

        let base_rate = match meta.and_then(|m| m.cost_per_minute) {
            Some(rate) => {
                if !rate.is_finite() || rate < 0.0 {
                    notes.push(format!("ignoring invalid cost_per_minute {rate}; using 0"));
                }
                non_negative(rate)
            }
            None if input.queue == JobQueue::Remote => {
                let placeholder = non_negative(self.remote_default_cost_per_minute);
                notes.push(format!(
                    "no cost_per_minute for remote job; using placeholder {placeholder:.4}/min"
                ));
                placeholder
            }
            None => 0.0,
        };
        let rates = CostRates {
            cost_per_minute: base_rate,
            egress_cost_per_gb: non_negative(meta.and_then(|m| m.egress_cost_per_gb).unwrap_or(0.0)),
            ingress_cost_per_gb: non_negative(meta.and_then(|m| m.ingress_cost_per_gb).unwrap_or(0.0)),
            vram_cost_per_gb_minute: non_negative(
                meta.and_then(|m| m.vram_cost_per_gb_minute).unwrap_or(0.0),
            ),
        };
        let currency = meta
            .and_then(|m| m.currency.clone())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let minutes = non_negative(input.duration_sec) / 60.0;
        let gb_out = bytes_to_gb(input.bytes_tx);
        let gb_in = bytes_to_gb(input.bytes_rx);
        let vram_gb = non_negative(input.vram_gb);

        let base_cost = minutes * rates.cost_per_minute;
        let transfer_cost = gb_out * rates.egress_cost_per_gb + gb_in * rates.ingress_cost_per_gb;
        let vram_cost = minutes * vram_gb * rates.vram_cost_per_gb_minute;
        let total = base_cost + transfer_cost + vram_cost;

        notes.push(format!(
            "base: {minutes:.2} min x {:.4} {currency}/min = {base_cost:.4}",
            rates.cost_per_minute
        ));
        notes.push(format!(
            "transfer: {gb_out:.3} GB out x {:.4} + {gb_in:.3} GB in x {:.4} = {transfer_cost:.4}",
            rates.egress_cost_per_gb, rates.ingress_cost_per_gb
        ));
        notes.push(format!(
            "vram: {minutes:.2} min x {vram_gb:.2} GB x {:.4} {currency}/GB-min = {vram_cost:.4}",
            rates.vram_cost_per_gb_minute
        ));
        if (total * 10_000.0).round() == 0.0 {
            notes.push(
                "total rounds to zero; check provider cost metadata and the job's duration, transfer, and vram inputs"
                    .into(),
            );
        }

        CostBreakdown {
            provider_id: provider
                .map(|p| p.id.clone())
                .or_else(|| requested_provider.map(str::to_string)),
            provider_known: provider.is_some(),
            currency,
            minutes,
            gb_out,
            gb_in,
            vram_gb,
            rates,
            base_cost,
            transfer_cost,
            vram_cost,
            total,
            notes,
        }
    }
}
