//! Chain status reads for a single miner account.

use std::sync::Arc;

use tracing::debug;

use crate::chain::ChainClient;
use crate::error::ChainStatError;
use crate::identity::public_key_of;
use crate::types::{ChainStat, MinerChainInfo, MinerStatus, RewardInfo};

const UNIT: u128 = 1_000_000_000_000_000_000;

const SPACE_UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Translates an account into its converted [`ChainStat`].
#[derive(Clone)]
pub struct ChainStatReader {
    chain: Arc<dyn ChainClient>,
}

impl ChainStatReader {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// Read status, height and rewards, in that order.
    ///
    /// Returns the converted stat with the current height. Punishments are
    /// left empty for the caller to fill from the block window.
    pub async fn read(&self, account: &str) -> Result<(ChainStat, u64), ChainStatError> {
        let public_key = public_key_of(account).map_err(|message| ChainStatError::AccountDecode {
            account: account.to_string(),
            message,
        })?;

        let info = self
            .chain
            .miner_info(&public_key)
            .await
            .map_err(ChainStatError::Status)?;
        let mut stat = convert_miner_info(&info);

        let height = match self.chain.current_block_height().await {
            Ok(height) => height,
            Err(source) => {
                return Err(ChainStatError::Height {
                    source,
                    partial: Box::new(stat),
                });
            }
        };

        match self.chain.reward_info(&public_key).await {
            Ok(reward) => apply_reward(&mut stat, &reward),
            Err(source) => {
                return Err(ChainStatError::Reward {
                    source,
                    partial: Box::new(stat),
                });
            }
        }

        debug!("{} is {} at block {}", account, stat.status, height);
        Ok((stat, height))
    }
}

/// Convert the raw chain entry into display values.
pub fn convert_miner_info(info: &MinerChainInfo) -> ChainStat {
    ChainStat {
        status: MinerStatus::parse(&info.state),
        collaterals: format_token_amount(info.collaterals),
        debt: format_token_amount(info.debt),
        declaration_space: format_space(info.declaration_space),
        idle_space: format_space(info.idle_space),
        service_space: format_space(info.service_space),
        lock_space: format_space(info.lock_space),
        ..Default::default()
    }
}

fn apply_reward(stat: &mut ChainStat, reward: &RewardInfo) {
    stat.total_reward = format_token_amount(reward.total_reward);
    stat.reward_issued = format_token_amount(reward.reward_issued);
}

/// Scale by 10^18 and render with four decimals, rounding half up.
pub fn format_token_amount(value: u128) -> String {
    const SCALE: u128 = UNIT / 10_000;
    let ten_thousandths = value / SCALE + u128::from(value % SCALE >= SCALE / 2);
    format!("{}.{:04}", ten_thousandths / 10_000, ten_thousandths % 10_000)
}

/// Render bytes with a binary unit and two decimals.
pub fn format_space(bytes: u128) -> String {
    if bytes < 1024 {
        return format!("{} Bytes", bytes);
    }
    let mut unit = 0;
    let mut divisor: u128 = 1024;
    while unit + 1 < SPACE_UNITS.len() && bytes >= divisor * 1024 {
        divisor *= 1024;
        unit += 1;
    }
    format!("{:.2} {}", bytes as f64 / divisor as f64, SPACE_UNITS[unit])
}
