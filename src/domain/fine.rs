use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::ReturnCondition;

/// 罰金ポリシー（貸出規程）
///
/// 規程値は運用側で変更できるよう環境変数から上書き可能。
/// 計算自体はポリシー値にのみ依存する純粋関数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinePolicy {
    /// 破損返却の固定料金
    pub damage_fee: Decimal,
    /// 紛失の固定料金
    pub lost_fee: Decimal,
    /// 延滞1日あたりの料金
    pub daily_rate: Decimal,
}

impl Default for FinePolicy {
    fn default() -> Self {
        Self {
            damage_fee: dec!(15.00),
            lost_fee: dec!(50.00),
            daily_rate: dec!(0.50),
        }
    }
}

impl FinePolicy {
    /// 環境変数からポリシーを読み込む
    ///
    /// FINE_DAMAGE_FEE / FINE_LOST_FEE / FINE_DAILY_RATE。
    /// 未設定または不正な値は既定値にフォールバックする。
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            damage_fee: read_decimal_env("FINE_DAMAGE_FEE", default.damage_fee),
            lost_fee: read_decimal_env("FINE_LOST_FEE", default.lost_fee),
            daily_rate: read_decimal_env("FINE_DAILY_RATE", default.daily_rate),
        }
    }

    /// 純粋関数：返却時の罰金を計算する
    ///
    /// ビジネスルール：
    /// - Goodかつ期限内 → 0
    /// - Damaged → 固定料金 + （延滞していれば）延滞料金
    /// - Lost → 固定料金 + （延滞していれば）延滞料金
    /// - 延滞料金 = 延滞日数（切り上げ） × daily_rate
    ///
    /// 結果は小数点以下2桁に丸める。I/Oなし、完全に決定的。
    pub fn calculate(
        &self,
        due_date: DateTime<Utc>,
        returned_at: DateTime<Utc>,
        condition: ReturnCondition,
    ) -> Decimal {
        let late_fee = if returned_at > due_date {
            let late_seconds = (returned_at - due_date).num_seconds();
            let late_days = (late_seconds + 86_399) / 86_400;
            Decimal::from(late_days) * self.daily_rate
        } else {
            Decimal::ZERO
        };

        let flat_fee = match condition {
            ReturnCondition::Good => Decimal::ZERO,
            ReturnCondition::Damaged => self.damage_fee,
            ReturnCondition::Lost => self.lost_fee,
        };

        (flat_fee + late_fee).round_dp(2)
    }
}

fn read_decimal_env(key: &str, default: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<Decimal>().ok())
        .unwrap_or(default)
}
