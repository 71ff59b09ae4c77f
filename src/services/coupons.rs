use log::info;
use mongodb::bson::{oid::ObjectId, DateTime};
use rand::Rng;

use crate::ledger::{LedgerError, LedgerStore};
use crate::models::RedemptionResponse;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const GENERATED_CODE_LEN: usize = 10;

pub struct CouponService;

impl CouponService {
    /// Codes are stored and matched upper-case.
    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        (0..GENERATED_CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }

    pub async fn redeem(
        ledger: &dyn LedgerStore,
        code: &str,
        user_id: &ObjectId,
    ) -> Result<RedemptionResponse, LedgerError> {
        let code = Self::normalize(code);
        let coupon = ledger
            .coupon_by_code(&code)
            .await?
            .filter(|coupon| coupon.is_redeemable_at(DateTime::now()))
            .ok_or(LedgerError::CouponNotFound)?;

        let entry = ledger.redeem_coupon(&coupon, user_id).await?;
        info!(
            "Coupon {} redeemed by {}, {} LeadCoins (balance {})",
            code, user_id, entry.delta, entry.balance_after
        );

        Ok(RedemptionResponse {
            coins_granted: entry.delta,
            new_balance: entry.balance_after,
        })
    }
}
