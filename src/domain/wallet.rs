use crate::error::WalletError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Identifier of a wallet. System wallets use well-known ids so there is
/// exactly one ESCROW and one REVENUE wallet platform-wide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    pub const ESCROW: &'static str = "sys.escrow";
    pub const REVENUE: &'static str = "sys.revenue";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn escrow() -> Self {
        Self(Self::ESCROW.to_string())
    }

    pub fn revenue() -> Self {
        Self(Self::REVENUE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// ISO-style currency code. No implicit conversion anywhere in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().to_ascii_uppercase())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents a positive monetary amount for postings and transfers.
///
/// Ensures that movement amounts are always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, WalletError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(WalletError::Validation(
                "amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = WalletError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Non-negative monetary balance with 4 decimal places of precision.
///
/// Wrapper around `rust_decimal::Decimal`; arithmetic that could go negative
/// must go through the checked mutators on [`Wallet`], never raw subtraction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletType {
    User,
    Escrow,
    Revenue,
}

/// A balance-holding account owned by a user, business, or the platform.
///
/// Invariants, enforced by every mutator:
/// - `balance >= 0`
/// - `locked_balance <= balance`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    /// None for the platform-owned system wallets.
    pub owner_id: Option<String>,
    pub wallet_type: WalletType,
    pub balance: Balance,
    pub locked_balance: Balance,
    pub currency: Currency,
    pub total_transactions: u64,
    /// Admin freeze flag; a frozen wallet rejects every balance movement.
    pub frozen: bool,
}

impl Wallet {
    pub fn new(id: WalletId, owner_id: impl Into<String>, currency: Currency) -> Self {
        Self {
            id,
            owner_id: Some(owner_id.into()),
            wallet_type: WalletType::User,
            balance: Balance::ZERO,
            locked_balance: Balance::ZERO,
            currency,
            total_transactions: 0,
            frozen: false,
        }
    }

    pub fn system(id: WalletId, wallet_type: WalletType, currency: Currency) -> Self {
        Self {
            id,
            owner_id: None,
            wallet_type,
            balance: Balance::ZERO,
            locked_balance: Balance::ZERO,
            currency,
            total_transactions: 0,
            frozen: false,
        }
    }

    /// Funds not reserved by a pending withdrawal.
    pub fn available(&self) -> Balance {
        self.balance - self.locked_balance
    }

    fn ensure_active(&self) -> Result<(), WalletError> {
        if self.frozen {
            Err(WalletError::WalletFrozen(self.id.clone()))
        } else {
            Ok(())
        }
    }

    pub fn credit(&mut self, amount: Amount) -> Result<(), WalletError> {
        self.ensure_active()?;
        self.balance += amount.into();
        Ok(())
    }

    /// Debits available funds.
    pub fn debit(&mut self, amount: Amount) -> Result<(), WalletError> {
        self.ensure_active()?;
        if self.available() >= amount.into() {
            self.balance -= amount.into();
            Ok(())
        } else {
            Err(WalletError::InsufficientFunds {
                wallet: self.id.clone(),
                requested: amount.value(),
                available: self.available().value(),
            })
        }
    }

    /// Reserves part of the balance without moving it.
    pub fn lock(&mut self, amount: Amount) -> Result<(), WalletError> {
        self.ensure_active()?;
        if self.available() >= amount.into() {
            self.locked_balance += amount.into();
            Ok(())
        } else {
            Err(WalletError::InsufficientFunds {
                wallet: self.id.clone(),
                requested: amount.value(),
                available: self.available().value(),
            })
        }
    }

    pub fn unlock(&mut self, amount: Amount) -> Result<(), WalletError> {
        self.ensure_active()?;
        if self.locked_balance >= amount.into() {
            self.locked_balance -= amount.into();
            Ok(())
        } else {
            Err(WalletError::AtomicityViolation(format!(
                "unlock of {} exceeds locked balance {} on wallet {}",
                amount.value(),
                self.locked_balance.value(),
                self.id
            )))
        }
    }

    /// Converts a previously locked reservation into an actual debit,
    /// decrementing `balance` and `locked_balance` together.
    pub fn debit_locked(&mut self, amount: Amount) -> Result<(), WalletError> {
        self.ensure_active()?;
        if self.locked_balance >= amount.into() && self.balance >= amount.into() {
            self.locked_balance -= amount.into();
            self.balance -= amount.into();
            Ok(())
        } else {
            Err(WalletError::AtomicityViolation(format!(
                "locked debit of {} exceeds reservation on wallet {}",
                amount.value(),
                self.id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wallet_with(balance: Decimal) -> Wallet {
        let mut w = Wallet::new(WalletId::new("w1"), "acct-1", Currency::new("VND"));
        w.balance = Balance::new(balance);
        w
    }

    #[test]
    fn amount_must_be_positive() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(WalletError::Validation(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(WalletError::Validation(_))
        ));
    }

    #[test]
    fn credit_and_debit_move_balance() {
        let mut w = wallet_with(dec!(0));
        w.credit(Amount::new(dec!(100)).unwrap()).unwrap();
        assert_eq!(w.balance, Balance::new(dec!(100)));
        w.debit(Amount::new(dec!(40)).unwrap()).unwrap();
        assert_eq!(w.balance, Balance::new(dec!(60)));
    }

    #[test]
    fn debit_rejects_overdraft() {
        let mut w = wallet_with(dec!(10));
        let err = w.debit(Amount::new(dec!(20)).unwrap()).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
        assert_eq!(w.balance, Balance::new(dec!(10)));
    }

    #[test]
    fn lock_respects_available_not_total() {
        let mut w = wallet_with(dec!(100));
        w.lock(Amount::new(dec!(80)).unwrap()).unwrap();
        assert_eq!(w.available(), Balance::new(dec!(20)));

        // Only 20 available even though balance is 100.
        let err = w.lock(Amount::new(dec!(30)).unwrap()).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
    }

    #[test]
    fn lock_unlock_round_trip_restores_available() {
        let mut w = wallet_with(dec!(100));
        let before = w.available();
        w.lock(Amount::new(dec!(60)).unwrap()).unwrap();
        w.unlock(Amount::new(dec!(60)).unwrap()).unwrap();
        assert_eq!(w.available(), before);
        assert_eq!(w.balance, Balance::new(dec!(100)));
    }

    #[test]
    fn debit_locked_decrements_both() {
        let mut w = wallet_with(dec!(100));
        w.lock(Amount::new(dec!(60)).unwrap()).unwrap();
        w.debit_locked(Amount::new(dec!(60)).unwrap()).unwrap();
        assert_eq!(w.balance, Balance::new(dec!(40)));
        assert_eq!(w.locked_balance, Balance::ZERO);
        assert_eq!(w.available(), Balance::new(dec!(40)));
    }

    #[test]
    fn frozen_wallet_rejects_every_movement() {
        let mut w = wallet_with(dec!(100));
        w.frozen = true;
        assert!(matches!(
            w.credit(Amount::new(dec!(1)).unwrap()),
            Err(WalletError::WalletFrozen(_))
        ));
        assert!(matches!(
            w.debit(Amount::new(dec!(1)).unwrap()),
            Err(WalletError::WalletFrozen(_))
        ));
        assert!(matches!(
            w.lock(Amount::new(dec!(1)).unwrap()),
            Err(WalletError::WalletFrozen(_))
        ));
    }
}
