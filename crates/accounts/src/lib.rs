//! Account domain module (event-sourced).
//!
//! This crate contains business rules for accounts, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod account;

pub use account::{
    Account, AccountCommand, AccountEvent, AccountOpened, Deposit, MoneyDeposited,
    MoneyWithdrawn, OpenAccount, Withdraw, ACCOUNT_OPENED, MONEY_DEPOSITED, MONEY_WITHDRAWN,
};
