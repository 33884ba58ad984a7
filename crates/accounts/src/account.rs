use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use ledgerflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money};
use ledgerflow_events::{Command, DecodeEvent, Event, EventDecodeError};

pub const ACCOUNT_OPENED: &str = "AccountOpened";
pub const MONEY_DEPOSITED: &str = "MoneyDeposited";
pub const MONEY_WITHDRAWN: &str = "MoneyWithdrawn";

/// Payload schema version written for every account event.
const SCHEMA_V1: u32 = 1;

/// Aggregate root: Account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AggregateId,
    owner: Option<String>,
    balance: Money,
    is_open: bool,
    version: u64,
}

impl Account {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            owner: None,
            balance: Money::ZERO,
            is_open: false,
            version: 0,
        }
    }

    /// Fold an ordered history of `(aggregate_version, event)` pairs.
    pub fn replay(id: AggregateId, history: impl IntoIterator<Item = (u64, AccountEvent)>) -> Self {
        let mut account = Self::empty(id);
        for (version, event) in history {
            account.apply(&event, version);
        }
        account
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }
}

impl AggregateRoot for Account {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub account_id: AggregateId,
    pub owner: String,
}

/// Command: Deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub account_id: AggregateId,
    pub amount: i64,
}

/// Command: Withdraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdraw {
    pub account_id: AggregateId,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    OpenAccount(OpenAccount),
    Deposit(Deposit),
    Withdraw(Withdraw),
}

impl Command for AccountCommand {
    fn target_aggregate_id(&self) -> &AggregateId {
        match self {
            AccountCommand::OpenAccount(c) => &c.account_id,
            AccountCommand::Deposit(c) => &c.account_id,
            AccountCommand::Withdraw(c) => &c.account_id,
        }
    }

    fn requires_version_precheck(&self) -> bool {
        matches!(self, AccountCommand::OpenAccount(_))
    }
}

/// Event payload: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub owner: String,
}

/// Event payload: MoneyDeposited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyDeposited {
    pub amount: Money,
}

/// Event payload: MoneyWithdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyWithdrawn {
    pub amount: Money,
}

/// Account events, tagged by their stored `event_type`.
///
/// `Unknown` preserves events written by newer deployments so that older
/// readers keep folding (and advancing versions) instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEvent {
    AccountOpened(AccountOpened),
    MoneyDeposited(MoneyDeposited),
    MoneyWithdrawn(MoneyWithdrawn),
    Unknown {
        event_type: String,
        schema_version: u32,
        payload: JsonValue,
    },
}

impl Event for AccountEvent {
    fn event_type(&self) -> &str {
        match self {
            AccountEvent::AccountOpened(_) => ACCOUNT_OPENED,
            AccountEvent::MoneyDeposited(_) => MONEY_DEPOSITED,
            AccountEvent::MoneyWithdrawn(_) => MONEY_WITHDRAWN,
            AccountEvent::Unknown { event_type, .. } => event_type,
        }
    }

    fn schema_version(&self) -> u32 {
        match self {
            AccountEvent::Unknown { schema_version, .. } => *schema_version,
            _ => SCHEMA_V1,
        }
    }

    fn payload(&self) -> JsonValue {
        match self {
            AccountEvent::AccountOpened(e) => serde_json::json!({ "owner": e.owner }),
            AccountEvent::MoneyDeposited(e) => serde_json::json!({ "amount": e.amount }),
            AccountEvent::MoneyWithdrawn(e) => serde_json::json!({ "amount": e.amount }),
            AccountEvent::Unknown { payload, .. } => payload.clone(),
        }
    }
}

impl DecodeEvent for AccountEvent {
    fn decode(
        event_type: &str,
        schema_version: u32,
        payload: &JsonValue,
    ) -> Result<Self, EventDecodeError> {
        fn parse<T: DeserializeOwned>(
            event_type: &str,
            schema_version: u32,
            payload: &JsonValue,
        ) -> Result<T, EventDecodeError> {
            T::deserialize(payload)
                .map_err(|e| EventDecodeError::new(event_type, schema_version, e.to_string()))
        }

        Ok(match event_type {
            ACCOUNT_OPENED => {
                AccountEvent::AccountOpened(parse(event_type, schema_version, payload)?)
            }
            MONEY_DEPOSITED => {
                AccountEvent::MoneyDeposited(parse(event_type, schema_version, payload)?)
            }
            MONEY_WITHDRAWN => {
                AccountEvent::MoneyWithdrawn(parse(event_type, schema_version, payload)?)
            }
            other => AccountEvent::Unknown {
                event_type: other.to_string(),
                schema_version,
                payload: payload.clone(),
            },
        })
    }
}

impl Aggregate for Account {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event, version: u64) {
        match event {
            AccountEvent::AccountOpened(e) => {
                self.owner = Some(e.owner.clone());
                self.is_open = true;
            }
            AccountEvent::MoneyDeposited(e) => {
                self.balance = self.balance.saturating_add(e.amount);
            }
            AccountEvent::MoneyWithdrawn(e) => {
                self.balance = self.balance.saturating_sub(e.amount);
            }
            AccountEvent::Unknown { .. } => {}
        }

        self.version = version;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::OpenAccount(cmd) => self.handle_open(cmd),
            AccountCommand::Deposit(cmd) => self.handle_deposit(cmd),
            AccountCommand::Withdraw(cmd) => self.handle_withdraw(cmd),
        }
    }
}

impl Account {
    fn ensure_account_id(&self, account_id: &AggregateId) -> Result<(), DomainError> {
        if &self.id != account_id {
            return Err(DomainError::invalid_id("account_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_account_id(&cmd.account_id)?;
        let owner = cmd.owner.trim();
        if owner.is_empty() {
            return Err(DomainError::validation("owner cannot be empty"));
        }
        if self.is_open {
            return Err(DomainError::AlreadyOpen);
        }
        Ok(vec![AccountEvent::AccountOpened(AccountOpened {
            owner: owner.to_string(),
        })])
    }

    fn handle_deposit(&self, cmd: &Deposit) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_account_id(&cmd.account_id)?;
        let amount = Money::positive(cmd.amount)?;
        if !self.is_open {
            return Err(DomainError::AccountNotOpen);
        }
        if self.balance.checked_add(amount).is_none() {
            return Err(DomainError::validation("deposit would overflow the balance"));
        }
        Ok(vec![AccountEvent::MoneyDeposited(MoneyDeposited { amount })])
    }

    fn handle_withdraw(&self, cmd: &Withdraw) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_account_id(&cmd.account_id)?;
        let amount = Money::positive(cmd.amount)?;
        if !self.is_open {
            return Err(DomainError::AccountNotOpen);
        }
        if self.balance < amount {
            return Err(DomainError::InsufficientFunds {
                balance: self.balance.units(),
                requested: amount.units(),
            });
        }
        Ok(vec![AccountEvent::MoneyWithdrawn(MoneyWithdrawn { amount })])
    }
}
