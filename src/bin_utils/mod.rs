//! This module could be a separate crate on its own, to bootstrap [`crate::treasury`]
//! within the binary, but it is kept here so integration tests can drive it.

use std::{
    collections::HashMap,
    io::{Read, Write},
};

use anyhow::Result;
use csv_parser::{CsvScriptParser, ScriptOp, ScriptRow};
use csv_printer::{MovementRow, print_movements};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

use crate::{
    config::TreasuryConfig,
    ledger::LedgerError,
    movement::{Currency, OperationId, OperationRef, OperationType},
    operation::{ExchangeRequest, LoanRequest, VoucherRequest, WithdrawalRequest},
    treasury::Treasury,
};

pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("`{field}` is required for {op:?}")]
    MissingField { op: ScriptOp, field: &'static str },
    #[error("Reference `{0}` is already taken")]
    DuplicateRef(String),
    #[error("Reference `{name}` does not name a {kind}")]
    UnknownRef { name: String, kind: OperationType },
    #[error("Malformed row: {0}")]
    Malformed(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub config: TreasuryConfig,
    pub error_printer: Box<dyn FnMut(u64, ServiceError)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = CsvScriptParser::new(self.input);
        let treasury = Treasury::open(self.config);
        let mut script = Script {
            treasury: &treasury,
            names: HashMap::new(),
        };

        for (line, row) in parser {
            let result = row
                .map_err(|err| ServiceError::from(ScriptError::from(err)))
                .and_then(|row| script.apply(row));
            if let Err(err) = result {
                (self.error_printer)(line, err);
            }
        }

        for (currency, balance) in treasury.balances()? {
            info!(%currency, %balance, "closing balance");
        }
        let movements = treasury.movements()?;
        treasury.close();
        print_movements(self.output, movements.iter().map(MovementRow::from))
    }
}

/// Replays script rows against a treasury, tracking named operations.
struct Script<'t> {
    treasury: &'t Treasury,
    names: HashMap<String, OperationRef>,
}

impl Script<'_> {
    fn apply(&mut self, row: ScriptRow) -> Result<(), ServiceError> {
        let treasury = self.treasury;
        match row.op {
            ScriptOp::IssueVoucher => {
                self.ensure_new(&row.name)?;
                let (voucher, _) = treasury.vouchers().issue(
                    VoucherRequest {
                        currency: currency(&row, row.currency.as_deref(), "currency")?,
                        amount: amount(&row, row.amount, "amount")?,
                        beneficiary: text(&row, row.party.as_deref(), "party")?,
                        concept: row.concept.clone().unwrap_or_default(),
                    },
                    row.actor,
                )?;
                self.names.insert(row.name, voucher.reference());
            }
            ScriptOp::CollectVoucher => {
                let id = self.lookup(&row.name, OperationType::Voucher)?;
                treasury.vouchers().collect(id, row.actor)?;
            }
            ScriptOp::VoidVoucher => {
                let id = self.lookup(&row.name, OperationType::Voucher)?;
                treasury.vouchers().void(id, row.actor)?;
            }
            ScriptOp::CancelVoucher => {
                let id = self.lookup(&row.name, OperationType::Voucher)?;
                let reason = text(&row, row.concept.as_deref(), "concept")?;
                treasury.vouchers().cancel(id, row.actor, &reason)?;
            }
            ScriptOp::RegisterWithdrawal => {
                self.ensure_new(&row.name)?;
                let withdrawal = treasury.withdrawals().register(
                    WithdrawalRequest {
                        branch: text(&row, row.party.as_deref(), "party")?,
                        currency: currency(&row, row.currency.as_deref(), "currency")?,
                        amount: amount(&row, row.amount, "amount")?,
                    },
                    row.actor,
                )?;
                self.names.insert(row.name, withdrawal.reference());
            }
            ScriptOp::ReceiveWithdrawal => {
                let id = self.lookup(&row.name, OperationType::Withdrawal)?;
                treasury.withdrawals().receive(id, row.actor)?;
            }
            ScriptOp::RejectWithdrawal => {
                let id = self.lookup(&row.name, OperationType::Withdrawal)?;
                let reason = text(&row, row.concept.as_deref(), "concept")?;
                treasury.withdrawals().reject(id, row.actor, &reason)?;
            }
            ScriptOp::ReturnWithdrawal => {
                let id = self.lookup(&row.name, OperationType::Withdrawal)?;
                let reason = text(&row, row.concept.as_deref(), "concept")?;
                treasury
                    .withdrawals()
                    .return_to_branch(id, row.actor, &reason)?;
            }
            ScriptOp::Exchange => {
                self.ensure_new(&row.name)?;
                let (exchange, _) = treasury.exchanges().exchange(
                    ExchangeRequest {
                        from: currency(&row, row.currency.as_deref(), "currency")?,
                        amount: amount(&row, row.amount, "amount")?,
                        to: currency(&row, row.to_currency.as_deref(), "to_currency")?,
                        rate: amount(&row, row.rate, "rate")?,
                    },
                    row.actor,
                )?;
                self.names.insert(row.name, exchange.reference());
            }
            ScriptOp::CancelExchange => {
                let id = self.lookup(&row.name, OperationType::Exchange)?;
                let reason = text(&row, row.concept.as_deref(), "concept")?;
                treasury.exchanges().cancel(id, row.actor, &reason)?;
            }
            ScriptOp::Lend | ScriptOp::ReturnLoan => {
                self.ensure_new(&row.name)?;
                let request = LoanRequest {
                    counterparty: text(&row, row.party.as_deref(), "party")?,
                    currency: currency(&row, row.currency.as_deref(), "currency")?,
                    amount: amount(&row, row.amount, "amount")?,
                    concept: row.concept.clone().unwrap_or_default(),
                };
                let (loan, _) = if row.op == ScriptOp::Lend {
                    treasury.loans().lend(request, row.actor)?
                } else {
                    treasury.loans().record_return(request, row.actor)?
                };
                self.names.insert(row.name, loan.reference());
            }
            ScriptOp::CancelLoan => {
                let id = self.lookup(&row.name, OperationType::Loan)?;
                let reason = text(&row, row.concept.as_deref(), "concept")?;
                treasury.loans().cancel(id, row.actor, &reason)?;
            }
        }
        Ok(())
    }

    fn ensure_new(&self, name: &str) -> Result<(), ScriptError> {
        if self.names.contains_key(name) {
            Err(ScriptError::DuplicateRef(name.to_string()))
        } else {
            Ok(())
        }
    }

    fn lookup(&self, name: &str, kind: OperationType) -> Result<OperationId, ScriptError> {
        match self.names.get(name) {
            Some(reference) if reference.kind == kind => Ok(reference.id),
            _ => Err(ScriptError::UnknownRef {
                name: name.to_string(),
                kind,
            }),
        }
    }
}

fn currency(
    row: &ScriptRow,
    value: Option<&str>,
    field: &'static str,
) -> Result<Currency, ServiceError> {
    let code = value.ok_or(ScriptError::MissingField { op: row.op, field })?;
    Ok(code.parse::<Currency>().map_err(LedgerError::from)?)
}

fn amount(
    row: &ScriptRow,
    value: Option<Decimal>,
    field: &'static str,
) -> Result<Decimal, ScriptError> {
    value.ok_or(ScriptError::MissingField { op: row.op, field })
}

fn text(row: &ScriptRow, value: Option<&str>, field: &'static str) -> Result<String, ScriptError> {
    value
        .map(str::to_string)
        .ok_or(ScriptError::MissingField { op: row.op, field })
}
