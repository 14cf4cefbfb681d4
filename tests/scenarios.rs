use std::{sync::Barrier, thread, time::Duration};

use caja_mayor::{
    Currency, ErrorKind, LedgerError, OperationType, Treasury,
    config::TreasuryConfig,
    operation::{
        ExchangeRequest, ExchangeState, LoanRequest, VoucherRequest, VoucherState,
        WithdrawalRequest,
    },
    query::{MovementFilter, SortOrder},
    store::{MovementStore, in_memory_store::InMemoryMovementStore},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Opening cash handed over by the vault, booked as a loan return.
fn seed(treasury: &Treasury, currency: Currency, amount: Decimal) {
    treasury
        .loans()
        .record_return(
            LoanRequest {
                counterparty: "Vault".to_string(),
                currency,
                amount,
                concept: "Opening balance".to_string(),
            },
            1,
        )
        .unwrap();
}

fn signed_sum(treasury: &Treasury, currency: Currency) -> Decimal {
    treasury
        .movements()
        .unwrap()
        .iter()
        .filter(|movement| movement.currency() == currency)
        .map(|movement| movement.signed_amount())
        .sum()
}

#[test]
fn voucher_issue_and_cancel() {
    let treasury = Treasury::open(TreasuryConfig::default());
    let vouchers = treasury.vouchers();

    let (voucher, _) = vouchers
        .issue(
            VoucherRequest {
                currency: Currency::Guarani,
                amount: dec!(1000),
                beneficiary: "Ana".to_string(),
                concept: String::new(),
            },
            1,
        )
        .unwrap();
    // negative treasury balances are allowed
    assert_eq!(treasury.balance(Currency::Guarani).unwrap(), dec!(-1000));

    vouchers.cancel(voucher.id, 1, "issued by mistake").unwrap();
    assert_eq!(treasury.balance(Currency::Guarani).unwrap(), dec!(0));
    assert_eq!(vouchers.get(voucher.id).unwrap().state, VoucherState::Cancelled);

    let err = vouchers.cancel(voucher.id, 1, "issued by mistake").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    assert_eq!(treasury.movements().unwrap().len(), 2);
}

#[test]
fn exchange_and_cancel_restore_balances() {
    let treasury = Treasury::open(TreasuryConfig::default());
    seed(&treasury, Currency::Dollar, dec!(500));
    seed(&treasury, Currency::Guarani, dec!(2000000));

    let (exchange, _) = treasury
        .exchanges()
        .exchange(
            ExchangeRequest {
                from: Currency::Dollar,
                amount: dec!(100),
                to: Currency::Guarani,
                rate: dec!(7000),
            },
            2,
        )
        .unwrap();
    assert_eq!(treasury.balance(Currency::Dollar).unwrap(), dec!(400));
    assert_eq!(treasury.balance(Currency::Guarani).unwrap(), dec!(2700000));

    let result = treasury.exchanges().cancel(exchange.id, 2, "wrong rate").unwrap();
    assert_eq!(result.compensations.len(), 2);
    assert_eq!(treasury.balance(Currency::Dollar).unwrap(), dec!(500));
    assert_eq!(treasury.balance(Currency::Guarani).unwrap(), dec!(2000000));
    assert_eq!(
        treasury.exchanges().get(exchange.id).unwrap().state,
        ExchangeState::Cancelled
    );
}

#[test]
fn exchange_reversal_is_all_or_nothing() {
    // a short lock timeout makes the reversal fail while one leg's chain is busy
    let treasury = Treasury::with_store(
        InMemoryMovementStore::new(Duration::from_millis(30)),
        TreasuryConfig::default(),
    );
    let (exchange, _) = treasury
        .exchanges()
        .exchange(
            ExchangeRequest {
                from: Currency::Real,
                amount: dec!(40),
                to: Currency::Dollar,
                rate: dec!(0.18),
            },
            2,
        )
        .unwrap();

    let busy = treasury.store().begin(&[Currency::Dollar]).unwrap();
    let err = treasury.exchanges().cancel(exchange.id, 2, "typo").unwrap_err();
    assert!(matches!(err, LedgerError::Storage(_)));
    drop(busy);

    // neither leg was offset
    assert_eq!(treasury.movements().unwrap().len(), 2);
    assert_eq!(treasury.balance(Currency::Real).unwrap(), dec!(-40));
    assert_eq!(treasury.balance(Currency::Dollar).unwrap(), dec!(7.20));

    // once the chain is free the reversal goes through with both legs
    let result = treasury.exchanges().cancel(exchange.id, 2, "typo").unwrap();
    assert_eq!(result.compensations.len(), 2);
    assert_eq!(treasury.balance(Currency::Real).unwrap(), dec!(0));
    assert_eq!(treasury.balance(Currency::Dollar).unwrap(), dec!(0));
}

#[test]
fn concurrent_withdrawal_receptions() {
    let treasury = Treasury::open(TreasuryConfig::default());
    let withdrawals: Vec<_> = ["Branch 1", "Branch 2"]
        .into_iter()
        .map(|branch| {
            treasury
                .withdrawals()
                .register(
                    WithdrawalRequest {
                        branch: branch.to_string(),
                        currency: Currency::Guarani,
                        amount: dec!(50000),
                    },
                    1,
                )
                .unwrap()
        })
        .collect();

    let barrier = Barrier::new(withdrawals.len());
    thread::scope(|scope| {
        for withdrawal in &withdrawals {
            let treasury = &treasury;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                treasury.withdrawals().receive(withdrawal.id, 1).unwrap();
            });
        }
    });

    assert_eq!(treasury.balance(Currency::Guarani).unwrap(), dec!(100000));
    assert!(treasury.audit_chain(Currency::Guarani).unwrap().is_empty());
}

#[test]
fn many_writers_keep_every_chain_consistent() {
    let treasury = Treasury::open(TreasuryConfig::default());
    thread::scope(|scope| {
        for worker in 0..8u32 {
            let treasury = &treasury;
            scope.spawn(move || {
                for round in 0..25u32 {
                    let currency = Currency::ALL[((worker + round) % 3) as usize];
                    let (voucher, _) = treasury
                        .vouchers()
                        .issue(
                            VoucherRequest {
                                currency,
                                amount: Decimal::from(round + 1),
                                beneficiary: format!("worker {worker}"),
                                concept: String::new(),
                            },
                            worker,
                        )
                        .unwrap();
                    if round % 2 == 0 {
                        treasury.vouchers().cancel(voucher.id, worker, "test").unwrap();
                    }
                    treasury
                        .exchanges()
                        .exchange(
                            ExchangeRequest {
                                from: currency,
                                amount: dec!(3),
                                to: Currency::ALL[((worker + round + 1) % 3) as usize],
                                rate: dec!(2),
                            },
                            worker,
                        )
                        .unwrap();
                }
            });
        }
    });

    for currency in Currency::ALL {
        assert!(treasury.audit_chain(currency).unwrap().is_empty());
        assert_eq!(
            treasury.balance(currency).unwrap(),
            signed_sum(&treasury, currency)
        );
    }
}

#[test]
fn concurrent_cancellations_offset_once() {
    let treasury = Treasury::open(TreasuryConfig::default());
    let (loan, _) = treasury
        .loans()
        .lend(
            LoanRequest {
                counterparty: "Branch 7".to_string(),
                currency: Currency::Dollar,
                amount: dec!(75),
                concept: String::new(),
            },
            1,
        )
        .unwrap();

    let shared = &treasury;
    let outcomes: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(move || shared.loans().cancel(loan.id, 1, "duplicate")))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .all(|err| err.kind() == ErrorKind::StateConflict)
    );
    assert_eq!(treasury.balance(Currency::Dollar).unwrap(), dec!(0));
    assert_eq!(treasury.movements().unwrap().len(), 2);
}

#[test]
fn listing_and_distinct_types() {
    let treasury = Treasury::open(TreasuryConfig::default());
    seed(&treasury, Currency::Dollar, dec!(1000));
    treasury
        .loans()
        .lend(
            LoanRequest {
                counterparty: "Branch 3".to_string(),
                currency: Currency::Dollar,
                amount: dec!(10),
                concept: "petty cash".to_string(),
            },
            1,
        )
        .unwrap();
    treasury
        .vouchers()
        .issue(
            VoucherRequest {
                currency: Currency::Real,
                amount: dec!(5),
                beneficiary: "Rosa".to_string(),
                concept: String::new(),
            },
            1,
        )
        .unwrap();

    let page = treasury
        .list_movements(
            &MovementFilter {
                concept_contains: Some("PETTY".to_string()),
                ..Default::default()
            },
            1,
            10,
            SortOrder::NewestFirst,
        )
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].concept(), "Loan #2 with Branch 3: petty cash");

    let page = treasury
        .list_movements(
            &MovementFilter {
                currency: Some(Currency::Dollar),
                ..Default::default()
            },
            1,
            1,
            SortOrder::OldestFirst,
        )
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(
        page.items[0].concept(),
        "Loan return #1 with Vault: Opening balance"
    );

    let types: Vec<_> = treasury.operation_types().unwrap().into_iter().collect();
    assert_eq!(types, vec![OperationType::Voucher, OperationType::Loan]);
}

#[test]
fn closed_treasury_still_answers_queries() {
    let treasury = Treasury::open(TreasuryConfig::default());
    seed(&treasury, Currency::Real, dec!(12));
    treasury.close();

    let err = treasury
        .vouchers()
        .issue(
            VoucherRequest {
                currency: Currency::Real,
                amount: dec!(1),
                beneficiary: "Rosa".to_string(),
                concept: String::new(),
            },
            1,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    assert_eq!(treasury.balance(Currency::Real).unwrap(), dec!(12));
    assert_eq!(treasury.operations().unwrap().len(), 1);
}
