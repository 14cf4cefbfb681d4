use std::collections::{HashMap, HashSet};

use caja_mayor::{
    Currency, Movement, OperationRef, Treasury,
    config::TreasuryConfig,
    operation::{ExchangeRequest, LoanRequest, VoucherRequest, WithdrawalRequest},
};
use proptest::prelude::*;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
enum Step {
    Voucher { currency: usize, cents: i64 },
    Withdrawal { currency: usize, cents: i64 },
    Exchange { from: usize, to: usize, cents: i64, rate: i64 },
    Loan { currency: usize, cents: i64, returned: bool },
    /// Cancels the n-th operation created so far, if any.
    Cancel { index: usize },
}

fn step() -> impl Strategy<Value = Step> {
    let currency = 0..3usize;
    let cents = 1..5_000_000i64;
    prop_oneof![
        (currency.clone(), cents.clone())
            .prop_map(|(currency, cents)| Step::Voucher { currency, cents }),
        (currency.clone(), cents.clone())
            .prop_map(|(currency, cents)| Step::Withdrawal { currency, cents }),
        (currency.clone(), currency.clone(), cents.clone(), 1..100_000i64)
            .prop_map(|(from, to, cents, rate)| Step::Exchange { from, to, cents, rate }),
        (currency, cents, any::<bool>()).prop_map(|(currency, cents, returned)| Step::Loan {
            currency,
            cents,
            returned
        }),
        (0..16usize).prop_map(|index| Step::Cancel { index }),
    ]
}

fn money(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Applies `steps`, returning the operations that were cancelled.
fn replay(treasury: &Treasury, steps: Vec<Step>) -> HashSet<OperationRef> {
    let mut created: Vec<OperationRef> = Vec::new();
    let mut cancelled = HashSet::new();
    for step in steps {
        match step {
            Step::Voucher { currency, cents } => {
                let (voucher, _) = treasury
                    .vouchers()
                    .issue(
                        VoucherRequest {
                            currency: Currency::ALL[currency],
                            amount: money(cents),
                            beneficiary: "Prop".to_string(),
                            concept: String::new(),
                        },
                        1,
                    )
                    .unwrap();
                created.push(voucher.reference());
            }
            Step::Withdrawal { currency, cents } => {
                let withdrawal = treasury
                    .withdrawals()
                    .register(
                        WithdrawalRequest {
                            branch: "Branch 9".to_string(),
                            currency: Currency::ALL[currency],
                            amount: money(cents),
                        },
                        1,
                    )
                    .unwrap();
                treasury.withdrawals().receive(withdrawal.id, 1).unwrap();
                created.push(withdrawal.reference());
            }
            Step::Exchange { from, to, cents, rate } => {
                let request = ExchangeRequest {
                    from: Currency::ALL[from],
                    amount: money(cents),
                    to: Currency::ALL[to],
                    rate: Decimal::new(rate, 3),
                };
                let outcome = treasury.exchanges().exchange(request.clone(), 1);
                match request.converted() {
                    Ok(_) => created.push(outcome.unwrap().0.reference()),
                    Err(_) => assert!(outcome.is_err()),
                }
            }
            Step::Loan { currency, cents, returned } => {
                let request = LoanRequest {
                    counterparty: "Branch 4".to_string(),
                    currency: Currency::ALL[currency],
                    amount: money(cents),
                    concept: String::new(),
                };
                let (loan, _) = if returned {
                    treasury.loans().record_return(request, 1).unwrap()
                } else {
                    treasury.loans().lend(request, 1).unwrap()
                };
                created.push(loan.reference());
            }
            Step::Cancel { index } => {
                let Some(&reference) = created.get(index) else {
                    continue;
                };
                let outcome = treasury.reverse(reference, 1, "property check");
                // only the first reversal of an operation goes through
                assert_eq!(outcome.is_ok(), cancelled.insert(reference));
            }
        }
    }
    cancelled
}

fn net_by_operation(movements: &[Movement]) -> HashMap<OperationRef, Decimal> {
    let mut net = HashMap::new();
    for movement in movements {
        *net.entry(movement.operation()).or_insert(Decimal::ZERO) += movement.signed_amount();
    }
    net
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    #[test]
    fn chains_stay_consistent(steps in prop::collection::vec(step(), 1..40)) {
        let treasury = Treasury::open(TreasuryConfig::default());
        let cancelled = replay(&treasury, steps);
        let movements = treasury.movements().unwrap();

        for currency in Currency::ALL {
            prop_assert!(treasury.audit_chain(currency).unwrap().is_empty());
            let sum: Decimal = movements
                .iter()
                .filter(|movement| movement.currency() == currency)
                .map(Movement::signed_amount)
                .sum();
            prop_assert_eq!(treasury.balance(currency).unwrap(), sum);
        }

        // ids are unique and increasing
        prop_assert!(movements.windows(2).all(|pair| pair[0].id() < pair[1].id()));

        // every movement is offset at most once
        let mut offset = HashSet::new();
        for movement in &movements {
            if let Some(original) = movement.reverses() {
                prop_assert!(offset.insert(original));
            }
        }

        // a cancelled operation nets to zero in every currency
        let net = net_by_operation(&movements);
        for reference in cancelled {
            prop_assert_eq!(net.get(&reference).copied().unwrap_or_default(), Decimal::ZERO);
        }
    }
}
