use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::{
    ledger::ValidationError,
    movement::{Currency, Direction, Movement, MovementId},
};

/// Inclusive range of calendar days (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.from <= day && day <= self.to
    }
}

#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub currency: Option<Currency>,
    pub date_range: Option<DateRange>,
    /// Case-insensitive substring of the operation type name.
    pub type_contains: Option<String>,
    /// Case-insensitive substring of the concept.
    pub concept_contains: Option<String>,
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl MovementFilter {
    pub fn matches(&self, movement: &Movement) -> bool {
        self.currency
            .is_none_or(|currency| movement.currency() == currency)
            && self
                .date_range
                .is_none_or(|range| range.contains(movement.recorded_at()))
            && self.type_contains.as_deref().is_none_or(|needle| {
                contains_ignore_case(movement.operation().kind.name(), needle)
            })
            && self
                .concept_contains
                .as_deref()
                .is_none_or(|needle| contains_ignore_case(movement.concept(), needle))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovementPage {
    pub items: Vec<Movement>,
    /// Number of movements matching the filter, across all pages.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Filters, sorts and slices `movements` (given in id order) into one page.
///
/// Pages are numbered from 1; a page past the end is empty.
pub fn paginate(
    movements: Vec<Movement>,
    filter: &MovementFilter,
    page: usize,
    page_size: usize,
    max_page_size: usize,
    sort: SortOrder,
) -> Result<MovementPage, ValidationError> {
    if page == 0 {
        return Err(ValidationError::ZeroPage);
    }
    if page_size == 0 || page_size > max_page_size {
        return Err(ValidationError::PageSize {
            requested: page_size,
            max: max_page_size,
        });
    }

    let mut matching: Vec<_> = movements
        .into_iter()
        .filter(|movement| filter.matches(movement))
        .collect();
    if sort == SortOrder::NewestFirst {
        matching.reverse();
    }
    let total = matching.len();
    let items = matching
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    Ok(MovementPage {
        items,
        total,
        page,
        page_size,
    })
}

/// Income and expense totals of one calendar month.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthSummary {
    pub year: i32,
    pub month: u32,
    pub income: BTreeMap<Currency, Decimal>,
    pub expense: BTreeMap<Currency, Decimal>,
}

impl MonthSummary {
    pub fn net(&self, currency: Currency) -> Decimal {
        self.income.get(&currency).copied().unwrap_or_default()
            - self.expense.get(&currency).copied().unwrap_or_default()
    }
}

pub fn summarize_month(
    movements: &[Movement],
    year: i32,
    month: u32,
) -> Result<MonthSummary, ValidationError> {
    if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
        return Err(ValidationError::InvalidMonth { year, month });
    }
    let zeroes = || -> BTreeMap<Currency, Decimal> {
        Currency::ALL
            .into_iter()
            .map(|currency| (currency, Decimal::ZERO))
            .collect()
    };
    let mut summary = MonthSummary {
        year,
        month,
        income: zeroes(),
        expense: zeroes(),
    };

    for movement in movements.iter().filter(|movement| {
        let at = movement.recorded_at();
        at.year() == year && at.month() == month
    }) {
        let totals = match movement.direction() {
            Direction::Income => &mut summary.income,
            Direction::Expense => &mut summary.expense,
        };
        let total = totals.entry(movement.currency()).or_default();
        *total = total
            .checked_add(movement.amount())
            .ok_or(ValidationError::AmountOverflow)?;
    }
    Ok(summary)
}

/// A place where a currency chain violates its invariants.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainBreak {
    /// `balance_before` does not continue the previous movement.
    Link {
        id: MovementId,
        expected: Decimal,
        found: Decimal,
    },
    /// `balance_after` is not `balance_before` moved by the amount.
    Arithmetic { id: MovementId },
    NonPositiveAmount { id: MovementId },
}

/// Checks one currency chain, given in id order, starting from zero.
pub fn audit_chain(movements: &[Movement]) -> Vec<ChainBreak> {
    let mut breaks = Vec::new();
    let mut expected = Decimal::ZERO;
    for movement in movements {
        if movement.balance_before() != expected {
            breaks.push(ChainBreak::Link {
                id: movement.id(),
                expected,
                found: movement.balance_before(),
            });
        }
        if movement.amount() <= Decimal::ZERO {
            breaks.push(ChainBreak::NonPositiveAmount { id: movement.id() });
        }
        if movement
            .direction()
            .apply(movement.balance_before(), movement.amount())
            != Some(movement.balance_after())
        {
            breaks.push(ChainBreak::Arithmetic { id: movement.id() });
        }
        expected = movement.balance_after();
    }
    breaks
}
