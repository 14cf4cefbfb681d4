use std::io::Read;

use csv::{DeserializeRecordsIntoIter, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::movement::ActorId;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptOp {
    IssueVoucher,
    CollectVoucher,
    VoidVoucher,
    CancelVoucher,
    RegisterWithdrawal,
    ReceiveWithdrawal,
    RejectWithdrawal,
    ReturnWithdrawal,
    Exchange,
    CancelExchange,
    Lend,
    ReturnLoan,
    CancelLoan,
}

/// One line of an operations script.
///
/// `name` labels the operation a creating line produces, so later lines can
/// act on it.
#[derive(Debug, Deserialize)]
pub struct ScriptRow {
    pub op: ScriptOp,
    #[serde(rename = "ref")]
    pub name: String,
    pub currency: Option<String>,
    pub amount: Option<Decimal>,
    pub to_currency: Option<String>,
    pub rate: Option<Decimal>,
    pub party: Option<String>,
    pub concept: Option<String>,
    pub actor: ActorId,
}

/// Parses an operations script in CSV format, yielding each row with its line.
pub struct CsvScriptParser<R> {
    iter: DeserializeRecordsIntoIter<R, ScriptRow>,
}

impl<R> CsvScriptParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvScriptParser<R>
where
    R: Read,
{
    type Item = (u64, Result<ScriptRow, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parses_rows_with_empty_fields() {
        let script = "\
op,ref,currency,amount,to_currency,rate,party,concept,actor
issue_voucher, v1, PYG, 1000, , , Ana, advance, 3
exchange, x1, USD, 100, PYG, 7000, , , 2
";
        let rows: Vec<_> = CsvScriptParser::new(script.as_bytes())
            .map(|(_, row)| row.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].op, ScriptOp::IssueVoucher);
        assert_eq!(rows[0].name, "v1");
        assert_eq!(rows[0].amount, Some(dec!(1000)));
        assert_eq!(rows[0].to_currency, None);
        assert_eq!(rows[1].rate, Some(dec!(7000)));
        assert_eq!(rows[1].party, None);
        assert_eq!(rows[1].actor, 2);
    }

    #[test]
    fn malformed_row_is_reported_not_panicked() {
        let script = "\
op,ref,currency,amount,to_currency,rate,party,concept,actor
explode, v1, PYG, 1000, , , Ana, advance, 3
";
        let mut parser = CsvScriptParser::new(script.as_bytes());
        let (_, row) = parser.next().unwrap();
        assert!(row.is_err());
        assert!(parser.next().is_none());
    }
}
