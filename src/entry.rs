use crate::event::Attrs;
use chrono::NaiveDate;
use indexmap::IndexMap;

/// Tolerance under which a posting or a residual counts as zero.
pub const BALANCE_EPSILON: f64 = 0.009;

/// One balanced transaction: a date, a label, and signed postings keyed
/// by account path. Built row by row while the stream is consumed, then
/// frozen by sealing.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub sheet: String,
    pub row: u32,
    pub date: NaiveDate,
    pub label: String,
    pub doc: Option<String>,
    pub assignment: IndexMap<String, f64>,
    /// Original row fields after replacement rules, kept for joins.
    pub source: Attrs,
    /// True when a later row was folded into this entry instead of
    /// creating a new one.
    pub merged: bool,
}

impl Entry {
    pub fn new(sheet: &str, row: u32, date: NaiveDate, label: String, source: Attrs) -> Entry {
        Entry {
            sheet: sheet.to_string(),
            row,
            date,
            label,
            doc: None,
            assignment: IndexMap::new(),
            source,
            merged: false,
        }
    }

    /// Sum of all postings; ~0 for a balanced entry.
    pub fn residual(&self) -> f64 {
        self.assignment.values().sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.residual().abs() <= BALANCE_EPSILON
    }

    pub fn post(&mut self, account: &str, amount: f64) {
        *self.assignment.entry(account.to_string()).or_insert(0.0) += amount;
    }
}

/// An entry as seen from one account (or aggregate): per-entry debit,
/// credit and net value, plus the running balance in sealed order.
#[derive(Clone, Debug, PartialEq)]
pub struct AccountEntry {
    pub entry: Entry,
    pub debit: f64,
    pub credit: f64,
    pub value: f64,
    pub balance: f64,
}

#[cfg(test)]
mod tests {
    use crate::entry::Entry;
    use crate::event::Attrs;
    use chrono::NaiveDate;

    #[test]
    fn test_residual_and_post_accumulation() {
        let date = NaiveDate::from_ymd_opt(2021, 5, 20).unwrap();
        let mut entry = Entry::new("bank", 2, date, "salary".to_string(), Attrs::new());
        entry.post("/bank", 1500.0);
        entry.post("/income", -1400.0);
        entry.post("/bank", -100.0);

        assert_eq!(entry.assignment.get("/bank"), Some(&1400.0));
        assert!((entry.residual() - 0.0).abs() < 1e-9);
        assert!(entry.is_balanced());
    }

    #[test]
    fn test_unbalanced_entry() {
        let date = NaiveDate::from_ymd_opt(2021, 5, 20).unwrap();
        let mut entry = Entry::new("bank", 2, date, "oops".to_string(), Attrs::new());
        entry.post("/bank", 10.0);
        assert!(!entry.is_balanced());
        assert!((entry.residual() - 10.0).abs() < 1e-9);
    }
}
