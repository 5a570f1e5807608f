use crate::account::{Account, AccountNode, AccountStore, Selector};
use crate::capture::Capture;
use crate::entry::{AccountEntry, Entry, BALANCE_EPSILON};
use crate::error::LedgerError;
use crate::event::{Attrs, Event};
use crate::processor::Processor;
use crate::sheet::{Prefix, Sheet};
use crate::template::{parse_date, parse_number, MatchRule, Template};
use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};

/// Reserved account absorbing the residual of entries that do not sum to
/// zero at seal time. Lazily declared, scoped to one builder instance.
pub const SUSPENSE_ACCOUNT: &str = "/suspense";

/// Totals for one account or aggregate, no time breakdown.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccountStats {
    pub debit: f64,
    pub credit: f64,
    pub balance: f64,
    pub entries: u32,
}

/// One calendar month of an account's activity, broken down by immediate
/// child sub-account. Balances are cumulative, carried forward through
/// months without activity.
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodBucket {
    pub year: i32,
    pub month: u32,
    pub flows: BTreeMap<String, f64>,
    pub balances: BTreeMap<String, f64>,
    pub flow: f64,
    pub balance: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeriodicStats {
    pub periods: Vec<PeriodBucket>,
    pub ever_positive: Vec<String>,
    pub ever_negative: Vec<String>,
}

/// The ledger-building processor: interprets `accounting:` commands into
/// accounts, sheets and balanced entries, then answers queries over the
/// sealed state.
#[derive(Debug)]
pub struct Accounting {
    accounts: AccountStore,
    sheets: IndexMap<String, Sheet>,
    entries: Vec<Entry>,
    sealed: bool,
    today: NaiveDate,
    warn_unhandled: bool,
    pending: Vec<Event>,
}

impl Default for Accounting {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Accounting {
    fn family_prefix(&self) -> &'static str {
        "accounting:"
    }

    fn warn_unhandled(&self) -> bool {
        self.warn_unhandled
    }

    fn handle(&mut self, tag: &str, attrs: &Attrs, capture: &mut Capture<'_>) -> Result<bool> {
        match tag {
            "account" => self.command_account(attrs, capture)?,
            "sheet_meta" => self.command_sheet_meta(attrs, capture)?,
            "sheet_replace" => self.command_sheet_replace(attrs, capture)?,
            "sheet_row" => self.command_sheet_row(attrs, capture)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

impl Accounting {
    pub fn new() -> Accounting {
        Self::with_today(chrono::Local::now().date_naive())
    }

    /// Builder with an explicit "today", used by `TODAY` comparisons and
    /// future-date rejection. Tests pin it for determinism.
    pub fn with_today(today: NaiveDate) -> Accounting {
        Accounting {
            accounts: AccountStore::new(),
            sheets: IndexMap::new(),
            entries: Vec::new(),
            sealed: false,
            today,
            warn_unhandled: false,
            pending: Vec::new(),
        }
    }

    pub fn set_warn_unhandled(&mut self, warn: bool) {
        self.warn_unhandled = warn;
    }

    ////////////////////////////////////////////////////////////////////
    // Commands

    fn command_account(&mut self, attrs: &Attrs, capture: &mut Capture<'_>) -> Result<()> {
        capture.discard_level()?;

        let mut meta = attrs.clone();
        let Some(path) = meta.shift_remove("path") else {
            capture.warn("accounting: account declared without a path")?;
            return Ok(());
        };
        if !path.starts_with('/') {
            capture.warn(format!(
                "Invalid account name (not starting with a '/'): {}",
                path
            ))?;
            return Ok(());
        }
        let number = meta.shift_remove("number");
        self.accounts.declare(Account { path, number, meta })?;
        Ok(())
    }

    fn command_sheet_meta(&mut self, attrs: &Attrs, capture: &mut Capture<'_>) -> Result<()> {
        capture.discard_level()?;

        let Some(name) = attrs.get("sheet") else {
            capture.warn("accounting: sheet_meta without a 'sheet' attribute")?;
            return Ok(());
        };
        let sheet = self
            .sheets
            .entry(name.clone())
            .or_insert_with(|| Sheet::new(name));
        sheet.merge_meta(attrs)?;
        Ok(())
    }

    fn command_sheet_replace(&mut self, attrs: &Attrs, capture: &mut Capture<'_>) -> Result<()> {
        capture.discard_level()?;

        let Some(name) = attrs.get("sheet") else {
            capture.warn("accounting: sheet_replace without a 'sheet' attribute")?;
            return Ok(());
        };
        let (Some(column), Some(match_expr), Some(target_column), Some(target_value)) = (
            attrs.get("column"),
            attrs.get("match"),
            attrs.get("target_column"),
            attrs.get("target_value"),
        ) else {
            capture.warn(format!(
                "accounting: incomplete sheet_replace for sheet '{}'",
                name
            ))?;
            return Ok(());
        };

        let rule = MatchRule::parse(match_expr)?;
        let template = Template::parse(target_value)?;
        let sheet = self
            .sheets
            .entry(name.clone())
            .or_insert_with(|| Sheet::new(name));
        sheet.add_replacement(column, rule, target_column, template);
        Ok(())
    }

    fn command_sheet_row(&mut self, attrs: &Attrs, capture: &mut Capture<'_>) -> Result<()> {
        capture.discard_level()?;

        let sheet_name = attrs
            .get("sheet")
            .ok_or(LedgerError::MissingAttribute {
                command: "accounting:sheet_row",
                attr: "sheet",
            })?
            .clone();
        let Some(sheet_index) = self.sheets.get_index_of(&sheet_name) else {
            capture.warn(format!("sheet does not exist: {}", sheet_name))?;
            return Ok(());
        };
        let today = self.today;
        let row_no = {
            let sheet = &mut self.sheets[sheet_index];
            sheet.nth_row += 1;
            sheet.nth_row
        };

        let mut row: Attrs = attrs.clone();

        // replacement rules, in registration order
        {
            let sheet = &self.sheets[sheet_index];
            for rule in &sheet.replacements {
                let matched = match row.get(&rule.column) {
                    Some(value) => rule.rule.matches(value, today),
                    None => false,
                };
                if !matched {
                    continue;
                }
                let rendered = rule.target_value.render(&row);
                for issue in &rendered.issues {
                    capture.warn(format!(
                        "accounting: {} in replacement for sheet '{}' on row n°{}",
                        issue, sheet_name, row_no
                    ))?;
                }
                row.insert(rule.target_column.clone(), rendered.text);
            }
        }

        let sheet = &self.sheets[sheet_index];

        // entry date, rejecting the unresolvable and the future
        let date = match &sheet.date {
            Some(template) => {
                let rendered = template.render(&row);
                for issue in &rendered.issues {
                    capture.warn(format!(
                        "accounting: {} for sheet '{}' on row n°{}",
                        issue, sheet_name, row_no
                    ))?;
                }
                parse_date(&rendered.text)
            }
            None => None,
        };
        let Some(date) = date else {
            capture.warn(format!(
                "accounting: date or label not declared for sheet '{}' on row n°{}",
                sheet_name, row_no
            ))?;
            return Ok(());
        };
        if date > today {
            capture.warn(format!(
                "accounting: future-dated row ({}) discarded for sheet '{}' on row n°{}",
                date, sheet_name, row_no
            ))?;
            return Ok(());
        }

        // label and doc
        let label = match &sheet.label {
            Some(template) => {
                let rendered = template.render(&row);
                for issue in &rendered.issues {
                    capture.warn(format!(
                        "accounting: {} for sheet '{}' on row n°{}",
                        issue, sheet_name, row_no
                    ))?;
                }
                rendered.text
            }
            None => String::new(),
        };
        if label.is_empty() {
            capture.warn(format!(
                "accounting: date or label not declared for sheet '{}' on row n°{}",
                sheet_name, row_no
            ))?;
            return Ok(());
        }
        let doc = sheet
            .doc
            .as_ref()
            .map(|template| template.render(&row).text)
            .filter(|text| !text.is_empty());

        // joined sheets fold their postings into an existing entry
        if let Some(join_sheet) = &sheet.join_sheet {
            let Some(matcher) = &sheet.join_target_match else {
                capture.warn(format!(
                    "accounting: join declared without join_target_match for sheet '{}'",
                    sheet_name
                ))?;
                return Ok(());
            };

            let mut target: Option<&mut Entry> = None;
            for entry in self.entries.iter_mut().rev() {
                if entry.sheet != *join_sheet {
                    continue;
                }
                if matcher.render(&entry.source).text == label {
                    target = Some(entry);
                    break;
                }
            }
            let Some(entry) = target else {
                capture.warn(format!(
                    "accounting: no entry of sheet '{}' matches '{}' for sheet '{}' on row n°{}",
                    join_sheet, label, sheet_name, row_no
                ))?;
                return Ok(());
            };

            entry.merged = true;
            let warnings = apply_specs(sheet, &row, entry, &self.accounts, row_no)?;
            for warning in warnings {
                capture.warn(warning)?;
            }
            return Ok(());
        }

        let mut entry = Entry::new(&sheet_name, row_no, date, label, row.clone());
        entry.doc = doc;
        let warnings = apply_specs(sheet, &row, &mut entry, &self.accounts, row_no)?;
        for warning in warnings {
            capture.warn(warning)?;
        }

        if entry.assignment.is_empty() {
            capture.warn(format!(
                "accounting: no account assigned on entry for sheet '{}' on row n°{}",
                sheet_name, row_no
            ))?;
            return Ok(());
        }
        self.entries.push(entry);
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////
    // Sealing

    /// One-time finalization: stable date sort, then suspense correction
    /// of unbalanced entries. First call wins; later calls are no-ops.
    pub fn seal_entries(&mut self) {
        if self.sealed {
            return;
        }
        self.sealed = true;
        tracing::debug!(entries = self.entries.len(), "sealing ledger entries");

        self.entries.sort_by(|a, b| a.date.cmp(&b.date));

        for entry in &mut self.entries {
            let residual = entry.residual();
            if residual.abs() > BALANCE_EPSILON {
                self.accounts.ensure(SUSPENSE_ACCOUNT);
                entry.post(SUSPENSE_ACCOUNT, -residual);
                self.pending.push(Event::warn(format!(
                    "accounting: unbalanced entry ({:+.2}) for sheet '{}' on row n°{}, corrected via {}",
                    residual, entry.sheet, entry.row, SUSPENSE_ACCOUNT
                )));
            }
        }
    }

    /// Diagnostics produced outside a live stream (seal-time warnings).
    pub fn take_messages(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending)
    }

    ////////////////////////////////////////////////////////////////////
    // Queries

    pub fn entries(&mut self) -> &[Entry] {
        self.seal_entries();
        &self.entries
    }

    pub fn sheets(&self) -> Vec<&Sheet> {
        self.sheets.values().collect()
    }

    pub fn accounts(&mut self, with_aggregate: bool) -> Vec<AccountNode> {
        self.seal_entries();
        self.accounts.listing(with_aggregate)
    }

    pub fn account(&mut self, path: &str) -> Result<Selector, LedgerError> {
        self.seal_entries();
        self.accounts.resolve(path)
    }

    pub fn is_account_valid(&self, path: &str, must_be_concrete: bool) -> bool {
        self.accounts.is_valid(path, must_be_concrete)
    }

    /// Entries touching the account (aggregate-aware), annotated with the
    /// account-side debit/credit/net and a running balance in sealed
    /// order.
    pub fn account_entries(&mut self, account: &str) -> Result<Vec<AccountEntry>, LedgerError> {
        self.seal_entries();
        let selector = self.accounts.resolve(account)?;

        let mut balance = 0.0;
        let mut out = Vec::new();
        for entry in &self.entries {
            if !selector.matches_entry(entry) {
                continue;
            }
            let (mut debit, mut credit, mut value) = (0.0, 0.0, 0.0);
            for (path, amount) in &entry.assignment {
                if selector.matches_account(path) {
                    value += amount;
                    if *amount < 0.0 {
                        debit += -amount;
                    } else {
                        credit += amount;
                    }
                }
            }
            balance += value;
            out.push(AccountEntry {
                entry: entry.clone(),
                debit,
                credit,
                value,
                balance,
            });
        }
        Ok(out)
    }

    pub fn account_stats(&mut self, account: &str) -> Result<AccountStats, LedgerError> {
        self.seal_entries();
        let selector = self.accounts.resolve(account)?;

        let mut stats = AccountStats::default();
        for entry in &self.entries {
            if !selector.matches_entry(entry) {
                continue;
            }
            let value: f64 = entry
                .assignment
                .iter()
                .filter(|(path, _)| selector.matches_account(path))
                .map(|(_, amount)| amount)
                .sum();
            if value < 0.0 {
                stats.debit -= value;
            } else {
                stats.credit += value;
            }
            stats.balance += value;
            stats.entries += 1;
        }
        Ok(stats)
    }

    /// One bucket per calendar month between the account's first and last
    /// touching entry, empty months filled in, balances carried forward
    /// per immediate child sub-account.
    pub fn account_periodic_stats(&mut self, account: &str) -> Result<PeriodicStats, LedgerError> {
        self.seal_entries();
        let selector = self.accounts.resolve(account)?;

        let touching: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|entry| selector.matches_entry(entry))
            .collect();
        let (Some(first), Some(last)) = (touching.first(), touching.last()) else {
            return Ok(PeriodicStats::default());
        };

        let (mut year, mut month) = (first.date.year(), first.date.month());
        let (end_year, end_month) = (last.date.year(), last.date.month());

        let mut cumulative: BTreeMap<String, f64> = BTreeMap::new();
        let mut ever_positive: BTreeSet<String> = BTreeSet::new();
        let mut ever_negative: BTreeSet<String> = BTreeSet::new();
        let mut periods = Vec::new();
        let mut idx = 0;

        loop {
            let mut flows: BTreeMap<String, f64> = BTreeMap::new();
            while idx < touching.len()
                && touching[idx].date.year() == year
                && touching[idx].date.month() == month
            {
                for (path, amount) in &touching[idx].assignment {
                    if selector.matches_account(path) {
                        *flows.entry(selector.child_key(path)).or_insert(0.0) += amount;
                    }
                }
                idx += 1;
            }

            for (child, flow) in &flows {
                *cumulative.entry(child.clone()).or_insert(0.0) += flow;
            }
            for (child, balance) in &cumulative {
                if *balance > BALANCE_EPSILON {
                    ever_positive.insert(child.clone());
                }
                if *balance < -BALANCE_EPSILON {
                    ever_negative.insert(child.clone());
                }
            }

            periods.push(PeriodBucket {
                year,
                month,
                flow: flows.values().sum(),
                balance: cumulative.values().sum(),
                flows,
                balances: cumulative.clone(),
            });

            if year == end_year && month == end_month {
                break;
            }
            if month == 12 {
                year += 1;
                month = 1;
            } else {
                month += 1;
            }
        }

        Ok(PeriodicStats {
            periods,
            ever_positive: ever_positive.into_iter().collect(),
            ever_negative: ever_negative.into_iter().collect(),
        })
    }
}

// Posting loop, shared by fresh and joined rows. Spec order matters:
// balance-to-zero and percentage amounts read the postings assigned so
// far, including those already on a join target.
fn apply_specs(
    sheet: &Sheet,
    row: &Attrs,
    entry: &mut Entry,
    accounts: &AccountStore,
    row_no: u32,
) -> Result<Vec<String>, LedgerError> {
    let mut warnings = Vec::new();

    for spec in &sheet.specs {
        let rendered = spec.account.render(row);
        for issue in &rendered.issues {
            warnings.push(format!(
                "accounting: {} for sheet '{}' on row n°{}",
                issue, sheet.name, row_no
            ));
        }
        let account = match spec.prefix {
            Prefix::Star => match row.get(rendered.text.as_str()) {
                Some(path) if !path.is_empty() => path.clone(),
                _ => continue,
            },
            _ => rendered.text,
        };
        if account.is_empty() {
            continue;
        }

        let amount_text = {
            let rendered = spec.amount.render(row);
            for issue in &rendered.issues {
                warnings.push(format!(
                    "accounting: {} for sheet '{}' on row n°{}",
                    issue, sheet.name, row_no
                ));
            }
            let text = rendered.text.trim().to_string();
            match (&spec.if_empty, text.is_empty()) {
                (Some(fallback), true) => fallback.render(row).text.trim().to_string(),
                _ => text,
            }
        };

        let balance_so_far: f64 = entry.assignment.values().sum();
        let mut amount = resolve_amount(&amount_text, balance_so_far, &sheet.name, row_no)?;
        if spec.prefix == Prefix::Minus {
            amount = -amount;
        }
        if amount.abs() < BALANCE_EPSILON {
            continue;
        }

        if !accounts.is_valid(&account, true) {
            warnings.push(format!(
                "accounting: invalid account '{}' for sheet '{}' on row n°{}",
                account, sheet.name, row_no
            ));
        }
        entry.post(&account, amount);
    }

    Ok(warnings)
}

// Empty means balance to zero; `N%` takes a share of the running balance,
// sign-inverted; anything else must be a numeric literal.
fn resolve_amount(
    text: &str,
    balance_so_far: f64,
    sheet: &str,
    row: u32,
) -> Result<f64, LedgerError> {
    if text.is_empty() {
        return Ok(-balance_so_far);
    }
    let invalid = || LedgerError::InvalidAmount {
        sheet: sheet.to_string(),
        row,
        value: text.to_string(),
    };
    if let Some(head) = text.strip_suffix('%') {
        let pct = parse_number(head).ok_or_else(invalid)?;
        return Ok(-balance_so_far * pct / 100.0);
    }
    parse_number(text).ok_or_else(invalid)
}
