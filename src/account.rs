use crate::entry::Entry;
use crate::error::LedgerError;
use crate::event::Attrs;
use indexmap::IndexMap;
use std::collections::HashMap;

/// A declared account. Paths are hierarchical, `/`-separated, and always
/// start with `/`. A path ending in `/` never names a concrete account;
/// it selects the aggregate of every account under that prefix.
#[derive(Clone, Debug, PartialEq)]
pub struct Account {
    pub path: String,
    pub number: Option<String>,
    pub meta: Attrs,
}

/// Resolved form of a path-or-aggregate query against declared accounts.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    path: String,
    aggregate: bool,
}

impl Selector {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_aggregate(&self) -> bool {
        self.aggregate
    }

    pub fn matches_account(&self, account_path: &str) -> bool {
        if self.aggregate {
            account_path.starts_with(&self.path)
        } else {
            account_path == self.path
        }
    }

    pub fn matches_entry(&self, entry: &Entry) -> bool {
        entry.assignment.keys().any(|path| self.matches_account(path))
    }

    /// Breakdown key for periodic stats: the immediate child segment for
    /// an aggregate, the account path itself otherwise.
    pub fn child_key(&self, account_path: &str) -> String {
        if !self.aggregate {
            return account_path.to_string();
        }
        let relative = &account_path[self.path.len()..];
        match relative.split('/').next() {
            Some(segment) if !segment.is_empty() => segment.to_string(),
            _ => account_path.to_string(),
        }
    }
}

/// One line of the hierarchical account listing. Aggregate ancestors are
/// synthesized between concrete accounts sharing a path prefix;
/// `common_path`/`relative_path` carry the indentation split for display.
#[derive(Clone, Debug, PartialEq)]
pub struct AccountNode {
    pub path: String,
    pub common_path: String,
    pub relative_path: String,
    pub is_aggregate: bool,
    pub number: Option<String>,
    pub meta: Attrs,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccountStore {
    accounts: IndexMap<String, Account>,
    numbers: HashMap<String, String>,
}

impl AccountStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Register a declared account. Duplicate paths and duplicate numbers
    /// corrupt the whole ledger and are fatal.
    pub fn declare(&mut self, account: Account) -> Result<(), LedgerError> {
        if self.accounts.contains_key(&account.path) {
            return Err(LedgerError::DuplicateAccount(account.path));
        }
        if let Some(number) = &account.number {
            if self.numbers.contains_key(number) {
                return Err(LedgerError::DuplicateNumber(number.clone()));
            }
            self.numbers.insert(number.clone(), account.path.clone());
        }
        self.accounts.insert(account.path.clone(), account);
        Ok(())
    }

    /// Lazily declare a well-known account (the suspense account).
    pub fn ensure(&mut self, path: &str) {
        if !self.accounts.contains_key(path) {
            self.accounts.insert(
                path.to_string(),
                Account {
                    path: path.to_string(),
                    number: None,
                    meta: Attrs::new(),
                },
            );
        }
    }

    pub fn get(&self, path: &str) -> Option<&Account> {
        self.accounts.get(path)
    }

    pub fn is_valid(&self, path: &str, must_be_concrete: bool) -> bool {
        if path.ends_with('/') {
            if must_be_concrete {
                return false;
            }
            return self.accounts.keys().any(|k| k.starts_with(path));
        }
        self.accounts.contains_key(path)
    }

    /// Resolve a concrete path (exact, must be declared) or an aggregate
    /// (`…/` suffix, must match at least one declared account).
    pub fn resolve(&self, path: &str) -> Result<Selector, LedgerError> {
        if path.ends_with('/') {
            if !self.accounts.keys().any(|k| k.starts_with(path)) {
                return Err(LedgerError::EmptyAggregate(path.to_string()));
            }
            Ok(Selector {
                path: path.to_string(),
                aggregate: true,
            })
        } else {
            if !self.accounts.contains_key(path) {
                return Err(LedgerError::UnknownAccount(path.to_string()));
            }
            Ok(Selector {
                path: path.to_string(),
                aggregate: false,
            })
        }
    }

    /// Declaration-ordered listing. With `with_aggregate`, synthesized
    /// aggregate ancestors are interleaved once per shared prefix.
    pub fn listing(&self, with_aggregate: bool) -> Vec<AccountNode> {
        let mut nodes = Vec::new();
        let mut last: Vec<String> = Vec::new();

        for (path, account) in &self.accounts {
            let segments: Vec<&str> = path.split('/').collect();

            if with_aggregate {
                let mut common = 0;
                while common < segments.len()
                    && common < last.len()
                    && segments[common] == last[common]
                {
                    common += 1;
                }
                for i in (common + 1)..segments.len() {
                    nodes.push(AccountNode {
                        path: format!("{}/", segments[..i].join("/")),
                        common_path: if i > 1 {
                            format!("{}/", segments[..i - 1].join("/"))
                        } else {
                            String::new()
                        },
                        relative_path: format!("{}/", segments[i - 1]),
                        is_aggregate: true,
                        number: None,
                        meta: Attrs::new(),
                    });
                }
            }

            nodes.push(AccountNode {
                path: path.clone(),
                common_path: format!("{}/", segments[..segments.len() - 1].join("/")),
                relative_path: segments[segments.len() - 1].to_string(),
                is_aggregate: false,
                number: account.number.clone(),
                meta: account.meta.clone(),
            });

            last = segments.iter().map(|s| s.to_string()).collect();
        }

        nodes
    }
}

#[cfg(test)]
mod tests {
    use crate::account::{Account, AccountStore};
    use crate::event::Attrs;
    use anyhow::Result;

    fn declare(store: &mut AccountStore, path: &str, number: Option<&str>) -> Result<()> {
        store.declare(Account {
            path: path.to_string(),
            number: number.map(|n| n.to_string()),
            meta: Attrs::new(),
        })?;
        Ok(())
    }

    #[test]
    fn test_duplicate_path_is_fatal() -> Result<()> {
        let mut store = AccountStore::new();
        declare(&mut store, "/bank/checking", None)?;
        let err = store
            .declare(Account {
                path: "/bank/checking".to_string(),
                number: None,
                meta: Attrs::new(),
            })
            .unwrap_err();
        assert_eq!(
            format!("{}", err),
            "account declared multiple times: /bank/checking"
        );
        Ok(())
    }

    #[test]
    fn test_duplicate_number_is_fatal() -> Result<()> {
        let mut store = AccountStore::new();
        declare(&mut store, "/bank/checking", Some("512"))?;
        let err = store
            .declare(Account {
                path: "/bank/savings".to_string(),
                number: Some("512".to_string()),
                meta: Attrs::new(),
            })
            .unwrap_err();
        assert_eq!(format!("{}", err), "duplicate account number: 512");
        Ok(())
    }

    #[test]
    fn test_resolve_concrete_and_aggregate() -> Result<()> {
        let mut store = AccountStore::new();
        declare(&mut store, "/bank/checking", None)?;
        declare(&mut store, "/bank/savings", None)?;

        let concrete = store.resolve("/bank/checking")?;
        assert!(!concrete.is_aggregate());
        assert!(concrete.matches_account("/bank/checking"));
        assert!(!concrete.matches_account("/bank/savings"));

        let aggregate = store.resolve("/bank/")?;
        assert!(aggregate.is_aggregate());
        assert!(aggregate.matches_account("/bank/checking"));
        assert!(aggregate.matches_account("/bank/savings"));
        assert!(!aggregate.matches_account("/cash"));

        assert_eq!(
            format!("{}", store.resolve("/cash").unwrap_err()),
            "account does not exist: /cash"
        );
        assert_eq!(
            format!("{}", store.resolve("/nothing/").unwrap_err()),
            "aggregate account does not match any declared account: /nothing/"
        );
        Ok(())
    }

    #[test]
    fn test_is_valid() -> Result<()> {
        let mut store = AccountStore::new();
        declare(&mut store, "/bank/checking", None)?;
        assert!(store.is_valid("/bank/checking", true));
        assert!(store.is_valid("/bank/", false));
        assert!(!store.is_valid("/bank/", true));
        assert!(!store.is_valid("/cash", false));
        Ok(())
    }

    #[test]
    fn test_listing_interleaves_aggregates_once() -> Result<()> {
        let mut store = AccountStore::new();
        declare(&mut store, "/bank/checking", None)?;
        declare(&mut store, "/bank/savings", None)?;
        declare(&mut store, "/cash", None)?;

        let paths: Vec<String> = store
            .listing(true)
            .into_iter()
            .map(|node| node.path)
            .collect();
        assert_eq!(
            paths,
            vec!["/", "/bank/", "/bank/checking", "/bank/savings", "/cash"]
        );

        let concrete_only: Vec<String> = store
            .listing(false)
            .into_iter()
            .map(|node| node.path)
            .collect();
        assert_eq!(
            concrete_only,
            vec!["/bank/checking", "/bank/savings", "/cash"]
        );
        Ok(())
    }

    #[test]
    fn test_listing_split_paths() -> Result<()> {
        let mut store = AccountStore::new();
        declare(&mut store, "/bank/checking", None)?;

        let nodes = store.listing(true);
        let concrete = nodes.last().unwrap();
        assert_eq!(concrete.common_path, "/bank/");
        assert_eq!(concrete.relative_path, "checking");

        let bank = &nodes[1];
        assert!(bank.is_aggregate);
        assert_eq!(bank.common_path, "/");
        assert_eq!(bank.relative_path, "bank/");
        Ok(())
    }

    #[test]
    fn test_selector_child_key() -> Result<()> {
        let mut store = AccountStore::new();
        declare(&mut store, "/bank/checking/fees", None)?;
        let aggregate = store.resolve("/bank/")?;
        assert_eq!(aggregate.child_key("/bank/checking/fees"), "checking");

        declare(&mut store, "/cash", None)?;
        let concrete = store.resolve("/cash")?;
        assert_eq!(concrete.child_key("/cash"), "/cash");
        Ok(())
    }
}
