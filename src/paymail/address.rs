//! Paymail address parsing

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sanitised `alias@domain`, lowercased and trimmed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymailAddress {
    pub alias: String,
    pub domain: String,
}

impl PaymailAddress {
    pub fn new(alias: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            domain: domain.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, String> {
        let sanitized = input.trim().to_lowercase();
        let (alias, domain) = sanitized
            .split_once('@')
            .ok_or_else(|| format!("paymail {input} is missing '@'"))?;

        if alias.is_empty() || !alias.chars().all(is_alias_char) {
            return Err(format!("paymail {input} has an invalid alias"));
        }
        if !is_valid_domain(domain) {
            return Err(format!("paymail {input} has an invalid domain"));
        }

        Ok(Self::new(alias, domain))
    }

    pub fn address(&self) -> String {
        format!("{}@{}", self.alias, self.domain)
    }
}

fn is_alias_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ".!#$%&'*+/=?^_`{|}~-".contains(c)
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

impl fmt::Display for PaymailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.alias, self.domain)
    }
}

impl FromStr for PaymailAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
