use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// A selection of marker ids, written as `"[a,b]"` (inclusive range),
/// `"{a,b,c}"` (explicit list), a single number, or `"*"` for all ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum IdSet {
    #[default]
    All,
    Range(u32, u32),
    List(Vec<u32>),
}

impl IdSet {
    pub fn contains(&self, id: u32) -> bool {
        match self {
            IdSet::All => true,
            IdSet::Range(lo, hi) => (*lo..=*hi).contains(&id),
            IdSet::List(ids) => ids.contains(&id),
        }
    }
}

impl FromStr for IdSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError::IdSet(s.to_string());
        let t = s.trim();
        if t == "*" {
            return Ok(IdSet::All);
        }
        let parse_list = |body: &str| -> Result<Vec<u32>, ConfigError> {
            body.split(',')
                .map(|v| v.trim().parse::<u32>().map_err(|_| bad()))
                .collect()
        };

        if let Some(body) = t.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
            let bounds = parse_list(body)?;
            match bounds[..] {
                [lo, hi] if lo <= hi => Ok(IdSet::Range(lo, hi)),
                _ => Err(bad()),
            }
        } else if let Some(body) = t.strip_prefix('{').and_then(|b| b.strip_suffix('}')) {
            let mut ids = parse_list(body)?;
            ids.sort_unstable();
            ids.dedup();
            Ok(IdSet::List(ids))
        } else {
            t.parse::<u32>().map(|id| IdSet::List(vec![id])).map_err(|_| bad())
        }
    }
}

impl TryFrom<String> for IdSet {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for IdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSet::All => write!(f, "*"),
            IdSet::Range(lo, hi) => write!(f, "[{lo},{hi}]"),
            IdSet::List(ids) => {
                let parts: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range() {
        let set: IdSet = "[10, 20]".parse().unwrap();
        assert_eq!(set, IdSet::Range(10, 20));
        assert!(set.contains(10) && set.contains(20));
        assert!(!set.contains(21));
    }

    #[test]
    fn parses_list_sorted_and_deduplicated() {
        let set: IdSet = "{5,1,5,3}".parse().unwrap();
        assert_eq!(set, IdSet::List(vec![1, 3, 5]));
        assert!(!set.contains(2));
        assert_eq!(set.to_string(), "{1,3,5}");
    }

    #[test]
    fn parses_single_and_wildcard() {
        assert_eq!("7".parse::<IdSet>().unwrap(), IdSet::List(vec![7]));
        assert_eq!("*".parse::<IdSet>().unwrap(), IdSet::All);
    }

    #[test]
    fn rejects_malformed() {
        for s in ["[3]", "[5,2]", "{a,b}", "", "[1,2"] {
            assert!(s.parse::<IdSet>().is_err(), "accepted {s:?}");
        }
    }
}
