//! Decision Tables
//!
//! A decision table maps input values to outputs through ordered rules.
//!
//! ```yaml
//! key: approve_order
//! hit_policy: first
//! rules:
//!   - when: { category: books }
//!     then: { approved: true }
//!   - when: {}
//!     then: { approved: false }
//! ```
//!
//! A rule matches when every `when` entry equals the input of the same name.
//! An empty `when` matches everything.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How many matching rules contribute to the result.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HitPolicy {
    /// First matching rule wins
    #[default]
    First,
    /// At most one rule may match
    Unique,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    #[serde(default)]
    pub when: Map<String, Value>,
    pub then: Value,
}

impl Rule {
    fn matches(&self, inputs: &Map<String, Value>) -> bool {
        self.when
            .iter()
            .all(|(name, expected)| inputs.get(name) == Some(expected))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct DecisionTable {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub hit_policy: HitPolicy,

    pub rules: Vec<Rule>,
}

impl DecisionTable {
    /// Evaluates the table, returning the output of the matching rule if any.
    pub fn evaluate(&self, inputs: &Map<String, Value>) -> Result<Vec<Value>, String> {
        let mut matched = self.rules.iter().filter(|rule| rule.matches(inputs));

        match self.hit_policy {
            HitPolicy::First => Ok(matched.next().map(|r| r.then.clone()).into_iter().collect()),
            HitPolicy::Unique => {
                let hits: Vec<Value> = matched.map(|r| r.then.clone()).collect();
                if hits.len() > 1 {
                    return Err(format!(
                        "hit policy 'unique' violated: {} rules matched",
                        hits.len()
                    ));
                }
                Ok(hits)
            }
        }
    }
}

/// Parses and validates a decision table.
pub fn parse_decision(content: &[u8]) -> Result<DecisionTable, String> {
    let text = std::str::from_utf8(content)
        .map_err(|e| format!("Decision table is not valid UTF-8: {}", e))?;

    let table: DecisionTable = serde_yaml::from_str(text)
        .map_err(|e| format!("Failed to parse decision table: {}", e))?;

    if table.key.trim().is_empty() {
        return Err("Decision table has no key".to_string());
    }
    if table.rules.is_empty() {
        return Err(format!("Decision table '{}' has no rules", table.key));
    }

    Ok(table)
}
