//! Replacement rules and rule preset files.

use crate::document::Document;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::xpath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// How a rule's pattern is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Element local name, namespace prefix ignored.
    Tag,
    /// XPath 1.0 expression.
    Xpath,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Tag => write!(f, "tag"),
            Mode::Xpath => write!(f, "xpath"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tag" => Ok(Mode::Tag),
            "xpath" => Ok(Mode::Xpath),
            other => Err(format!("unknown rule mode '{}', expected tag or xpath", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchStrategy {
    ByLocalName(String),
    ByXPath(String),
}

impl MatchStrategy {
    pub fn mode(&self) -> Mode {
        match self {
            MatchStrategy::ByLocalName(_) => Mode::Tag,
            MatchStrategy::ByXPath(_) => Mode::Xpath,
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            MatchStrategy::ByLocalName(pattern) | MatchStrategy::ByXPath(pattern) => pattern,
        }
    }

    /// Elements of `document` this strategy matches, in document order.
    ///
    /// `ByLocalName` looks at the root element and all of its descendants.
    pub fn select(&self, document: &Document) -> Result<Vec<Element>> {
        match self {
            MatchStrategy::ByLocalName(name) => {
                let root = match document.root_element() {
                    Some(root) => root,
                    None => return Ok(Vec::new()),
                };
                let mut elements = vec![root];
                elements.extend(root.child_elements_recursive(document));
                elements.retain(|elem| elem.local_name(document) == name);
                Ok(elements)
            }
            MatchStrategy::ByXPath(expr) => xpath::select_elements(document, expr),
        }
    }
}

/// One replacement instruction: every element matched by `strategy` gets
/// `new_value` as its direct text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleRecord", into = "RuleRecord")]
pub struct Rule {
    strategy: MatchStrategy,
    new_value: String,
}

impl Rule {
    /// # Errors
    ///
    /// - [`Error::EmptyPattern`]: `pattern` is empty or only whitespace.
    pub fn new<P, V>(mode: Mode, pattern: P, new_value: V) -> Result<Rule>
    where
        P: Into<String>,
        V: Into<String>,
    {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(Error::EmptyPattern);
        }
        let strategy = match mode {
            Mode::Tag => MatchStrategy::ByLocalName(pattern),
            Mode::Xpath => MatchStrategy::ByXPath(pattern),
        };
        Ok(Rule {
            strategy,
            new_value: new_value.into(),
        })
    }

    pub fn tag<P: Into<String>, V: Into<String>>(name: P, new_value: V) -> Result<Rule> {
        Rule::new(Mode::Tag, name, new_value)
    }

    pub fn xpath<P: Into<String>, V: Into<String>>(expr: P, new_value: V) -> Result<Rule> {
        Rule::new(Mode::Xpath, expr, new_value)
    }

    pub fn strategy(&self) -> &MatchStrategy {
        &self.strategy
    }

    pub fn mode(&self) -> Mode {
        self.strategy.mode()
    }

    pub fn pattern(&self) -> &str {
        self.strategy.pattern()
    }

    pub fn new_value(&self) -> &str {
        &self.new_value
    }
}

/// `<mode>:<pattern>`
impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mode(), self.pattern())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleRecord {
    mode: Mode,
    pattern: String,
    new_value: String,
}

impl TryFrom<RuleRecord> for Rule {
    type Error = Error;

    fn try_from(record: RuleRecord) -> Result<Rule> {
        Rule::new(record.mode, record.pattern, record.new_value)
    }
}

impl From<Rule> for RuleRecord {
    fn from(rule: Rule) -> RuleRecord {
        RuleRecord {
            mode: rule.mode(),
            pattern: rule.pattern().to_string(),
            new_value: rule.new_value,
        }
    }
}

/// A saved rule list.
///
/// ```json
/// {
///   "rules": [{ "mode": "tag", "pattern": "C_STI_ORIG", "new_value": "NEW" }],
///   "version": "0.3.0"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Preset {
    /// Preset stamped with this crate's version.
    pub fn new(rules: Vec<Rule>) -> Preset {
        Preset {
            rules,
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    pub fn from_json(json: &str) -> Result<Preset> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads a preset file. Nothing is returned unless every rule is valid.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Preset> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let preset = Preset::from_json(&json)?;
        log::debug!(
            "loaded {} rule(s) from {}",
            preset.rules.len(),
            path.as_ref().display()
        );
        Ok(preset)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}
