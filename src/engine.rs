//! Applies a rule list to one XML document.

use crate::document::Document;
use crate::encoding::detect_declared_encoding;
use crate::rule::Rule;

/// Result of [`apply_rules`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    /// Serialized document, or the input bytes when parsing or writing failed.
    pub bytes: Vec<u8>,
    /// Elements whose text was set, summed over all rules.
    pub applied: usize,
    /// One message per failed rule, parse or serialize failure.
    pub errors: Vec<String>,
}

impl RuleOutcome {
    fn untouched(xml: &[u8], error: String) -> RuleOutcome {
        RuleOutcome {
            bytes: xml.to_vec(),
            applied: 0,
            errors: vec![error],
        }
    }
}

/// Sets the direct text of every element each rule matches, in rule order.
///
/// Never fails: a rule that can't be evaluated is skipped and reported in
/// [`RuleOutcome::errors`], and when the document can't be parsed or
/// written back the input bytes are returned as they were.
///
/// The output is compact, carries a declaration and is encoded as the
/// input's declaration says, UTF-8 otherwise.
///
/// ```
/// use xml_batch_edit::{apply_rules, Rule};
///
/// let rules = [Rule::tag("name", "new").unwrap()];
/// let outcome = apply_rules(b"<a><p:name>old</p:name></a>", &rules);
/// assert_eq!(outcome.applied, 1);
/// assert!(outcome.errors.is_empty());
/// assert_eq!(
///     outcome.bytes,
///     b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><a><p:name>new</p:name></a>".to_vec()
/// );
/// ```
pub fn apply_rules(xml: &[u8], rules: &[Rule]) -> RuleOutcome {
    let mut document = match Document::parse_lenient(xml) {
        Ok(document) => document,
        Err(err) => return RuleOutcome::untouched(xml, format!("parse error: {}", err)),
    };

    let mut applied = 0;
    let mut errors = Vec::new();
    for rule in rules {
        match rule.strategy().select(&document) {
            Ok(elements) => {
                log::trace!("rule '{}' matched {} element(s)", rule, elements.len());
                for element in &elements {
                    element.set_text(&mut document, rule.new_value());
                }
                applied += elements.len();
            }
            Err(err) => {
                log::warn!("rule '{}' skipped: {}", rule, err);
                errors.push(format!("rule '{}': {}", rule, err));
            }
        }
    }

    let label = detect_declared_encoding(xml).unwrap_or_else(|| "UTF-8".to_string());
    match document.to_bytes(&label) {
        Ok(bytes) => RuleOutcome {
            bytes,
            applied,
            errors,
        },
        Err(err) => {
            errors.push(format!("serialize error: {}", err));
            RuleOutcome {
                bytes: xml.to_vec(),
                applied,
                errors,
            }
        }
    }
}
