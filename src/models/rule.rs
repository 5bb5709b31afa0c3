//! Rule configuration shapes
//!
//! A rule configuration is a set of defaults plus an ordered list of
//! When/Then rules. The serde layout matches the YAML document users edit:
//! camelCase keys, and blank or default-valued optional fields are left out
//! when written.

use serde::{Deserialize, Serialize};

use super::transaction::NoteSource;

/// Current rule configuration document version
pub const RULE_CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    RULE_CONFIG_VERSION
}

fn is_false(value: &bool) -> bool {
    !*value
}

pub(crate) fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

/// Ordered rules plus the defaults applied when a rule leaves a field unset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "RuleDefaults::is_empty")]
    pub defaults: RuleDefaults,

    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            defaults: RuleDefaults::default(),
            rules: Vec::new(),
        }
    }
}

impl RuleConfig {
    /// Config with the given defaults and no rules
    pub fn with_defaults(defaults: RuleDefaults) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    /// Append a rule, builder style
    pub fn rule(mut self, rule: RuleDef) -> Self {
        self.rules.push(rule);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefaults {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,

    /// Fields tried in order when the resolved note is blank
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note_fallback_order: Vec<NoteSource>,

    /// Import only transactions dated on or after the latest existing entry's day
    #[serde(default, skip_serializing_if = "is_false")]
    pub only_append_from_last_date: bool,
}

impl RuleDefaults {
    pub fn new(category: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            sub: sub.into(),
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, order: impl IntoIterator<Item = NoteSource>) -> Self {
        self.note_fallback_order = order.into_iter().collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.category.trim().is_empty()
            && self.sub.trim().is_empty()
            && self.note_fallback_order.is_empty()
            && !self.only_append_from_last_date
    }
}

/// One named When/Then rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDef {
    #[serde(default, skip_serializing_if = "is_blank")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "When::is_empty")]
    pub when: When,

    #[serde(default, skip_serializing_if = "Then::is_empty")]
    pub then: Then,
}

impl RuleDef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn when(mut self, when: When) -> Self {
        self.when = when;
        self
    }

    pub fn then(mut self, then: Then) -> Self {
        self.then = then;
        self
    }

    /// Name used in log lines and error messages
    pub fn display_name(&self, position: usize) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("#{}", position + 1),
        }
    }
}

/// Conditions a transaction must meet; every supplied condition must hold
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct When {
    #[serde(default, skip_serializing_if = "TextMatch::is_unset")]
    pub payee: Option<TextMatch>,

    #[serde(default, skip_serializing_if = "TextMatch::is_unset")]
    pub item: Option<TextMatch>,

    #[serde(default, skip_serializing_if = "TextMatch::is_unset")]
    pub note: Option<TextMatch>,

    /// Comparison such as `<0`, `>= 12.50` or `!= 10`
    #[serde(default, skip_serializing_if = "is_blank")]
    pub amount: Option<String>,
}

impl When {
    /// A clause with no conditions; matches every transaction
    pub fn always() -> Self {
        Self::default()
    }

    pub fn payee(mut self, m: TextMatch) -> Self {
        self.payee = Some(m);
        self
    }

    pub fn item(mut self, m: TextMatch) -> Self {
        self.item = Some(m);
        self
    }

    pub fn note(mut self, m: TextMatch) -> Self {
        self.note = Some(m);
        self
    }

    pub fn amount(mut self, expr: impl Into<String>) -> Self {
        self.amount = Some(expr.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        TextMatch::is_unset(&self.payee)
            && TextMatch::is_unset(&self.item)
            && TextMatch::is_unset(&self.note)
            && is_blank(&self.amount)
    }
}

/// What happens to a matching transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Then {
    #[serde(default, skip_serializing_if = "Then::drop_unset")]
    pub drop: Option<bool>,

    #[serde(default, skip_serializing_if = "is_blank")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "is_blank")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "NoteReplace::is_unset")]
    pub note_replace: Option<NoteReplace>,
}

impl Then {
    /// Discard matching transactions
    pub fn discard() -> Self {
        Self {
            drop: Some(true),
            ..Self::default()
        }
    }

    /// Classify matching transactions
    pub fn classify(category: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            sub: Some(sub.into()),
            ..Self::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn replace_note(mut self, regex: impl Into<String>, with: impl Into<String>) -> Self {
        self.note_replace = Some(NoteReplace {
            regex: regex.into(),
            with: with.into(),
        });
        self
    }

    pub fn drops(&self) -> bool {
        self.drop == Some(true)
    }

    fn drop_unset(drop: &Option<bool>) -> bool {
        *drop != Some(true)
    }

    pub fn is_empty(&self) -> bool {
        Self::drop_unset(&self.drop)
            && is_blank(&self.category)
            && is_blank(&self.sub)
            && NoteReplace::is_unset(&self.note_replace)
    }
}

/// Text conditions on one field; all supplied conditions must hold
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMatch {
    #[serde(default, skip_serializing_if = "is_blank")]
    pub contains: Option<String>,

    #[serde(default, skip_serializing_if = "is_blank")]
    pub equals: Option<String>,

    #[serde(default, skip_serializing_if = "is_blank")]
    pub regex: Option<String>,

    /// Defaults to true; written only when explicitly false
    #[serde(default, skip_serializing_if = "TextMatch::ignore_case_default")]
    pub ignore_case: Option<bool>,
}

impl TextMatch {
    pub fn contains(needle: impl Into<String>) -> Self {
        Self {
            contains: Some(needle.into()),
            ..Self::default()
        }
    }

    pub fn equals(text: impl Into<String>) -> Self {
        Self {
            equals: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            regex: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.ignore_case = Some(false);
        self
    }

    pub fn ignores_case(&self) -> bool {
        self.ignore_case.unwrap_or(true)
    }

    fn ignore_case_default(value: &Option<bool>) -> bool {
        *value != Some(false)
    }

    pub fn is_empty(&self) -> bool {
        is_blank(&self.contains)
            && is_blank(&self.equals)
            && is_blank(&self.regex)
            && Self::ignore_case_default(&self.ignore_case)
    }

    fn is_unset(m: &Option<TextMatch>) -> bool {
        m.as_ref().map_or(true, TextMatch::is_empty)
    }
}

/// Regex substitution applied to the original note
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteReplace {
    pub regex: String,

    #[serde(default)]
    pub with: String,
}

impl NoteReplace {
    fn is_unset(r: &Option<NoteReplace>) -> bool {
        r.as_ref().map_or(true, |r| r.regex.trim().is_empty())
    }
}
