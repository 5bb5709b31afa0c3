//! Rule engine
//!
//! Turns parsed statement rows into classified transactions. Rules are tried
//! in order and the first whose `when` holds decides the outcome; rows no rule
//! matches take the configured defaults.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::{CashflowError, CashflowResult};
use crate::models::rule::{is_blank, RuleConfig, RuleDef, RuleDefaults, TextMatch, When};
use crate::models::{FinalTransaction, Money, NoteSource, UnifiedTransaction};

/// Comparison operator of an amount expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountOp {
    Ge,
    Le,
    Eq,
    Ne,
    Gt,
    Lt,
}

impl AmountOp {
    // Two-character operators first so ">=" is not read as ">"
    const TOKENS: [(&'static str, AmountOp); 6] = [
        (">=", AmountOp::Ge),
        ("<=", AmountOp::Le),
        ("==", AmountOp::Eq),
        ("!=", AmountOp::Ne),
        (">", AmountOp::Gt),
        ("<", AmountOp::Lt),
    ];
}

/// A parsed amount condition such as `<0` or `>= 123.45`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountExpr {
    pub op: AmountOp,
    pub threshold: Money,
}

impl AmountExpr {
    /// Parse an expression; whitespace anywhere is ignored
    pub fn parse(expr: &str) -> CashflowResult<Self> {
        let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        let (token, op) = AmountOp::TOKENS
            .iter()
            .find(|(token, _)| compact.starts_with(token))
            .copied()
            .ok_or_else(|| {
                CashflowError::RuleConfig(format!("invalid amount expression '{}'", expr))
            })?;

        let threshold = Money::parse(&compact[token.len()..]).map_err(|e| {
            CashflowError::RuleConfig(format!("invalid amount expression '{}': {}", expr, e))
        })?;
        Ok(Self { op, threshold })
    }

    pub fn matches(&self, amount: Money) -> bool {
        let (lhs, rhs) = (amount.minor(), self.threshold.minor());
        match self.op {
            AmountOp::Ge => lhs >= rhs,
            AmountOp::Le => lhs <= rhs,
            AmountOp::Eq => lhs == rhs,
            AmountOp::Ne => lhs != rhs,
            AmountOp::Gt => lhs > rhs,
            AmountOp::Lt => lhs < rhs,
        }
    }
}

/// Compiled form of a [`TextMatch`]
#[derive(Debug, Clone)]
struct FieldMatcher {
    equals: Option<String>,
    contains: Option<String>,
    regex: Option<Regex>,
    ignore_case: bool,
}

impl FieldMatcher {
    fn compile(m: &TextMatch) -> Result<Self, regex::Error> {
        let ignore_case = m.ignores_case();
        let fold = |s: &Option<String>| {
            non_blank(s).map(|s| if ignore_case { s.to_lowercase() } else { s.to_string() })
        };
        let regex = non_blank(&m.regex)
            .map(|pattern| RegexBuilder::new(pattern).case_insensitive(ignore_case).build())
            .transpose()?;
        Ok(Self {
            equals: fold(&m.equals),
            contains: fold(&m.contains),
            regex,
            ignore_case,
        })
    }

    fn matches(&self, text: &str) -> bool {
        let folded;
        let cmp = if self.ignore_case {
            folded = text.to_lowercase();
            folded.as_str()
        } else {
            text
        };

        if let Some(target) = &self.equals {
            if cmp != target {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            if !cmp.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(re) = &self.regex {
            if !re.is_match(text) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
struct CompiledWhen {
    payee: Option<FieldMatcher>,
    item: Option<FieldMatcher>,
    note: Option<FieldMatcher>,
    amount: Option<AmountExpr>,
}

impl CompiledWhen {
    fn compile(when: &When, rule: &str) -> CashflowResult<Self> {
        let field = |m: &Option<TextMatch>, label: &str| -> CashflowResult<Option<FieldMatcher>> {
            match m.as_ref().filter(|m| !m.is_empty()) {
                Some(m) => FieldMatcher::compile(m).map(Some).map_err(|e| {
                    CashflowError::RuleConfig(format!(
                        "rule '{}': invalid {} regex: {}",
                        rule, label, e
                    ))
                }),
                None => Ok(None),
            }
        };

        let amount = non_blank(&when.amount)
            .map(AmountExpr::parse)
            .transpose()
            .map_err(|e| match e {
                CashflowError::RuleConfig(msg) => {
                    CashflowError::RuleConfig(format!("rule '{}': {}", rule, msg))
                }
                other => other,
            })?;

        Ok(Self {
            payee: field(&when.payee, "payee")?,
            item: field(&when.item, "item")?,
            note: field(&when.note, "note")?,
            amount,
        })
    }

    fn matches(&self, txn: &UnifiedTransaction) -> bool {
        let text_ok =
            |m: &Option<FieldMatcher>, text: &str| m.as_ref().map_or(true, |m| m.matches(text));
        text_ok(&self.payee, &txn.payee)
            && text_ok(&self.item, &txn.item)
            && text_ok(&self.note, &txn.note)
            && self.amount.map_or(true, |expr| expr.matches(txn.amount))
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    when: CompiledWhen,
    drop: bool,
    category: Option<String>,
    sub: Option<String>,
    note_replace: Option<(Regex, String)>,
}

impl CompiledRule {
    fn compile(def: &RuleDef, position: usize) -> CashflowResult<Self> {
        let name = def.display_name(position);
        let when = CompiledWhen::compile(&def.when, &name)?;

        let note_replace = match def.then.note_replace.as_ref() {
            Some(r) if !r.regex.trim().is_empty() => {
                let re = Regex::new(&r.regex).map_err(|e| {
                    CashflowError::RuleConfig(format!(
                        "rule '{}': invalid noteReplace regex: {}",
                        name, e
                    ))
                })?;
                let with = expand_template(&r.with, &re).map_err(|e| {
                    CashflowError::RuleConfig(format!(
                        "rule '{}': invalid noteReplace replacement: {}",
                        name, e
                    ))
                })?;
                Some((re, with))
            }
            _ => None,
        };

        Ok(Self {
            when,
            drop: def.then.drops(),
            category: non_blank(&def.then.category).map(str::to_string),
            sub: non_blank(&def.then.sub).map(str::to_string),
            note_replace,
            name,
        })
    }
}

/// Rewrite a `$1` / `\$` replacement into the regex crate's `${1}` / `$$` form
///
/// A numbered reference takes as many digits as still name an existing group,
/// so with one group `$12` is group 1 followed by `2`. `${name}` must name a
/// group of `re`, and a backslash makes the next character literal.
fn expand_template(template: &str, re: &Regex) -> Result<String, String> {
    let groups = re.captures_len() - 1;
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('$') => out.push_str("$$"),
                Some(escaped) => out.push(escaped),
                None => return Err("trailing backslash".into()),
            },
            '$' => match chars.next() {
                Some('{') => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => return Err("unterminated group name".into()),
                        }
                    }
                    if !re.capture_names().flatten().any(|n| n == name) {
                        return Err(format!("no group named '{}'", name));
                    }
                    out.push_str(&format!("${{{}}}", name));
                }
                Some(d) if d.is_ascii_digit() => {
                    let mut group = d.to_digit(10).unwrap_or(0) as usize;
                    if group > groups {
                        return Err(format!("no group {}", group));
                    }
                    while let Some(next) = chars.peek().and_then(|ch| ch.to_digit(10)) {
                        let wider = group * 10 + next as usize;
                        if wider > groups {
                            break;
                        }
                        group = wider;
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", group));
                }
                _ => return Err("'$' must be followed by a group number or {name}".into()),
            },
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Outcome of classifying one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A rule with `drop: true` matched
    Dropped { rule: String },
    /// The row was classified; `rule` is `None` when only defaults applied
    Kept {
        rule: Option<String>,
        transaction: FinalTransaction,
    },
}

/// A rule configuration compiled for repeated use
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    defaults: RuleDefaults,
}

impl RuleEngine {
    /// Compile every rule up front; any invalid regex or amount expression fails
    pub fn compile(config: &RuleConfig) -> CashflowResult<Self> {
        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(position, def)| CompiledRule::compile(def, position))
            .collect::<CashflowResult<Vec<_>>>()?;
        debug!(rules = rules.len(), "compiled rule configuration");
        Ok(Self {
            rules,
            defaults: config.defaults.clone(),
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify one row
    pub fn evaluate(&self, txn: &UnifiedTransaction) -> Outcome {
        let matched = self.rules.iter().find(|rule| rule.when.matches(txn));

        if let Some(rule) = matched.filter(|r| r.drop) {
            return Outcome::Dropped {
                rule: rule.name.clone(),
            };
        }

        let category = matched
            .and_then(|r| r.category.clone())
            .unwrap_or_else(|| self.defaults.category.clone());
        let sub_category = matched
            .and_then(|r| r.sub.clone())
            .unwrap_or_else(|| self.defaults.sub.clone());

        let note = match matched.and_then(|r| r.note_replace.as_ref()) {
            Some((re, with)) => re.replace_all(&txn.note, with.as_str()).into_owned(),
            None => txn.note.clone(),
        };
        let note = if note.trim().is_empty() {
            self.fallback_note(txn).to_string()
        } else {
            note
        };

        Outcome::Kept {
            rule: matched.map(|r| r.name.clone()),
            transaction: FinalTransaction {
                timestamp_ms: txn.timestamp_ms,
                amount: txn.amount,
                category,
                sub_category,
                note,
            },
        }
    }

    /// Classify rows in order, leaving out dropped ones
    pub fn apply(&self, txns: &[UnifiedTransaction]) -> Vec<FinalTransaction> {
        let mut out = Vec::with_capacity(txns.len());
        for txn in txns {
            if let Outcome::Kept { transaction, .. } = self.evaluate(txn) {
                out.push(transaction);
            }
        }
        debug!(
            input = txns.len(),
            kept = out.len(),
            dropped = txns.len() - out.len(),
            "applied rules"
        );
        out
    }

    fn fallback_note<'t>(&self, txn: &'t UnifiedTransaction) -> &'t str {
        self.defaults
            .note_fallback_order
            .iter()
            .map(|&source: &NoteSource| txn.field(source))
            .find(|text| !text.trim().is_empty())
            .unwrap_or("")
    }
}

/// Compile `config` and classify `txns` in one pass
pub fn classify(
    txns: &[UnifiedTransaction],
    config: &RuleConfig,
) -> CashflowResult<Vec<FinalTransaction>> {
    Ok(RuleEngine::compile(config)?.apply(txns))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    if is_blank(value) {
        None
    } else {
        value.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::Then;

    fn txn(amount_minor: i64, payee: &str, item: &str, note: &str) -> UnifiedTransaction {
        UnifiedTransaction::new(
            1_735_689_600_000,
            Money::from_minor(amount_minor),
            payee,
            item,
            note,
        )
    }

    fn defaults() -> RuleDefaults {
        RuleDefaults::new("Other", "Misc").with_fallback([
            NoteSource::Note,
            NoteSource::Item,
            NoteSource::Payee,
        ])
    }

    #[test]
    fn test_amount_expression_parsing() {
        let expr = AmountExpr::parse(" >= 123.45 ").unwrap();
        assert_eq!(expr.op, AmountOp::Ge);
        assert_eq!(expr.threshold.minor(), 12_345);

        assert_eq!(AmountExpr::parse("<0").unwrap().op, AmountOp::Lt);
        assert_eq!(AmountExpr::parse("!= 10").unwrap().threshold.minor(), 1000);
        assert_eq!(AmountExpr::parse("==-2.5").unwrap().threshold.minor(), -250);
        assert_eq!(AmountExpr::parse("> 1.500").unwrap().threshold.minor(), 150);
    }

    #[test]
    fn test_amount_expression_rejects_garbage() {
        for bad in ["", "0", "=> 1", ">", "< abc", "> 1.234", "~= 3"] {
            let err = AmountExpr::parse(bad).unwrap_err();
            assert!(matches!(err, CashflowError::RuleConfig(_)), "{}", bad);
        }
    }

    #[test]
    fn test_amount_expression_boundaries() {
        let ge = AmountExpr::parse(">=10").unwrap();
        assert!(ge.matches(Money::from_minor(1000)));
        assert!(!ge.matches(Money::from_minor(999)));
        let gt = AmountExpr::parse(">10").unwrap();
        assert!(!gt.matches(Money::from_minor(1000)));
    }

    #[test]
    fn test_first_match_wins() {
        let config = RuleConfig::with_defaults(defaults())
            .rule(
                RuleDef::named("spend")
                    .when(When::always().amount("<0"))
                    .then(Then::classify("Food", "Meal")),
            )
            .rule(
                RuleDef::named("coffee")
                    .when(When::always().payee(TextMatch::contains("coffee")))
                    .then(Then::classify("Drinks", "Coffee")),
            );

        let out = classify(&[txn(-500, "Coffee Shop", "", "latte")], &config).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].category, "Food");
        assert_eq!(out[0].sub_category, "Meal");
        assert_eq!(out[0].note, "latte");
    }

    #[test]
    fn test_first_match_beats_catch_all() {
        let config = RuleConfig::with_defaults(defaults())
            .rule(
                RuleDef::named("spend")
                    .when(When::always().amount("<0"))
                    .then(Then::classify("Food", "Meal")),
            )
            .rule(
                RuleDef::named("everything")
                    .when(When::always())
                    .then(Then::classify("Other", "Misc")),
            );

        let out = classify(&[txn(-500, "", "", "a"), txn(500, "", "", "b")], &config).unwrap();
        assert_eq!(out[0].category, "Food");
        assert_eq!(out[1].category, "Other");

        let engine = RuleEngine::compile(&config).unwrap();
        match engine.evaluate(&txn(-500, "", "", "a")) {
            Outcome::Kept { rule, .. } => assert_eq!(rule.as_deref(), Some("spend")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_drop_removes_row() {
        let config = RuleConfig::with_defaults(defaults()).rule(
            RuleDef::named("refund")
                .when(When::always().note(TextMatch::contains("REFUND")))
                .then(Then::discard()),
        );

        let out = classify(
            &[
                txn(-100, "Shop", "", "order"),
                txn(100, "Shop", "", "refund for order"),
                txn(-200, "Cafe", "", "latte"),
                txn(-300, "Mart", "", "milk"),
            ],
            &config,
        )
        .unwrap();
        let kept: Vec<(i64, &str)> = out
            .iter()
            .map(|f| (f.amount.minor(), f.note.as_str()))
            .collect();
        assert_eq!(kept, vec![(-100, "order"), (-200, "latte"), (-300, "milk")]);

        let engine = RuleEngine::compile(&config).unwrap();
        assert_eq!(
            engine.evaluate(&txn(100, "Shop", "", "Refund")),
            Outcome::Dropped {
                rule: "refund".into()
            }
        );
    }

    #[test]
    fn test_defaults_and_fallback_note() {
        let config = RuleConfig::with_defaults(defaults());
        let out = classify(&[txn(-1200, "Cafe", "Coffee", "   ")], &config).unwrap();
        assert_eq!(out[0].category, "Other");
        assert_eq!(out[0].sub_category, "Misc");
        assert_eq!(out[0].note, "Coffee");

        let out = classify(&[txn(-1200, "Cafe", "", "")], &config).unwrap();
        assert_eq!(out[0].note, "Cafe");

        let bare = RuleConfig::with_defaults(RuleDefaults::new("Other", "Misc"));
        let out = classify(&[txn(-1200, "Cafe", "Coffee", "")], &bare).unwrap();
        assert_eq!(out[0].note, "");
    }

    #[test]
    fn test_rule_without_category_uses_defaults() {
        let config = RuleConfig::with_defaults(defaults()).rule(
            RuleDef::named("sub only").then(Then {
                sub: Some("Snack".into()),
                category: Some("  ".into()),
                ..Then::default()
            }),
        );
        let out = classify(&[txn(-1, "", "", "x")], &config).unwrap();
        assert_eq!(out[0].category, "Other");
        assert_eq!(out[0].sub_category, "Snack");
    }

    #[test]
    fn test_note_replace_then_fallback() {
        let config = RuleConfig::with_defaults(defaults())
            .rule(
                RuleDef::named("strip order ids")
                    .when(When::always().payee(TextMatch::equals("shop")))
                    .then(Then::classify("Food", "Meal").replace_note(r"#\d+\s*", "")),
            );

        let out = classify(
            &[
                txn(-1, "Shop", "Noodles", "#123 extra spicy"),
                txn(-1, "Shop", "Noodles", "#456"),
            ],
            &config,
        )
        .unwrap();
        assert_eq!(out[0].note, "extra spicy");
        // fallback reads the source fields, so the unreplaced note comes back
        assert_eq!(out[1].note, "#456");

        let item_first = RuleConfig::with_defaults(
            RuleDefaults::new("Other", "Misc").with_fallback([NoteSource::Item, NoteSource::Payee]),
        )
        .rule(
            RuleDef::named("strip order ids")
                .when(When::always().payee(TextMatch::equals("shop")))
                .then(Then::classify("Food", "Meal").replace_note(r"#\d+\s*", "")),
        );
        let out = classify(
            &[
                txn(-1, "Shop", "Noodles", "#456"),
                txn(-1, "Shop", "", "#789"),
            ],
            &item_first,
        )
        .unwrap();
        assert_eq!(out[0].note, "Noodles");
        assert_eq!(out[1].note, "Shop");
    }

    #[test]
    fn test_note_replace_supports_groups() {
        let config = RuleConfig::default().rule(
            RuleDef::named("swap").then(Then::default().replace_note(r"(\w+)-(\w+)", "$2 $1")),
        );
        let out = classify(&[txn(-1, "", "", "tea-milk")], &config).unwrap();
        assert_eq!(out[0].note, "milk tea");
    }

    #[test]
    fn test_note_replace_group_followed_by_text() {
        let config = RuleConfig::default().rule(
            RuleDef::named("currency").then(Then::default().replace_note(r"(\d+)", "$1yuan")),
        );
        let out = classify(&[txn(-1, "", "", "pay 12 now")], &config).unwrap();
        assert_eq!(out[0].note, "pay 12yuan now");

        // one group only, so the second digit is literal
        let config = RuleConfig::default().rule(
            RuleDef::named("digit").then(Then::default().replace_note(r"(\d)", "$12")),
        );
        let out = classify(&[txn(-1, "", "", "a7")], &config).unwrap();
        assert_eq!(out[0].note, "a72");
    }

    #[test]
    fn test_note_replace_escapes_and_named_groups() {
        let config = RuleConfig::default().rule(
            RuleDef::named("price")
                .then(Then::default().replace_note(r"(?P<n>\d+)", r"\$${n}\\")),
        );
        let out = classify(&[txn(-1, "", "", "cost 5")], &config).unwrap();
        assert_eq!(out[0].note, r"cost $5\");
    }

    #[test]
    fn test_note_replace_rejects_bad_templates() {
        for with in ["$", "$x", "$2", "${missing}", "${n", "ends with \\"] {
            let config = RuleConfig::default().rule(
                RuleDef::named("bad").then(Then::default().replace_note(r"(?P<n>\d)", with)),
            );
            let err = RuleEngine::compile(&config).unwrap_err();
            assert!(matches!(err, CashflowError::RuleConfig(_)), "{}", with);
        }
    }

    #[test]
    fn test_case_sensitivity() {
        let strict = When::always().payee(TextMatch::equals("Shop").case_sensitive());
        let compiled = CompiledWhen::compile(&strict, "t").unwrap();
        assert!(compiled.matches(&txn(0, "Shop", "", "")));
        assert!(!compiled.matches(&txn(0, "shop", "", "")));

        let loose = When::always().item(TextMatch::regex("^latte"));
        let compiled = CompiledWhen::compile(&loose, "t").unwrap();
        assert!(compiled.matches(&txn(0, "", "LATTE large", "")));

        let strict_regex = When::always().item(TextMatch::regex("^latte").case_sensitive());
        let compiled = CompiledWhen::compile(&strict_regex, "t").unwrap();
        assert!(!compiled.matches(&txn(0, "", "LATTE large", "")));
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let when = When::always()
            .payee(TextMatch::contains("mart"))
            .item(TextMatch::contains("milk"))
            .amount("<= -5");
        let compiled = CompiledWhen::compile(&when, "t").unwrap();
        assert!(compiled.matches(&txn(-500, "SuperMart", "Milk 1L", "")));
        assert!(!compiled.matches(&txn(-499, "SuperMart", "Milk 1L", "")));
        assert!(!compiled.matches(&txn(-500, "SuperMart", "Bread", "")));
    }

    #[test]
    fn test_blank_matcher_matches_everything() {
        let when = When::always().payee(TextMatch::contains("  "));
        let compiled = CompiledWhen::compile(&when, "t").unwrap();
        assert!(compiled.matches(&txn(0, "anything", "", "")));
    }

    #[test]
    fn test_invalid_regex_fails_whole_pass() {
        let config = RuleConfig::with_defaults(defaults())
            .rule(RuleDef::named("ok").then(Then::classify("Food", "Meal")))
            .rule(
                RuleDef::named("broken")
                    .when(When::always().payee(TextMatch::regex("(unclosed")))
                    .then(Then::discard()),
            );
        let err = classify(&[txn(-1, "", "", "")], &config).unwrap_err();
        assert!(matches!(err, CashflowError::RuleConfig(_)));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_invalid_amount_fails_whole_pass() {
        let config = RuleConfig::default().rule(
            RuleDef::default()
                .when(When::always().amount("about 5"))
                .then(Then::discard()),
        );
        let err = RuleEngine::compile(&config).unwrap_err();
        assert!(err.to_string().contains("#1"));
    }

    #[test]
    fn test_order_is_preserved() {
        let config = RuleConfig::with_defaults(defaults());
        let rows: Vec<_> = (0..5).map(|i| txn(i, "", "", &i.to_string())).collect();
        let out = classify(&rows, &config).unwrap();
        let notes: Vec<_> = out.iter().map(|f| f.note.as_str()).collect();
        assert_eq!(notes, vec!["0", "1", "2", "3", "4"]);
    }
}
