//! Access rules and their evaluation
//!
//! Rules grant or withhold verbs on resource kinds. A rule may carry a
//! `where` predicate over the principal/resource context and `actions` that
//! run only when the rule is the deciding match. Deny rules are checked
//! first across the whole set; allow rules are scanned most-specific first.
//!
//! Predicates and actions are a closed registry (`contains`, `equals`,
//! `log`), parsed into a typed AST when the rule set is assembled. Unknown
//! functions are rejected at role-load time, never at evaluation time.

use crate::error::{AccessDeniedError, PolicyResult};
use crate::policy::labels::{WILDCARD, namespace_in_scope};
use crate::policy::templates::Traits;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, error, info, trace, warn};

/// An access rule as written in a role definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Resource kinds this rule covers; `*` covers all kinds.
    pub resources: Vec<String>,

    /// Verbs this rule covers; `*` covers all verbs.
    pub verbs: Vec<String>,

    /// Optional boolean predicate over the evaluation context.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,

    /// Side-effect statements run when this rule decides the outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

impl Rule {
    pub fn new(resources: &[&str], verbs: &[&str]) -> Self {
        Self {
            resources: resources.iter().map(|r| r.to_string()).collect(),
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            where_clause: None,
            actions: Vec::new(),
        }
    }

    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.where_clause = Some(clause.into());
        self
    }

    pub fn with_actions(mut self, actions: &[&str]) -> Self {
        self.actions = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Structural validation: both kind and verb lists must be present.
    pub fn validate(&self) -> Result<(), String> {
        if self.resources.is_empty() {
            return Err("missing resources in rule".to_string());
        }
        if self.verbs.is_empty() {
            return Err("missing verbs in rule".to_string());
        }
        Ok(())
    }
}

/// A term inside a `where` predicate or a `log` action.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Literal(String),
    UserName,
    UserTrait(String),
    ResourceName,
    ResourceLabel(String),
}

impl Term {
    fn parse(input: &str) -> Result<Term, String> {
        static TRAIT_RE: OnceLock<Regex> = OnceLock::new();
        static LABEL_RE: OnceLock<Regex> = OnceLock::new();
        let input = input.trim();
        if let Some(inner) = input.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
            return Ok(Term::Literal(inner.to_string()));
        }
        if input == "user.name" {
            return Ok(Term::UserName);
        }
        if input == "resource.name" {
            return Ok(Term::ResourceName);
        }
        let trait_re =
            TRAIT_RE.get_or_init(|| Regex::new(r#"^user\.traits\["([^"]+)"\]$"#).unwrap());
        if let Some(caps) = trait_re.captures(input) {
            return Ok(Term::UserTrait(caps[1].to_string()));
        }
        let label_re =
            LABEL_RE.get_or_init(|| Regex::new(r#"^resource\.labels\["([^"]+)"\]$"#).unwrap());
        if let Some(caps) = label_re.captures(input) {
            return Ok(Term::ResourceLabel(caps[1].to_string()));
        }
        Err(format!("unsupported identifier: {input}"))
    }

    /// Resolves to the term's values in the given context. A term that
    /// points at a missing trait, label, or absent resource resolves to
    /// nothing, which degrades the enclosing predicate to a non-match.
    fn resolve(&self, ctx: &RuleContext) -> Vec<String> {
        match self {
            Term::Literal(value) => vec![value.clone()],
            Term::UserName => vec![ctx.user_name.clone()],
            Term::UserTrait(name) => ctx.user_traits.get(name).cloned().unwrap_or_default(),
            Term::ResourceName => ctx
                .resource
                .as_ref()
                .map(|r| vec![r.name.clone()])
                .unwrap_or_default(),
            Term::ResourceLabel(name) => ctx
                .resource
                .as_ref()
                .and_then(|r| r.labels.get(name))
                .map(|v| vec![v.clone()])
                .unwrap_or_default(),
        }
    }
}

/// A parsed `where` predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WherePredicate {
    /// `contains(list, item)`
    Contains(Box<(Term, Term)>),
    /// `equals(a, b)`
    Equals(Box<(Term, Term)>),
}

impl WherePredicate {
    pub fn parse(input: &str) -> Result<WherePredicate, String> {
        let (name, args) = split_call(input)?;
        match name.as_str() {
            "contains" | "equals" => {
                if args.len() != 2 {
                    return Err(format!("{name} takes exactly two arguments"));
                }
                let lhs = Term::parse(&args[0])?;
                let rhs = Term::parse(&args[1])?;
                Ok(match name.as_str() {
                    "contains" => WherePredicate::Contains(Box::new((lhs, rhs))),
                    _ => WherePredicate::Equals(Box::new((lhs, rhs))),
                })
            }
            other => Err(format!("unsupported function: {other}")),
        }
    }

    pub fn matches(&self, ctx: &RuleContext) -> bool {
        match self {
            WherePredicate::Contains(terms) => {
                let (list, item) = (&terms.0, &terms.1);
                let haystack = list.resolve(ctx);
                item.resolve(ctx)
                    .first()
                    .is_some_and(|needle| haystack.contains(needle))
            }
            WherePredicate::Equals(terms) => {
                let (lhs, rhs) = (&terms.0, &terms.1);
                match (lhs.resolve(ctx).into_iter().next(), rhs.resolve(ctx).into_iter().next()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
        }
    }
}

/// A parsed rule action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `log(level, part...)`: emit a structured log line through the
    /// context's action sink.
    Log { level: String, parts: Vec<Term> },
}

impl Action {
    pub fn parse(input: &str) -> Result<Action, String> {
        let (name, args) = split_call(input)?;
        match name.as_str() {
            "log" => {
                if args.len() < 2 {
                    return Err("log takes a level and at least one message part".to_string());
                }
                let Term::Literal(level) = Term::parse(&args[0])? else {
                    return Err("log level must be a string literal".to_string());
                };
                let parts = args[1..]
                    .iter()
                    .map(|arg| Term::parse(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Action::Log { level, parts })
            }
            other => Err(format!("unsupported function: {other}")),
        }
    }

    fn run(&self, ctx: &RuleContext) {
        match self {
            Action::Log { level, parts } => {
                let message = parts
                    .iter()
                    .map(|part| part.resolve(ctx).join(","))
                    .collect::<Vec<_>>()
                    .join(" ");
                ctx.sink.emit(level, &message);
            }
        }
    }
}

/// Splits `name(arg, arg, ...)` into the function name and its raw
/// arguments, honoring double quotes when splitting on commas.
fn split_call(input: &str) -> Result<(String, Vec<String>), String> {
    let input = input.trim();
    let open = input
        .find('(')
        .ok_or_else(|| format!("expected a function call, got {input:?}"))?;
    let name = input[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(format!("expected a function call, got {input:?}"));
    }
    let body = input[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| format!("unterminated call {input:?}"))?;
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in body.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return Err(format!("unterminated string in {input:?}"));
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    Ok((name.to_string(), args))
}

/// Receives `log` action output. The default sink forwards to `tracing`;
/// tests install a capturing sink to observe deciding-rule side effects.
pub trait ActionSink: Send + Sync {
    fn emit(&self, level: &str, message: &str);
}

/// Forwards action output to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ActionSink for TracingSink {
    fn emit(&self, level: &str, message: &str) {
        match level {
            "trace" => trace!(target: "gatewarden::actions", "{message}"),
            "debug" => debug!(target: "gatewarden::actions", "{message}"),
            "warn" => warn!(target: "gatewarden::actions", "{message}"),
            "error" => error!(target: "gatewarden::actions", "{message}"),
            _ => info!(target: "gatewarden::actions", "{message}"),
        }
    }
}

/// Collects action output in memory.
#[derive(Debug, Default)]
pub struct CapturingSink {
    lines: Mutex<Vec<String>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl ActionSink for CapturingSink {
    fn emit(&self, level: &str, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{level}: {message}"));
    }
}

/// The resource side of the evaluation context.
#[derive(Debug, Clone, Default)]
pub struct ResourceContext {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Evaluation context for `where` predicates and actions.
pub struct RuleContext {
    pub user_name: String,
    pub user_traits: Traits,
    pub resource: Option<ResourceContext>,
    pub sink: Arc<dyn ActionSink>,
}

impl Default for RuleContext {
    fn default() -> Self {
        Self {
            user_name: String::new(),
            user_traits: Traits::new(),
            resource: None,
            sink: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("user_name", &self.user_name)
            .field("user_traits", &self.user_traits)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// A rule compiled for evaluation: predicate and actions parsed, specificity
/// precomputed.
#[derive(Debug, Clone)]
struct CompiledRule {
    resources: Vec<String>,
    verbs: Vec<String>,
    where_pred: Option<WherePredicate>,
    actions: Vec<Action>,
    specificity: u8,
}

impl CompiledRule {
    fn compile(rule: &Rule) -> Result<CompiledRule, String> {
        rule.validate()?;
        let where_pred = rule
            .where_clause
            .as_deref()
            .map(WherePredicate::parse)
            .transpose()?;
        let actions = rule
            .actions
            .iter()
            .map(|a| Action::parse(a))
            .collect::<Result<Vec<_>, _>>()?;
        let specificity =
            (where_pred.is_some() as u8) * 2 + (!actions.is_empty() as u8);
        Ok(CompiledRule {
            resources: rule.resources.clone(),
            verbs: rule.verbs.clone(),
            where_pred,
            actions,
            specificity,
        })
    }

    fn covers(&self, resource: &str, verb: &str) -> bool {
        let kind_ok = self
            .resources
            .iter()
            .any(|r| r == WILDCARD || r == resource);
        let verb_ok = self.verbs.iter().any(|v| v == WILDCARD || v == verb);
        kind_ok && verb_ok
    }

    fn matches(&self, ctx: &RuleContext, resource: &str, verb: &str) -> bool {
        self.covers(resource, verb)
            && self
                .where_pred
                .as_ref()
                .is_none_or(|pred| pred.matches(ctx))
    }
}

/// A rule owned by a role, scoped to that role's condition namespaces.
#[derive(Debug, Clone)]
pub struct ScopedRule {
    role: String,
    namespaces: Vec<String>,
    rule: CompiledRule,
}

impl ScopedRule {
    pub fn compile(role: &str, namespaces: &[String], rule: &Rule) -> Result<ScopedRule, String> {
        Ok(ScopedRule {
            role: role.to_string(),
            namespaces: namespaces.to_vec(),
            rule: CompiledRule::compile(rule)?,
        })
    }
}

/// All rules of a role set, deny and allow, ready for evaluation.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    deny: Vec<ScopedRule>,
    allow: Vec<ScopedRule>,
}

impl RuleSet {
    /// Assembles a rule set; allow rules are stably sorted most-specific
    /// first (`where`+`actions`, then `where` only, then the rest, ties by
    /// declaration order).
    pub fn build(deny: Vec<ScopedRule>, allow: Vec<ScopedRule>) -> RuleSet {
        let mut allow = allow;
        allow.sort_by_key(|scoped| std::cmp::Reverse(scoped.rule.specificity));
        RuleSet { deny, allow }
    }

    /// Deny-first evaluation. The first matching allow rule decides the
    /// outcome and its actions run; no match at all is a deny.
    pub fn evaluate(
        &self,
        ctx: &RuleContext,
        namespace: &str,
        resource: &str,
        verb: &str,
    ) -> PolicyResult<()> {
        for scoped in &self.deny {
            if namespace_in_scope(&scoped.namespaces, namespace)
                && scoped.rule.matches(ctx, resource, verb)
            {
                debug!(
                    role = %scoped.role,
                    resource,
                    verb,
                    "deny rule matched"
                );
                return Err(AccessDeniedError::denied_by_rule(
                    format!("{resource}:{verb}"),
                    scoped.role.clone(),
                )
                .into());
            }
        }
        for scoped in &self.allow {
            if namespace_in_scope(&scoped.namespaces, namespace)
                && scoped.rule.matches(ctx, resource, verb)
            {
                trace!(role = %scoped.role, resource, verb, "allow rule matched");
                for action in &scoped.rule.actions {
                    action.run(ctx);
                }
                return Ok(());
            }
        }
        Err(AccessDeniedError::no_allow_rule(format!("{resource}:{verb}")).into())
    }
}
