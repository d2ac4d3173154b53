//! Issuer allow/deny evaluation
//!
//! Deny rules always win: an issuer matched by any deny spec is rejected even
//! when an allow spec also matches it.

use std::sync::Arc;

use regex::Regex;

use crate::error::{Error, Result};

/// One issuer matching rule
#[derive(Clone)]
pub enum IssuerSpec {
    /// Exact string equality
    Exact(String),
    /// Regular expression, matched anywhere in the issuer
    Pattern(Regex),
    /// Arbitrary predicate
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl std::fmt::Debug for IssuerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(issuer) => f.debug_tuple("Exact").field(issuer).finish(),
            Self::Pattern(pattern) => f.debug_tuple("Pattern").field(&pattern.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(<fn>)"),
        }
    }
}

impl IssuerSpec {
    pub fn exact(issuer: impl Into<String>) -> Self {
        Self::Exact(issuer.into())
    }

    /// Compile a pattern spec
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `pattern` is not a valid regex.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| Error::Config(format!("invalid issuer pattern {pattern:?}: {e}")))
    }

    pub fn predicate(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    /// Whether this spec matches `issuer`
    pub fn matches(&self, issuer: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == issuer,
            Self::Pattern(pattern) => pattern.is_match(issuer),
            Self::Predicate(f) => f(issuer),
        }
    }
}

impl From<&str> for IssuerSpec {
    fn from(issuer: &str) -> Self {
        Self::Exact(issuer.to_string())
    }
}

impl From<String> for IssuerSpec {
    fn from(issuer: String) -> Self {
        Self::Exact(issuer)
    }
}

impl From<Regex> for IssuerSpec {
    fn from(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }
}

/// Outcome of an issuer evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    Allowed,
    NotAllowed,
    Denied,
}

/// Evaluate `issuer` against ordered allow and deny lists
pub fn evaluate(issuer: &str, allow: &[IssuerSpec], deny: &[IssuerSpec]) -> TrustDecision {
    if deny.iter().any(|spec| spec.matches(issuer)) {
        TrustDecision::Denied
    } else if allow.iter().any(|spec| spec.matches(issuer)) {
        TrustDecision::Allowed
    } else {
        TrustDecision::NotAllowed
    }
}

/// Allow and deny lists held together
#[derive(Debug, Clone, Default)]
pub struct IssuerTrust {
    allow: Vec<IssuerSpec>,
    deny: Vec<IssuerSpec>,
}

impl IssuerTrust {
    pub fn new(allow: Vec<IssuerSpec>, deny: Vec<IssuerSpec>) -> Self {
        Self { allow, deny }
    }

    pub fn allow(mut self, spec: impl Into<IssuerSpec>) -> Self {
        self.allow.push(spec.into());
        self
    }

    pub fn deny(mut self, spec: impl Into<IssuerSpec>) -> Self {
        self.deny.push(spec.into());
        self
    }

    pub fn evaluate(&self, issuer: &str) -> TrustDecision {
        evaluate(issuer, &self.allow, &self.deny)
    }

    /// [`IssuerTrust::evaluate`] as a `Result`
    ///
    /// # Errors
    ///
    /// Returns [`Error::IssuerDenied`] or [`Error::IssuerNotAllowed`].
    pub fn check(&self, issuer: &str) -> Result<()> {
        match self.evaluate(issuer) {
            TrustDecision::Allowed => Ok(()),
            TrustDecision::NotAllowed => Err(Error::IssuerNotAllowed(issuer.to_string())),
            TrustDecision::Denied => Err(Error::IssuerDenied(issuer.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_regex_branch_allows() {
        let trust = IssuerTrust::default()
            .allow("https://idp/a")
            .allow(IssuerSpec::pattern(r"https://idp/.*").unwrap());

        assert_eq!(trust.evaluate("https://idp/b"), TrustDecision::Allowed);
        assert_eq!(trust.evaluate("https://other/b"), TrustDecision::NotAllowed);
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let trust = IssuerTrust::default().allow("https://idp/a").deny("https://idp/a");
        assert_eq!(trust.evaluate("https://idp/a"), TrustDecision::Denied);
        assert!(matches!(trust.check("https://idp/a"), Err(Error::IssuerDenied(_))));
    }

    #[test]
    fn test_predicate_spec() {
        let trust =
            IssuerTrust::default().allow(IssuerSpec::predicate(|iss| iss.ends_with("/trusted")));
        assert!(trust.check("https://idp/trusted").is_ok());
        let err = trust.check("https://idp/x").unwrap_err();
        assert_eq!(err.to_string(), "Token issuer \"https://idp/x\" is not allowed");
    }

    #[test]
    fn test_empty_lists() {
        assert_eq!(evaluate("https://idp", &[], &[]), TrustDecision::NotAllowed);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(IssuerSpec::pattern("("), Err(Error::Config(_))));
    }

    proptest! {
        #[test]
        fn prop_matching_pattern_without_deny_is_allowed(realm in "[a-z0-9]{1,12}") {
            let issuer = format!("https://idp.example.com/realms/{realm}");
            let allow = vec![IssuerSpec::pattern(r"^https://idp\.example\.com/realms/").unwrap()];
            prop_assert_eq!(evaluate(&issuer, &allow, &[]), TrustDecision::Allowed);
        }

        #[test]
        fn prop_deny_takes_precedence(issuer in "https://[a-z]{1,10}/[a-z]{0,10}") {
            let allow = vec![IssuerSpec::exact(issuer.clone())];
            let deny = vec![IssuerSpec::predicate(|_| true)];
            prop_assert_eq!(evaluate(&issuer, &allow, &deny), TrustDecision::Denied);
        }
    }
}
