//! RBAC policy algebra.
//!
//! A policy is a list of principal [`RulesList`]s and a list of permission
//! [`RulesList`]s. Lists combine with OR semantics; inside a list the rules are
//! either all ANDed or all ORed. A list with no rules, or a policy with no lists
//! at all, matches anything.

use envoy_types::pb::envoy::config::rbac::v3::{
    permission, principal, Permission, Policy, Principal as PrincipalProto,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};

use crate::domain::Principal;
use crate::errors::{Error, Result};

/// Attribute of the calling workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalAttribute {
    /// Authenticated downstream identity, matched exactly against the peer certificate.
    DownstreamIdentity(Principal),
}

/// Attribute of the requested action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAttribute {
    DestinationPort(u16),
}

/// A group of atomic rules combined with either AND or OR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesList<A> {
    pub and_rules: Vec<A>,
    pub or_rules: Vec<A>,
}

impl<A> Default for RulesList<A> {
    fn default() -> Self {
        Self { and_rules: Vec::new(), or_rules: Vec::new() }
    }
}

impl<A> RulesList<A> {
    pub fn and(rules: impl IntoIterator<Item = A>) -> Self {
        Self { and_rules: rules.into_iter().collect(), or_rules: Vec::new() }
    }

    pub fn or(rules: impl IntoIterator<Item = A>) -> Self {
        Self { and_rules: Vec::new(), or_rules: rules.into_iter().collect() }
    }

    /// Matches anything.
    pub fn any() -> Self {
        Self::default()
    }
}

/// Compiles an attribute kind into its RBAC proto.
pub trait RbacAttribute {
    type Proto;
    /// Name used in composition errors.
    const KIND: &'static str;

    fn to_proto(&self) -> Self::Proto;
    fn any() -> Self::Proto;
    fn and_set(rules: Vec<Self::Proto>) -> Self::Proto;
    fn or_set(rules: Vec<Self::Proto>) -> Self::Proto;
}

impl RbacAttribute for PrincipalAttribute {
    type Proto = PrincipalProto;
    const KIND: &'static str = "Principal";

    fn to_proto(&self) -> PrincipalProto {
        match self {
            Self::DownstreamIdentity(principal) => authenticated_principal(principal.as_str()),
        }
    }

    fn any() -> PrincipalProto {
        PrincipalProto { identifier: Some(principal::Identifier::Any(true)) }
    }

    fn and_set(ids: Vec<PrincipalProto>) -> PrincipalProto {
        PrincipalProto { identifier: Some(principal::Identifier::AndIds(principal::Set { ids })) }
    }

    fn or_set(ids: Vec<PrincipalProto>) -> PrincipalProto {
        PrincipalProto { identifier: Some(principal::Identifier::OrIds(principal::Set { ids })) }
    }
}

impl RbacAttribute for PermissionAttribute {
    type Proto = Permission;
    const KIND: &'static str = "Permission";

    fn to_proto(&self) -> Permission {
        match self {
            Self::DestinationPort(port) => {
                Permission { rule: Some(permission::Rule::DestinationPort(u32::from(*port))) }
            }
        }
    }

    fn any() -> Permission {
        Permission { rule: Some(permission::Rule::Any(true)) }
    }

    fn and_set(rules: Vec<Permission>) -> Permission {
        Permission { rule: Some(permission::Rule::AndRules(permission::Set { rules })) }
    }

    fn or_set(rules: Vec<Permission>) -> Permission {
        Permission { rule: Some(permission::Rule::OrRules(permission::Set { rules })) }
    }
}

/// Authenticated principal matching `name` exactly.
pub fn authenticated_principal(name: &str) -> PrincipalProto {
    PrincipalProto {
        identifier: Some(principal::Identifier::Authenticated(principal::Authenticated {
            principal_name: Some(StringMatcher {
                match_pattern: Some(MatchPattern::Exact(name.to_string())),
                ignore_case: false,
            }),
        })),
    }
}

fn compile_lists<A: RbacAttribute>(lists: &[RulesList<A>]) -> Result<Vec<A::Proto>> {
    if lists.is_empty() {
        return Ok(vec![A::any()]);
    }

    lists
        .iter()
        .map(|list| match (list.and_rules.is_empty(), list.or_rules.is_empty()) {
            (false, false) => Err(Error::rbac(format!(
                "{} rule cannot have both AND & OR rules at the same time",
                A::KIND
            ))),
            (false, true) => Ok(A::and_set(list.and_rules.iter().map(A::to_proto).collect())),
            (true, false) => Ok(A::or_set(list.or_rules.iter().map(A::to_proto).collect())),
            (true, true) => Ok(A::any()),
        })
        .collect()
}

/// Builds a policy from principal and permission rule lists.
pub fn generate(
    principals: &[RulesList<PrincipalAttribute>],
    permissions: &[RulesList<PermissionAttribute>],
) -> Result<Policy> {
    Ok(Policy {
        principals: compile_lists(principals)?,
        permissions: compile_lists(permissions)?,
        ..Default::default()
    })
}

/// Policy granting every permission to any of `principals`.
///
/// A wildcard principal matches any caller. An empty set has no policy:
/// callers must leave it out so nothing is allowed.
pub fn allow_principals<'a>(principals: impl IntoIterator<Item = &'a Principal>) -> Result<Policy> {
    let principals: Vec<&Principal> = principals.into_iter().collect();
    if principals.is_empty() {
        return Err(Error::rbac("no principals to allow"));
    }

    let list = if principals.iter().any(|p| p.is_wildcard()) {
        RulesList::any()
    } else {
        RulesList::or(
            principals.into_iter().cloned().map(PrincipalAttribute::DownstreamIdentity),
        )
    };

    generate(&[list], &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> PrincipalAttribute {
        PrincipalAttribute::DownstreamIdentity(Principal::from(name))
    }

    #[test]
    fn empty_policy_matches_any() {
        let policy = generate(&[], &[]).unwrap();
        assert_eq!(policy.principals, vec![PrincipalAttribute::any()]);
        assert_eq!(policy.permissions, vec![PermissionAttribute::any()]);
    }

    #[test]
    fn empty_list_matches_any() {
        let policy = generate(&[RulesList::any()], &[RulesList::any()]).unwrap();
        assert_eq!(policy.principals.len(), 1);
        assert_eq!(policy.principals[0].identifier, Some(principal::Identifier::Any(true)));
        assert_eq!(policy.permissions[0].rule, Some(permission::Rule::Any(true)));
    }

    #[test]
    fn and_or_composition_is_rejected() {
        let list = RulesList {
            and_rules: vec![identity("a.ns.cluster.local")],
            or_rules: vec![identity("b.ns.cluster.local")],
        };
        let err = generate(&[list], &[]).unwrap_err();
        assert!(matches!(err, Error::Rbac { .. }));

        let ports = RulesList {
            and_rules: vec![PermissionAttribute::DestinationPort(80)],
            or_rules: vec![PermissionAttribute::DestinationPort(90)],
        };
        assert!(generate(&[], &[ports]).is_err());
    }

    #[test]
    fn or_rules_compile_to_or_ids() {
        let policy = generate(
            &[RulesList::or([identity("a.ns.cluster.local"), identity("b.ns.cluster.local")])],
            &[RulesList::and([PermissionAttribute::DestinationPort(8080)])],
        )
        .unwrap();

        match &policy.principals[0].identifier {
            Some(principal::Identifier::OrIds(set)) => {
                assert_eq!(set.ids.len(), 2);
                assert_eq!(set.ids[0], authenticated_principal("a.ns.cluster.local"));
            }
            other => panic!("unexpected identifier {:?}", other),
        }
        match &policy.permissions[0].rule {
            Some(permission::Rule::AndRules(set)) => {
                assert_eq!(set.rules[0].rule, Some(permission::Rule::DestinationPort(8080)));
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn wildcard_principal_allows_any() {
        let principals = [Principal::from("a.ns.cluster.local"), Principal::wildcard()];
        let policy = allow_principals(principals.iter()).unwrap();
        assert_eq!(policy.principals, vec![PrincipalAttribute::any()]);
        assert_eq!(policy.permissions, vec![PermissionAttribute::any()]);
    }

    #[test]
    fn empty_principal_set_is_never_any() {
        let err = allow_principals(std::iter::empty()).unwrap_err();
        assert!(matches!(err, Error::Rbac { .. }));
    }
}
