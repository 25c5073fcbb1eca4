//! Ordered fallback for tenant and subscription.

use rapidapi_core::{Error, Project, Result, RootConfig};

/// First candidate that is present and not blank, trimmed.
pub fn first_non_empty<'a, I>(candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Tenant to act in: explicit, then the project's, then the root default.
pub fn resolve_tenant(
    explicit: Option<&str>,
    project: Option<&Project>,
    root: &RootConfig,
) -> Result<String> {
    first_non_empty([
        explicit,
        project.and_then(|p| p.tenant_id.as_deref()),
        root.tenant.as_deref(),
    ])
    .map(str::to_string)
    .ok_or_else(|| Error::InvalidInput("Please provide value for tenant".to_string()))
}

/// Subscription to act in, in the same order. `None` means the account's
/// default subscription.
pub fn resolve_subscription(
    explicit: Option<&str>,
    project: Option<&Project>,
    root: &RootConfig,
) -> Option<String> {
    first_non_empty([
        explicit,
        project.and_then(|p| p.subscription_id.as_deref()),
        root.subscription.as_deref(),
    ])
    .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapidapi_core::AppId;

    fn root(tenant: Option<&str>, subscription: Option<&str>) -> RootConfig {
        RootConfig {
            tenant: tenant.map(str::to_string),
            subscription: subscription.map(str::to_string),
        }
    }

    fn project(tenant: Option<&str>, subscription: Option<&str>) -> Project {
        let mut project = Project::new(AppId::parse("demoapp").unwrap());
        project.tenant_id = tenant.map(str::to_string);
        project.subscription_id = subscription.map(str::to_string);
        project
    }

    #[test]
    fn test_first_non_empty() {
        assert_eq!(first_non_empty([None, Some(""), Some("  "), Some("b")]), Some("b"));
        assert_eq!(first_non_empty([Some(" a "), Some("b")]), Some("a"));
        assert_eq!(first_non_empty([None, Some("")]), None);
    }

    #[test]
    fn test_tenant_order() {
        let root = root(Some("root-t"), None);
        let project = project(Some("proj-t"), None);

        assert_eq!(
            resolve_tenant(Some("arg-t"), Some(&project), &root).unwrap(),
            "arg-t"
        );
        assert_eq!(resolve_tenant(None, Some(&project), &root).unwrap(), "proj-t");
        assert_eq!(resolve_tenant(Some(""), None, &root).unwrap(), "root-t");
    }

    #[test]
    fn test_missing_tenant_is_input_error() {
        let err = resolve_tenant(None, Some(&project(None, None)), &RootConfig::default())
            .unwrap_err();
        match err {
            Error::InvalidInput(message) => assert_eq!(message, "Please provide value for tenant"),
            other => panic!("Expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_subscription_order_and_default() {
        let root = root(None, Some("root-s"));
        assert_eq!(
            resolve_subscription(None, Some(&project(None, Some("proj-s"))), &root).as_deref(),
            Some("proj-s")
        );
        assert_eq!(resolve_subscription(None, None, &root).as_deref(), Some("root-s"));
        assert_eq!(resolve_subscription(None, None, &RootConfig::default()), None);
    }
}
