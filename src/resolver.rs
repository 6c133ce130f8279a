use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::pattern::{Pattern, PatternSet};
use crate::storage::Catalog;
use crate::types::RseInfo;

/// Expands site patterns into registered site names.
///
/// The registered-site listing is fetched once per resolver and reused for
/// every pattern resolved through it.
pub struct RseResolver {
    catalog: Catalog,
    sites: Option<Vec<RseInfo>>,
}

impl RseResolver {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            sites: None,
        }
    }

    async fn sites(&mut self) -> Result<&[RseInfo]> {
        if self.sites.is_none() {
            let sites = self
                .catalog
                .list_rses()
                .await
                .context("failed to list registered sites")?;
            debug!(sites = sites.len(), "registered sites listed.");
            self.sites = Some(sites);
        }
        Ok(self.sites.as_deref().unwrap_or_default())
    }

    /// Every registered site whose name matches `pattern`. May be empty.
    pub async fn resolve(&mut self, pattern: &Pattern) -> Result<BTreeSet<String>> {
        let resolved: BTreeSet<String> = self
            .sites()
            .await?
            .iter()
            .filter(|site| pattern.matches(&site.name))
            .map(|site| site.name.clone())
            .collect();

        if resolved.is_empty() {
            warn!(pattern = pattern.as_str(), "pattern matches no registered site.");
        }
        Ok(resolved)
    }

    /// Union of [`resolve`](Self::resolve) over every pattern.
    pub async fn resolve_all(&mut self, patterns: &PatternSet) -> Result<BTreeSet<String>> {
        let mut usable = BTreeSet::new();
        for pattern in patterns.iter() {
            usable.extend(self.resolve(pattern).await?);
        }
        Ok(usable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockCatalog, init_dummy_tracing_subscriber};
    use crate::types::error::CatalogError;

    fn catalog() -> MockCatalog {
        MockCatalog::new().with_sites(&["SITE_A_DISK", "SITE_B_DISK", "SITE_A_TAPE"])
    }

    #[tokio::test]
    async fn resolves_prefix_pattern() {
        init_dummy_tracing_subscriber();

        let mut resolver = RseResolver::new(Box::new(catalog()));
        let resolved = resolver
            .resolve(&Pattern::new("SITE_A.*").unwrap())
            .await
            .unwrap();
        assert_eq!(
            resolved,
            BTreeSet::from(["SITE_A_DISK".to_string(), "SITE_A_TAPE".to_string()])
        );
    }

    #[tokio::test]
    async fn unmatched_pattern_resolves_to_empty_set() {
        let mut resolver = RseResolver::new(Box::new(catalog()));
        let resolved = resolver.resolve(&Pattern::new("NOPE").unwrap()).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn pattern_is_anchored_at_start() {
        let mut resolver = RseResolver::new(Box::new(catalog()));
        let resolved = resolver.resolve(&Pattern::new("DISK").unwrap()).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn resolve_all_unions_and_lists_once() {
        let mock = catalog();
        let mut resolver = RseResolver::new(Box::new(mock.clone()));
        let resolved = resolver
            .resolve_all(&PatternSet::new(&["SITE_B", ".*TAPE", "SITE_A_TAPE"]).unwrap())
            .await
            .unwrap();
        assert_eq!(
            resolved,
            BTreeSet::from(["SITE_A_TAPE".to_string(), "SITE_B_DISK".to_string()])
        );
        assert_eq!(mock.calls("list_rses"), 1);
    }

    #[tokio::test]
    async fn listing_failure_propagates() {
        let mock = catalog();
        mock.fail_site_listing(CatalogError::Transient("connection reset".to_string()));
        let mut resolver = RseResolver::new(Box::new(mock.clone()));

        let err = resolver
            .resolve(&Pattern::new("SITE_A.*").unwrap())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<CatalogError>().is_some_and(CatalogError::is_retryable));
        assert_eq!(mock.calls("list_rses"), 1);
    }
}
