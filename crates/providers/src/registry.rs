//! Priority-ordered provider registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::{ProviderError, Source};

/// Highest priority: matched first.
pub const PRIORITY_HIGHEST: i16 = i16::MIN;
/// Default priority.
pub const PRIORITY_DEFAULT: i16 = 0;
/// Lowest priority: matched last. Catch-all providers register here.
pub const PRIORITY_LOWEST: i16 = i16::MAX;

/// A match function: inspect the input and either produce a [`Source`] or
/// explain why this provider does not handle it.
pub type MatchFn = Arc<dyn Fn(&str) -> Result<Arc<dyn Source>, ProviderError> + Send + Sync>;

/// A named URL matcher.
#[derive(Clone)]
pub struct Provider {
    pub name: String,
    pub match_fn: MatchFn,
    /// Lower (including negative) matches earlier.
    pub priority: i16,
}

impl Provider {
    pub fn new(name: impl Into<String>, match_fn: MatchFn) -> Self {
        Self {
            name: name.into(),
            match_fn,
            priority: PRIORITY_DEFAULT,
        }
    }

    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// The result of a provider successfully matching a URL.
#[derive(Clone)]
pub struct Match {
    pub provider_name: String,
    pub source: Arc<dyn Source>,
}

impl std::fmt::Debug for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Match")
            .field("provider_name", &self.provider_name)
            .field("source", &self.source.url())
            .finish()
    }
}

/// A collection of providers tried in priority order.
///
/// The registry is populated during startup and read without locking
/// afterwards; matching takes `&self`.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
    by_name: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. The name must be non-empty and unique within
    /// the registry.
    pub fn add(&mut self, provider: Provider) -> Result<(), ProviderError> {
        if provider.name.is_empty() {
            return Err(ProviderError::InvalidProvider);
        }
        if self.by_name.contains_key(&provider.name) {
            return Err(ProviderError::DuplicateProvider(provider.name));
        }
        debug!(name = %provider.name, priority = provider.priority, "provider registered");
        self.providers.push(provider);
        self.sort_by_priority();
        Ok(())
    }

    /// Shortcut for [`add`](Self::add) with a default-priority provider.
    pub fn create(&mut self, name: impl Into<String>, match_fn: MatchFn) -> Result<(), ProviderError> {
        self.add(Provider::new(name, match_fn))
    }

    /// Shortcut for [`add`](Self::add) with an explicit priority.
    pub fn create_with_priority(
        &mut self,
        name: impl Into<String>,
        match_fn: MatchFn,
        priority: i16,
    ) -> Result<(), ProviderError> {
        self.add(Provider::new(name, match_fn).with_priority(priority))
    }

    /// Names of registered providers, in priority order.
    pub fn list(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    /// Priority of the named provider.
    pub fn get_priority(&self, name: &str) -> Result<i16, ProviderError> {
        self.by_name
            .get(name)
            .map(|&i| self.providers[i].priority)
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    /// Change the priority of the named provider.
    pub fn set_priority(&mut self, name: &str, priority: i16) -> Result<(), ProviderError> {
        let index = *self
            .by_name
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))?;
        self.providers[index].priority = priority;
        self.sort_by_priority();
        Ok(())
    }

    /// Try every provider in priority order.
    ///
    /// On failure, returns [`ProviderError::NoMatch`] carrying each
    /// provider's reason for rejecting the input.
    pub fn match_url(&self, input: &str) -> Result<Match, ProviderError> {
        let mut reasons = Vec::new();
        for provider in &self.providers {
            match (provider.match_fn)(input) {
                Ok(source) => {
                    debug!(provider = %provider.name, url = input, "matched");
                    return Ok(Match {
                        provider_name: provider.name.clone(),
                        source,
                    });
                }
                Err(err) => reasons.push((provider.name.clone(), err.to_string())),
            }
        }
        Err(ProviderError::NoMatch(reasons))
    }

    /// Try a specific provider by name.
    pub fn match_with(&self, name: &str, input: &str) -> Result<Match, ProviderError> {
        let index = *self
            .by_name
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))?;
        let provider = &self.providers[index];
        let source = (provider.match_fn)(input)
            .map_err(|err| ProviderError::MatchFailed(err.to_string()))?;
        Ok(Match {
            provider_name: provider.name.clone(),
            source,
        })
    }

    fn sort_by_priority(&mut self) {
        self.providers.sort_by_key(|p| p.priority);
        self.by_name = self
            .providers
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ResolvedSource, SourceInfo};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct FakeSource {
        url: String,
    }

    #[async_trait]
    impl Source for FakeSource {
        fn url(&self) -> &str {
            &self.url
        }

        fn display_name(&self) -> String {
            self.url.clone()
        }

        async fn recon(
            &self,
            _token: CancellationToken,
        ) -> Result<Arc<dyn ResolvedSource>, ProviderError> {
            Err(ProviderError::ReconFailed("fake".into()))
        }
    }

    fn accepting(prefix: &'static str) -> MatchFn {
        Arc::new(move |input: &str| {
            if input.starts_with(prefix) {
                Ok(Arc::new(FakeSource {
                    url: input.to_string(),
                }) as Arc<dyn Source>)
            } else {
                Err(ProviderError::MatchFailed(format!("not {prefix}")))
            }
        })
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ProviderRegistry::new();
        registry.create("a", accepting("a:")).unwrap();
        assert!(matches!(
            registry.create("a", accepting("a:")),
            Err(ProviderError::DuplicateProvider(_))
        ));
    }

    #[test]
    fn rejects_empty_name() {
        let mut registry = ProviderRegistry::new();
        assert!(matches!(
            registry.create("", accepting("a:")),
            Err(ProviderError::InvalidProvider)
        ));
    }

    #[test]
    fn matches_in_priority_order() {
        let mut registry = ProviderRegistry::new();
        registry
            .create_with_priority("fallback", accepting("x:"), PRIORITY_LOWEST)
            .unwrap();
        registry
            .create_with_priority("preferred", accepting("x:"), PRIORITY_HIGHEST)
            .unwrap();
        let m = registry.match_url("x:thing").unwrap();
        assert_eq!(m.provider_name, "preferred");
        assert_eq!(registry.list(), vec!["preferred", "fallback"]);
    }

    #[test]
    fn no_match_collects_reasons() {
        let mut registry = ProviderRegistry::new();
        registry.create("a", accepting("a:")).unwrap();
        registry.create("b", accepting("b:")).unwrap();
        let err = registry.match_url("c:thing").unwrap_err();
        match err {
            ProviderError::NoMatch(reasons) => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons.iter().any(|(name, _)| name == "a"));
                assert!(reasons.iter().any(|(name, _)| name == "b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn match_with_requires_known_provider() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.match_with("nope", "x:thing"),
            Err(ProviderError::UnknownProvider(_))
        ));
    }

    #[test]
    fn match_with_uses_named_provider_only() {
        let mut registry = ProviderRegistry::new();
        registry.create("a", accepting("a:")).unwrap();
        registry.create("b", accepting("b:")).unwrap();
        assert!(registry.match_with("a", "a:thing").is_ok());
        assert!(matches!(
            registry.match_with("a", "b:thing"),
            Err(ProviderError::MatchFailed(_))
        ));
    }

    #[test]
    fn set_priority_reorders() {
        let mut registry = ProviderRegistry::new();
        registry.create("a", accepting("x:")).unwrap();
        registry.create("b", accepting("x:")).unwrap();
        registry.set_priority("b", PRIORITY_HIGHEST).unwrap();
        assert_eq!(registry.match_url("x:thing").unwrap().provider_name, "b");
        assert_eq!(registry.get_priority("b").unwrap(), PRIORITY_HIGHEST);
    }
}
