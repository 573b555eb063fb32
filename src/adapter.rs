//! Change-event adapter
//!
//! Watches entity save/delete events and turns each one into a purge request:
//! the entity's own URLs plus the dependent pages listed for its type in the
//! [`DependencyMap`].
//!
//! URL resolution order for the entity itself:
//!
//! 1. the custom resolver given at registration (URLs used verbatim)
//! 2. the entity's [`Entity::absolute_url`] joined onto the site URL
//! 3. nothing (logged and skipped)
//!
//! A failing resolver never stops the dependency URLs from being purged and
//! never surfaces to the event source.

use crate::config::PurgeConfig;
use crate::coordinator::PurgeCoordinator;
use crate::error::{PurgeError, Result};
use crate::models::{build_full_url, DependencyMap, PendingSet, PurgeReport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

/// A domain object whose changes invalidate cached pages
pub trait Entity: Send + Sync {
    /// Stable type identifier, e.g. `"blog.post"`
    fn entity_type(&self) -> &str;

    /// Site-relative URL of this instance, if the type has one
    ///
    /// `None` means the type has no URL at all; `Some(Err(_))` means this
    /// particular instance could not produce one.
    fn absolute_url(&self) -> Option<Result<String>> {
        None
    }
}

/// Custom URL resolver registered for an entity type
pub type UrlResolver = Arc<dyn Fn(&dyn Entity) -> Result<Vec<String>> + Send + Sync>;

/// Per-type purge configuration in the adapter's capability table
#[derive(Clone)]
pub struct Registration {
    pub resolver: Option<UrlResolver>,
    pub include_dependencies: bool,
}

impl Registration {
    /// Default resolution with dependency URLs included
    pub fn new() -> Self {
        Self {
            resolver: None,
            include_dependencies: true,
        }
    }

    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&dyn Entity) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn include_dependencies(mut self, include: bool) -> Self {
        self.include_dependencies = include;
        self
    }
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("custom_resolver", &self.resolver.is_some())
            .field("include_dependencies", &self.include_dependencies)
            .finish()
    }
}

/// Receives change events for the entity types it is connected to
#[async_trait]
pub trait ChangeObserver: Send + Sync {
    async fn on_save(&self, entity: &dyn Entity, created: bool);
    async fn on_delete(&self, entity: &dyn Entity);
}

/// Something that can deliver change events per entity type
pub trait EventSource: Send + Sync {
    /// Attach `observer` to events of `entity_type`, replacing any previous one
    fn connect(&self, entity_type: &str, observer: Arc<dyn ChangeObserver>);

    /// Detach the observer of `entity_type`
    fn disconnect(&self, entity_type: &str);
}

/// In-process event source: whoever mutates entities calls `emit_*`
#[derive(Default)]
pub struct ChangeBus {
    observers: RwLock<HashMap<String, Arc<dyn ChangeObserver>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a create/update event
    pub async fn emit_saved(&self, entity: &dyn Entity, created: bool) {
        if let Some(observer) = self.observer_for(entity.entity_type()) {
            observer.on_save(entity, created).await;
        }
    }

    /// Deliver a delete event
    pub async fn emit_deleted(&self, entity: &dyn Entity) {
        if let Some(observer) = self.observer_for(entity.entity_type()) {
            observer.on_delete(entity).await;
        }
    }

    pub fn is_connected(&self, entity_type: &str) -> bool {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(entity_type)
    }

    fn observer_for(&self, entity_type: &str) -> Option<Arc<dyn ChangeObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .cloned()
    }
}

impl EventSource for ChangeBus {
    fn connect(&self, entity_type: &str, observer: Arc<dyn ChangeObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.to_string(), observer);
    }

    fn disconnect(&self, entity_type: &str) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity_type);
    }
}

struct AdapterInner {
    coordinator: PurgeCoordinator,
    dependencies: DependencyMap,
    site_url: String,
    registry: RwLock<HashMap<String, Registration>>,
}

/// Maps entity change events to coordinator purge requests
#[derive(Clone)]
pub struct ChangeAdapter {
    inner: Arc<AdapterInner>,
    source: Arc<dyn EventSource>,
}

impl ChangeAdapter {
    pub fn new(
        coordinator: PurgeCoordinator,
        source: Arc<dyn EventSource>,
        dependencies: DependencyMap,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                coordinator,
                dependencies,
                site_url: site_url.into(),
                registry: RwLock::new(HashMap::new()),
            }),
            source,
        }
    }

    /// Create an adapter using the dependency map and site URL in `config`
    pub fn from_config(
        coordinator: PurgeCoordinator,
        source: Arc<dyn EventSource>,
        config: &PurgeConfig,
    ) -> Self {
        Self::new(
            coordinator,
            source,
            config.url_dependencies.clone(),
            config.site_url.clone(),
        )
    }

    /// Watch an entity type; registering again replaces the configuration
    pub fn register(&self, entity_type: impl Into<String>, registration: Registration) {
        let entity_type = entity_type.into();
        debug!("Registered {} for cache purging: {:?}", entity_type, registration);

        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type.clone(), registration);

        self.source.connect(
            &entity_type,
            Arc::new(AdapterObserver {
                inner: self.inner.clone(),
            }),
        );
    }

    /// Stop watching an entity type, returning whether it was registered
    pub fn unregister(&self, entity_type: &str) -> bool {
        let removed = self
            .inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity_type)
            .is_some();
        self.source.disconnect(entity_type);

        if removed {
            debug!("Unregistered {} from cache purging", entity_type);
        }
        removed
    }

    pub fn is_registered(&self, entity_type: &str) -> bool {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(entity_type)
    }

    /// Registered type identifiers, sorted
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// URLs a change to `entity` invalidates under `registration`
    pub fn resolve_urls(&self, entity: &dyn Entity, registration: &Registration) -> Vec<String> {
        self.inner.resolve_urls(entity, registration)
    }

    /// Purge one entity directly, outside the event flow
    ///
    /// Unlike event-driven purges, coordinator errors are returned.
    pub async fn purge_entity(
        &self,
        entity: &dyn Entity,
        registration: &Registration,
    ) -> Result<Option<PurgeReport>> {
        self.inner.purge_entity(entity, registration).await
    }
}

impl AdapterInner {
    fn resolve_urls(&self, entity: &dyn Entity, registration: &Registration) -> Vec<String> {
        let mut urls = PendingSet::new();

        match self.own_urls(entity, registration) {
            Ok(own) => {
                urls.extend(own);
            }
            Err(e) => warn!(
                "Failed to get URL for {} instance: {}",
                entity.entity_type(),
                e
            ),
        }

        if registration.include_dependencies {
            urls.extend(self.dependencies.expand(entity.entity_type(), &self.site_url));
        }

        urls.into_vec()
    }

    fn own_urls(&self, entity: &dyn Entity, registration: &Registration) -> Result<Vec<String>> {
        if let Some(resolver) = &registration.resolver {
            return resolver(entity);
        }

        match entity.absolute_url() {
            Some(url) => Ok(vec![build_full_url(&self.site_url, &url?)]),
            None => {
                debug!("{} has no default URL", entity.entity_type());
                Ok(Vec::new())
            }
        }
    }

    async fn purge_entity(
        &self,
        entity: &dyn Entity,
        registration: &Registration,
    ) -> Result<Option<PurgeReport>> {
        let urls = self.resolve_urls(entity, registration);
        if urls.is_empty() {
            debug!("No URLs to purge for {} instance", entity.entity_type());
            return Ok(None);
        }

        self.coordinator.request_purge(urls, None).await
    }

    /// Event entry point; swallows every error after logging it
    ///
    /// Returns how many URLs were handed to the coordinator.
    async fn handle_change(&self, entity: &dyn Entity) -> usize {
        let entity_type = entity.entity_type();
        let registration = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
            .cloned();

        let Some(registration) = registration else {
            debug!("Ignoring change to unregistered type {}", entity_type);
            return 0;
        };

        let urls = self.resolve_urls(entity, &registration);
        if urls.is_empty() {
            debug!("No URLs to purge for {} instance", entity_type);
            return 0;
        }

        let count = urls.len();
        match self.coordinator.request_purge(urls, None).await {
            Ok(Some(report)) => info!(
                "Purged {} URLs for {} instance",
                report.item_count, entity_type
            ),
            Ok(None) => info!("Queued {} URLs for purge of {} instance", count, entity_type),
            Err(e) => error!("Failed to purge cache for {} instance: {}", entity_type, e),
        }
        count
    }
}

struct AdapterObserver {
    inner: Arc<AdapterInner>,
}

#[async_trait]
impl ChangeObserver for AdapterObserver {
    async fn on_save(&self, entity: &dyn Entity, created: bool) {
        debug!(
            "{} instance {}",
            entity.entity_type(),
            if created { "created" } else { "updated" }
        );
        self.inner.handle_change(entity).await;
    }

    async fn on_delete(&self, entity: &dyn Entity) {
        debug!("{} instance deleted", entity.entity_type());
        self.inner.handle_change(entity).await;
    }
}

/// Shorthand for resolver errors
pub fn resolution_error(message: impl Into<String>) -> PurgeError {
    PurgeError::Resolution(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PurgeApi;
    use crate::coordinator::CoordinatorSettings;
    use crate::models::PurgeOutcome;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl PurgeApi for RecordingApi {
        async fn purge_everything(&self) -> Result<PurgeOutcome> {
            Ok(PurgeOutcome::empty())
        }
        async fn purge_urls(&self, urls: &[String]) -> Result<PurgeOutcome> {
            self.calls.lock().unwrap().push(urls.to_vec());
            Ok(PurgeOutcome::empty())
        }
        async fn purge_tags(&self, _tags: &[String]) -> Result<PurgeOutcome> {
            Ok(PurgeOutcome::empty())
        }
        async fn purge_prefixes(&self, _prefixes: &[String]) -> Result<PurgeOutcome> {
            Ok(PurgeOutcome::empty())
        }
        async fn verify_token(&self) -> Result<PurgeOutcome> {
            Ok(PurgeOutcome::empty())
        }
    }

    struct Post {
        url: Option<&'static str>,
    }

    impl Entity for Post {
        fn entity_type(&self) -> &str {
            "blog.post"
        }

        fn absolute_url(&self) -> Option<Result<String>> {
            Some(
                self.url
                    .map(str::to_string)
                    .ok_or_else(|| resolution_error("post has no slug")),
            )
        }
    }

    struct Tag;

    impl Entity for Tag {
        fn entity_type(&self) -> &str {
            "blog.tag"
        }
    }

    fn setup() -> (Arc<RecordingApi>, Arc<ChangeBus>, ChangeAdapter) {
        let api = Arc::new(RecordingApi::default());
        let coordinator = PurgeCoordinator::new(
            api.clone(),
            CoordinatorSettings {
                background_default: false,
                ..Default::default()
            },
        );
        let bus = Arc::new(ChangeBus::new());
        let mut deps = DependencyMap::new();
        deps.insert("blog.post", ["/blog/", "/"]);
        deps.insert("blog.tag", ["/tags/"]);
        let adapter = ChangeAdapter::new(coordinator, bus.clone(), deps, "https://x.com");
        (api, bus, adapter)
    }

    #[test]
    fn test_resolve_default_url_and_dependencies() {
        let (_, _, adapter) = setup();
        let urls = adapter.resolve_urls(&Post { url: Some("/blog/p1/") }, &Registration::new());
        assert_eq!(
            urls,
            vec!["https://x.com/blog/p1/", "https://x.com/blog/", "https://x.com/"]
        );
    }

    #[test]
    fn test_resolve_without_dependencies() {
        let (_, _, adapter) = setup();
        let registration = Registration::new().include_dependencies(false);
        let urls = adapter.resolve_urls(&Post { url: Some("/page/") }, &registration);
        assert_eq!(urls, vec!["https://x.com/page/"]);
    }

    #[test]
    fn test_custom_resolver_takes_precedence() {
        let (_, _, adapter) = setup();
        let registration = Registration::new()
            .with_resolver(|_| Ok(vec!["https://custom.com/1".to_string(), "https://custom.com/2".to_string()]))
            .include_dependencies(false);
        let urls = adapter.resolve_urls(&Post { url: Some("/ignored/") }, &registration);
        assert_eq!(urls, vec!["https://custom.com/1", "https://custom.com/2"]);
    }

    #[test]
    fn test_resolver_failure_keeps_dependencies() {
        let (_, _, adapter) = setup();
        let urls = adapter.resolve_urls(&Post { url: None }, &Registration::new());
        assert_eq!(urls, vec!["https://x.com/blog/", "https://x.com/"]);

        let registration = Registration::new().with_resolver(|_| Err(resolution_error("boom")));
        let urls = adapter.resolve_urls(&Post { url: Some("/p/") }, &registration);
        assert_eq!(urls, vec!["https://x.com/blog/", "https://x.com/"]);
    }

    #[test]
    fn test_entity_without_default_url() {
        let (_, _, adapter) = setup();
        let urls = adapter.resolve_urls(&Tag, &Registration::new());
        assert_eq!(urls, vec!["https://x.com/tags/"]);
    }

    #[test]
    fn test_dependency_duplicates_collapse() {
        let (_, _, adapter) = setup();
        let urls = adapter.resolve_urls(&Post { url: Some("/blog/") }, &Registration::new());
        assert_eq!(urls, vec!["https://x.com/blog/", "https://x.com/"]);
    }

    #[tokio::test]
    async fn test_register_and_events() {
        let (api, bus, adapter) = setup();
        assert!(!adapter.is_registered("blog.post"));

        // Unregistered: nothing happens
        bus.emit_saved(&Post { url: Some("/blog/p1/") }, true).await;
        assert!(api.calls.lock().unwrap().is_empty());

        adapter.register("blog.post", Registration::new());
        assert!(adapter.is_registered("blog.post"));
        assert!(bus.is_connected("blog.post"));

        bus.emit_saved(&Post { url: Some("/blog/p1/") }, true).await;
        bus.emit_deleted(&Post { url: Some("/blog/p2/") }).await;
        assert_eq!(api.calls.lock().unwrap().len(), 2);

        assert!(adapter.unregister("blog.post"));
        assert!(!bus.is_connected("blog.post"));
        bus.emit_saved(&Post { url: Some("/blog/p3/") }, false).await;
        assert_eq!(api.calls.lock().unwrap().len(), 2);
        assert!(!adapter.unregister("blog.post"));
    }

    #[tokio::test]
    async fn test_reregistration_replaces_configuration() {
        let (api, bus, adapter) = setup();
        adapter.register("blog.post", Registration::new());
        adapter.register("blog.post", Registration::new().include_dependencies(false));
        assert_eq!(adapter.registered_types(), vec!["blog.post"]);

        bus.emit_saved(&Post { url: Some("/blog/p1/") }, false).await;
        assert_eq!(
            api.calls.lock().unwrap().clone(),
            vec![vec!["https://x.com/blog/p1/".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_purge_entity_with_nothing_to_purge() {
        let api = Arc::new(RecordingApi::default());
        let coordinator = PurgeCoordinator::new(api.clone(), CoordinatorSettings::default());
        let adapter = ChangeAdapter::new(
            coordinator,
            Arc::new(ChangeBus::new()),
            DependencyMap::new(),
            "",
        );
        let result = adapter.purge_entity(&Tag, &Registration::new()).await.unwrap();
        assert!(result.is_none());
        assert!(api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_with_nothing_resolved_is_not_dispatched() {
        let api = Arc::new(RecordingApi::default());
        let coordinator = PurgeCoordinator::new(
            api.clone(),
            CoordinatorSettings {
                background_default: false,
                ..Default::default()
            },
        );
        let adapter = ChangeAdapter::new(
            coordinator,
            Arc::new(ChangeBus::new()),
            DependencyMap::new(),
            "",
        );
        adapter.register("blog.tag", Registration::new());
        adapter.register("blog.post", Registration::new());

        assert_eq!(adapter.inner.handle_change(&Tag).await, 0);
        assert!(api.calls.lock().unwrap().is_empty());

        assert_eq!(adapter.inner.handle_change(&Post { url: Some("/p/") }).await, 1);
        assert_eq!(api.calls.lock().unwrap().len(), 1);
    }
}
