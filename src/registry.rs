//! Source registry: the catalog of publications a run may scrape.
//!
//! Registration happens once at startup. Each run takes a [`RegistrySnapshot`]
//! holding freshly built scraper instances, so no scraper state survives from
//! one run to the next and adding a source never touches the pipeline.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::models::SourceDescriptor;
use crate::scrapers::SourceScraper;

/// Builds a fresh scraper instance.
pub type ScraperFactory = Arc<dyn Fn() -> Arc<dyn SourceScraper> + Send + Sync>;

struct Entry {
    descriptor: SourceDescriptor,
    factory: ScraperFactory,
}

/// Ordered mapping `source_id -> factory`.
#[derive(Default)]
pub struct ScraperRegistry {
    entries: Vec<Entry>,
}

/// One source as seen by a run.
#[derive(Clone)]
pub struct RegisteredSource {
    pub descriptor: SourceDescriptor,
    pub scraper: Arc<dyn SourceScraper>,
}

/// Scrapers for one run, in registration order.
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    sources: Vec<RegisteredSource>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `source_id`.
    ///
    /// The factory is invoked once to validate that the scraper it builds
    /// reports the same id. Re-registering an id replaces the factory and
    /// keeps its original position.
    pub fn register<F>(&mut self, source_id: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Arc<dyn SourceScraper> + Send + Sync + 'static,
    {
        if source_id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        let probe = factory();
        let descriptor = probe.descriptor().clone();
        if descriptor.source_id != source_id {
            return Err(RegistryError::IdMismatch {
                registered: source_id.to_string(),
                reported: descriptor.source_id,
            });
        }

        let entry = Entry {
            descriptor,
            factory: Arc::new(factory),
        };
        match self
            .entries
            .iter_mut()
            .find(|e| e.descriptor.source_id == source_id)
        {
            Some(existing) => {
                warn!(source_id, "Replacing registered scraper");
                *existing = entry;
            }
            None => {
                debug!(source_id, "Registered scraper");
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    /// Fresh scraper instances for every registered source.
    pub fn all(&self) -> Vec<RegisteredSource> {
        self.entries
            .iter()
            .map(|e| RegisteredSource {
                descriptor: e.descriptor.clone(),
                scraper: (e.factory)(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot { sources: self.all() }
    }

    pub fn descriptors(&self) -> Vec<&SourceDescriptor> {
        self.entries.iter().map(|e| &e.descriptor).collect()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.entries.iter().any(|e| e.descriptor.source_id == source_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RegistrySnapshot {
    pub fn sources(&self) -> &[RegisteredSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Keep only the requested ids (registration order is preserved).
    /// Returns the narrowed snapshot and the ids that matched nothing.
    pub fn select(self, ids: &[String]) -> (Self, Vec<String>) {
        let unknown = ids
            .iter()
            .filter(|id| !self.sources.iter().any(|s| &s.descriptor.source_id == *id))
            .cloned()
            .collect();
        let sources = self
            .sources
            .into_iter()
            .filter(|s| ids.contains(&s.descriptor.source_id))
            .collect();
        (Self { sources }, unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::testing::StaticScraper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn register_static(registry: &mut ScraperRegistry, id: &str) {
        let id_owned = id.to_string();
        registry
            .register(id, move || {
                Arc::new(StaticScraper::new(&id_owned, &[])) as Arc<dyn SourceScraper>
            })
            .unwrap();
    }

    #[test]
    fn test_all_preserves_registration_order() {
        let mut registry = ScraperRegistry::new();
        for id in ["domus", "bauwelt", "gooood"] {
            register_static(&mut registry, id);
        }
        let ids: Vec<String> = registry
            .all()
            .into_iter()
            .map(|s| s.descriptor.source_id)
            .collect();
        assert_eq!(ids, ["domus", "bauwelt", "gooood"]);
    }

    #[test]
    fn test_reregistering_replaces_in_place() {
        let mut registry = ScraperRegistry::new();
        register_static(&mut registry, "domus");
        register_static(&mut registry, "bauwelt");
        registry
            .register("domus", || {
                Arc::new(StaticScraper::new("domus", &["https://domus.example/a"]))
                    as Arc<dyn SourceScraper>
            })
            .unwrap();

        assert_eq!(registry.len(), 2);
        let first = &registry.all()[0];
        assert_eq!(first.descriptor.source_id, "domus");
    }

    #[test]
    fn test_rejects_mismatched_id() {
        let mut registry = ScraperRegistry::new();
        let err = registry
            .register("domus", || {
                Arc::new(StaticScraper::new("bauwelt", &[])) as Arc<dyn SourceScraper>
            })
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::IdMismatch {
                registered: "domus".into(),
                reported: "bauwelt".into()
            }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rejects_empty_id() {
        let mut registry = ScraperRegistry::new();
        let err = registry
            .register(" ", || Arc::new(StaticScraper::new("", &[])) as Arc<dyn SourceScraper>)
            .unwrap_err();
        assert_eq!(err, RegistryError::EmptyId);
    }

    #[test]
    fn test_each_snapshot_builds_fresh_instances() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = ScraperRegistry::new();
        registry
            .register("domus", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(StaticScraper::new("domus", &[])) as Arc<dyn SourceScraper>
            })
            .unwrap();

        let a = registry.snapshot();
        let b = registry.snapshot();
        // one probe at registration plus one per snapshot
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!Arc::ptr_eq(&a.sources()[0].scraper, &b.sources()[0].scraper));
    }

    #[test]
    fn test_select_reports_unknown_ids() {
        let mut registry = ScraperRegistry::new();
        for id in ["domus", "bauwelt", "gooood"] {
            register_static(&mut registry, id);
        }
        let (snapshot, unknown) = registry
            .snapshot()
            .select(&["gooood".to_string(), "domus".to_string(), "nope".to_string()]);
        let ids: Vec<&str> = snapshot
            .sources()
            .iter()
            .map(|s| s.descriptor.source_id.as_str())
            .collect();
        assert_eq!(ids, ["domus", "gooood"]);
        assert_eq!(unknown, ["nope"]);
    }
}
