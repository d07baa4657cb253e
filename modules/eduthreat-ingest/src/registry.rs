//! Adapter registries: three lookup tables populated at program start and
//! handed to the orchestrator as a value.

use std::sync::Arc;

use crate::adapter::SourceAdapter;
use crate::sources::curated::{DatabreachAdapter, KonbriefingAdapter, RansomwareLiveAdapter};
use crate::sources::news::NewsSearchAdapter;
use crate::sources::rss::RssAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceGroup {
    /// Sources with dedicated education-sector sections; every item is
    /// already in scope.
    Curated,
    /// Keyword-driven security news sites.
    News,
    /// Real-time feeds, filtered by keywords and age.
    Rss,
}

impl SourceGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceGroup::Curated => "curated",
            SourceGroup::News => "news",
            SourceGroup::Rss => "rss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "curated" => Some(SourceGroup::Curated),
            "news" => Some(SourceGroup::News),
            "rss" => Some(SourceGroup::Rss),
            _ => None,
        }
    }
}

pub struct SourceRegistry {
    curated: Vec<Arc<dyn SourceAdapter>>,
    news: Vec<Arc<dyn SourceAdapter>>,
    rss: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self {
            curated: Vec::new(),
            news: Vec::new(),
            rss: Vec::new(),
        }
    }

    /// The full production roster.
    pub fn standard(http: reqwest::Client) -> Self {
        let mut registry = Self::empty();

        registry.register(SourceGroup::Curated, Arc::new(KonbriefingAdapter::new(http.clone())));
        registry.register(SourceGroup::Curated, Arc::new(RansomwareLiveAdapter::new(http.clone())));
        registry.register(SourceGroup::Curated, Arc::new(DatabreachAdapter::new(http.clone())));

        for adapter in NewsSearchAdapter::roster(http.clone()) {
            registry.register(SourceGroup::News, Arc::new(adapter));
        }

        registry.register(SourceGroup::Rss, Arc::new(RssAdapter::databreaches(http.clone())));
        registry.register(SourceGroup::Rss, Arc::new(RssAdapter::bleepingcomputer(http)));

        registry
    }

    pub fn register(&mut self, group: SourceGroup, adapter: Arc<dyn SourceAdapter>) {
        match group {
            SourceGroup::Curated => self.curated.push(adapter),
            SourceGroup::News => self.news.push(adapter),
            SourceGroup::Rss => self.rss.push(adapter),
        }
    }

    pub fn group(&self, group: SourceGroup) -> &[Arc<dyn SourceAdapter>] {
        match group {
            SourceGroup::Curated => &self.curated,
            SourceGroup::News => &self.news,
            SourceGroup::Rss => &self.rss,
        }
    }

    /// Every registered tag, for CLI validation.
    pub fn all_tags(&self) -> Vec<String> {
        self.curated
            .iter()
            .chain(&self.news)
            .chain(&self.rss)
            .map(|a| a.tag().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_all_groups() {
        let registry = SourceRegistry::standard(reqwest::Client::new());
        assert_eq!(registry.group(SourceGroup::Curated).len(), 3);
        assert_eq!(registry.group(SourceGroup::News).len(), 5);
        assert_eq!(registry.group(SourceGroup::Rss).len(), 2);
    }

    #[test]
    fn tags_are_unique() {
        let registry = SourceRegistry::standard(reqwest::Client::new());
        let mut tags = registry.all_tags();
        let before = tags.len();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), before);
    }

    #[test]
    fn group_parse_roundtrip() {
        for g in [SourceGroup::Curated, SourceGroup::News, SourceGroup::Rss] {
            assert_eq!(SourceGroup::parse(g.as_str()), Some(g));
        }
        assert_eq!(SourceGroup::parse("social"), None);
    }
}
