//! Collaborators shared by every pool and inventory built on one loader.

use std::sync::Arc;

use crate::capability::AdapterTable;
use crate::events::EventBus;
use crate::loader::AssetLoader;
use crate::template::TemplateCache;

pub(crate) struct Services<L: AssetLoader> {
    pub(crate) templates: Arc<TemplateCache<L>>,
    pub(crate) adapters: Arc<AdapterTable<L::Instance>>,
    pub(crate) events: Arc<EventBus>,
}

impl<L: AssetLoader> Services<L> {
    pub(crate) fn new(loader: Arc<L>, event_buffer: usize) -> Self {
        let events = Arc::new(EventBus::new(event_buffer));
        Self {
            templates: Arc::new(TemplateCache::new(loader, Arc::clone(&events))),
            adapters: Arc::new(AdapterTable::new()),
            events,
        }
    }

    pub(crate) fn loader(&self) -> &Arc<L> {
        self.templates.loader()
    }
}

impl<L: AssetLoader> Clone for Services<L> {
    fn clone(&self) -> Self {
        Self {
            templates: Arc::clone(&self.templates),
            adapters: Arc::clone(&self.adapters),
            events: Arc::clone(&self.events),
        }
    }
}
