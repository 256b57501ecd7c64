use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub enum Event {
    PipelineBuildStarted { model: String, backend: String },
    PipelineBuildFinished { model: String, millis: u128 },
    BatchStarted { index: usize, count: usize, seed: u32 },
    BatchCompleted { index: usize, count: usize, millis: u128 },
    StepCompleted { step: usize, total: usize, millis: u128 },
    PreviewReady { step: usize },
    GenerationError { message: String },
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
    fn name(&self) -> &str;
}

pub type HandlerId = usize;

pub struct EventBus {
    handlers: RwLock<HashMap<HandlerId, (String, Arc<dyn EventHandler>)>>,
    next_id: RwLock<HandlerId>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: RwLock::new(0),
        }
    }

    pub fn subscribe<H: EventHandler + 'static>(&self, handler: H) -> HandlerId {
        let mut id = self.next_id.write().unwrap();
        *id += 1;
        let handler_id = *id;
        drop(id);

        let name = handler.name().to_string();
        self.handlers
            .write()
            .unwrap()
            .insert(handler_id, (name, Arc::new(handler)));

        handler_id
    }

    pub fn unsubscribe(&self, handler_id: HandlerId) {
        self.handlers.write().unwrap().remove(&handler_id);
    }

    pub fn publish(&self, event: Event) {
        for (_, handler) in self.handlers.read().unwrap().values() {
            handler.handle(&event);
        }
    }

    pub fn clear(&self) {
        self.handlers.write().unwrap().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &Event) {
        match event {
            Event::GenerationError { message } => tracing::warn!("generation error: {}", message),
            other => tracing::debug!("event: {:?}", other),
        }
    }

    fn name(&self) -> &str {
        "logging"
    }
}

pub static EVENT_BUS: once_cell::sync::Lazy<EventBus> = once_cell::sync::Lazy::new(EventBus::new);

pub fn subscribe<H: EventHandler + 'static>(handler: H) -> HandlerId {
    EVENT_BUS.subscribe(handler)
}

pub fn unsubscribe(handler_id: HandlerId) {
    EVENT_BUS.unsubscribe(handler_id)
}

pub fn publish(event: Event) {
    EVENT_BUS.publish(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    impl EventHandler for Counter {
        fn handle(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn name(&self) -> &str {
            "counter"
        }
    }

    #[test]
    fn test_subscribe_publish_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(Counter(Arc::clone(&count)));

        bus.publish(Event::PreviewReady { step: 0 });
        bus.publish(Event::PreviewReady { step: 5 });
        assert_eq!(count.load(Ordering::SeqCst), 2);

        bus.unsubscribe(id);
        bus.publish(Event::PreviewReady { step: 10 });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
