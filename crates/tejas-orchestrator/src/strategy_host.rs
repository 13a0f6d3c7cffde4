use std::collections::HashMap;
use tejas_strategy::Strategy;

/// Registry of named strategies, generalizing a single-strategy host to the
/// "one or more pluggable signal strategies" this engine runs concurrently.
/// Each tick visits every registered strategy in insertion order.
#[derive(Default)]
pub struct StrategyHost {
    order: Vec<String>,
    strategies: HashMap<String, Box<dyn Strategy>>,
}

impl StrategyHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        let name = strategy.name().to_string();
        if !self.strategies.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.strategies.insert(name, strategy);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Strategy + 'static)> {
        self.strategies.get_mut(name).map(|b| b.as_mut())
    }

    pub fn get(&self, name: &str) -> Option<&(dyn Strategy + 'static)> {
        self.strategies.get(name).map(|b| b.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
