use std::{
    any::Any,
    collections::{HashMap, HashSet},
};

use crate::error::PlacementError;

/// Data a plugin stores in [`CycleState`] between extension points.
pub trait StateData: Any + Send + Sync {
    /// Copies the data for a dry-run of the cycle, e.g. while evaluating
    /// preemption victims. Values mutated by `add_pod`/`remove_pod` must be
    /// deep-copied.
    fn clone_data(&self) -> Box<dyn StateData>;

    fn as_any(&self) -> &dyn Any;
}

/// Scratch space for one scheduling attempt of one pod.
#[derive(Default)]
pub struct CycleState {
    storage: HashMap<String, Box<dyn StateData>>,
    pub skip_filter_plugins: HashSet<String>,
    pub skip_score_plugins: HashSet<String>,
}

impl CycleState {
    pub fn read<T: 'static>(&self, key: &str) -> Result<&T, PlacementError> {
        self.storage
            .get(key)
            .and_then(|i| i.as_any().downcast_ref())
            .ok_or_else(|| PlacementError::StateNotFound(key.to_string()))
    }

    pub fn write(&mut self, key: &str, value: Box<dyn StateData>) {
        self.storage.insert(key.to_string(), value);
    }

    pub fn delete(&mut self, key: &str) {
        self.storage.remove(key);
    }
}

impl Clone for CycleState {
    fn clone(&self) -> Self {
        Self {
            storage: self
                .storage
                .iter()
                .map(|(k, v)| (k.clone(), v.clone_data()))
                .collect(),
            skip_filter_plugins: self.skip_filter_plugins.clone(),
            skip_score_plugins: self.skip_score_plugins.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, Ordering};

    use super::*;

    struct Counter(AtomicI32);

    impl StateData for Counter {
        fn clone_data(&self) -> Box<dyn StateData> {
            Box::new(Counter(AtomicI32::new(self.0.load(Ordering::SeqCst))))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_read_missing_key() {
        let state = CycleState::default();
        assert!(matches!(
            state.read::<Counter>("missing"),
            Err(PlacementError::StateNotFound(_))
        ));
    }

    #[test]
    fn test_read_wrong_type() {
        let mut state = CycleState::default();
        state.write("counter", Box::new(Counter(AtomicI32::new(1))));
        assert!(state.read::<String>("counter").is_err());
        assert!(state.read::<Counter>("counter").is_ok());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut state = CycleState::default();
        state.write("counter", Box::new(Counter(AtomicI32::new(1))));
        let cloned = state.clone();
        state
            .read::<Counter>("counter")
            .unwrap()
            .0
            .fetch_add(5, Ordering::SeqCst);
        assert_eq!(
            cloned.read::<Counter>("counter").unwrap().0.load(Ordering::SeqCst),
            1
        );
    }
}
