//! In-memory calculation registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Calculation;
use crate::{RecordsError, RecordsResult};

/// Calculations keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    calculations: BTreeMap<String, Calculation>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new record. An existing record with the same name is left as is.
    pub fn insert_new(&mut self, calc: Calculation) -> RecordsResult<()> {
        if self.calculations.contains_key(&calc.name) {
            return Err(RecordsError::DuplicateName { name: calc.name });
        }
        self.calculations.insert(calc.name.clone(), calc);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.calculations.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Calculation> {
        self.calculations.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Calculation> {
        self.calculations.get_mut(name)
    }

    pub fn require(&self, name: &str) -> RecordsResult<&Calculation> {
        self.get(name).ok_or_else(|| RecordsError::NotFound {
            name: name.to_string(),
        })
    }

    pub fn require_mut(&mut self, name: &str) -> RecordsResult<&mut Calculation> {
        self.calculations
            .get_mut(name)
            .ok_or_else(|| RecordsError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Calculation> {
        self.calculations.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.calculations.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.calculations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calculations.is_empty()
    }
}
