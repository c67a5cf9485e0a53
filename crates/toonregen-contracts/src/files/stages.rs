use serde::{Deserialize, Serialize};

use crate::error::RegenError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub label: String,
}

/// Ordered production stages a committed file can be filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLadder {
    stages: Vec<Stage>,
}

impl Default for StageLadder {
    fn default() -> Self {
        Self::new(
            [
                ("sketch", "Sketch"),
                ("line-art", "Line art"),
                ("flat-color", "Flat color"),
                ("shading", "Shading"),
                ("background", "Background"),
                ("final", "Final"),
            ]
            .into_iter()
            .map(|(id, label)| Stage {
                id: id.to_string(),
                label: label.to_string(),
            })
            .collect(),
        )
    }
}

impl StageLadder {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn get(&self, id: &str) -> Option<&Stage> {
        let id = id.trim();
        self.stages.iter().find(|stage| stage.id == id)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The stage after `current`; the last stage maps to itself.
    pub fn next_after(&self, current: &str) -> Option<&Stage> {
        let current = current.trim();
        let position = self.stages.iter().position(|stage| stage.id == current)?;
        self.stages
            .get(position + 1)
            .or_else(|| self.stages.get(position))
    }

    /// Commit target: an explicit override, or the stage after the source's.
    pub fn commit_target(
        &self,
        source_stage: &str,
        requested: Option<&str>,
    ) -> Result<&Stage, RegenError> {
        if let Some(requested) = requested.map(str::trim).filter(|value| !value.is_empty()) {
            return self
                .get(requested)
                .ok_or_else(|| RegenError::validation(format!("unknown stage '{requested}'")));
        }
        self.next_after(source_stage).ok_or_else(|| {
            RegenError::validation(format!("unknown source stage '{}'", source_stage.trim()))
        })
    }
}
