// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named JSON values that survive agent restarts.
//!
//! With an empty state directory the agent keeps its state in memory and loses it on restart.
//! Service tasks use [`Persistence::store_async`] and [`Persistence::remove_async`], which run
//! disk writes on the blocking thread pool.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::AgentError;

const STATE_SUFFIX: &str = ".json";

#[derive(Debug)]
pub enum Persistence {
    Memory(Mutex<HashMap<String, String>>),
    Disk(PathBuf),
}

impl Persistence {
    #[must_use]
    pub fn memory() -> Self {
        Persistence::Memory(Mutex::new(HashMap::new()))
    }

    /// Disk persistence rooted at `dir`, which is created if it does not exist.
    pub fn disk(dir: impl AsRef<Path>) -> Result<Self, AgentError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| {
            AgentError::Persistence(format!(
                "unable to create state directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Persistence::Disk(dir.to_path_buf()))
    }

    /// Memory persistence for an empty path, disk persistence otherwise.
    pub fn for_state_dir(state_dir: &str) -> Result<Self, AgentError> {
        if state_dir.is_empty() {
            Ok(Self::memory())
        } else {
            Self::disk(state_dir)
        }
    }

    /// Loads the value stored under `name`, or `None` if nothing is stored.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, AgentError> {
        let text = match self {
            Persistence::Memory(values) => values
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .cloned(),
            Persistence::Disk(dir) => match fs::read_to_string(file_name(dir, name)) {
                Ok(text) => Some(text),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => return Err(AgentError::Persistence(format!("loading {name}: {e}"))),
            },
        };
        text.map(|t| serde_json::from_str(&t).map_err(AgentError::from))
            .transpose()
    }

    pub fn store<T: Serialize>(&self, name: &str, value: &T) -> Result<(), AgentError> {
        let text = serde_json::to_string(value)?;
        match self {
            Persistence::Memory(values) => {
                values
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.to_string(), text);
                Ok(())
            }
            Persistence::Disk(dir) => write_file(dir, name, &text),
        }
    }

    pub async fn store_async<T: Serialize>(&self, name: &str, value: &T) -> Result<(), AgentError> {
        let Persistence::Disk(dir) = self else {
            return self.store(name, value);
        };
        let text = serde_json::to_string(value)?;
        let (dir, owned) = (dir.clone(), name.to_string());
        tokio::task::spawn_blocking(move || write_file(&dir, &owned, &text))
            .await
            .map_err(|e| AgentError::Persistence(format!("storing {name}: {e}")))?
    }

    pub fn remove(&self, name: &str) -> Result<(), AgentError> {
        match self {
            Persistence::Memory(values) => {
                values
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(name);
                Ok(())
            }
            Persistence::Disk(dir) => remove_file(dir, name),
        }
    }

    pub async fn remove_async(&self, name: &str) -> Result<(), AgentError> {
        let Persistence::Disk(dir) = self else {
            return self.remove(name);
        };
        let (dir, owned) = (dir.clone(), name.to_string());
        tokio::task::spawn_blocking(move || remove_file(&dir, &owned))
            .await
            .map_err(|e| AgentError::Persistence(format!("removing {name}: {e}")))?
    }
}

fn write_file(dir: &Path, name: &str, text: &str) -> Result<(), AgentError> {
    // Write to a sibling temp file first so a crash never leaves a torn value.
    let path = file_name(dir, name);
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text)
        .and_then(|()| fs::rename(&tmp, &path))
        .map_err(|e| AgentError::Persistence(format!("storing {name}: {e}")))
}

fn remove_file(dir: &Path, name: &str) -> Result<(), AgentError> {
    match fs::remove_file(file_name(dir, name)) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            Err(AgentError::Persistence(format!("removing {name}: {e}")))
        }
        _ => Ok(()),
    }
}

/// Maps a logical name such as `aggregator/requests` to a flat file in the state directory.
fn file_name(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}{STATE_SUFFIX}", name.replace('/', "_")))
}
