//! Model lifecycle manager
//!
//! Tracks which models are declared (manifest), downloaded (metadata
//! registry) and loaded (runner registry). Both registries and the set of
//! in-flight operations live behind one mutex.
//!
//! The mutex is only held for map reads and writes, never across a download
//! or an engine construction. Concurrent loads of different models therefore
//! run in parallel. Two callers racing on the same model are serialized by an
//! in-flight marker claimed under the lock: the first caller does the work,
//! later callers wait for the marker to clear and then re-check the
//! registries. The slow work runs in its own task which owns the marker and
//! records the result, so a caller that goes away never cancels it.

use super::download::Downloader;
use super::loader::Runner;
use super::storage;
use crate::engine::{EngineLoadError, EngineLoader};
use crate::error::LifecycleError;
use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// A model whose complete files exist on local storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub local_path: PathBuf,
}

/// Successful result of [`ModelManager::download`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullOutcome {
    Downloaded,
    AlreadyDownloaded,
}

/// Successful result of [`ModelManager::load`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded,
    AlreadyLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Operation {
    Download,
    Load,
}

type InFlightKey = (Operation, String);

#[derive(Default)]
struct Registries {
    metadata: HashMap<String, ModelMetadata>,
    runners: HashMap<String, Arc<Runner>>,
    /// Dropping the sender wakes every waiter
    in_flight: HashMap<InFlightKey, watch::Sender<()>>,
}

type SharedRegistries = Arc<Mutex<Registries>>;

fn lock(registries: &Mutex<Registries>) -> MutexGuard<'_, Registries> {
    registries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes its in-flight marker when dropped
struct InFlightGuard {
    registries: SharedRegistries,
    key: InFlightKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.registries).in_flight.remove(&self.key);
    }
}

/// Claim the in-flight marker for an operation, or subscribe to the holder
fn claim(
    registries: &mut Registries,
    shared: &SharedRegistries,
    operation: Operation,
    model_id: &str,
) -> Result<InFlightGuard, watch::Receiver<()>> {
    let key = (operation, model_id.to_string());
    if let Some(holder) = registries.in_flight.get(&key) {
        return Err(holder.subscribe());
    }

    let (tx, _) = watch::channel(());
    registries.in_flight.insert(key.clone(), tx);
    Ok(InFlightGuard {
        registries: shared.clone(),
        key,
    })
}

/// Resolves once the marker holder is gone
async fn wait_for(mut marker: watch::Receiver<()>) {
    while marker.changed().await.is_ok() {}
}

/// Facade over the manifest, the metadata registry and the runner registry
pub struct ModelManager {
    manifest: Arc<Manifest>,
    models_dir: PathBuf,
    downloader: Downloader,
    loader: Arc<dyn EngineLoader>,
    registries: SharedRegistries,
}

impl ModelManager {
    /// Create a manager with empty registries
    pub fn new(
        manifest: Manifest,
        models_dir: PathBuf,
        downloader: Downloader,
        loader: Arc<dyn EngineLoader>,
    ) -> Self {
        Self {
            manifest: Arc::new(manifest),
            models_dir,
            downloader,
            loader,
            registries: Arc::new(Mutex::new(Registries::default())),
        }
    }

    /// Create a manager and register models already present in `models_dir`
    pub async fn init(
        manifest: Manifest,
        models_dir: PathBuf,
        downloader: Downloader,
        loader: Arc<dyn EngineLoader>,
    ) -> std::io::Result<Self> {
        let manager = Self::new(manifest, models_dir, downloader, loader);

        tracing::info!(models_dir = ?manager.models_dir, "Loading info for previously downloaded models");
        for found in storage::discover_downloaded(&manager.models_dir).await? {
            manager.add_metadata(&found.model_id, found.path);
        }
        tracing::info!(count = manager.list_downloaded().len(), "Loaded info for downloaded models");

        Ok(manager)
    }

    /// Record that a model's files exist at `local_path`
    pub fn add_metadata(&self, model_id: &str, local_path: PathBuf) {
        lock(&self.registries).metadata.insert(
            model_id.to_string(),
            ModelMetadata {
                model_id: model_id.to_string(),
                local_path,
            },
        );
    }

    pub fn is_downloaded(&self, model_id: &str) -> bool {
        lock(&self.registries).metadata.contains_key(model_id)
    }

    /// Download a declared model into local storage
    pub async fn download(&self, model_id: &str) -> Result<PullOutcome, LifecycleError> {
        let entry = self
            .manifest
            .lookup(model_id)
            .cloned()
            .ok_or_else(|| LifecycleError::ModelNotRecognized(model_id.to_string()))?;

        if !storage::is_valid_model_id(model_id) {
            return Err(LifecycleError::Fail(format!(
                "Model id [{}] cannot be used as a directory name",
                model_id
            )));
        }

        let guard = loop {
            let marker = {
                let mut registries = lock(&self.registries);
                if registries.metadata.contains_key(model_id) {
                    return Ok(PullOutcome::AlreadyDownloaded);
                }
                match claim(&mut registries, &self.registries, Operation::Download, model_id) {
                    Ok(guard) => break guard,
                    Err(marker) => marker,
                }
            };
            tracing::debug!(model_id = %model_id, "Waiting for in-flight download");
            wait_for(marker).await;
        };

        let destination = storage::model_dir(&self.models_dir, model_id);
        let downloader = self.downloader.clone();
        let registries = self.registries.clone();
        let id = model_id.to_string();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let result = downloader.fetch(&entry, &destination).await;
            if result.is_ok() {
                lock(&registries).metadata.insert(
                    id.clone(),
                    ModelMetadata {
                        model_id: id,
                        local_path: destination,
                    },
                );
            }
            result
        });

        match task.await {
            Ok(Ok(())) => {
                tracing::info!(model_id = %model_id, "Model downloaded");
                crate::metrics::record_download(model_id, "success");
                Ok(PullOutcome::Downloaded)
            }
            Ok(Err(failures)) => {
                tracing::error!(
                    model_id = %model_id,
                    failures = failures.reasons().len(),
                    "Model download failed"
                );
                crate::metrics::record_download(model_id, "failure");
                Err(LifecycleError::Fail(failures.reasons().join("\n")))
            }
            Err(e) => {
                crate::metrics::record_download(model_id, "failure");
                Err(LifecycleError::Fail(format!(
                    "Download task for [{}] did not complete: {}",
                    model_id, e
                )))
            }
        }
    }

    /// Construct the engine for a downloaded model
    pub async fn load(&self, model_id: &str) -> Result<LoadOutcome, LifecycleError> {
        let (guard, local_path) = loop {
            let marker = {
                let mut registries = lock(&self.registries);
                let Some(metadata) = registries.metadata.get(model_id) else {
                    tracing::error!(model_id = %model_id, "Model was not pulled before");
                    return Err(LifecycleError::ModelNotDownloaded(model_id.to_string()));
                };
                let local_path = metadata.local_path.clone();
                if registries.runners.contains_key(model_id) {
                    return Ok(LoadOutcome::AlreadyLoaded);
                }
                match claim(&mut registries, &self.registries, Operation::Load, model_id) {
                    Ok(guard) => break (guard, local_path),
                    Err(marker) => marker,
                }
            };
            tracing::debug!(model_id = %model_id, "Waiting for in-flight load");
            wait_for(marker).await;
        };

        let loader = self.loader.clone();
        let registries = self.registries.clone();
        let id = model_id.to_string();

        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let runner = Runner::load(loader.as_ref(), &id, &local_path)?;
            let mut registries = lock(&registries);
            registries.runners.insert(id, Arc::new(runner));
            crate::metrics::update_loaded_count(registries.runners.len());
            Ok::<(), EngineLoadError>(())
        });

        match task.await {
            Ok(Ok(())) => {
                crate::metrics::record_load(model_id, "success");
                Ok(LoadOutcome::Loaded)
            }
            Ok(Err(_)) => {
                crate::metrics::record_load(model_id, "failure");
                Err(LifecycleError::Fail(format!(
                    "Loading model [{}] failed",
                    model_id
                )))
            }
            Err(e) => {
                crate::metrics::record_load(model_id, "failure");
                Err(LifecycleError::Fail(format!(
                    "Load task for [{}] did not complete: {}",
                    model_id, e
                )))
            }
        }
    }

    /// Drop the runner for a model; its downloaded files stay registered
    pub fn unload(&self, model_id: &str) -> Result<(), LifecycleError> {
        let mut registries = lock(&self.registries);
        if registries.runners.remove(model_id).is_none() {
            return Err(LifecycleError::ModelNotLoaded(model_id.to_string()));
        }
        crate::metrics::update_loaded_count(registries.runners.len());
        drop(registries);

        tracing::info!(model_id = %model_id, "Model unloaded");
        crate::metrics::record_unload(model_id);
        Ok(())
    }

    /// Runner for a loaded model
    ///
    /// `None` means "not loaded"; use [`Self::is_downloaded`] to tell that
    /// apart from an unknown model.
    pub fn get_runner(&self, model_id: &str) -> Option<Arc<Runner>> {
        lock(&self.registries).runners.get(model_id).cloned()
    }

    /// Runner for a request, loading the model first if it was downloaded
    pub async fn acquire(&self, model_id: &str) -> Result<Arc<Runner>, LifecycleError> {
        if let Some(runner) = self.get_runner(model_id) {
            return Ok(runner);
        }
        if !self.is_downloaded(model_id) {
            return Err(LifecycleError::ModelNotDownloaded(model_id.to_string()));
        }

        tracing::info!(model_id = %model_id, "Model not loaded, loading on demand");
        self.load(model_id).await?;

        self.get_runner(model_id).ok_or_else(|| {
            LifecycleError::Fail(format!("Model [{}] was unloaded while loading", model_id))
        })
    }

    /// Loaded model ids, sorted
    pub fn list_loaded(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.registries).runners.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Declared model ids, sorted
    pub fn list_declared(&self) -> Vec<String> {
        self.manifest.model_ids()
    }

    /// Downloaded models, sorted by id
    pub fn list_downloaded(&self) -> Vec<ModelMetadata> {
        let mut models: Vec<ModelMetadata> =
            lock(&self.registries).metadata.values().cloned().collect();
        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        models
    }
}
