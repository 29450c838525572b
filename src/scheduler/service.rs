//! Monitor Service
//!
//! Owns the table of managed objects and cranks them as requests arrive.
//! Delayed requests are tokio sleeps that re-enter the loop as `Fire`
//! messages; each object carries a generation counter so a newer request
//! supersedes any delay still outstanding.

use crate::lifecycle::crank::CrankOutcome;
use crate::lifecycle::engine::LifecycleEngine;
use crate::lifecycle::ports::{LifecycleObject, ObjectId};
use crate::scheduler::{ChannelScheduler, MonitorRequest};
use crate::transport::MonitorPacket;
use crate::error::Error;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared object table
pub struct MonitorHandle<O> {
    objects: Arc<DashMap<ObjectId, Arc<O>>>,
    generations: Arc<DashMap<ObjectId, u64>>,
}

impl<O> Clone for MonitorHandle<O> {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
            generations: Arc::clone(&self.generations),
        }
    }
}

impl<O: LifecycleObject> MonitorHandle<O> {
    /// Put an object under monitoring; it is not cranked until requested
    pub fn add_object(&self, object: Arc<O>) {
        let id = object.object_id();
        self.generations.insert(id, 0);
        if self.objects.insert(id, object).is_some() {
            warn!(object_id = %id, "Replaced an object already under monitoring");
        }
    }

    /// Stop monitoring an object without destroying it
    pub fn remove_object(&self, id: ObjectId) -> Option<Arc<O>> {
        self.generations.remove(&id);
        self.objects.remove(&id).map(|(_, obj)| obj)
    }

    pub fn get(&self, id: ObjectId) -> Option<Arc<O>> {
        self.objects.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Start a new generation for `id`, invalidating outstanding delays
    fn bump(&self, id: ObjectId) -> Option<u64> {
        self.generations.get_mut(&id).map(|mut gen| {
            *gen += 1;
            *gen
        })
    }

    fn is_current(&self, id: ObjectId, generation: u64) -> bool {
        self.generations
            .get(&id)
            .map(|gen| *gen == generation)
            .unwrap_or(false)
    }
}

/// Request loop driving cranks for every monitored object
pub struct MonitorService<O> {
    engine: LifecycleEngine<O>,
    handle: MonitorHandle<O>,
    tx: mpsc::UnboundedSender<MonitorRequest>,
    rx: mpsc::UnboundedReceiver<MonitorRequest>,
}

impl<O: LifecycleObject> MonitorService<O> {
    /// Create the service for an engine whose scheduler is `scheduler`
    pub fn new(
        engine: LifecycleEngine<O>,
        scheduler: &ChannelScheduler,
        rx: mpsc::UnboundedReceiver<MonitorRequest>,
    ) -> Self {
        Self {
            engine,
            handle: MonitorHandle {
                objects: Arc::new(DashMap::new()),
                generations: Arc::new(DashMap::new()),
            },
            tx: scheduler.sender(),
            rx,
        }
    }

    pub fn handle(&self) -> MonitorHandle<O> {
        self.handle.clone()
    }

    pub fn engine(&self) -> &LifecycleEngine<O> {
        &self.engine
    }

    /// Process requests until shutdown; returns the number of cranks run
    pub async fn run(mut self) -> u64 {
        info!(objects = self.handle.len(), "Monitor service started");
        let mut cranks = 0u64;

        while let Some(request) = self.rx.recv().await {
            match request {
                MonitorRequest::RunNow(id) => {
                    if self.handle.bump(id).is_some() {
                        self.crank(id);
                        cranks += 1;
                    }
                }
                MonitorRequest::RunAfter(id, delay) => self.arm(id, delay),
                MonitorRequest::Fire(id, generation) => {
                    if self.handle.is_current(id, generation) {
                        self.crank(id);
                        cranks += 1;
                    } else {
                        debug!(object_id = %id, generation, "Stale delayed run dropped");
                    }
                }
                MonitorRequest::Shutdown => break,
            }
        }

        info!(cranks, "Monitor service stopped");
        cranks
    }

    fn arm(&self, id: ObjectId, delay: Duration) {
        let Some(generation) = self.handle.bump(id) else {
            debug!(object_id = %id, "Delayed run for unknown object dropped");
            return;
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(MonitorRequest::Fire(id, generation));
        });
    }

    fn crank(&self, id: ObjectId) {
        let Some(object) = self.handle.get(id) else {
            debug!(object_id = %id, "Crank requested for unknown object");
            return;
        };

        match self.engine.crank(&object, Arc::new(MonitorPacket::new())) {
            Ok(CrankOutcome::Destroyed) => {
                self.handle.remove_object(id);
                object.lifecycle().destroy();
                info!(object_id = %id, "Object destroyed and removed from monitoring");
            }
            Ok(outcome) => debug!(object_id = %id, ?outcome, "Crank finished"),
            Err(Error::CrankInProgress { .. }) => {
                debug!(object_id = %id, "Crank already in flight, request absorbed")
            }
            Err(e) => warn!(object_id = %id, error = %e, "Crank failed"),
        }
    }
}
