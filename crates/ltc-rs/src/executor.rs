//! Graph executor: turns pending lazy tensors into backend data.
//!
//! A sync walks the pending roots of each device, schedules them with a shared emission
//! map, and looks the scheduled graph up in an LRU cache keyed by its structural
//! fingerprint. On a miss the graph is lowered through the backend's lowering context and
//! compiled; on a hit the cached computation is reused and only the parameter list is
//! rebuilt. Outputs are assigned into placeholders created before execution, the roots are
//! marked ready, and every synced tensor switches to holding backend data.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{anyhow, bail, ensure, Result};
use lru::LruCache;

use crate::backend::registry::get_backend;
use crate::backend::{BackendDataPtr, BackendImpl, ComputationPtr};
use crate::device::Device;
use crate::env;
use crate::error::{fatal, ContractViolation};
use crate::ir::{compute_post_order, graph_fingerprint, EmissionMap, NodeId, NodePtr};
use crate::lazy_tensor::{LazyTensor, LazyValue};
use crate::tensor::HostTensor;

static GLOBAL_EXECUTOR: OnceLock<Arc<LazyGraphExecutor>> = OnceLock::new();

/// Batch materialization of lazy tensors into host tensors.
pub trait TensorMaterializer {
    fn get_tensors(&self, tensors: &[LazyTensor]) -> Result<Vec<HostTensor>>;
}

/// Compile-cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

type CacheKey = (u64, Device);

pub struct LazyGraphExecutor {
    backend: Arc<dyn BackendImpl>,
    cache: Mutex<LruCache<CacheKey, ComputationPtr>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Pending roots that share a device.
struct SyncGroup {
    device: Device,
    roots: Vec<NodePtr>,
    tensors: Vec<(LazyTensor, usize)>,
}

impl LazyGraphExecutor {
    /// Creates an executor with the `LTC_COMPILE_CACHE_SIZE` cache capacity.
    pub fn new(backend: Arc<dyn BackendImpl>) -> Arc<Self> {
        Self::with_cache_capacity(backend, env::compile_cache_size())
    }

    pub fn with_cache_capacity(backend: Arc<dyn BackendImpl>, capacity: usize) -> Arc<Self> {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Arc::new(LazyGraphExecutor {
            backend,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Process executor bound to the registered backend. Fatal if no backend is registered.
    pub fn get() -> Arc<Self> {
        if let Some(executor) = GLOBAL_EXECUTOR.get() {
            return Arc::clone(executor);
        }
        let backend = get_backend();
        Arc::clone(GLOBAL_EXECUTOR.get_or_init(|| Self::new(backend)))
    }

    pub fn backend(&self) -> &Arc<dyn BackendImpl> {
        &self.backend
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.lock().expect("compile cache poisoned").len(),
        }
    }

    pub fn resize_cache(&self, capacity: usize) {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        self.cache
            .lock()
            .expect("compile cache poisoned")
            .resize(capacity);
    }

    pub fn clear_cache(&self) {
        self.cache.lock().expect("compile cache poisoned").clear();
    }

    fn check_owned(&self, tensor: &LazyTensor) {
        if let Some(executor) = tensor.executor() {
            if !std::ptr::eq(Arc::as_ptr(executor), self) {
                fatal(ContractViolation::ForeignExecutor {
                    tensor: tensor.unique_id(),
                });
            }
        }
    }

    /// Materializes every pending tensor in `tensors` on the backend.
    pub fn sync_tensors(&self, tensors: &[LazyTensor]) -> Result<()> {
        let mut groups: Vec<SyncGroup> = Vec::new();
        let mut scheduled: HashMap<NodeId, (usize, usize)> = HashMap::new();
        for tensor in tensors {
            if tensor.is_null() {
                continue;
            }
            self.check_owned(tensor);
            tensor.upload_staged()?;
            if let Some(LazyValue::Node(node)) = tensor.value() {
                if let Some(data) = node.data() {
                    tensor.set_data(data);
                    continue;
                }
            }
            let Some(node) = tensor.pending_node() else {
                continue;
            };
            let device = tensor
                .device()
                .ok_or_else(|| anyhow!("lazy tensor {} has no device", tensor.unique_id()))?;
            let slot = match scheduled.get(&node.id()) {
                Some(slot) => *slot,
                None => {
                    let group = match groups.iter().position(|g| g.device == device) {
                        Some(index) => index,
                        None => {
                            groups.push(SyncGroup {
                                device,
                                roots: Vec::new(),
                                tensors: Vec::new(),
                            });
                            groups.len() - 1
                        }
                    };
                    groups[group].roots.push(node.clone());
                    let slot = (group, groups[group].roots.len() - 1);
                    scheduled.insert(node.id(), slot);
                    slot
                }
            };
            groups[slot.0].tensors.push((tensor.clone(), slot.1));
        }

        for group in groups {
            let outputs = self.execute_group(&group.device, &group.roots)?;
            for (root, data) in group.roots.iter().zip(&outputs) {
                root.mark_ready(Arc::clone(data));
            }
            for (tensor, index) in group.tensors {
                tensor.set_data(Arc::clone(&outputs[index]));
            }
        }
        Ok(())
    }

    fn execute_group(&self, device: &Device, roots: &[NodePtr]) -> Result<Vec<BackendDataPtr>> {
        let mut emit_status = EmissionMap::new();
        let post_order = compute_post_order(roots, &mut emit_status);
        let fingerprint = graph_fingerprint(&post_order, roots);
        let arguments = collect_parameters(&post_order)?;
        let key = (fingerprint, *device);

        let cached = self
            .cache
            .lock()
            .expect("compile cache poisoned")
            .get(&key)
            .cloned();
        let computation = match cached {
            Some(computation) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint, %device, "compile cache hit");
                computation
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let computation = self.compile_graph(
                    device,
                    fingerprint,
                    roots,
                    &post_order,
                    &emit_status,
                    &arguments,
                )?;
                self.cache
                    .lock()
                    .expect("compile cache poisoned")
                    .put(key, Arc::clone(&computation));
                computation
            }
        };

        ensure!(
            computation.parameter_specs().len() == arguments.len(),
            "computation {} expects {} parameters, graph provides {}",
            computation.name(),
            computation.parameter_specs().len(),
            arguments.len()
        );
        let placeholders = roots
            .iter()
            .map(|root| self.backend.create_data_placeholder(device, root.spec()))
            .collect::<Result<Vec<_>, _>>()?;
        let results = self
            .backend
            .execute_computation(computation.as_ref(), &arguments, device)?;
        ensure!(
            results.len() == placeholders.len(),
            "computation {} returned {} outputs for {} roots",
            computation.name(),
            results.len(),
            placeholders.len()
        );
        for (placeholder, result) in placeholders.iter().zip(&results) {
            placeholder.assign(result)?;
        }
        tracing::debug!(
            computation = computation.name(),
            %device,
            nodes = post_order.len(),
            parameters = arguments.len(),
            outputs = placeholders.len(),
            "executed lazy graph"
        );
        Ok(placeholders)
    }

    fn compile_graph(
        &self,
        device: &Device,
        fingerprint: u64,
        roots: &[NodePtr],
        post_order: &[NodePtr],
        emit_status: &EmissionMap,
        arguments: &[BackendDataPtr],
    ) -> Result<ComputationPtr> {
        let name = format!("SyncTensorsGraph.{fingerprint:016x}");
        let replication = self.backend.get_replication_devices().unwrap_or_default();
        let devices = self
            .backend
            .get_compilation_devices(&device.to_backend_string(), replication.as_slice());
        tracing::debug!(
            computation = %name,
            ?devices,
            nodes = post_order.len(),
            "compiling lazy graph"
        );

        let mut lowering = self
            .backend
            .create_lowering_context(&name, device, post_order, emit_status)?;
        for root in roots {
            lowering.add_result(root)?;
        }
        let lowered: Vec<u64> = lowering
            .parameter_data()
            .iter()
            .map(|data| data.handle_id())
            .collect();
        let expected: Vec<u64> = arguments.iter().map(|data| data.handle_id()).collect();
        ensure!(
            lowered == expected,
            "backend {} numbered parameters {lowered:?}, expected {expected:?}",
            self.backend.backend_name()
        );

        let built = lowering.build()?;
        let mut compiled = self.backend.compile(vec![built])?;
        if compiled.len() != 1 {
            bail!(
                "backend {} returned {} computations for a single compile request",
                self.backend.backend_name(),
                compiled.len()
            );
        }
        let computation = compiled.remove(0);
        if env::log_graphs() {
            let text = self.backend.get_computation_backend_text(&computation)?;
            tracing::debug!(computation = %name, "compiled lazy graph:\n{text}");
        }
        Ok(computation)
    }

    /// Syncs `tensors` and reads each one back under its logical dtype.
    pub fn get_tensors(&self, tensors: &[LazyTensor]) -> Result<Vec<HostTensor>> {
        self.sync_tensors(tensors)?;
        tensors
            .iter()
            .map(|tensor| -> Result<HostTensor> {
                let spec = tensor
                    .spec()
                    .ok_or_else(|| anyhow!("cannot materialize a null lazy tensor"))?;
                let data = tensor.current_data().ok_or_else(|| {
                    anyhow!("lazy tensor {} has no data after sync", tensor.unique_id())
                })?;
                Ok(self
                    .backend
                    .make_tensor_from_computation_data(&data, Some(spec.dtype))?)
            })
            .collect()
    }
}

impl TensorMaterializer for LazyGraphExecutor {
    fn get_tensors(&self, tensors: &[LazyTensor]) -> Result<Vec<HostTensor>> {
        LazyGraphExecutor::get_tensors(self, tensors)
    }
}

/// Ready nodes in first-appearance order, one argument per distinct buffer.
fn collect_parameters(post_order: &[NodePtr]) -> Result<Vec<BackendDataPtr>> {
    let mut seen = HashSet::new();
    let mut parameters = Vec::new();
    for node in post_order {
        let Some(data) = node.data() else {
            continue;
        };
        if !data.has_value() {
            bail!("graph parameter {} has no backend value", node.id());
        }
        if seen.insert(data.handle_id()) {
            parameters.push(data);
        }
    }
    Ok(parameters)
}
