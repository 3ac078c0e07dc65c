//! Exercises `EngineController` against a fake `ContainerRuntime` instead
//! of a real Docker daemon, the way the teacher's own integration suite
//! substituted mocks for the container runtime and network layer.

use ace_docker::{ContainerHealth, ContainerRuntime, ContainerSpec, ContainerStatus, ManagedContainer};
use ace_engine::{EngineController, EngineControllerConfig, EngineVariant, NoVpn};
use ace_ports::{PortAllocator, PortAllocatorConfig};
use ace_state::StateStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Always succeeds, records how many containers it was asked to run.
struct FakeRuntime {
    next_id: AtomicUsize,
    running: Mutex<HashMap<String, ContainerSpec>>,
}

impl FakeRuntime {
    fn new() -> Self {
        Self { next_id: AtomicUsize::new(0), running: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run(&self, spec: ContainerSpec) -> ace_docker::Result<String> {
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.running.lock().unwrap().insert(id.clone(), spec);
        Ok(id)
    }

    async fn start(&self, _id: &str) -> ace_docker::Result<()> {
        Ok(())
    }

    async fn stop(&self, _id: &str, _timeout_secs: i64) -> ace_docker::Result<()> {
        Ok(())
    }

    async fn remove(&self, id: &str, _force: bool) -> ace_docker::Result<()> {
        self.running.lock().unwrap().remove(id);
        Ok(())
    }

    async fn status(&self, id: &str) -> ace_docker::Result<ContainerStatus> {
        if self.running.lock().unwrap().contains_key(id) {
            Ok(ContainerStatus::Running)
        } else {
            Ok(ContainerStatus::NotFound)
        }
    }

    async fn health_status(&self, _id: &str) -> ace_docker::Result<ContainerHealth> {
        Ok(ContainerHealth::Healthy)
    }

    async fn wait_running(&self, _id: &str, _timeout_dur: Duration) -> ace_docker::Result<()> {
        Ok(())
    }

    async fn list_managed(&self, _label_key: &str) -> ace_docker::Result<Vec<ManagedContainer>> {
        let running = self.running.lock().unwrap();
        Ok(running
            .iter()
            .map(|(id, spec)| ManagedContainer { id: id.clone(), name: spec.name.clone(), status: ContainerStatus::Running, labels: spec.labels.clone() })
            .collect())
    }

    async fn exec(&self, _id: &str, _cmd: Vec<String>) -> ace_docker::Result<String> {
        Ok(String::new())
    }
}

fn controller(runtime: Arc<FakeRuntime>) -> EngineController {
    let ports = Arc::new(PortAllocator::new(PortAllocatorConfig {
        host_range: (19000, 19010),
        container_http_range: (6878, 6888),
        container_https_range: (6978, 6988),
        vpn_ranges: Vec::new(),
    }));
    let state = Arc::new(StateStore::new());
    EngineController::new(
        runtime,
        ports,
        state,
        Arc::new(NoVpn),
        EngineControllerConfig {
            target_image: "acestream/engine:latest".to_owned(),
            ops_label: ("acestream-fleet.managed".to_owned(), "true".to_owned()),
            startup_timeout: Duration::from_secs(5),
            stop_timeout_secs: 10,
            map_https: false,
            variant: EngineVariant::ConfString,
            max_replicas: 10,
        },
    )
}

#[tokio::test]
async fn provision_then_stop_round_trips_through_state_and_ports() {
    let runtime = Arc::new(FakeRuntime::new());
    let controller = controller(runtime.clone());

    let record = controller.provision_engine(None).await.expect("provision should succeed against a healthy fake runtime");
    assert_eq!(record.container_name, "acestream-1");
    assert!(runtime.running.lock().unwrap().contains_key(&record.container_id));

    controller.stop_engine(&record.container_id).await.expect("stop should succeed");
    assert!(!runtime.running.lock().unwrap().contains_key(&record.container_id));
}

#[tokio::test]
async fn concurrent_provisions_never_collide_on_container_name() {
    let runtime = Arc::new(FakeRuntime::new());
    let controller = Arc::new(controller(runtime));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move { controller.provision_engine(None).await }));
    }

    let mut names = Vec::new();
    for handle in handles {
        let record = handle.await.unwrap().expect("every concurrent provision should succeed");
        names.push(record.container_name);
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 5, "every provisioned engine must get a distinct name");
}

#[tokio::test]
async fn reindex_adopts_containers_the_runtime_already_reports() {
    let runtime = Arc::new(FakeRuntime::new());
    let controller = controller(runtime.clone());

    // Simulate a container that exists from a previous process lifetime.
    let mut labels = HashMap::new();
    labels.insert("acestream-fleet.managed".to_owned(), "true".to_owned());
    labels.insert(ace_engine::labels::ACESTREAM_HTTP_PORT.to_owned(), "6878".to_owned());
    runtime.running.lock().unwrap().insert(
        "preexisting".to_owned(),
        ContainerSpec { name: "acestream-1".to_owned(), labels, ..Default::default() },
    );

    controller.reindex().await.expect("reindex should succeed");
    // A second provision must not reuse ordinal 1, since reindex should
    // have observed "acestream-1" as already running.
    let record = controller.provision_engine(None).await.expect("provision should succeed after reindex");
    assert_ne!(record.container_name, "acestream-1");
}
