//! Benchmarks for registry lookups and flow dispatch.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

use artifact_collector::collectors::path_detection::detect_paths;
use artifact_collector::config::{ArtifactDefinition, ArtifactSource, SourceType};
use artifact_collector::flow::{CollectionFlow, FlowArgs};
use artifact_collector::knowledge_base::KnowledgeBase;
use artifact_collector::registry::{ArtifactOrigin, ArtifactRegistry, InMemoryDefinitionStore};

fn populated_registry(rt: &Runtime, count: usize) -> Arc<ArtifactRegistry> {
    let registry = Arc::new(ArtifactRegistry::with_store(Arc::new(InMemoryDefinitionStore::new())));
    rt.block_on(async {
        for i in 0..count {
            let definition = ArtifactDefinition::new(format!("Artifact{}", i)).with_source(
                ArtifactSource::new(SourceType::Path).with_attribute("paths", serde_json::json!([format!("/data/{}", i)])),
            );
            registry.register_artifact(definition, ArtifactOrigin::FileSource, true).await;
        }
    });
    registry
}

/// Lookup hits at different registry sizes
fn bench_lookup_hits(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("registry_lookup_hit");

    for count in [10, 1_000, 10_000] {
        let registry = populated_registry(&rt, count);
        let name = format!("Artifact{}", count / 2);
        group.bench_with_input(BenchmarkId::from_parameter(count), &name, |b, name| {
            b.iter(|| rt.block_on(registry.get_artifact(black_box(name))).unwrap());
        });
    }

    group.finish();
}

/// A miss pays for one reconciliation pass against the store
fn bench_lookup_miss(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let registry = populated_registry(&rt, 1_000);

    c.bench_function("registry_lookup_miss", |b| {
        b.iter(|| rt.block_on(registry.get_artifact(black_box("Missing"))).is_err());
    });
}

fn bench_flow_start(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let registry = Arc::new(ArtifactRegistry::new());
    rt.block_on(registry.load_bundled()).unwrap();
    let flow = CollectionFlow::default();
    let args = FlowArgs::new("C.1", ["BasicTriage", "DebianPackagesList", "UnixShellHistory"]);

    c.bench_function("flow_start_bundled", |b| {
        b.iter(|| rt.block_on(flow.start(&registry, black_box(&args), KnowledgeBase::new("Linux"))));
    });
}

fn bench_path_detection(c: &mut Criterion) {
    let kb = KnowledgeBase::new("Windows").with_environ("systemroot", "C:\\Windows");
    let lines = [
        "C:\\Windows\\TEMP\\A.exe",
        "\"C:\\Program Files\\Vendor\\agent.exe\" --service --log=C:\\logs\\agent.log",
        "%SystemRoot%\\system32\\rundll32.exe shell32.dll,Control_RunDLL",
    ];

    c.bench_function("detect_paths", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(detect_paths(black_box(line), &kb));
            }
        });
    });
}

criterion_group!(benches, bench_lookup_hits, bench_lookup_miss, bench_flow_start, bench_path_detection);
criterion_main!(benches);
