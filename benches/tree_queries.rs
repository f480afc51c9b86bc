use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use resource_tree::{NodeId, NodeMetadata, Principal, ResourceTree, SessionIdentity};
use std::sync::Arc;

/// A workspace holding a chain of `depth` nested directories, each with
/// `fanout` text nodes. Returns the tree, the workspace root and the
/// deepest directory.
fn build_chain(depth: usize, fanout: usize) -> (ResourceTree, NodeId, NodeId) {
    let session = Arc::new(SessionIdentity::new());
    let tree = ResourceTree::builder()
        .identity(session.clone())
        .resource_types(["text"])
        .build()
        .unwrap();

    let owner = tree.access().register_user("bench", "Bench", "User").unwrap();
    session.sign_in(Principal::user(owner.id));
    let ws = tree.access().provision_workspace("Bench", "BENCH").unwrap();

    let mut parent = ws.root.id;
    for level in 0..depth {
        let dir = tree
            .tree()
            .create(parent, "directory", NodeMetadata::named(format!("level{}", level)))
            .unwrap();
        for i in 0..fanout {
            tree.tree()
                .create(dir.id, "text", NodeMetadata::named(format!("note{}", i)))
                .unwrap();
        }
        parent = dir.id;
    }

    (tree, ws.root.id, parent)
}

fn bench_ancestors(c: &mut Criterion) {
    let mut group = c.benchmark_group("ancestors");

    for depth in [4, 16, 64] {
        let (tree, _, deepest) = build_chain(depth, 2);
        group.bench_with_input(BenchmarkId::new("depth", depth), &deepest, |b, &node| {
            b.iter(|| tree.query().ancestors(Some(node)).unwrap());
        });
    }
    group.finish();
}

fn bench_descendants(c: &mut Criterion) {
    let mut group = c.benchmark_group("descendants");

    for depth in [4, 16, 64] {
        let (tree, root, _) = build_chain(depth, 8);
        group.bench_with_input(BenchmarkId::new("depth", depth), &root, |b, &root| {
            b.iter(|| tree.query().descendants_of_type(root, "text").unwrap());
        });
    }
    group.finish();
}

fn bench_children(c: &mut Criterion) {
    let (tree, _, dir) = build_chain(1, 256);

    c.bench_function("children_256", |b| {
        b.iter(|| tree.query().children(Some(dir), None).unwrap());
    });
}

fn bench_move(c: &mut Criterion) {
    let (tree, root, _) = build_chain(16, 4);
    let subtree = tree.query().children(Some(root), None).unwrap()[0].id;
    let target = tree
        .tree()
        .create(root, "directory", NodeMetadata::named("target"))
        .unwrap()
        .id;

    // alternate so every iteration rewrites the whole subtree
    let mut flip = false;
    c.bench_function("move_subtree_16", |b| {
        b.iter(|| {
            let destination = if flip { root } else { target };
            flip = !flip;
            tree.tree().move_node(subtree, destination).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_ancestors,
    bench_descendants,
    bench_children,
    bench_move
);
criterion_main!(benches);
