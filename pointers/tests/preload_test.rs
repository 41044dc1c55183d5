mod common;

use common::*;
use pointers::settings::{PreloadSettings, Settings};
use pointers::*;
use serde_json::json;
use std::collections::BTreeMap;

const GHOST: TableDecl = TableDecl::pointable("Ghost", "ghosts", "01J9Y8PX0000000000000000G1");

fn handles(resolver: &Resolver, type_name: &str, ids: &[Ulid]) -> Vec<Pointer> {
    ids.iter().map(|id| resolver.registry().forge_ref(type_name, *id).unwrap()).collect()
}

#[test]
fn thousand_handles_of_three_types_take_three_queries() {
    let (resolver, store) = setup("n_plus_one");
    let posts: Vec<Post> = (0..400).map(|i| post(&format!("p{}", i), i)).collect();
    let comments: Vec<Comment> = (0..300).map(|i| comment(&format!("c{}", i))).collect();
    let tags: Vec<Tag> = (0..300).map(|i| tag(&format!("t{}", i))).collect();
    store.inner().insert_many("posts", posts.iter().map(|p| Row::encode(p).unwrap()).collect()).unwrap();
    store.inner().insert_many("comments", comments.iter().map(|c| Row::encode(c).unwrap()).collect()).unwrap();
    store.inner().insert_many("tags", tags.iter().map(|t| Row::encode(t).unwrap()).collect()).unwrap();

    let mut pointers = Vec::new();
    for i in 0..300 {
        pointers.extend(handles(&resolver, "Post", &[posts[i].id]));
        pointers.extend(handles(&resolver, "Comment", &[comments[i].id]));
        pointers.extend(handles(&resolver, "Tag", &[tags[i].id]));
    }
    pointers.extend(handles(&resolver, "Post", &posts[300..].iter().map(|p| p.id).collect::<Vec<_>>()));
    assert_eq!(pointers.len(), 1000);

    // registry and column lookups are cached after the first round
    resolver.preload_all(pointers.clone(), &QueryOptions::new()).unwrap();
    store.reset();

    let loaded = resolver.preload_all(pointers.clone(), &QueryOptions::new()).unwrap();
    assert_eq!(store.queries(), 3);
    assert_eq!(loaded.queries, 3);
    assert!(loaded.is_complete());
    assert!(loaded.value.iter().all(Pointer::is_resolved));
    assert_eq!(loaded.value[0].resolved().unwrap().decode::<Post>().unwrap(), posts[0]);
    assert_eq!(loaded.value[999].resolved().unwrap().decode::<Post>().unwrap(), posts[399]);
}

#[test]
fn batch_equals_singles() {
    let (resolver, store) = setup("batch_vs_single");
    let p = post("p", 1);
    let c = comment("c");
    let t = tag("t");
    store.inner().insert_record(&p).unwrap();
    store.inner().insert_record(&c).unwrap();
    store.inner().insert_record(&t).unwrap();

    let mut pointers = handles(&resolver, "Post", &[p.id]);
    pointers.extend(handles(&resolver, "Comment", &[c.id]));
    pointers.extend(handles(&resolver, "Tag", &[t.id]));
    pointers.extend(handles(&resolver, "Badge", &[Ulid::new()]));

    let loaded = resolver.preload_all(pointers.clone(), &QueryOptions::new()).unwrap();
    for (single, batched) in pointers.iter().zip(&loaded.value) {
        assert_eq!(Some(&resolver.get(single, &QueryOptions::new()).unwrap()), batched.resolved());
    }
}

#[test]
fn order_shape_and_unresolved_handles_are_kept() {
    let (resolver, store) = setup("order_shape");
    let a = post("a", 1);
    let b = post("b", 2);
    store.inner().insert_record(&a).unwrap();
    store.inner().insert_record(&b).unwrap();
    let missing = Ulid::new();

    let pointers = handles(&resolver, "Post", &[b.id, missing, a.id, b.id]);
    let loaded = resolver.preload_all(pointers.clone(), &QueryOptions::new()).unwrap();

    let ids: Vec<Ulid> = loaded.value.iter().map(Pointer::id).collect();
    assert_eq!(ids, vec![b.id, missing, a.id, b.id]);
    assert_eq!(loaded.value[0].resolved().unwrap().value("title"), &json!("b"));
    assert!(!loaded.value[1].is_resolved());
    assert_eq!(loaded.value[3], loaded.value[0]);
    assert!(loaded.is_complete(), "a missing row is not a failure");
}

#[test]
fn already_resolved_handles_are_skipped_unless_forced() {
    let (resolver, store) = setup("skip_resolved");
    let a = post("stored", 1);
    store.inner().insert_record(&a).unwrap();
    let stale = Row::encode(&Post { title: "stale".into(), ..a.clone() }).unwrap();
    let pointer = resolver.registry().forge_ref("Post", a.id).unwrap().with_resolved(stale).unwrap();

    let loaded = resolver.preload_all(vec![pointer.clone()], &QueryOptions::new()).unwrap();
    assert_eq!(loaded.queries, 0);
    assert_eq!(loaded.value[0].resolved().unwrap().value("title"), &json!("stale"));

    let loaded = resolver.preload_all(vec![pointer], &QueryOptions::new().force()).unwrap();
    assert_eq!(loaded.queries, 1);
    assert_eq!(loaded.value[0].resolved().unwrap().value("title"), &json!("stored"));
}

#[test]
fn nested_paths_resolve_inside_trees() {
    let (resolver, store) = setup("nested");
    let a = post("a", 1);
    let c = comment("c");
    store.inner().insert_record(&a).unwrap();
    store.inner().insert_record(&c).unwrap();
    let untouched = handles(&resolver, "Post", &[a.id]).remove(0);

    let single = Tree::map(vec![
        ("a", Tree::map(vec![("b", Tree::from(handles(&resolver, "Post", &[a.id]).remove(0)))])),
        ("other", Tree::from(untouched.clone())),
    ]);
    let loaded = resolver.preload_tree(single, &Path::parse_all(&["a.b"]).unwrap(), &QueryOptions::new()).unwrap();
    let target = loaded.value.get("a").and_then(|t| t.get("b")).and_then(Tree::as_pointer).unwrap();
    assert_eq!(target.resolved().unwrap().decode::<Post>().unwrap(), a);
    assert_eq!(loaded.value.get("other").and_then(Tree::as_pointer), Some(&untouched));

    let list = Tree::list(vec![
        Tree::map(vec![("a", Tree::map(vec![("b", Tree::from(handles(&resolver, "Comment", &[c.id]).remove(0)))]))]),
        Tree::map(vec![("a", Tree::from(json!(null)))]),
        Tree::map(vec![("a", Tree::map(vec![("b", Tree::from(handles(&resolver, "Post", &[a.id, a.id])))]))]),
    ]);
    let loaded = resolver.preload_tree(list, &["*.a.b".parse().unwrap()], &QueryOptions::new()).unwrap();
    assert_eq!(loaded.queries, 2);

    let first = loaded.value.index(0).and_then(|t| t.get("a")).and_then(|t| t.get("b")).and_then(Tree::as_pointer).unwrap();
    assert_eq!(first.resolved().unwrap().value("body"), &json!("c"));
    assert_eq!(loaded.value.index(1).and_then(|t| t.get("a")), Some(&Tree::Value(json!(null))));
    let nested = loaded.value.index(2).and_then(|t| t.get("a")).and_then(|t| t.get("b")).unwrap();
    assert!(nested.index(0).and_then(Tree::as_pointer).unwrap().is_resolved());
    assert!(nested.index(1).and_then(Tree::as_pointer).unwrap().is_resolved());
}

#[test]
fn no_paths_resolve_every_handle() {
    let (resolver, store) = setup("every_handle");
    let a = post("a", 1);
    store.inner().insert_record(&a).unwrap();
    let mut map = BTreeMap::new();
    map.insert("deep".to_string(), Tree::list(vec![Tree::from(handles(&resolver, "Post", &[a.id]).remove(0))]));
    map.insert("badge".to_string(), Tree::from(handles(&resolver, "Badge", &[Ulid::new()]).remove(0)));

    let loaded = resolver.preload_tree(Tree::Map(map), &[], &QueryOptions::new()).unwrap();
    assert_eq!(loaded.queries, 1, "virtual handles need no query");
    assert!(loaded.value.pointers().iter().all(|p| p.is_resolved()));
}

#[test]
fn failing_groups_are_reported_and_others_still_resolve() {
    let store = store("partial");
    let resolver = Resolver::builder(store.clone()).declare_all(decls()).declare(GHOST).build();
    let a = post("a", 1);
    store.inner().insert_record(&a).unwrap();

    let mut pointers = handles(&resolver, "Post", &[a.id]);
    pointers.extend(handles(&resolver, "Ghost", &[Ulid::new(), Ulid::new()]));
    pointers.push(Pointer::new(Ulid::new(), Ulid::new()));

    let loaded = resolver.preload_all(pointers.clone(), &QueryOptions::new()).unwrap();
    assert!(loaded.value[0].is_resolved());
    assert_eq!(loaded.failures.len(), 2);
    let ghost = loaded.failures.iter().find(|f| f.table_id == GHOST.ulid().unwrap()).unwrap();
    assert_eq!(ghost.ids.len(), 2);
    assert!(ghost.error.is_not_found());
    assert!(loaded.failures.iter().any(|f| matches!(f.error, AppError::UnknownType(_))));

    assert!(resolver.preload_all(pointers.clone(), &QueryOptions::new().strict(true)).is_err());

    let strict_by_default = Settings { preload: PreloadSettings { strict: true }, ..Settings::default() };
    let strict = Resolver::builder(store).declare_all(decls()).declare(GHOST).settings(strict_by_default).build();
    assert!(strict.preload_all(pointers.clone(), &QueryOptions::new()).is_err());
    assert!(!strict.preload_all(pointers, &QueryOptions::new().strict(false)).unwrap().is_complete());
}
