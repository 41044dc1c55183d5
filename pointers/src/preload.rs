use crate::error::AppError;
use crate::pointer::Pointer;
use crate::query::{Filter, QueryOptions};
use crate::resolver::Resolver;
use crate::row::Row;
use crate::table::TableDescriptor;
use crate::{debug, error, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use ulid::Ulid;

/// Arbitrary data with handles embedded in it.
#[derive(Debug, Clone, PartialEq)]
pub enum Tree {
    Pointer(Pointer),
    Map(BTreeMap<String, Tree>),
    List(Vec<Tree>),
    Value(Value),
}

impl Tree {
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Tree)>) -> Self {
        Tree::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(items: impl IntoIterator<Item = Tree>) -> Self {
        Tree::List(items.into_iter().collect())
    }

    pub fn get(&self, field: &str) -> Option<&Tree> {
        match self {
            Tree::Map(map) => map.get(field),
            _ => None,
        }
    }

    pub fn index(&self, i: usize) -> Option<&Tree> {
        match self {
            Tree::List(items) => items.get(i),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            Tree::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// Every handle in the tree, depth first.
    pub fn pointers(&self) -> Vec<&Pointer> {
        let mut out = Vec::new();
        collect_all(self, &mut out);
        out
    }
}

impl From<Pointer> for Tree {
    fn from(pointer: Pointer) -> Self {
        Tree::Pointer(pointer)
    }
}

impl From<Value> for Tree {
    fn from(value: Value) -> Self {
        Tree::Value(value)
    }
}

impl From<Vec<Pointer>> for Tree {
    fn from(pointers: Vec<Pointer>) -> Self {
        Tree::List(pointers.into_iter().map(Tree::Pointer).collect())
    }
}

fn collect_all<'a>(tree: &'a Tree, out: &mut Vec<&'a Pointer>) {
    match tree {
        Tree::Pointer(p) => out.push(p),
        Tree::Map(map) => map.values().for_each(|t| collect_all(t, out)),
        Tree::List(items) => items.iter().for_each(|t| collect_all(t, out)),
        Tree::Value(_) => {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Field(String),
    /// Every element of a list, every value of a map.
    Each,
}

/// Where handles sit inside a tree, e.g. `*.author.avatar`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path(Vec<Step>);

impl Path {
    pub fn new(steps: Vec<Step>) -> Self {
        Path(steps)
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn parse_all<S: AsRef<str>>(paths: &[S]) -> Result<Vec<Path>, AppError> {
        paths.iter().map(|p| p.as_ref().parse()).collect()
    }
}

impl FromStr for Path {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let steps = s
            .split('.')
            .map(|segment| match segment.trim() {
                "" => Err(AppError::InvalidPath(s.to_string())),
                "*" => Ok(Step::Each),
                field => Ok(Step::Field(field.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Path(steps))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .0
            .iter()
            .map(|s| match s {
                Step::Field(name) => name.as_str(),
                Step::Each => "*",
            })
            .collect();
        f.write_str(&parts.join("."))
    }
}

fn walk(tree: &Tree, steps: &[Step], f: &mut dyn FnMut(&Pointer)) {
    match (steps.split_first(), tree) {
        (None, Tree::Pointer(p)) => f(p),
        (None, Tree::List(items)) => items.iter().for_each(|t| walk(t, steps, f)),
        (Some((Step::Field(name), rest)), Tree::Map(map)) => {
            if let Some(child) = map.get(name) {
                walk(child, rest, f)
            }
        }
        (Some((Step::Field(_), _)), Tree::List(items)) => items.iter().for_each(|t| walk(t, steps, f)),
        (Some((Step::Each, rest)), Tree::List(items)) => items.iter().for_each(|t| walk(t, rest, f)),
        (Some((Step::Each, rest)), Tree::Map(map)) => map.values().for_each(|t| walk(t, rest, f)),
        _ => {}
    }
}

fn walk_mut(tree: &mut Tree, steps: &[Step], f: &mut dyn FnMut(&mut Pointer)) {
    match (steps.split_first(), tree) {
        (None, Tree::Pointer(p)) => f(p),
        (None, Tree::List(items)) => items.iter_mut().for_each(|t| walk_mut(t, steps, f)),
        (Some((Step::Field(name), rest)), Tree::Map(map)) => {
            if let Some(child) = map.get_mut(name) {
                walk_mut(child, rest, f)
            }
        }
        (Some((Step::Field(_), _)), Tree::List(items)) => items.iter_mut().for_each(|t| walk_mut(t, steps, f)),
        (Some((Step::Each, rest)), Tree::List(items)) => items.iter_mut().for_each(|t| walk_mut(t, rest, f)),
        (Some((Step::Each, rest)), Tree::Map(map)) => map.values_mut().for_each(|t| walk_mut(t, rest, f)),
        _ => {}
    }
}

fn walk_all_mut(tree: &mut Tree, f: &mut dyn FnMut(&mut Pointer)) {
    match tree {
        Tree::Pointer(p) => f(p),
        Tree::Map(map) => map.values_mut().for_each(|t| walk_all_mut(t, f)),
        Tree::List(items) => items.iter_mut().for_each(|t| walk_all_mut(t, f)),
        Tree::Value(_) => {}
    }
}

/// Something the preloader can find handles in and write records back to.
trait Targets {
    fn each(&self, f: &mut dyn FnMut(&Pointer));
    fn each_mut(&mut self, f: &mut dyn FnMut(&mut Pointer));
}

impl Targets for Vec<Pointer> {
    fn each(&self, f: &mut dyn FnMut(&Pointer)) {
        self.iter().for_each(f)
    }

    fn each_mut(&mut self, f: &mut dyn FnMut(&mut Pointer)) {
        self.iter_mut().for_each(f)
    }
}

struct Walk<'p> {
    tree: Tree,
    paths: &'p [Path],
}

impl Targets for Walk<'_> {
    fn each(&self, f: &mut dyn FnMut(&Pointer)) {
        if self.paths.is_empty() {
            self.tree.pointers().into_iter().for_each(f);
        } else {
            self.paths.iter().for_each(|path| walk(&self.tree, path.steps(), f));
        }
    }

    fn each_mut(&mut self, f: &mut dyn FnMut(&mut Pointer)) {
        if self.paths.is_empty() {
            walk_all_mut(&mut self.tree, f);
        } else {
            let paths = self.paths;
            paths.iter().for_each(|path| walk_mut(&mut self.tree, path.steps(), f));
        }
    }
}

/// Unresolved ids per owning type, each id once, in first-seen order.
fn group<T: Targets>(targets: &T, force: bool) -> BTreeMap<Ulid, Vec<Ulid>> {
    let mut groups: BTreeMap<Ulid, Vec<Ulid>> = BTreeMap::new();
    let mut seen = HashSet::new();
    targets.each(&mut |p| {
        if (force || !p.is_resolved()) && seen.insert((p.table_id(), p.id())) {
            groups.entry(p.table_id()).or_default().push(p.id());
        }
    });
    groups
}

enum Resolution {
    Rows(HashMap<Ulid, Row>),
    Virtual(Arc<TableDescriptor>),
}

fn apply<T: Targets>(targets: &mut T, resolutions: &HashMap<Ulid, Resolution>, force: bool) {
    targets.each_mut(&mut |p| {
        if p.is_resolved() && !force {
            return;
        }
        let row = match resolutions.get(&p.table_id()) {
            Some(Resolution::Rows(rows)) => match rows.get(&p.id()) {
                Some(row) => row.clone(),
                None => return,
            },
            Some(Resolution::Virtual(table)) => table.virtual_row(p),
            None => return,
        };
        if let Err(err) = p.attach(row) {
            warn!("Leaving {} unresolved: {}", p.id(), err);
        }
    });
}

/// A group of handles of one type that could not be fetched.
#[derive(Debug)]
pub struct GroupFailure {
    pub table_id: Ulid,
    pub ids: Vec<Ulid>,
    pub error: AppError,
}

/// Outcome of a batch load: the input with records attached where they could be fetched.
#[derive(Debug)]
pub struct Preloaded<T> {
    pub value: T,
    pub failures: Vec<GroupFailure>,
    /// Data queries issued against the store.
    pub queries: usize,
}

impl<T> Preloaded<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_value(self) -> T {
        self.value
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Preloaded<U> {
        Preloaded { value: f(self.value), failures: self.failures, queries: self.queries }
    }
}

impl Resolver {
    /// Resolves every handle with one query per pointable type.
    pub fn preload_all(&self, pointers: Vec<Pointer>, options: &QueryOptions) -> Result<Preloaded<Vec<Pointer>>, AppError> {
        self.preload(pointers, options)
    }

    /// Resolves the handles found along `paths`, or all handles when no path is given.
    /// Shape and order of the tree are kept.
    pub fn preload_tree(&self, tree: Tree, paths: &[Path], options: &QueryOptions) -> Result<Preloaded<Tree>, AppError> {
        Ok(self.preload(Walk { tree, paths }, options)?.map(|walk| walk.tree))
    }

    fn preload<T: Targets>(&self, mut targets: T, options: &QueryOptions) -> Result<Preloaded<T>, AppError> {
        let strict = options.strict.unwrap_or(self.settings.preload.strict);
        let groups = group(&targets, options.force);
        let mut resolutions = HashMap::with_capacity(groups.len());
        let mut failures = Vec::new();
        let mut queries = 0;

        for (table_id, ids) in groups {
            match self.fetch_group(table_id, &ids, options, &mut queries) {
                Ok(resolution) => {
                    resolutions.insert(table_id, resolution);
                }
                Err(error) if strict => {
                    error!("Preload aborted on {}: {}", table_id, error);
                    return Err(error);
                }
                Err(error) => {
                    warn!("Preload of {} handles of {} failed: {}", ids.len(), table_id, error);
                    failures.push(GroupFailure { table_id, ids, error });
                }
            }
        }

        apply(&mut targets, &resolutions, options.force);
        debug!("Preloaded {} types with {} queries, {} failed", resolutions.len(), queries, failures.len());
        Ok(Preloaded { value: targets, failures, queries })
    }

    fn fetch_group(&self, table_id: Ulid, ids: &[Ulid], options: &QueryOptions, queries: &mut usize) -> Result<Resolution, AppError> {
        let table = self.registry.resolve_type(table_id)?;
        if table.is_virtual() {
            return Ok(Resolution::Virtual(table));
        }
        if !table.in_store {
            return Err(AppError::not_found(format!("{} (type has no live table)", table.display_name())));
        }
        let query = self.dispatcher.build_query(&table, &[Filter::ids(ids)], options)?;
        *queries += 1;
        let rows = self
            .store
            .fetch(&query)
            .map_err(|err| AppError::store(format!("preloading {} {} from `{}`", ids.len(), table.display_name(), table.table_name), err))?;
        Ok(Resolution::Rows(rows.into_iter().filter_map(|row| Some((row.id()?, row))).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn ptr(table: Ulid) -> Pointer {
        Pointer::new(Ulid::new(), table)
    }

    #[test]
    fn paths_parse_fields_and_wildcards() {
        let path: Path = "*.author.avatar".parse().unwrap();
        assert_eq!(path.steps(), &[Step::Each, Step::Field("author".into()), Step::Field("avatar".into())]);
        assert_eq!(path.to_string(), "*.author.avatar");
        assert!(matches!("a..b".parse::<Path>(), Err(AppError::InvalidPath(_))));
        assert!(matches!("".parse::<Path>(), Err(AppError::InvalidPath(_))));
    }

    #[test]
    fn walk_follows_fields_lists_and_wildcards() {
        let t = Ulid::new();
        let (a, b, c) = (ptr(t), ptr(t), ptr(t));
        let tree = Tree::list(vec![
            Tree::map(vec![("a", Tree::map(vec![("b", Tree::from(a.clone()))]))]),
            Tree::map(vec![("a", Tree::map(vec![("b", Tree::from(vec![b.clone(), c.clone()]))]))]),
            Tree::map(vec![("x", Tree::from(json!(1)))]),
        ]);
        let mut seen = Vec::new();
        walk(&tree, "*.a.b".parse::<Path>().unwrap().steps(), &mut |p| seen.push(p.id()));
        assert_eq!(seen, vec![a.id(), b.id(), c.id()]);

        seen.clear();
        walk(&tree, "a.b".parse::<Path>().unwrap().steps(), &mut |p| seen.push(p.id()));
        assert_eq!(seen.len(), 3, "field steps apply element-wise on lists");

        seen.clear();
        walk(&tree, "a.missing".parse::<Path>().unwrap().steps(), &mut |p| seen.push(p.id()));
        assert!(seen.is_empty());
    }

    #[test]
    fn grouping_dedupes_and_skips_resolved() {
        let (t1, t2) = (Ulid::new(), Ulid::new());
        let a = ptr(t1);
        let resolved = ptr(t2).with_resolved(Row::new()).unwrap();
        let targets = vec![a.clone(), a.clone(), resolved.clone(), ptr(t2)];
        let groups = group(&targets, false);
        assert_eq!(groups[&t1], vec![a.id()]);
        assert_eq!(groups[&t2].len(), 1);
        assert_eq!(group(&targets, true)[&t2].len(), 2);
    }

    fn arb_targets() -> impl Strategy<Value = (Vec<Pointer>, Vec<bool>)> {
        let tables: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        prop::collection::vec((0..3usize, any::<bool>(), any::<bool>()), 0..40).prop_map(move |cases| {
            let mut pointers = Vec::new();
            let mut found = Vec::new();
            for (table, resolved, exists) in cases {
                let p = ptr(tables[table]);
                let p = if resolved { p.with_resolved(Row::new().with("pre", true)).unwrap_or_else(|_| ptr(tables[table])) } else { p };
                pointers.push(p);
                found.push(exists);
            }
            (pointers, found)
        })
    }

    proptest! {
        #[test]
        fn collation_keeps_order_length_and_unfound_handles((pointers, found) in arb_targets()) {
            let mut resolutions: HashMap<Ulid, Resolution> = HashMap::new();
            for (p, exists) in pointers.iter().zip(&found) {
                let entry = resolutions.entry(p.table_id()).or_insert_with(|| Resolution::Rows(HashMap::new()));
                if let (Resolution::Rows(rows), true) = (entry, *exists) {
                    rows.insert(p.id(), Row::with_id(p.id()).with("loaded", true));
                }
            }
            let mut targets = pointers.clone();
            apply(&mut targets, &resolutions, false);

            prop_assert_eq!(targets.len(), pointers.len());
            for ((after, before), exists) in targets.iter().zip(&pointers).zip(&found) {
                prop_assert_eq!(after.id(), before.id());
                if before.is_resolved() {
                    prop_assert_eq!(after.resolved(), before.resolved());
                } else if *exists {
                    prop_assert_eq!(after.resolved().map(|r| r.value("loaded").clone()), Some(json!(true)));
                } else {
                    prop_assert!(!after.is_resolved());
                }
            }
        }
    }
}
