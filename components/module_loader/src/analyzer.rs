//! Dependency analysis: edges, scheduling priority, and topological order.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
struct Inner {
    /// module → its direct dependencies.
    deps: HashMap<PathBuf, HashSet<PathBuf>>,
    /// How many modules import each path.
    import_counts: HashMap<PathBuf, u32>,
    /// Shallowest depth each module was discovered at.
    depths: HashMap<PathBuf, u32>,
}

/// Shared dependency graph. Workers never write to it directly; the main
/// loop records edges as parse results arrive, and one read/write lock
/// protects all fields.
#[derive(Debug, Default)]
pub struct DependencyAnalyzer {
    inner: RwLock<Inner>,
}

impl DependencyAnalyzer {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module at `depth` (the entry is depth 0). Keeps the
    /// shallowest depth when discovered more than once.
    pub fn add_module(&self, path: &Path, depth: u32) {
        let mut inner = self.inner.write();
        inner.deps.entry(path.to_path_buf()).or_default();
        inner
            .depths
            .entry(path.to_path_buf())
            .and_modify(|d| *d = (*d).min(depth))
            .or_insert(depth);
    }

    /// Records `importer → imported` and updates the import count and depth
    /// of the imported module.
    pub fn add_edge(&self, importer: &Path, imported: &Path) {
        let mut inner = self.inner.write();
        let importer_depth = inner.depths.get(importer).copied().unwrap_or(0);
        inner
            .deps
            .entry(importer.to_path_buf())
            .or_default()
            .insert(imported.to_path_buf());
        inner.deps.entry(imported.to_path_buf()).or_default();
        *inner
            .import_counts
            .entry(imported.to_path_buf())
            .or_insert(0) += 1;
        inner
            .depths
            .entry(imported.to_path_buf())
            .and_modify(|d| *d = (*d).min(importer_depth + 1))
            .or_insert(importer_depth + 1);
    }

    /// Scheduling priority: deep modules run later, frequently imported
    /// shallow modules first. Lower is sooner.
    pub fn priority_for(&self, path: &Path) -> u32 {
        let inner = self.inner.read();
        let depth = inner.depths.get(path).copied().unwrap_or(0);
        let imports = inner.import_counts.get(path).copied().unwrap_or(0);
        (depth * 4).saturating_sub(imports.min(3))
    }

    /// Known dependency count of `path`.
    pub fn dependency_count(&self, path: &Path) -> usize {
        self.inner
            .read()
            .deps
            .get(path)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Kahn's algorithm over the recorded edges: every dependency precedes
    /// its dependents. On a cycle, `Err` carries the unprocessable modules.
    pub fn topo_order(&self) -> Result<Vec<PathBuf>, Vec<PathBuf>> {
        let inner = self.inner.read();

        // in-degree = number of unprocessed dependencies.
        let mut in_degree: HashMap<&PathBuf, usize> = HashMap::new();
        let mut dependents: HashMap<&PathBuf, Vec<&PathBuf>> = HashMap::new();
        for (module, deps) in &inner.deps {
            *in_degree.entry(module).or_insert(0) += deps.len();
            for dep in deps {
                dependents.entry(dep).or_default().push(module);
            }
        }

        let mut ready: Vec<&PathBuf> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(path, _)| *path)
            .collect();
        ready.sort();

        let mut order = Vec::with_capacity(inner.deps.len());
        while let Some(module) = ready.pop() {
            order.push(module.clone());
            if let Some(children) = dependents.get(module) {
                let mut unblocked: Vec<&PathBuf> = Vec::new();
                for child in children {
                    let degree = in_degree.get_mut(child).expect("all modules have degrees");
                    *degree -= 1;
                    if *degree == 0 {
                        unblocked.push(child);
                    }
                }
                unblocked.sort();
                // Pop order is LIFO; keep it deterministic.
                for child in unblocked.into_iter().rev() {
                    ready.push(child);
                }
            }
        }

        if order.len() < inner.deps.len() {
            let mut stuck: Vec<PathBuf> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(path, _)| path.clone())
                .collect();
            stuck.sort();
            return Err(stuck);
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_topo_dependencies_first() {
        let analyzer = DependencyAnalyzer::new();
        analyzer.add_module(&p("/entry"), 0);
        analyzer.add_edge(&p("/entry"), &p("/a"));
        analyzer.add_edge(&p("/entry"), &p("/b"));
        analyzer.add_edge(&p("/a"), &p("/shared"));
        analyzer.add_edge(&p("/b"), &p("/shared"));

        let order = analyzer.topo_order().expect("acyclic");
        let index = |path: &str| order.iter().position(|x| x == &p(path)).unwrap();
        assert!(index("/shared") < index("/a"));
        assert!(index("/shared") < index("/b"));
        assert!(index("/a") < index("/entry"));
        assert!(index("/b") < index("/entry"));
    }

    #[test]
    fn test_cycle_reported_with_members() {
        let analyzer = DependencyAnalyzer::new();
        analyzer.add_module(&p("/entry"), 0);
        analyzer.add_edge(&p("/entry"), &p("/x"));
        analyzer.add_edge(&p("/x"), &p("/y"));
        analyzer.add_edge(&p("/y"), &p("/x"));

        let stuck = analyzer.topo_order().unwrap_err();
        assert!(stuck.contains(&p("/x")));
        assert!(stuck.contains(&p("/y")));
        // The entry depends on the cycle, so it is stuck too.
        assert!(stuck.contains(&p("/entry")));
    }

    #[test]
    fn test_priority_prefers_shared_shallow_modules() {
        let analyzer = DependencyAnalyzer::new();
        analyzer.add_module(&p("/entry"), 0);
        analyzer.add_edge(&p("/entry"), &p("/popular"));
        analyzer.add_edge(&p("/entry"), &p("/deep"));
        analyzer.add_edge(&p("/deep"), &p("/deeper"));
        analyzer.add_edge(&p("/deep"), &p("/popular"));

        assert!(analyzer.priority_for(&p("/popular")) < analyzer.priority_for(&p("/deeper")));
        assert_eq!(analyzer.priority_for(&p("/entry")), 0);
    }

    #[test]
    fn test_depth_keeps_shallowest() {
        let analyzer = DependencyAnalyzer::new();
        analyzer.add_module(&p("/entry"), 0);
        analyzer.add_edge(&p("/entry"), &p("/deep"));
        analyzer.add_edge(&p("/deep"), &p("/shared"));
        // Re-discovered directly from the entry: depth drops to 1.
        analyzer.add_edge(&p("/entry"), &p("/shared"));
        assert!(analyzer.priority_for(&p("/shared")) <= analyzer.priority_for(&p("/deep")) + 4);
    }
}
