//! Graphviz export for visualizing BDDs.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{BddError, Result};
use crate::factory::BddFactory;
use crate::handle::Bdd;
use crate::types::BDD_TRUE;

impl BddFactory {
    /// Renders the given roots as a Graphviz digraph. Nodes are ranked by
    /// level; high edges are solid, low edges dashed.
    pub fn to_dot(&self, roots: &[&Bdd]) -> Result<String> {
        let engine = self.engine.borrow();
        for bdd in roots {
            if bdd.factory_id != self.id {
                return Err(BddError::CrossFactory);
            }
            engine.check_epoch(bdd.epoch)?;
        }

        let mut dot = String::new();
        let _ = writeln!(dot, "digraph bdd {{");
        let _ = writeln!(dot, "node [shape=circle, fixedsize=true];");

        let _ = writeln!(dot, "{{ rank=sink");
        let _ = writeln!(dot, "0 [shape=square, label=\"0\"];");
        let _ = writeln!(dot, "1 [shape=square, label=\"1\"];");
        let _ = writeln!(dot, "}}");

        // Collect the reachable internal nodes, grouped by level.
        let mut visited: Vec<u32> = Vec::new();
        let mut stack: Vec<u32> = roots
            .iter()
            .map(|b| b.root)
            .filter(|&n| n > BDD_TRUE)
            .collect();
        while let Some(n) = stack.pop() {
            if visited.contains(&n) {
                continue;
            }
            visited.push(n);
            for child in [engine.low(n), engine.high(n)] {
                if child > BDD_TRUE {
                    stack.push(child);
                }
            }
        }

        let mut by_level = BTreeMap::<u32, Vec<u32>>::new();
        for &n in &visited {
            by_level.entry(engine.level(n)).or_default().push(n);
        }
        for (level, nodes) in &by_level {
            let var = engine.level2var(*level).unwrap_or(*level);
            let _ = writeln!(dot, "{{ rank=same");
            for &n in nodes {
                let _ = writeln!(dot, "{} [label=<x<SUB>{}</SUB>>];", n, var);
            }
            let _ = writeln!(dot, "}}");
        }

        for &n in &visited {
            let _ = writeln!(dot, "{} -> {};", n, engine.high(n));
            let _ = writeln!(dot, "{} -> {} [style=dashed];", n, engine.low(n));
        }

        let _ = writeln!(dot, "{{ rank=source");
        for (i, bdd) in roots.iter().enumerate() {
            let _ = writeln!(dot, "r{} [shape=rect, label=\"@{}\"];", i, bdd.root);
        }
        let _ = writeln!(dot, "}}");
        for (i, bdd) in roots.iter().enumerate() {
            let _ = writeln!(dot, "r{} -> {};", i, bdd.root);
        }

        let _ = writeln!(dot, "}}");
        Ok(dot)
    }
}
