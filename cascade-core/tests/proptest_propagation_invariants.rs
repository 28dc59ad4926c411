//! Property-based invariant tests for propagation.
//!
//! Random networks of cells and sum computations are driven with random
//! writes. For any network and any write sequence:
//!
//! 1. Every computation's value equals a from-scratch evaluation.
//! 2. A single write or batch re-runs each computation at most once.
//! 3. Computations not downstream of a written cell do not re-run.
//! 4. Disposing the owner leaves no nodes or edges behind.

use std::cell::Cell;
use std::rc::Rc;

use cascade_core::{batch, computation, data, root, stats, Computation, DataCell, Disposer};
use proptest::collection::vec;
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Input {
    Cell(DataCell<i64>),
    Derived(Computation<i64>),
}

impl Input {
    fn read(&self) -> cascade_core::Result<i64> {
        match self {
            Input::Cell(cell) => Ok(cell.read()),
            Input::Derived(derived) => derived.read(),
        }
    }
}

struct Network {
    cells: Vec<DataCell<i64>>,
    derived: Vec<Computation<i64>>,
    runs: Vec<Rc<Cell<u32>>>,
    /// Input indices per computation, into `cells ++ derived`.
    wiring: Vec<Vec<usize>>,
    disposer: Disposer,
}

impl Network {
    fn build(cell_count: usize, raw_wiring: &[Vec<usize>]) -> Self {
        root(|disposer| {
            let cells: Vec<_> = (0..cell_count).map(|i| data(i as i64).unwrap()).collect();
            let mut inputs: Vec<Input> = cells.iter().cloned().map(Input::Cell).collect();
            let mut derived = Vec::new();
            let mut runs = Vec::new();
            let mut wiring = Vec::new();

            for raw in raw_wiring {
                let available = inputs.len();
                let mut picked: Vec<usize> = raw.iter().map(|i| i % available).collect();
                picked.dedup();

                let sources: Vec<Input> = picked.iter().map(|i| inputs[*i].clone()).collect();
                let count = Rc::new(Cell::new(0));
                let c = {
                    let count = count.clone();
                    computation(move || {
                        count.set(count.get() + 1);
                        let mut total = 1;
                        for source in &sources {
                            total += source.read()?;
                        }
                        Ok(total)
                    })
                    .unwrap()
                };

                inputs.push(Input::Derived(c.clone()));
                derived.push(c);
                runs.push(count);
                wiring.push(picked);
            }

            Network {
                cells,
                derived,
                runs,
                wiring,
                disposer,
            }
        })
    }

    /// Evaluate every computation from the current cell values.
    fn reference(&self) -> Vec<i64> {
        let mut values: Vec<i64> = self.cells.iter().map(DataCell::peek).collect();
        for picked in &self.wiring {
            let total = 1 + picked.iter().map(|i| values[*i]).sum::<i64>();
            values.push(total);
        }
        values.split_off(self.cells.len())
    }

    /// Which computations read `cell`, directly or transitively.
    fn downstream_of(&self, cell: usize) -> Vec<bool> {
        let mut affected = vec![false; self.cells.len()];
        affected[cell] = true;
        for picked in &self.wiring {
            let hit = picked.iter().any(|i| affected[*i]);
            affected.push(hit);
        }
        affected.split_off(self.cells.len())
    }

    fn run_counts(&self) -> Vec<u32> {
        self.runs.iter().map(|r| r.get()).collect()
    }

    fn values(&self) -> Vec<i64> {
        self.derived.iter().map(|c| c.read().unwrap()).collect()
    }
}

fn wiring_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    vec(vec(any::<usize>(), 1..4), 1..10)
}

// ═════════════════════════════════════════════════════════════════════════
// 1-3. Single writes
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn single_writes_match_reference(
        cell_count in 1usize..5,
        wiring in wiring_strategy(),
        writes in vec((any::<usize>(), -50i64..50), 1..16),
    ) {
        let network = Network::build(cell_count, &wiring);
        prop_assert_eq!(network.values(), network.reference());

        for (target, value) in writes {
            let target = target % cell_count;
            let before = network.run_counts();
            let affected = network.downstream_of(target);

            network.cells[target].write(value).unwrap();

            let after = network.run_counts();
            for (i, (b, a)) in before.iter().zip(&after).enumerate() {
                let expected = u32::from(affected[i]);
                prop_assert_eq!(a - b, expected, "computation {} ran {} times", i, a - b);
            }
            prop_assert_eq!(network.values(), network.reference());
        }

        network.disposer.dispose().unwrap();
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Batches
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn batch_reruns_each_computation_at_most_once(
        cell_count in 1usize..5,
        wiring in wiring_strategy(),
        values in vec(-50i64..50, 1..5),
    ) {
        let network = Network::build(cell_count, &wiring);
        let before = network.run_counts();

        batch(|| {
            for (cell, value) in network.cells.iter().zip(&values) {
                cell.write(*value)?;
            }
            Ok(())
        })
        .unwrap();

        for (b, a) in before.iter().zip(network.run_counts()) {
            prop_assert!(a - b <= 1);
        }
        prop_assert_eq!(network.values(), network.reference());

        network.disposer.dispose().unwrap();
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Teardown
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn dispose_releases_every_node(
        cell_count in 1usize..5,
        wiring in wiring_strategy(),
    ) {
        let baseline = stats();
        let network = Network::build(cell_count, &wiring);
        network.disposer.dispose().unwrap();
        drop(network);

        let after = stats();
        prop_assert_eq!(after.nodes, baseline.nodes);
        prop_assert_eq!(after.active_edges, baseline.active_edges);
        prop_assert_eq!(after.inactive_edges, baseline.inactive_edges);
    }
}
