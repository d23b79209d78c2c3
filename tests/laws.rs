//! Cross-module invariants: Boolean laws over randomized formulas,
//! hash-consing determinism, variadic reducer identities, quantification
//! duals, and garbage-collection behavior.

use netbdd::{Bdd, BddFactory, BddOp};
use num_bigint::BigUint;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use test_log::test;

fn factory(vars: usize) -> BddFactory {
    let factory = BddFactory::init(1 << 14, 1 << 12);
    factory.set_var_num(vars).unwrap();
    factory
}

/// Random formula in the style of a fuzz driver: start from literals and
/// combine random pairs with random operators.
fn random_formula(factory: &BddFactory, num_vars: usize, num_ops: usize, rng: &mut ChaCha8Rng) -> Bdd {
    let mut nodes: Vec<Bdd> = (0..num_vars as u32)
        .map(|v| {
            if rng.random_bool(0.5) {
                factory.ith_var(v).unwrap()
            } else {
                factory.nith_var(v).unwrap()
            }
        })
        .collect();

    for _ in 0..num_ops {
        let i = rng.random_range(0..nodes.len());
        let j = rng.random_range(0..nodes.len());
        if i == j {
            continue;
        }
        let result = match rng.random_range(0..4) {
            0 => nodes[i].and(&nodes[j]).unwrap(),
            1 => nodes[i].or(&nodes[j]).unwrap(),
            2 => nodes[i].xor(&nodes[j]).unwrap(),
            _ => nodes[i].imp(&nodes[j]).unwrap(),
        };
        nodes[i] = result;
    }
    nodes.swap_remove(rng.random_range(0..nodes.len()))
}

#[test]
fn boolean_laws_on_random_formulas() {
    let factory = factory(8);
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    for _ in 0..20 {
        let f = random_formula(&factory, 8, 30, &mut rng);
        let g = random_formula(&factory, 8, 30, &mut rng);
        let h = random_formula(&factory, 8, 30, &mut rng);

        // Complement laws.
        let not_f = f.not().unwrap();
        assert_eq!(f.and(&not_f).unwrap(), factory.zero());
        assert_eq!(f.or(&not_f).unwrap(), factory.one());
        assert_eq!(not_f.not().unwrap(), f);

        // Distributivity: f ∧ (g ∨ h) = (f ∧ g) ∨ (f ∧ h).
        let left = f.and(&g.or(&h).unwrap()).unwrap();
        let right = f.and(&g).unwrap().or_with(f.and(&h).unwrap()).unwrap();
        assert_eq!(left, right);

        // De Morgan.
        let lhs = f.and(&g).unwrap().not().unwrap();
        let rhs = f.not().unwrap().or_with(g.not().unwrap()).unwrap();
        assert_eq!(lhs, rhs);

        // xor as its disjunctive expansion.
        let expanded = f
            .diff(&g)
            .unwrap()
            .or_with(g.diff(&f).unwrap())
            .unwrap();
        assert_eq!(f.xor(&g).unwrap(), expanded);

        // ite(f, g, h) = (f ∧ g) ∨ (¬f ∧ h).
        let ite = f.ite(&g, &h).unwrap();
        let expansion = f
            .and(&g)
            .unwrap()
            .or_with(f.not().unwrap().and_with(h.id()).unwrap())
            .unwrap();
        assert_eq!(ite, expansion);
    }
    factory.check_consistency().unwrap();
}

#[test]
fn hash_consing_is_deterministic() {
    let factory = factory(6);
    let build = || {
        let a = factory.ith_var(0).unwrap();
        let b = factory.ith_var(3).unwrap();
        let c = factory.nith_var(5).unwrap();
        a.and(&b).unwrap().or_with(c.id()).unwrap()
    };
    // Identical construction sequences return identical handles.
    assert_eq!(build(), build());
}

#[test]
fn reducer_identities() {
    let factory = factory(6);
    assert_eq!(factory.and_all(&[]).unwrap(), factory.one());
    assert_eq!(factory.or_all(&[]).unwrap(), factory.zero());

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let operands: Vec<Bdd> = (0..8)
        .map(|_| random_formula(&factory, 6, 10, &mut rng))
        .collect();
    let refs: Vec<&Bdd> = operands.iter().collect();

    // and_all equals the sequential fold, independent of operand order.
    let folded = operands
        .iter()
        .fold(factory.one(), |acc, f| acc.and_with(f.id()).unwrap());
    assert_eq!(factory.and_all(&refs).unwrap(), folded);

    let mut shuffled: Vec<&Bdd> = refs.clone();
    shuffled.shuffle(&mut rng);
    assert_eq!(factory.and_all(&shuffled).unwrap(), folded);

    let or_folded = operands
        .iter()
        .fold(factory.zero(), |acc, f| acc.or_with(f.id()).unwrap());
    assert_eq!(factory.or_all(&refs).unwrap(), or_folded);

    // The consuming variant computes the same result.
    let copies: Vec<Bdd> = operands.iter().map(|f| f.id()).collect();
    assert_eq!(factory.and_all_free(copies).unwrap(), folded);
}

#[test]
fn thousand_operand_or_matches_de_morgan_dual() {
    let factory = factory(1000);
    let positives: Vec<Bdd> = (0..1000).map(|v| factory.ith_var(v).unwrap()).collect();
    let negatives: Vec<Bdd> = (0..1000).map(|v| factory.nith_var(v).unwrap()).collect();

    let any = factory
        .or_all(&positives.iter().collect::<Vec<_>>())
        .unwrap();
    let none = factory
        .and_all(&negatives.iter().collect::<Vec<_>>())
        .unwrap();
    assert_eq!(any.not().unwrap(), none);
    factory.check_consistency().unwrap();
}

#[test]
fn sat_count_scenario() {
    let factory = factory(3);
    let x0 = factory.ith_var(0).unwrap();
    let x1 = factory.ith_var(1).unwrap();
    let x2 = factory.ith_var(2).unwrap();

    let f = x0.and(&x1.or(&x2).unwrap()).unwrap();
    assert_eq!(f.sat_count().unwrap(), BigUint::from(3u32));
    assert_eq!(factory.one().sat_count().unwrap(), BigUint::from(8u32));
    assert_eq!(factory.zero().sat_count().unwrap(), BigUint::from(0u32));
}

#[test]
fn and_literals_builds_the_single_cube() {
    let factory = factory(3);
    let literals = [
        factory.nith_var(0).unwrap(),
        factory.ith_var(1).unwrap(),
        factory.nith_var(2).unwrap(),
    ];
    let refs: Vec<&Bdd> = literals.iter().collect();
    let cube = factory.and_literals(&refs).unwrap();

    // A three-literal cube: one path, one satisfying assignment, and
    // sat_one returns the cube itself.
    assert_eq!(cube.node_count().unwrap(), 3);
    assert_eq!(cube.sat_count().unwrap(), BigUint::from(1u32));
    assert_eq!(cube.path_count().unwrap(), BigUint::from(1u32));
    assert_eq!(cube.sat_one().unwrap(), cube);

    // Out-of-order literals are rejected.
    let bad: Vec<&Bdd> = vec![&literals[1], &literals[0]];
    assert!(factory.and_literals(&bad).is_err());
}

#[test]
fn sat_one_prefers_high() {
    let factory = factory(2);
    let x = factory.ith_var(0).unwrap();
    let y = factory.ith_var(1).unwrap();

    // x ∨ y is satisfied by x=1 alone; the high-first walk stops there.
    let f = x.or(&y).unwrap();
    let witness = f.sat_one().unwrap();
    assert_eq!(witness, x);
    // The witness implies the function.
    assert_eq!(witness.imp(&f).unwrap(), factory.one());
}

#[test]
fn quantification_laws() {
    let factory = factory(8);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let cube = factory.make_set(&[1, 4, 6]).unwrap();

    for _ in 0..10 {
        let f = random_formula(&factory, 8, 25, &mut rng);
        let g = random_formula(&factory, 8, 25, &mut rng);

        // exist over the empty set is the identity.
        assert_eq!(f.exist(&factory.one()).unwrap(), f);

        // forall(f, c) = ¬exist(¬f, c).
        let forall = f.forall(&cube).unwrap();
        let dual = f.not().unwrap().exist(&cube).unwrap().not().unwrap();
        assert_eq!(forall, dual);

        // relprod fuses and + exist.
        let fused = f.relprod(&g, &cube).unwrap();
        let separate = f.and(&g).unwrap().exist(&cube).unwrap();
        assert_eq!(fused, separate);

        // Quantified variables leave the support: quantifying them again
        // over the support cube removes nothing.
        let support = f.exist(&cube).unwrap().support().unwrap();
        assert_eq!(support.exist(&cube).unwrap(), support);
    }
}

#[test]
fn restrict_matches_compose_with_constants() {
    let factory = factory(6);
    let mut rng = ChaCha8Rng::seed_from_u64(23);

    for _ in 0..10 {
        let f = random_formula(&factory, 6, 20, &mut rng);

        // Restricting v2=1, v4=0 equals composing the constants in.
        let cube = factory
            .and_literals(&[
                &factory.ith_var(2).unwrap(),
                &factory.nith_var(4).unwrap(),
            ])
            .unwrap();
        let restricted = f.restrict(&cube).unwrap();
        let composed = f
            .compose(2, &factory.one())
            .unwrap()
            .compose(4, &factory.zero())
            .unwrap();
        assert_eq!(restricted, composed);
    }

    // restrict demands a cube.
    let f = factory.ith_var(0).unwrap();
    let not_a_cube = factory
        .ith_var(1)
        .unwrap()
        .or(&factory.ith_var(2).unwrap())
        .unwrap();
    assert!(f.restrict(&not_a_cube).is_err());
}

#[test]
fn compose_identity_and_replace_agreement() {
    let factory = factory(6);
    let mut rng = ChaCha8Rng::seed_from_u64(31);

    for _ in 0..10 {
        let f = random_formula(&factory, 3, 15, &mut rng);

        // Composing a variable with itself changes nothing.
        assert_eq!(f.compose(1, &factory.ith_var(1).unwrap()).unwrap(), f);

        // Renaming 0..3 to the fresh variables 3..6 via replace equals the
        // compose chain (fresh targets cannot capture).
        let pairing = factory.get_pair(&[(0, 3), (1, 4), (2, 5)]).unwrap();
        let renamed = f.replace(&pairing).unwrap();
        let composed = f
            .compose(0, &factory.ith_var(3).unwrap())
            .unwrap()
            .compose(1, &factory.ith_var(4).unwrap())
            .unwrap()
            .compose(2, &factory.ith_var(5).unwrap())
            .unwrap();
        assert_eq!(renamed, composed);
    }
}

#[test]
fn gc_restores_node_count_baseline() {
    let factory = factory(10);
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    // Retained structure.
    let kept = random_formula(&factory, 10, 40, &mut rng);
    factory.gc();
    let baseline = factory.get_node_num();

    // Pile up garbage and drop it all.
    for _ in 0..50 {
        let garbage = random_formula(&factory, 10, 40, &mut rng);
        garbage.free();
    }
    assert!(factory.get_node_num() >= baseline);

    factory.gc();
    assert_eq!(factory.get_node_num(), baseline);
    factory.check_consistency().unwrap();

    // The retained handle still works.
    assert_eq!(kept.not().unwrap().not().unwrap(), kept);
}

#[test]
fn gc_with_no_garbage_is_idempotent() {
    let factory = factory(4);
    let x = factory.ith_var(0).unwrap();
    let y = factory.ith_var(1).unwrap();
    let _kept = x.and(&y).unwrap();

    factory.gc();
    let nodes = factory.get_node_num();
    let runs = factory.gc_stats().num;

    factory.gc();
    assert_eq!(factory.get_node_num(), nodes);
    assert_eq!(factory.gc_stats().num, runs + 1);
    factory.check_consistency().unwrap();
}

#[test]
fn table_grows_under_pressure() {
    // Start from the smallest table; 64 distinct 12-bit cubes need several
    // hundred nodes, forcing repeated collect-then-grow cycles.
    let factory = BddFactory::init(64, 64);
    factory.set_var_num(12).unwrap();
    let vars: Vec<u32> = (0..12).collect();

    let retained: Vec<Bdd> = (0..64)
        .map(|value| factory.build_cube(value, &vars).unwrap())
        .collect();

    assert!(factory.get_node_table_size() > 64);
    assert!(factory.gc_stats().num >= 1);
    factory.check_consistency().unwrap();

    // Everything retained is still intact and distinct.
    for (value, cube) in retained.iter().enumerate() {
        assert_eq!(cube.sat_count().unwrap(), BigUint::from(1u32));
        assert_eq!(cube.not().unwrap().not().unwrap(), *cube);
        for other in &retained[..value] {
            assert_ne!(cube, other);
        }
    }
}

#[test]
fn support_and_counters() {
    let factory = factory(5);
    let x = factory.ith_var(0).unwrap();
    let z = factory.ith_var(4).unwrap();
    let f = x.xor(&z).unwrap();

    assert_eq!(f.support().unwrap(), factory.make_set(&[0, 4]).unwrap());
    // Two satisfying paths; 2 * 2^3 assignments over 5 variables.
    assert_eq!(f.path_count().unwrap(), BigUint::from(2u32));
    assert_eq!(f.sat_count().unwrap(), BigUint::from(16u32));

    let stats = factory.cache_stats();
    assert!(stats.unique_access > 0);

    let generic = x.apply(&z, BddOp::Xor).unwrap();
    assert_eq!(generic, f);
}
