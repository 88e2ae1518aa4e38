//! # Property-Based Tests
//!
//! Ordering, validation and checkpoint invariants of the controller.

use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;
use tundra_core::grid::partition;
use tundra_core::plan::fire_cycle_adjusted_years;
use tundra_core::{
    CohortId, CohortSequencer, MemorySnapshotStore, ModelStateSnapshot, RawStage,
    RelaxationKernel, RelaxationParams, RunContext, SnapshotStore, StageKind, StageSettings,
    SubsystemToggles, ToggleFlags, TundraError, snapshot_from_bytes, snapshot_to_bytes,
};

fn settings_for(stages: &[(StageKind, i64)]) -> StageSettings {
    let mut settings = StageSettings::default();
    for (kind, years) in stages {
        settings.override_years(*kind, *years);
    }
    settings
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Execution order is the canonical order restricted to enabled stages.
    #[test]
    fn plan_order_is_canonical(
        enabled in vec(any::<bool>(), 5),
        years in vec(1i64..500, 5),
    ) {
        let stages: Vec<_> = StageKind::ALL
            .iter()
            .zip(enabled.iter().zip(years.iter()))
            .filter(|(_, (on, _))| **on)
            .map(|(k, (_, y))| (*k, *y))
            .collect();
        let plan = settings_for(&stages).resolve().expect("plan");

        let kinds: Vec<_> = plan.kinds().collect();
        let expected: Vec<_> = stages.iter().map(|(k, _)| *k).collect();
        prop_assert_eq!(&kinds, &expected);
        prop_assert!(kinds.windows(2).all(|w| w[0] < w[1]));
    }

    /// Nitrogen switches without bgc never resolve.
    #[test]
    fn contradictory_toggles_always_fail(
        nfeed in any::<bool>(),
        avlnflg in any::<bool>(),
        baseline in any::<bool>(),
        dsb in any::<bool>(),
    ) {
        prop_assume!(nfeed || avlnflg || baseline);
        let flags = ToggleFlags {
            bgc: false,
            nfeed,
            avlnflg,
            baseline,
            dsb,
            ..ToggleFlags::default()
        };
        prop_assert!(matches!(
            SubsystemToggles::from_flags(flags),
            Err(TundraError::Configuration(_))
        ));

        let mut stage = RawStage { years: Some(10), ..RawStage::default() };
        stage.modules.bgc = Some(false);
        stage.modules.nfeed = Some(nfeed);
        stage.modules.avlnflg = Some(avlnflg);
        stage.modules.baseline = Some(baseline);
        let settings = StageSettings { tr: Some(stage), ..StageSettings::default() };
        prop_assert!(matches!(settings.resolve(), Err(TundraError::Configuration(_))));
    }

    /// Encoded snapshots decode to the same state and re-encode identically.
    #[test]
    fn snapshot_bytes_are_stable(
        row in 0u32..1000,
        col in 0u32..1000,
        cmt in 0u32..20,
        years_since_fire in 0u32..2000,
        leaf in 0.0f64..1e4,
    ) {
        let mut state = ModelStateSnapshot::cold_start(CohortId::new(row, col), cmt);
        state.disturbance.years_since_fire = years_since_fire;
        state.pfts[0].leaf_c = leaf;

        let bytes = snapshot_to_bytes(&state).expect("encode");
        let back = snapshot_from_bytes(&bytes).expect("decode");
        prop_assert_eq!(&back, &state);
        prop_assert_eq!(snapshot_to_bytes(&back).expect("re-encode"), bytes);
    }

    /// Stretched equilibrium lengths end two years short of a fire.
    #[test]
    fn fire_cycle_adjustment_lands_before_fire(years in 1u32..5000, fri in 3u32..500) {
        let adjusted = fire_cycle_adjusted_years(years, fri);
        if years < fri {
            prop_assert_eq!(adjusted, years);
        } else {
            prop_assert_eq!((adjusted + 2) % fri, 0);
            prop_assert!(adjusted + 2 >= years);
            prop_assert!(adjusted < years + fri);
        }
    }

    /// Striding covers every cell once and balances partitions.
    #[test]
    fn partition_covers_and_balances(n in 0usize..200, workers in 1usize..16) {
        let cells: Vec<_> = (0..n as u32).map(|i| CohortId::new(i / 10, i % 10)).collect();
        let parts = partition(&cells, workers);

        let flat: BTreeSet<_> = parts.iter().flatten().copied().collect();
        prop_assert_eq!(flat.len(), n);
        prop_assert_eq!(parts.iter().map(Vec::len).sum::<usize>(), n);
        if let (Some(max), Some(min)) = (
            parts.iter().map(Vec::len).max(),
            parts.iter().map(Vec::len).min(),
        ) {
            prop_assert!(max - min <= 1);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Splitting a span at a checkpoint gives the same terminal state as one
    /// uninterrupted stage.
    #[test]
    fn checkpoint_split_is_exact(total in 2u32..12, split_seed in any::<u32>()) {
        let split = 1 + split_seed % (total - 1);
        let kernel = RelaxationKernel::new(RelaxationParams::default()).expect("kernel");
        let cohort = CohortId::new(4, 2);
        let ctx = RunContext::default();

        let whole = settings_for(&[(StageKind::Equilibrium, i64::from(total))])
            .resolve()
            .expect("plan");
        let whole_store = MemorySnapshotStore::new();
        CohortSequencer::new(&whole, &kernel, &whole_store, &ctx).run(cohort);

        let parts = settings_for(&[
            (StageKind::Equilibrium, i64::from(split)),
            (StageKind::SpinUp, i64::from(total - split)),
        ])
        .resolve()
        .expect("plan");
        let split_store = MemorySnapshotStore::new();
        CohortSequencer::new(&parts, &kernel, &split_store, &ctx).run(cohort);

        prop_assert_eq!(
            whole_store.fetch(cohort, StageKind::Equilibrium).expect("whole"),
            split_store.fetch(cohort, StageKind::SpinUp).expect("split")
        );
    }
}
