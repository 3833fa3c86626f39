//! Property tests across algorithms

use std::sync::Arc;

use gossim_apps::{
    agg_estimate, default_registry, Clouds, Drg, DrgMode, FlowUpdating, DRG, FLOW_UPDATING, PUSH_PULL,
    PUSH_SUM,
};
use gossim_core::{Decimal, MapConfig, MathContext, NodeId, NullReport, SimRng};
use gossim_engine::{
    AggregateFunction, AppSpawner, ChannelConfig, ComEngine, EngineConfig, PhaseOrder, Topology,
};
use proptest::prelude::*;

fn connected_topology(nodes: usize, density: f64, seed: u64) -> Topology {
    let mut topology = Topology::random(nodes, density, &mut SimRng::new(seed));
    // a line underneath keeps it connected
    for i in 1..nodes {
        topology.add_edge(NodeId::from_index(i - 1), NodeId::from_index(i));
    }
    topology
}

fn run(algorithm: &str, topology: &Topology, config: EngineConfig, source: MapConfig, seed: u64) -> ComEngine {
    let constructor = default_registry().get(algorithm).unwrap();
    let mut engine = ComEngine::new(topology, None, config, 0, SimRng::new(seed));
    engine
        .install(
            AppSpawner::new(constructor, algorithm, Arc::new(source)),
            &mut NullReport,
        )
        .unwrap();
    engine.run(&mut NullReport).unwrap();
    engine
}

proptest! {
    /// In the synchronous model the order in which nodes take their turn
    /// within a phase does not change the outcome, random draws included.
    #[test]
    fn prop_sync_rounds_ignore_node_order(
        algorithm in prop::sample::select(vec![FLOW_UPDATING, DRG, PUSH_SUM, PUSH_PULL]),
        nodes in 2usize..9,
        density in 0.1f64..0.8,
        pg in 0.1f64..0.9,
        loss in 0.0f64..0.3,
        select_one in any::<bool>(),
        seed in any::<u64>(),
        shuffle_seed in any::<u64>(),
    ) {
        let topology = connected_topology(nodes, density, seed);
        let values: Vec<String> = (0..nodes).map(|i| ((i * 7919) % 101).to_string()).collect();
        let source = || {
            MapConfig::new()
                .with(algorithm, "initValues", values.join(";"))
                .with(FLOW_UPDATING, "knowNeighborsInitValues", true)
                .with(FLOW_UPDATING, "selectOne", select_one)
                .with(DRG, "pg", pg)
                .with(DRG, "msgTimeout", 1)
                .with(PUSH_SUM, "share", 0.5)
        };
        let config = EngineConfig::synchronous()
            .with_channel(ChannelConfig::lossy(loss))
            .with_max_ticks(25);

        let ascending = run(algorithm, &topology, config.clone(), source(), seed);
        let shuffled = run(
            algorithm,
            &topology,
            config.with_phase_order(PhaseOrder::Shuffled { seed: shuffle_seed }),
            source(),
            seed,
        );

        prop_assert_eq!(ascending.app_states(), shuffled.app_states());
        prop_assert_eq!(ascending.channel_totals(), shuffled.channel_totals());
        if algorithm == FLOW_UPDATING {
            for i in 0..nodes {
                let id = NodeId::from_index(i);
                let a = ascending.app::<FlowUpdating>(id).unwrap();
                let b = shuffled.app::<FlowUpdating>(id).unwrap();
                prop_assert_eq!(a.neighbors(), b.neighbors());
            }
        }
    }

    /// A DRG member either hears the group average or gives up once its
    /// wait timer runs out, and every membership is accounted once.
    #[test]
    fn prop_drg_membership_is_bounded(
        nodes in 2usize..10,
        density in 0.1f64..0.9,
        pg in 0.05f64..1.0,
        loss in 0.0f64..0.5,
        msg_timeout in 1u64..4,
        sync in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let topology = connected_topology(nodes, density, seed);
        let source = MapConfig::new()
            .with(DRG, "initValue", "uniform;0;100")
            .with(DRG, "pg", pg)
            .with(DRG, "msgTimeout", msg_timeout);
        let config = if sync {
            EngineConfig::synchronous()
        } else {
            EngineConfig::asynchronous()
        };
        let config = config
            .with_channel(ChannelConfig::lossy(loss))
            .with_max_ticks(60);
        let constructor = default_registry().get(DRG).unwrap();
        let mut engine = ComEngine::new(&topology, None, config, 0, SimRng::new(seed));
        engine
            .install(AppSpawner::new(constructor, DRG, Arc::new(source)), &mut NullReport)
            .unwrap();

        let wait = 3 * msg_timeout + 1;
        while let Some(now) = engine.advance(&mut NullReport).unwrap() {
            for i in 0..nodes {
                let app = engine.app::<Drg>(NodeId::from_index(i)).unwrap();
                if let Some(since) = app.member_since() {
                    prop_assert!(now.since(since) <= wait, "node {} member since {} at {}", i, since, now);
                }
            }
        }

        for i in 0..nodes {
            let app = engine.app::<Drg>(NodeId::from_index(i)).unwrap();
            let counters = app.counters();
            let member = u64::from(app.mode() == DrgMode::Member);
            prop_assert_eq!(
                counters.joins,
                counters.joins_completed + counters.joins_abandoned + member
            );
        }
    }

    /// Every DRG round a node leads ends exactly once, completed or
    /// abandoned, unless it is still running.
    #[test]
    fn prop_drg_rounds_end_once(
        nodes in 2usize..10,
        density in 0.1f64..0.9,
        pg in 0.05f64..1.0,
        loss in 0.0f64..0.3,
        sync in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let topology = connected_topology(nodes, density, seed);
        let source = MapConfig::new()
            .with(DRG, "initValue", "uniform;0;100")
            .with(DRG, "pg", pg)
            .with(DRG, "msgTimeout", 1);
        let config = if sync {
            EngineConfig::synchronous()
        } else {
            EngineConfig::asynchronous()
        };
        let config = config
            .with_channel(ChannelConfig::lossy(loss))
            .with_max_ticks(60);
        let engine = run(DRG, &topology, config, source, seed);

        for i in 0..nodes {
            let app = engine.app::<Drg>(NodeId::from_index(i)).unwrap();
            let counters = app.counters();
            let running = u64::from(app.mode() == DrgMode::Leader);
            prop_assert_eq!(
                counters.rounds_led,
                counters.rounds_completed + counters.rounds_abandoned + running
            );
        }
    }

    /// Disjoint clouds of the requested size, whatever the repetition
    #[test]
    fn prop_clouds_partition(
        node_count in 1usize..200,
        count in 1usize..10,
        size in 1usize..10,
        repetition in 0usize..50,
    ) {
        prop_assume!(count * size <= node_count);
        let clouds = Clouds::assign(node_count, count, size, repetition).unwrap();
        let mut members = vec![0usize; count];
        for node in 0..node_count {
            if let Some(cloud) = clouds.cloud_of(node) {
                prop_assert!(cloud < count);
                members[cloud] += 1;
            }
        }
        prop_assert!(members.iter().all(|m| *m == size));
    }

    #[test]
    fn prop_count_inverts_estimate(estimate in 1u64..1_000_000, clouds in 1u64..20) {
        let math = MathContext::default();
        let value = Decimal::new(estimate as i64, 6);
        let count = agg_estimate(AggregateFunction::Count, value, clouds, &math).unwrap();
        let back = math.mul(count, value).unwrap();
        prop_assert!((back - Decimal::from(clouds)).abs() < Decimal::new(1, 18));
        prop_assert_eq!(
            agg_estimate(AggregateFunction::Avg, value, clouds, &math).unwrap(),
            value
        );
    }
}
